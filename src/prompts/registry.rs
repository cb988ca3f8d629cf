//! Template registry with a fingerprinted execution cache and quality-gated
//! retry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::quality::{
    AttemptOutcome, Candidate, HeuristicEvaluator, MAX_RETRIES, QUALITY_THRESHOLD,
    QualityEvaluator,
};
use super::template::{OutputFormat, PromptTemplate, Variables};
use crate::errors::PromptError;
use crate::llm::{LanguageModel, RenderedPrompt};
use crate::repair::{self, RepairStage};

/// A validated, scored template execution.
#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    pub prompt_id: String,
    /// Parsed output for json templates, a JSON string for text templates.
    pub output: Value,
    pub raw: String,
    pub quality: f64,
    pub from_cache: bool,
    /// Model invocations it took, counting the failed ones.
    pub attempts: u32,
    pub repair_stage: Option<RepairStage>,
}

/// Cache key for a template execution: SHA-256 over the template id, its
/// version and the canonical (sorted-key) JSON encoding of the variables.
///
/// Bumping a template's version on re-registration retires its cached
/// outputs.
pub fn fingerprint(prompt_id: &str, version: u32, vars: &Variables) -> String {
    let canonical = serde_json::to_string(vars).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(prompt_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(version.to_be_bytes());
    hasher.update(canonical.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

pub struct PromptRegistry {
    templates: RwLock<HashMap<String, Arc<PromptTemplate>>>,
    cache: Mutex<HashMap<String, Execution>>,
    model: Arc<dyn LanguageModel>,
    evaluator: Arc<dyn QualityEvaluator>,
    threshold: f64,
}

impl std::fmt::Debug for PromptRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptRegistry")
            .field("templates", &self.ids())
            .field("model", &self.model.name())
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl PromptRegistry {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            templates: RwLock::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
            model,
            evaluator: Arc::new(HeuristicEvaluator),
            threshold: QUALITY_THRESHOLD,
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn QualityEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn model(&self) -> &Arc<dyn LanguageModel> {
        &self.model
    }

    /// Store a template under its id, replacing any previous one.
    pub fn register(&self, template: PromptTemplate) {
        let mut templates = self
            .templates
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if templates
            .insert(template.id.clone(), Arc::new(template))
            .is_some()
        {
            tracing::debug!("replaced existing prompt template");
        }
    }

    pub fn get(&self, prompt_id: &str) -> Option<Arc<PromptTemplate>> {
        self.templates
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(prompt_id)
            .cloned()
    }

    /// Registered template ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .templates
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub async fn cache_len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    /// Execute a template: cache lookup, render, invoke, repair, validate,
    /// score, and retry once if the first attempt is not accepted.
    pub async fn execute(
        &self,
        prompt_id: &str,
        vars: &Variables,
    ) -> Result<Execution, PromptError> {
        let template = self
            .get(prompt_id)
            .ok_or_else(|| PromptError::UnknownPrompt(prompt_id.to_string()))?;

        let key = fingerprint(prompt_id, template.version, vars);
        if let Some(hit) = self.cache.lock().await.get(&key) {
            tracing::debug!(prompt_id, "prompt cache hit");
            let mut hit = hit.clone();
            hit.from_cache = true;
            return Ok(hit);
        }

        let rendered = template.render(vars)?;

        let mut attempt = 1;
        let outcome = loop {
            let outcome = self.attempt(&template, &rendered, attempt).await;
            if outcome.is_accepted() || attempt > MAX_RETRIES {
                break outcome;
            }
            tracing::warn!(
                prompt_id,
                attempt,
                outcome = outcome.label(),
                "prompt attempt not accepted, retrying"
            );
            attempt += 1;
        };

        let execution = outcome.into_result()?;
        if execution.quality >= self.threshold {
            self.cache.lock().await.insert(key, execution.clone());
        } else {
            tracing::warn!(
                prompt_id,
                quality = execution.quality,
                threshold = self.threshold,
                "returning below-threshold output without caching"
            );
        }
        Ok(execution)
    }

    async fn attempt(
        &self,
        template: &PromptTemplate,
        rendered: &RenderedPrompt,
        attempt: u32,
    ) -> AttemptOutcome {
        let raw = match self.model.invoke(rendered, &template.params).await {
            Ok(raw) => raw,
            Err(e) => return AttemptOutcome::ModelFailed(e.into()),
        };

        let (output, repair_stage) = match template.output {
            OutputFormat::Json => {
                let repaired = repair::repair(&raw);
                if repaired.stage != RepairStage::Direct {
                    tracing::debug!(
                        prompt_id = %template.id,
                        stage = repaired.stage.as_str(),
                        "repaired model output"
                    );
                }
                (repaired.value, Some(repaired.stage))
            }
            OutputFormat::Text => (Value::String(raw.clone()), None),
        };

        let violations = template.validate(&output);
        if !violations.is_empty() {
            return AttemptOutcome::Invalid(PromptError::Validation {
                prompt_id: template.id.clone(),
                violations,
            });
        }

        let quality = self.evaluator.score(&Candidate {
            template,
            raw: &raw,
            output: &output,
            repair_stage,
        });

        let execution = Execution {
            prompt_id: template.id.clone(),
            output,
            raw,
            quality,
            from_cache: false,
            attempts: attempt,
            repair_stage,
        };
        if quality >= self.threshold {
            AttemptOutcome::Accepted(execution)
        } else {
            AttemptOutcome::BelowThreshold(execution)
        }
    }
}
