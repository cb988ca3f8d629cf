//! Quality scoring for validated model outputs.
//!
//! Scores are on a 0-10 scale. An attempt scoring at least
//! [`QUALITY_THRESHOLD`] is accepted; anything else earns exactly
//! [`MAX_RETRIES`] more attempt.

use serde_json::Value;

use super::template::{OutputFormat, PromptTemplate, element_count};
use crate::errors::PromptError;
use crate::repair::RepairStage;

use super::registry::Execution;

/// Minimum score for an output to be accepted and cached.
pub const QUALITY_THRESHOLD: f64 = 7.0;

/// Additional attempts after a non-accepted first attempt.
pub const MAX_RETRIES: u32 = 1;

/// A validated output waiting to be scored.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub template: &'a PromptTemplate,
    pub raw: &'a str,
    pub output: &'a Value,
    /// `None` for text templates.
    pub repair_stage: Option<RepairStage>,
}

/// Scores an output in [0, 10].
pub trait QualityEvaluator: Send + Sync {
    fn score(&self, candidate: &Candidate<'_>) -> f64;
}

/// Result of one attempt at executing a template.
#[derive(Debug)]
pub enum AttemptOutcome {
    Accepted(Execution),
    BelowThreshold(Execution),
    Invalid(PromptError),
    ModelFailed(PromptError),
}

impl AttemptOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AttemptOutcome::Accepted(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Accepted(_) => "accepted",
            AttemptOutcome::BelowThreshold(_) => "below-threshold",
            AttemptOutcome::Invalid(_) => "invalid",
            AttemptOutcome::ModelFailed(_) => "model-failed",
        }
    }

    pub fn into_result(self) -> Result<Execution, PromptError> {
        match self {
            AttemptOutcome::Accepted(exec) | AttemptOutcome::BelowThreshold(exec) => Ok(exec),
            AttemptOutcome::Invalid(err) | AttemptOutcome::ModelFailed(err) => Err(err),
        }
    }
}

/// Default evaluator: penalizes heavy repair, bare-minimum structure and
/// very short output.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEvaluator;

impl HeuristicEvaluator {
    fn stage_penalty(stage: Option<RepairStage>) -> f64 {
        match stage {
            None | Some(RepairStage::Direct) => 0.0,
            Some(RepairStage::Normalized) => 1.0,
            Some(RepairStage::Balanced) => 2.5,
            Some(RepairStage::Partial) => 5.0,
        }
    }
}

impl QualityEvaluator for HeuristicEvaluator {
    fn score(&self, candidate: &Candidate<'_>) -> f64 {
        let mut score = 10.0 - Self::stage_penalty(candidate.repair_stage);

        match candidate.template.output {
            OutputFormat::Json => {
                // Meeting a minimum exactly suggests the model did the least it could.
                for (field, &min) in &candidate.template.validation.min_counts {
                    let found = candidate.output.get(field).map(element_count).unwrap_or(0);
                    if min > 0 && found == min {
                        score -= 0.5;
                    }
                }
                if candidate.raw.trim().len() < 20 {
                    score -= 3.0;
                }
            }
            OutputFormat::Text => {
                if candidate.raw.trim().chars().count() < 40 {
                    score -= 4.0;
                }
            }
        }

        score.clamp(0.0, 10.0)
    }
}
