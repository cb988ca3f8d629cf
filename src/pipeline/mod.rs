//! Multi-phase artifact pipeline.
//!
//! Five strictly ordered phases turn a request into an application:
//!
//! | Phase | Produces | Model calls |
//! |---|---|---|
//! | architecture | [`Blueprint`] | `blueprint.<domain>` via the registry, `analysis` as fallback |
//! | design | [`DesignSystem`] | one |
//! | development | source [`FileSet`] | one per root/component/page |
//! | review | [`ReviewReport`] | one |
//! | testing | test [`FileSet`] | one e2e + one per component |
//!
//! Any phase error aborts the run with [`PipelineError::PhaseFailed`]; no
//! partial file set is returned.

pub mod artifacts;
pub mod prompts;

use std::sync::Arc;

use anyhow::{Context, Result, bail};

use crate::classifier::{Domain, DomainClassifier};
use crate::errors::PipelineError;
use crate::llm::{LanguageModel, ModelParams, RenderedPrompt};
use crate::prompts::{PromptRegistry, Variables, blueprint_id};
use crate::repair::parse_with_fix;

pub use artifacts::{
    AppBundle, Blueprint, DesignSystem, DomainBlueprint, FileCategory, FileSet, GeneratedFile,
    PipelineStats, ReviewReport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Architecture,
    Design,
    Development,
    Review,
    Testing,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Architecture,
        Phase::Design,
        Phase::Development,
        Phase::Review,
        Phase::Testing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Architecture => "architecture",
            Phase::Design => "design",
            Phase::Development => "development",
            Phase::Review => "review",
            Phase::Testing => "testing",
        }
    }

    /// Zero-based position in [`Phase::ALL`].
    pub fn index(&self) -> usize {
        match self {
            Phase::Architecture => 0,
            Phase::Design => 1,
            Phase::Development => 2,
            Phase::Review => 3,
            Phase::Testing => 4,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    Started(Phase),
    Finished(Phase),
}

/// Receives phase start/finish notifications during a run.
pub trait PhaseObserver: Send + Sync {
    fn on_phase(&self, event: PhaseEvent);
}

impl<F> PhaseObserver for F
where
    F: Fn(PhaseEvent) + Send + Sync,
{
    fn on_phase(&self, event: PhaseEvent) {
        self(event)
    }
}

pub struct AppPipeline {
    registry: Arc<PromptRegistry>,
    model: Arc<dyn LanguageModel>,
    classifier: DomainClassifier,
    params: ModelParams,
    apply_review_fixes: bool,
}

impl AppPipeline {
    /// Uses the registry's model for the direct phase calls.
    pub fn new(registry: Arc<PromptRegistry>, classifier: DomainClassifier) -> Self {
        let model = registry.model().clone();
        Self {
            registry,
            model,
            classifier,
            params: ModelParams::default(),
            apply_review_fixes: false,
        }
    }

    pub fn with_params(mut self, params: ModelParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_review_fixes(mut self, apply: bool) -> Self {
        self.apply_review_fixes = apply;
        self
    }

    pub async fn generate_app(&self, prompt: &str) -> Result<AppBundle, PipelineError> {
        self.generate_app_with_progress(prompt, &|_: PhaseEvent| {})
            .await
    }

    pub async fn generate_app_with_progress(
        &self,
        prompt: &str,
        observer: &dyn PhaseObserver,
    ) -> Result<AppBundle, PipelineError> {
        let fail = |phase: Phase| move |e: anyhow::Error| PipelineError::phase(phase.as_str(), e);

        self.begin(observer, Phase::Architecture);
        let (domain, blueprint) = self
            .architecture(prompt)
            .await
            .map_err(fail(Phase::Architecture))?;
        self.finish(observer, Phase::Architecture);

        self.begin(observer, Phase::Design);
        let design_system = self.design(&blueprint).await.map_err(fail(Phase::Design))?;
        self.finish(observer, Phase::Design);

        self.begin(observer, Phase::Development);
        let mut files = self
            .development(&blueprint, &design_system)
            .await
            .map_err(fail(Phase::Development))?;
        self.finish(observer, Phase::Development);

        self.begin(observer, Phase::Review);
        let review = self
            .review(&blueprint, &mut files)
            .await
            .map_err(fail(Phase::Review))?;
        self.finish(observer, Phase::Review);

        self.begin(observer, Phase::Testing);
        let tests = self
            .testing(&blueprint, &files)
            .await
            .map_err(fail(Phase::Testing))?;
        self.finish(observer, Phase::Testing);

        files.merge(tests);
        let stats = PipelineStats::compute(&blueprint, &files, &review);
        tracing::info!(
            domain = %domain,
            files = stats.total_files,
            review_score = stats.review_score,
            "pipeline finished"
        );

        Ok(AppBundle {
            domain,
            blueprint,
            design_system,
            files,
            review,
            stats,
        })
    }

    fn begin(&self, observer: &dyn PhaseObserver, phase: Phase) {
        tracing::info!(phase = phase.as_str(), "phase started");
        observer.on_phase(PhaseEvent::Started(phase));
    }

    fn finish(&self, observer: &dyn PhaseObserver, phase: Phase) {
        tracing::info!(phase = phase.as_str(), "phase finished");
        observer.on_phase(PhaseEvent::Finished(phase));
    }

    async fn call(&self, prompt: &RenderedPrompt) -> Result<String> {
        self.model
            .invoke(prompt, &self.params)
            .await
            .with_context(|| format!("model call '{}' failed", prompt.task))
    }

    async fn call_for_code(&self, prompt: &RenderedPrompt, path: &str) -> Result<String> {
        let code = prompts::strip_code_fences(&self.call(prompt).await?);
        if code.is_empty() {
            bail!("model returned no code for {}", path);
        }
        Ok(code)
    }

    // ── Phases ──────────────────────────────────────────────────────

    async fn architecture(&self, prompt: &str) -> Result<(Domain, Blueprint)> {
        let domain = self.classifier.detect(prompt);
        let vars = Variables::from([("prompt".to_string(), prompt.to_string())]);

        let value = match self.registry.execute(&blueprint_id(domain), &vars).await {
            Ok(execution) => execution.output,
            Err(e) => {
                tracing::warn!(domain = %domain, error = %e, "blueprint template failed, falling back to generic analysis");
                let raw = self.call(&prompts::analysis(prompt, domain)).await?;
                parse_with_fix(&raw)
            }
        };

        let blueprint = Blueprint::from_value(domain, &value)?;
        Ok((domain, blueprint))
    }

    async fn design(&self, blueprint: &Blueprint) -> Result<DesignSystem> {
        let raw = self.call(&prompts::design(blueprint)).await?;
        Ok(DesignSystem::from_value(&parse_with_fix(&raw)))
    }

    async fn development(&self, blueprint: &Blueprint, design: &DesignSystem) -> Result<FileSet> {
        let mut files = FileSet::new();

        let app = self
            .call_for_code(&prompts::root_component(blueprint, design), "src/App.tsx")
            .await?;
        files.insert("src/App.tsx", app);

        for name in &blueprint.components {
            let path = format!("src/components/{}.tsx", name);
            let code = self
                .call_for_code(&prompts::component(blueprint, design, name), &path)
                .await?;
            files.insert(path, code);
        }

        for name in &blueprint.pages {
            let path = format!("src/pages/{}.tsx", name);
            let code = self
                .call_for_code(&prompts::page(blueprint, design, name), &path)
                .await?;
            files.insert(path, code);
        }

        files.insert("src/theme.json", design.to_theme_json());
        Ok(files)
    }

    async fn review(&self, blueprint: &Blueprint, files: &mut FileSet) -> Result<ReviewReport> {
        let raw = self.call(&prompts::review(blueprint, files)).await?;
        let report = ReviewReport::from_value(&parse_with_fix(&raw));

        if self.apply_review_fixes {
            let mut applied = 0;
            for (path, content) in &report.fixes {
                if files.contains(path) {
                    files.insert(path, content.clone());
                    applied += 1;
                } else {
                    tracing::debug!(path = %path, "ignoring review fix for unknown file");
                }
            }
            tracing::info!(applied, "applied review fixes");
        }

        Ok(report)
    }

    async fn testing(&self, blueprint: &Blueprint, files: &FileSet) -> Result<FileSet> {
        let mut tests = FileSet::new();

        let e2e = self
            .call_for_code(&prompts::e2e_tests(blueprint), "tests/e2e/app.spec.ts")
            .await?;
        tests.insert("tests/e2e/app.spec.ts", e2e);

        for name in &blueprint.components {
            let source = files
                .get(&format!("src/components/{}.tsx", name))
                .unwrap_or_default();
            let path = format!("tests/unit/{}.test.tsx", name);
            let code = self
                .call_for_code(&prompts::unit_tests(name, source), &path)
                .await?;
            tests.insert(path, code);
        }

        tests.insert("tests/a11y/accessibility.spec.ts", prompts::ACCESSIBILITY_SUITE);
        Ok(tests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ModelError;
    use crate::llm::ScriptedModel;
    use crate::prompts::register_builtins;
    use std::sync::Mutex;

    fn pipeline_with(model: ScriptedModel) -> (Arc<ScriptedModel>, AppPipeline) {
        let model = Arc::new(model);
        let registry = Arc::new(PromptRegistry::new(model.clone()));
        register_builtins(&registry, ModelParams::default());
        (model, AppPipeline::new(registry, DomainClassifier::default()))
    }

    #[tokio::test]
    async fn test_demo_run_produces_full_file_set() {
        let (model, pipeline) = pipeline_with(ScriptedModel::demo());
        let bundle = pipeline
            .generate_app("an online shop selling sneakers")
            .await
            .unwrap();

        assert_eq!(bundle.domain, Domain::Ecommerce);
        let paths = bundle.files.paths();
        assert_eq!(paths[0], "src/App.tsx");
        assert!(paths.contains(&"src/components/ProductCard.tsx"));
        assert!(paths.contains(&"src/pages/Checkout.tsx"));
        assert!(paths.contains(&"src/theme.json"));
        assert!(paths.contains(&"tests/e2e/app.spec.ts"));
        assert!(paths.contains(&"tests/unit/ProductCard.test.tsx"));
        assert!(paths.contains(&"tests/a11y/accessibility.spec.ts"));

        // 1 root + 4 components + 3 pages + theme + e2e + 4 unit + a11y
        assert_eq!(bundle.stats.total_files, 15);
        assert_eq!(bundle.stats.component_files, 4);
        assert_eq!(bundle.stats.page_files, 3);
        assert_eq!(bundle.stats.test_files, 6);
        assert_eq!(bundle.stats.review_score, 86);

        // blueprint + design + 8 code + review + e2e + 4 unit
        assert_eq!(model.call_count(), 16);
    }

    #[tokio::test]
    async fn test_observer_sees_phases_in_order() {
        let (_, pipeline) = pipeline_with(ScriptedModel::demo());
        let events = Mutex::new(Vec::new());
        pipeline
            .generate_app_with_progress("saas billing for teams", &|e: PhaseEvent| {
                events.lock().unwrap().push(e)
            })
            .await
            .unwrap();

        let events = events.into_inner().unwrap();
        let expected: Vec<PhaseEvent> = Phase::ALL
            .iter()
            .flat_map(|p| [PhaseEvent::Started(*p), PhaseEvent::Finished(*p)])
            .collect();
        assert_eq!(events, expected);
    }

    #[tokio::test]
    async fn test_blueprint_failure_falls_back_to_analysis() {
        let model = ScriptedModel::from_fn(|prompt| {
            if prompt.task.starts_with("blueprint.") {
                Err(ModelError::Stream("template down".into()))
            } else if prompt.task == "analysis" {
                Ok(r#"{"name": "Fallback", "components": ["Header"], "pages": []}"#.into())
            } else {
                Ok(ScriptedModel::demo_text(&prompt.task))
            }
        });
        let (model, pipeline) = pipeline_with(model);
        let bundle = pipeline.generate_app("a waitlist landing page").await.unwrap();

        assert_eq!(bundle.blueprint.name, "Fallback");
        assert_eq!(bundle.blueprint.pages, vec!["Home"]);
        let tasks = model.tasks();
        assert_eq!(tasks[0], "blueprint.landing");
        assert_eq!(tasks[1], "blueprint.landing");
        assert_eq!(tasks[2], "analysis");
    }

    #[tokio::test]
    async fn test_review_failure_aborts_without_files() {
        let model = ScriptedModel::from_fn(|prompt| {
            if prompt.task == "review" {
                Err(ModelError::Stream("reviewer crashed".into()))
            } else {
                Ok(ScriptedModel::demo_text(&prompt.task))
            }
        });
        let (model, pipeline) = pipeline_with(model);
        let err = pipeline.generate_app("admin dashboard").await.unwrap_err();

        let PipelineError::PhaseFailed { phase, .. } = &err;
        assert_eq!(*phase, "review");
        assert!(format!("{:#}", anyhow::Error::new(err)).contains("reviewer crashed"));
        assert!(!model.tasks().iter().any(|t| t.starts_with("test:")));
    }

    #[tokio::test]
    async fn test_empty_code_fails_development() {
        let model = ScriptedModel::from_fn(|prompt| {
            if prompt.task == "code:App" {
                Ok("```tsx\n```".into())
            } else {
                Ok(ScriptedModel::demo_text(&prompt.task))
            }
        });
        let (_, pipeline) = pipeline_with(model);
        let err = pipeline.generate_app("marketing homepage").await.unwrap_err();
        assert!(err.to_string().starts_with("development phase failed"));
    }

    #[tokio::test]
    async fn test_review_fixes_only_applied_when_enabled() {
        let responder = |prompt: &RenderedPrompt| -> Result<String, ModelError> {
            if prompt.task == "review" {
                Ok(r#"{"score": 70, "fixes": {"src/App.tsx": "fixed", "src/Unknown.tsx": "x"}}"#.into())
            } else {
                Ok(ScriptedModel::demo_text(&prompt.task))
            }
        };

        let (_, pipeline) = pipeline_with(ScriptedModel::from_fn(responder));
        let bundle = pipeline.generate_app("portfolio").await.unwrap();
        assert_ne!(bundle.files.get("src/App.tsx"), Some("fixed"));

        let (_, pipeline) = pipeline_with(ScriptedModel::from_fn(responder));
        let pipeline = pipeline.with_review_fixes(true);
        let bundle = pipeline.generate_app("portfolio").await.unwrap();
        assert_eq!(bundle.files.get("src/App.tsx"), Some("fixed"));
        assert!(!bundle.files.contains("src/Unknown.tsx"));
        assert_eq!(bundle.review.score, 70);
    }

    #[tokio::test]
    async fn test_theme_is_derived_from_design() {
        let (_, pipeline) = pipeline_with(ScriptedModel::demo());
        let bundle = pipeline.generate_app("kpi dashboard").await.unwrap();
        let theme: DesignSystem =
            serde_json::from_str(bundle.files.get("src/theme.json").unwrap()).unwrap();
        assert_eq!(theme, bundle.design_system);
        assert_eq!(theme.palette.primary, "#4f46e5");
    }
}
