//! The executor that turns a job into generated files.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;

use super::model::{Job, JobMode, JobResult};
use super::queue::{JobExecutor, StepReporter};
use crate::classifier::DomainClassifier;
use crate::pipeline::{AppPipeline, FileSet, Phase, PhaseEvent};
use crate::prompts::{PromptRegistry, Variables, app_id};

/// Progress share of the pipeline phases; the rest is reported on completion.
const PIPELINE_PROGRESS_SPAN: usize = 90;

pub struct GenerationExecutor {
    classifier: DomainClassifier,
    registry: Arc<PromptRegistry>,
    pipeline: Arc<AppPipeline>,
}

impl GenerationExecutor {
    pub fn new(
        classifier: DomainClassifier,
        registry: Arc<PromptRegistry>,
        pipeline: Arc<AppPipeline>,
    ) -> Self {
        Self {
            classifier,
            registry,
            pipeline,
        }
    }

    async fn run_quick(&self, job: &Job, steps: &StepReporter) -> Result<JobResult> {
        steps.begin("classify");
        let domain = self.classifier.detect(&job.prompt);
        tracing::info!(job = %job.id, domain = %domain, "classified request");
        steps.finish(10);

        steps.begin("generate");
        let vars = Variables::from([("prompt".to_string(), job.prompt.clone())]);
        let execution = self
            .registry
            .execute(&app_id(domain), &vars)
            .await
            .context("app generation failed")?;
        steps.finish(80);

        steps.begin("package");
        let files = FileSet::from_value(&execution.output)?;
        steps.finish(95);

        Ok(JobResult {
            domain,
            mode: JobMode::Quick,
            files,
            review: None,
            stats: None,
            quality: Some(execution.quality),
            from_cache: execution.from_cache,
        })
    }

    async fn run_pipeline(&self, job: &Job, steps: &StepReporter) -> Result<JobResult> {
        let observer = |event: PhaseEvent| match event {
            PhaseEvent::Started(phase) => steps.begin(phase.as_str()),
            PhaseEvent::Finished(phase) => steps.finish(phase_progress(phase)),
        };
        let bundle = self
            .pipeline
            .generate_app_with_progress(&job.prompt, &observer)
            .await?;

        Ok(JobResult {
            domain: bundle.domain,
            mode: JobMode::Pipeline,
            files: bundle.files,
            review: Some(bundle.review),
            stats: Some(bundle.stats),
            quality: None,
            from_cache: false,
        })
    }
}

/// Progress reported when `phase` finishes.
fn phase_progress(phase: Phase) -> u8 {
    ((phase.index() + 1) * PIPELINE_PROGRESS_SPAN / Phase::ALL.len()) as u8
}

#[async_trait]
impl JobExecutor for GenerationExecutor {
    async fn execute(&self, job: &Job, steps: &StepReporter) -> Result<JobResult> {
        let mode = job.mode().map_err(|msg| anyhow!(msg))?;
        tracing::info!(job = %job.id, mode = mode.as_str(), "generating");
        match mode {
            JobMode::Quick => self.run_quick(job, steps).await,
            JobMode::Pipeline => self.run_pipeline(job, steps).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Domain;
    use crate::jobs::{JobQueue, JobStatus, ProgressBroadcaster, StepStatus};
    use crate::llm::{ModelParams, ScriptedModel};
    use crate::prompts::register_builtins;
    use serde_json::{Map, Value, json};
    use std::time::Duration;
    use uuid::Uuid;

    fn queue_with(model: ScriptedModel) -> (Arc<ScriptedModel>, JobQueue) {
        let model = Arc::new(model);
        let registry = Arc::new(PromptRegistry::new(model.clone()));
        register_builtins(&registry, ModelParams::default());
        let classifier = DomainClassifier::default();
        let pipeline = Arc::new(AppPipeline::new(registry.clone(), classifier));
        let executor = Arc::new(GenerationExecutor::new(classifier, registry, pipeline));
        let (queue, _worker) = JobQueue::start(executor, Arc::new(ProgressBroadcaster::new(256)));
        (model, queue)
    }

    async fn wait_terminal(queue: &JobQueue, id: Uuid) -> Job {
        for _ in 0..1000 {
            let job = queue.get_job(&id).unwrap();
            if job.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {id} did not finish");
    }

    fn mode(mode: &str) -> Map<String, Value> {
        json!({"mode": mode}).as_object().cloned().unwrap()
    }

    #[test]
    fn test_phase_progress_spans_ninety() {
        let progress: Vec<u8> = Phase::ALL.iter().map(|p| phase_progress(*p)).collect();
        assert_eq!(progress, vec![18, 36, 54, 72, 90]);
    }

    #[tokio::test]
    async fn test_quick_job_completes_with_files() {
        let (model, queue) = queue_with(ScriptedModel::demo());
        let id = queue.add_job("Create an online shop for shoes", Map::new()).unwrap();
        let job = wait_terminal(&queue, id).await;

        assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
        assert_eq!(job.progress, 100);
        let names: Vec<&str> = job.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["classify", "generate", "package"]);

        let result = job.result.unwrap();
        assert_eq!(result.domain, Domain::Ecommerce);
        assert_eq!(result.mode, JobMode::Quick);
        assert!(result.files.contains("src/App.tsx"));
        assert!(!result.from_cache);
        assert_eq!(model.tasks(), vec!["app.ecommerce"]);
    }

    #[tokio::test]
    async fn test_repeated_quick_job_hits_the_cache() {
        let (model, queue) = queue_with(ScriptedModel::demo());
        let first = queue.add_job("team billing saas", Map::new()).unwrap();
        let second = queue.add_job("team billing saas", Map::new()).unwrap();
        wait_terminal(&queue, first).await;
        let second = wait_terminal(&queue, second).await;

        assert!(second.result.unwrap().from_cache);
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_pipeline_job_reports_every_phase() {
        let (_, queue) = queue_with(ScriptedModel::demo());
        let id = queue
            .add_job("analytics dashboard with charts", mode("pipeline"))
            .unwrap();
        let job = wait_terminal(&queue, id).await;

        assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
        let names: Vec<&str> = job.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["architecture", "design", "development", "review", "testing"]
        );
        let result = job.result.unwrap();
        assert_eq!(result.domain, Domain::Dashboard);
        assert!(result.files.contains("tests/a11y/accessibility.spec.ts"));
        assert_eq!(result.review.unwrap().score, 86);
        assert!(result.stats.is_some());
    }

    #[tokio::test]
    async fn test_unknown_mode_fails_the_job() {
        let (model, queue) = queue_with(ScriptedModel::demo());
        let id = queue.add_job("anything", mode("turbo")).unwrap();
        let job = wait_terminal(&queue, id).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("turbo"));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_pipeline_phase_failure_names_the_phase() {
        let model = ScriptedModel::from_fn(|prompt| {
            if prompt.task == "design" {
                Err(crate::errors::ModelError::Timeout { secs: 30 })
            } else {
                Ok(ScriptedModel::demo_text(&prompt.task))
            }
        });
        let (_, queue) = queue_with(model);
        let id = queue.add_job("landing page", mode("pipeline")).unwrap();
        let job = wait_terminal(&queue, id).await;

        assert_eq!(job.status, JobStatus::Failed);
        let error = job.error.unwrap();
        assert!(error.starts_with("design phase failed"), "{error}");
        assert!(error.contains("timed out"));
        let design = job.steps.iter().find(|s| s.name == "design").unwrap();
        assert_eq!(design.status, StepStatus::Failed);
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn test_quick_job_with_unusable_output_fails() {
        let model = ScriptedModel::from_fn(|_| Ok(r#"{"files": "nope"}"#.to_string()));
        let (model, queue) = queue_with(model);
        let id = queue.add_job("a portfolio", Map::new()).unwrap();
        let job = wait_terminal(&queue, id).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("app generation failed"));
        assert_eq!(model.call_count(), 2);
    }
}
