//! Wiring: builds the classifier, registry, pipeline, broadcaster and job
//! queue once from configuration. No business logic lives here.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::classifier::DomainClassifier;
use crate::config::AppforgeConfig;
use crate::jobs::{GenerationExecutor, JobQueue, ProgressBroadcaster};
use crate::llm::{ClaudeCli, LanguageModel, ScriptedModel};
use crate::pipeline::AppPipeline;
use crate::prompts::{PromptRegistry, register_builtins};

pub struct Engine {
    pub config: AppforgeConfig,
    pub classifier: DomainClassifier,
    pub registry: Arc<PromptRegistry>,
    pub pipeline: Arc<AppPipeline>,
    pub queue: JobQueue,
    worker: JoinHandle<()>,
}

impl Engine {
    /// Build the engine around the configured model backend, or the
    /// scripted demo model when `offline` is set.
    ///
    /// Must be called inside a Tokio runtime; the queue worker is spawned
    /// immediately.
    pub fn from_config(config: AppforgeConfig, offline: bool) -> Self {
        let model: Arc<dyn LanguageModel> = if offline {
            tracing::info!("using offline demo model");
            Arc::new(ScriptedModel::demo())
        } else {
            tracing::info!(cmd = %config.model.cmd, "using model CLI");
            Arc::new(
                ClaudeCli::new(config.model.cmd.clone())
                    .with_model(config.model.model.clone())
                    .with_timeout(config.model.timeout()),
            )
        };
        Self::with_model(config, model)
    }

    pub fn with_model(config: AppforgeConfig, model: Arc<dyn LanguageModel>) -> Self {
        let params = config.model.params();
        let classifier = DomainClassifier::new(config.classifier.default_domain);

        let registry =
            Arc::new(PromptRegistry::new(model).with_threshold(config.quality.threshold));
        register_builtins(&registry, params);

        let pipeline = Arc::new(
            AppPipeline::new(registry.clone(), classifier)
                .with_params(params)
                .with_review_fixes(config.pipeline.apply_review_fixes),
        );

        let broadcaster = Arc::new(ProgressBroadcaster::new(config.queue.event_buffer));
        let executor = Arc::new(GenerationExecutor::new(
            classifier,
            registry.clone(),
            pipeline.clone(),
        ));
        let (queue, worker) = JobQueue::start(executor, broadcaster);

        Self {
            config,
            classifier,
            registry,
            pipeline,
            queue,
            worker,
        }
    }

    /// Drop the queue handle and wait for the worker to drain its backlog.
    pub async fn shutdown(self) {
        drop(self.queue);
        if let Err(e) = self.worker.await {
            tracing::error!(error = %e, "job worker ended abnormally");
        }
    }
}
