//! `appforge generate`: submit one job through the queue and follow it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};

use appforge::config::AppforgeConfig;
use appforge::engine::Engine;
use appforge::jobs::{JobMode, JobStatus};
use appforge::ui::JobProgressUI;

pub struct GenerateArgs {
    pub prompt: String,
    pub pipeline: bool,
    pub out: PathBuf,
    pub offline: bool,
}

pub async fn cmd_generate(project_dir: &Path, args: GenerateArgs, verbose: bool) -> Result<()> {
    let config = AppforgeConfig::resolve(project_dir)?;
    for warning in config.validate() {
        tracing::warn!("{warning}");
    }
    let engine = Engine::from_config(config, args.offline);

    let mode = if args.pipeline {
        JobMode::Pipeline
    } else {
        JobMode::Quick
    };
    let mut metadata = Map::new();
    metadata.insert("mode".into(), Value::String(mode.as_str().into()));

    // Subscribe first so the created event is not missed.
    let broadcaster = engine.queue.broadcaster().clone();
    let mut subscription = broadcaster.subscribe();
    let id = engine.queue.add_job(&args.prompt, metadata)?;

    let ui = JobProgressUI::new(verbose);
    ui.start(&args.prompt, mode.as_str());

    let job = engine
        .queue
        .follow(id, &mut subscription, |event| ui.handle_event(event))
        .await;
    broadcaster.unsubscribe(subscription.id);
    let job = job?;

    match (job.status, job.result.as_ref()) {
        (JobStatus::Completed, Some(result)) => {
            ui.finish_success(&job);
            let out = if args.out.is_absolute() {
                args.out.clone()
            } else {
                project_dir.join(&args.out)
            };
            result
                .files
                .write_to(&out)
                .with_context(|| format!("Failed to write files to {}", out.display()))?;
            ui.show_written(&out, &result.files.paths());
            println!(
                "Generated {} app: {} files written to {}",
                result.domain,
                result.files.len(),
                out.display()
            );
        }
        _ => {
            let error = job
                .error
                .clone()
                .unwrap_or_else(|| format!("job ended in status {}", job.status.as_str()));
            ui.finish_failure(&error);
            bail!("Generation failed: {error}");
        }
    }

    engine.shutdown().await;
    Ok(())
}
