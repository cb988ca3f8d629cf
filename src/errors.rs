//! Typed error hierarchy for the appforge engine.
//!
//! Four top-level enums cover the four subsystems:
//! - `ModelError`: a single invocation of the external model failed
//! - `PromptError`: registry lookup, rendering, invocation or validation failures
//! - `PipelineError`: a multi-phase run aborted in one of its phases
//! - `JobError`: submission and query failures at the job-queue boundary

use thiserror::Error;

/// Errors from one call to the external generative model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Failed to spawn model process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Model process exited with non-zero code {exit_code}: {stderr}")]
    NonZeroExit { exit_code: i32, stderr: String },

    #[error("Model call timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Model returned an empty response")]
    EmptyResponse,

    #[error("Model stream failed: {0}")]
    Stream(String),
}

/// A single rule a model output failed to satisfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// `field` held fewer than `min` elements.
    TooFew {
        field: String,
        min: usize,
        found: usize,
    },
    /// A required feature flag was absent or falsy.
    MissingFlag(String),
    /// A structured template produced something other than a JSON object.
    NotAnObject,
    /// A text template produced only whitespace.
    EmptyText,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::TooFew { field, min, found } => {
                write!(f, "'{}' has {} entries, expected at least {}", field, found, min)
            }
            Violation::MissingFlag(flag) => write!(f, "required feature '{}' is missing", flag),
            Violation::NotAnObject => write!(f, "output is not a JSON object"),
            Violation::EmptyText => write!(f, "output is empty"),
        }
    }
}

/// Errors from the prompt registry.
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Prompt template '{0}' is not registered")]
    UnknownPrompt(String),

    #[error("Template '{prompt_id}' references variable '{variable}' which was not supplied")]
    Render { prompt_id: String, variable: String },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Output of '{prompt_id}' failed validation: {}", join_violations(.violations))]
    Validation {
        prompt_id: String,
        violations: Vec<Violation>,
    },
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from a multi-phase pipeline run. Any of them aborts the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{phase} phase failed")]
    PhaseFailed {
        phase: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    pub fn phase(phase: &'static str, source: impl Into<anyhow::Error>) -> Self {
        PipelineError::PhaseFailed {
            phase,
            source: source.into(),
        }
    }
}

/// Errors at the job queue's submission and query boundaries.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Job {0} not found")]
    NotFound(String),

    #[error("Job queue worker is no longer running")]
    QueueClosed,
}
