//! Job records and the events published about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::classifier::Domain;
use crate::pipeline::{FileSet, PipelineStats, ReviewReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// How a job is processed, chosen by `metadata["mode"]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    /// Classify, then one execution of the domain's app template.
    #[default]
    Quick,
    /// The full five-phase pipeline.
    Pipeline,
}

impl JobMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobMode::Quick => "quick",
            JobMode::Pipeline => "pipeline",
        }
    }
}

impl std::str::FromStr for JobMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "quick" => Ok(JobMode::Quick),
            "pipeline" => Ok(JobMode::Pipeline),
            other => Err(format!(
                "Unknown generation mode '{}'. Valid values: quick, pipeline",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub domain: Domain,
    pub mode: JobMode,
    pub files: FileSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<PipelineStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,
    pub from_cache: bool,
}

/// A generation request and its lifecycle.
///
/// Status moves `queued -> running -> completed | failed` and never back.
/// Every mutator is a no-op on a terminal job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub prompt: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub status: JobStatus,
    pub progress: u8,
    pub steps: Vec<StepRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(prompt: impl Into<String>, metadata: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            metadata,
            status: JobStatus::Queued,
            progress: 0,
            steps: Vec::new(),
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mode requested in metadata. Missing or `null` means quick.
    pub fn mode(&self) -> Result<JobMode, String> {
        match self.metadata.get("mode") {
            None | Some(Value::Null) => Ok(JobMode::default()),
            Some(Value::String(s)) => s.parse(),
            Some(other) => Err(format!("Generation mode must be a string, got {}", other)),
        }
    }

    /// `queued -> running`.
    pub fn start(&mut self) -> bool {
        if self.status != JobStatus::Queued {
            return false;
        }
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        true
    }

    /// Open a new step. Any step still running is closed as completed.
    pub fn begin_step(&mut self, name: &str) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.close_running_step(StepStatus::Completed);
        self.steps.push(StepRecord {
            name: name.to_string(),
            status: StepStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
        });
        true
    }

    /// Close the running step as completed and raise progress.
    pub fn finish_step(&mut self, progress: u8) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.close_running_step(StepStatus::Completed);
        self.advance(progress);
        true
    }

    /// Raise progress to `progress`, capped at 100. Never lowers it.
    pub fn advance(&mut self, progress: u8) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        let target = progress.min(100);
        if target > self.progress {
            self.progress = target;
            true
        } else {
            false
        }
    }

    /// `running -> completed`.
    pub fn complete(&mut self, result: JobResult) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.close_running_step(StepStatus::Completed);
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        true
    }

    /// `queued | running -> failed`. A running step is marked failed.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.close_running_step(StepStatus::Failed);
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        true
    }

    fn close_running_step(&mut self, status: StepStatus) {
        if let Some(step) = self
            .steps
            .last_mut()
            .filter(|s| s.status == StepStatus::Running)
        {
            step.status = status;
            step.ended_at = Some(Utc::now());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobEventKind {
    #[serde(rename = "job:created")]
    Created,
    #[serde(rename = "job:updated")]
    Updated,
    /// Terminal event for both success and failure; `status` tells which.
    #[serde(rename = "job:completed")]
    Completed,
}

/// Progress notification published for every job transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    #[serde(rename = "type")]
    pub kind: JobEventKind,
    pub id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub steps: Vec<StepRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobEvent {
    pub fn from_job(kind: JobEventKind, job: &Job) -> Self {
        Self {
            kind,
            id: job.id,
            status: job.status,
            progress: job.progress,
            steps: job.steps.clone(),
            error: job.error.clone(),
        }
    }
}
