//! FIFO job queue with a single background worker.
//!
//! `add_job` never waits: it records the job, publishes `job:created` and
//! hands the id to the worker over an unbounded channel. The worker runs
//! one job at a time in arrival order and is the only task that mutates a
//! job after creation. Readers get cloned snapshots.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::events::{ProgressBroadcaster, Subscription};
use super::model::{Job, JobEvent, JobEventKind, JobResult};
use crate::errors::JobError;

/// How often `follow` re-reads the stored job between events.
const FOLLOW_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Does the actual work for one job.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job, steps: &StepReporter) -> anyhow::Result<JobResult>;
}

#[derive(Debug, Default)]
struct JobStore {
    jobs: HashMap<Uuid, Job>,
    order: Vec<Uuid>,
}

type SharedStore = Arc<Mutex<JobStore>>;

fn lock(store: &SharedStore) -> MutexGuard<'_, JobStore> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Apply `change` to a job and publish an event if it reported a change.
fn update_and_publish(
    store: &SharedStore,
    broadcaster: &ProgressBroadcaster,
    id: Uuid,
    kind: JobEventKind,
    change: impl FnOnce(&mut Job) -> bool,
) -> Option<Job> {
    let snapshot = {
        let mut guard = lock(store);
        let job = guard.jobs.get_mut(&id)?;
        if !change(job) {
            return None;
        }
        job.clone()
    };
    broadcaster.notify(&JobEvent::from_job(kind, &snapshot));
    Some(snapshot)
}

/// Lets an executor record step boundaries and progress on its job.
/// Each call publishes `job:updated`.
pub struct StepReporter {
    id: Uuid,
    store: SharedStore,
    broadcaster: Arc<ProgressBroadcaster>,
}

impl StepReporter {
    pub fn job_id(&self) -> Uuid {
        self.id
    }

    pub fn begin(&self, name: &str) {
        update_and_publish(&self.store, &self.broadcaster, self.id, JobEventKind::Updated, |job| {
            job.begin_step(name)
        });
    }

    /// Close the running step and raise progress to `progress`.
    pub fn finish(&self, progress: u8) {
        update_and_publish(&self.store, &self.broadcaster, self.id, JobEventKind::Updated, |job| {
            job.finish_step(progress)
        });
    }

    pub fn advance(&self, progress: u8) {
        update_and_publish(&self.store, &self.broadcaster, self.id, JobEventKind::Updated, |job| {
            job.advance(progress)
        });
    }
}

/// Handle for submitting and querying jobs. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    store: SharedStore,
    broadcaster: Arc<ProgressBroadcaster>,
    tx: mpsc::UnboundedSender<Uuid>,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("jobs", &self.len())
            .field("worker_alive", &!self.tx.is_closed())
            .finish()
    }
}

impl JobQueue {
    /// Create the queue and spawn its worker on the current runtime.
    ///
    /// The worker exits once every `JobQueue` clone is dropped and the
    /// backlog is drained.
    pub fn start(
        executor: Arc<dyn JobExecutor>,
        broadcaster: Arc<ProgressBroadcaster>,
    ) -> (Self, JoinHandle<()>) {
        let store: SharedStore = Arc::new(Mutex::new(JobStore::default()));
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = Worker {
            store: store.clone(),
            broadcaster: broadcaster.clone(),
            executor,
        };
        let handle = tokio::spawn(worker.run(rx));

        (
            Self {
                store,
                broadcaster,
                tx,
            },
            handle,
        )
    }

    pub fn broadcaster(&self) -> &Arc<ProgressBroadcaster> {
        &self.broadcaster
    }

    /// Record and enqueue a new job. Blank prompts are rejected and nothing
    /// is created.
    pub fn add_job(&self, prompt: &str, metadata: Map<String, Value>) -> Result<Uuid, JobError> {
        if prompt.trim().is_empty() {
            return Err(JobError::InvalidRequest("prompt must not be empty".into()));
        }
        if self.tx.is_closed() {
            return Err(JobError::QueueClosed);
        }

        let job = Job::new(prompt, metadata);
        let id = job.id;
        let event = JobEvent::from_job(JobEventKind::Created, &job);
        {
            let mut guard = lock(&self.store);
            guard.order.push(id);
            guard.jobs.insert(id, job);
        }
        self.broadcaster.notify(&event);

        if self.tx.send(id).is_err() {
            update_and_publish(
                &self.store,
                &self.broadcaster,
                id,
                JobEventKind::Completed,
                |job| job.fail(JobError::QueueClosed.to_string()),
            );
            return Err(JobError::QueueClosed);
        }

        tracing::info!(job = %id, "job queued");
        Ok(id)
    }

    pub fn get_job(&self, id: &Uuid) -> Result<Job, JobError> {
        lock(&self.store)
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// Feed `id`'s events from `subscription` to `on_event` until the job is
    /// terminal, then return its final snapshot.
    ///
    /// A lagging subscriber can lose events, including `job:completed`, so
    /// the stored job is polled as well.
    pub async fn follow(
        &self,
        id: Uuid,
        subscription: &mut Subscription,
        mut on_event: impl FnMut(&JobEvent),
    ) -> Result<Job, JobError> {
        let mut poll = tokio::time::interval(FOLLOW_POLL_INTERVAL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = subscription.receiver.recv() => match event {
                    Some(event) if event.id == id => {
                        on_event(&event);
                        if event.kind == JobEventKind::Completed {
                            break;
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
                _ = poll.tick() => {
                    if self.get_job(&id)?.is_terminal() {
                        tracing::debug!(job = %id, "job finished before its completion event arrived");
                        while let Ok(event) = subscription.receiver.try_recv() {
                            if event.id == id {
                                on_event(&event);
                            }
                        }
                        break;
                    }
                }
            }
        }

        self.get_job(&id)
    }

    /// Snapshots of every job in submission order.
    pub fn list_jobs(&self) -> Vec<Job> {
        let guard = lock(&self.store);
        guard
            .order
            .iter()
            .filter_map(|id| guard.jobs.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.store).order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Worker {
    store: SharedStore,
    broadcaster: Arc<ProgressBroadcaster>,
    executor: Arc<dyn JobExecutor>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Uuid>) {
        tracing::debug!("job worker started");
        while let Some(id) = rx.recv().await {
            self.process(id).await;
        }
        tracing::debug!("job worker stopped");
    }

    async fn process(&self, id: Uuid) {
        let Some(job) = update_and_publish(
            &self.store,
            &self.broadcaster,
            id,
            JobEventKind::Updated,
            Job::start,
        ) else {
            tracing::warn!(job = %id, "dequeued job is not startable, skipping");
            return;
        };
        tracing::info!(job = %id, "job started");

        let reporter = StepReporter {
            id,
            store: self.store.clone(),
            broadcaster: self.broadcaster.clone(),
        };

        let outcome = AssertUnwindSafe(self.executor.execute(&job, &reporter))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => {
                update_and_publish(
                    &self.store,
                    &self.broadcaster,
                    id,
                    JobEventKind::Completed,
                    |job| job.complete(result),
                );
                tracing::info!(job = %id, "job completed");
            }
            Ok(Err(e)) => {
                let message = format!("{:#}", e);
                tracing::warn!(job = %id, error = %message, "job failed");
                self.fail(id, message);
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(job = %id, panic = %message, "job panicked");
                self.fail(id, format!("internal error: {}", message));
            }
        }
    }

    fn fail(&self, id: Uuid, message: String) {
        update_and_publish(
            &self.store,
            &self.broadcaster,
            id,
            JobEventKind::Completed,
            |job| job.fail(message),
        );
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
