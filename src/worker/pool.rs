//! In-process compute worker
//!
//! Runs the Monte Carlo model on tokio tasks, one task per job, with a fixed
//! number of concurrent job slots. A job that arrives when every slot is taken
//! (or after shutdown) is refused with `WorkerUnavailable` rather than queued.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use super::model::TariffImpactModel;
use super::{ComputeWorker, DispatchedJob, JobHandle, JobSpec, WorkerEvent, WorkerMessage};
use crate::types::{Result, SimError};

/// Configuration for the local worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Jobs allowed to run at once
    pub max_concurrent_jobs: usize,
    /// Monte Carlo draws per job
    pub iterations: usize,
    /// Number of progress events emitted per job
    pub progress_steps: usize,
    /// Pause between batches, to keep the runtime responsive
    pub batch_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            iterations: 10_000,
            progress_steps: 10,
            batch_interval: Duration::from_millis(5),
        }
    }
}

pub struct LocalComputeWorker {
    config: WorkerConfig,
    slots: Arc<Semaphore>,
    shut_down: AtomicBool,
    next_job: AtomicU64,
}

impl LocalComputeWorker {
    pub fn new(config: WorkerConfig) -> Self {
        info!(
            max_concurrent_jobs = config.max_concurrent_jobs,
            iterations = config.iterations,
            "Starting local compute worker"
        );
        Self {
            slots: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            config,
            shut_down: AtomicBool::new(false),
            next_job: AtomicU64::new(1),
        }
    }

    /// Stop accepting jobs. Jobs already running finish normally.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        info!("Local compute worker stopped accepting jobs");
    }

    pub fn is_available(&self) -> bool {
        !self.shut_down.load(Ordering::SeqCst) && self.slots.available_permits() > 0
    }

    /// Jobs currently running
    pub fn active_jobs(&self) -> usize {
        self.config.max_concurrent_jobs.max(1) - self.slots.available_permits()
    }
}

#[async_trait::async_trait]
impl ComputeWorker for LocalComputeWorker {
    async fn dispatch(&self, spec: JobSpec) -> Result<DispatchedJob> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(SimError::WorkerUnavailable("worker is shut down".into()));
        }
        let permit = Arc::clone(&self.slots)
            .try_acquire_owned()
            .map_err(|_| SimError::WorkerUnavailable("all job slots are busy".into()))?;

        let handle = JobHandle(format!(
            "local-{}",
            self.next_job.fetch_add(1, Ordering::Relaxed)
        ));
        let (tx, rx) = mpsc::channel(self.config.progress_steps.max(1) + 2);
        let config = self.config.clone();
        let job_handle = handle.clone();

        debug!(job = %handle, output_id = %spec.output_id, "Dispatched job");

        tokio::spawn(async move {
            let _permit = permit;
            run_job(job_handle, spec, config, tx).await;
        });

        Ok(DispatchedJob { handle, events: rx })
    }
}

/// Run one job to completion, streaming progress
async fn run_job(
    handle: JobHandle,
    spec: JobSpec,
    config: WorkerConfig,
    tx: mpsc::Sender<WorkerMessage>,
) {
    let send = |event: WorkerEvent| {
        let tx = tx.clone();
        let handle = handle.clone();
        async move { tx.send(WorkerMessage { handle, event }).await.is_ok() }
    };

    let seed = TariffImpactModel::seed_from_fingerprint(&spec.fingerprint);
    let mut model = TariffImpactModel::new(&spec.parameters, seed);
    let steps = config.progress_steps.max(1);
    let batch = config.iterations.div_ceil(steps).max(1);

    while model.completed_iterations() < config.iterations {
        let remaining = config.iterations - model.completed_iterations();
        model.run_batch(batch.min(remaining));

        let pct = model.completed_iterations() as f64 / config.iterations as f64 * 100.0;
        if !send(WorkerEvent::Progress(pct)).await {
            // Receiver dropped: the run was abandoned or timed out
            debug!(job = %handle, "Job receiver gone, stopping");
            return;
        }
        tokio::time::sleep(config.batch_interval).await;
    }

    let event = match serde_json::to_value(model.summary()) {
        Ok(results) => WorkerEvent::Complete(results),
        Err(e) => {
            warn!(job = %handle, error = %e, "Failed to encode results");
            WorkerEvent::Error(format!("failed to encode results: {}", e))
        }
    };
    if !send(event).await {
        debug!(job = %handle, "Job receiver gone before completion");
    }
}
