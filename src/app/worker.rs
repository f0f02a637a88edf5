//! Background workers draining the job queue.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::scheduler::{JobOutcome, JobScheduler};

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interval between polls when the queue is empty
    pub poll_interval: Duration,
    /// Maximum invocations a worker runs per poll
    pub batch_size: usize,
    /// Number of workers in the pool
    pub worker_count: usize,
    /// Whether the workers are enabled
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 10,
            worker_count: 2,
            enabled: true,
        }
    }
}

/// A worker that claims and runs invocations until told to stop.
pub struct JobWorker {
    id: String,
    scheduler: Arc<JobScheduler>,
    config: WorkerConfig,
    shutdown_rx: watch::Receiver<bool>,
}

impl JobWorker {
    pub fn new(
        id: impl Into<String>,
        scheduler: Arc<JobScheduler>,
        config: WorkerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id: id.into(),
            scheduler,
            config,
            shutdown_rx,
        }
    }

    /// Run the worker loop
    pub async fn run(mut self) {
        if !self.config.enabled {
            info!(worker = %self.id, "Job worker is disabled");
            return;
        }

        info!(
            worker = %self.id,
            poll_interval = ?self.config.poll_interval,
            batch_size = self.config.batch_size,
            "Starting job worker"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.process_batch().await;
                }
                result = self.shutdown_rx.changed() => {
                    if result.is_err() || *self.shutdown_rx.borrow() {
                        info!(worker = %self.id, "Job worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Runs up to `batch_size` invocations, stopping early when the queue is empty.
    /// An invocation that was started is always run to completion.
    pub async fn process_batch(&self) -> usize {
        let mut processed = 0;
        while processed < self.config.batch_size {
            if *self.shutdown_rx.borrow() {
                break;
            }
            match self.scheduler.run_next(&self.id).await {
                Ok(Some(outcome)) => {
                    processed += 1;
                    if let JobOutcome::ClaimLost { id } = outcome {
                        info!(worker = %self.id, job_id = %id, "Invocation was reclaimed by another worker");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!(worker = %self.id, error = ?e, "Error claiming job");
                    break;
                }
            }
        }
        processed
    }
}

/// Spawns `worker_count` workers sharing one shutdown channel.
pub fn spawn_worker_pool(
    scheduler: Arc<JobScheduler>,
    config: WorkerConfig,
) -> (Vec<JoinHandle<()>>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let prefix = format!("worker-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);

    let handles = (0..config.worker_count.max(1))
        .map(|n| {
            let worker = JobWorker::new(
                format!("{prefix}-{n}"),
                Arc::clone(&scheduler),
                config.clone(),
                shutdown_rx.clone(),
            );
            tokio::spawn(worker.run())
        })
        .collect();

    (handles, shutdown_tx)
}
