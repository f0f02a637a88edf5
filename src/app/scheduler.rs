//! Persistent job scheduler.
//!
//! Handlers are registered by name; invocations are stored as
//! [`JobInvocation`]s and executed at-least-once by whichever worker claims
//! them. A claim is an atomic compare-and-set in the [`JobRepository`], and
//! every claim carries a fresh token so a worker whose claim went stale and was
//! taken over cannot record an outcome over the new owner's.
//!
//! Handler errors and panics are recorded on the invocation as `Failed`; they
//! never propagate into the worker loop. Nothing is retried automatically.
//!
//! A reclaimed invocation is only re-run when its job is idempotent and it has
//! not been reclaimed more than [`SchedulerConfig::max_reclaims`] times;
//! otherwise it is failed with the claim-expired reason and left for an
//! operator to requeue.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{error, info, instrument, warn};
use validator::Validate;

use crate::domain::{
    AppError, JobClaim, JobId, JobInvocation, JobRepository, JobStatus, NewJob, ValidationError,
};

/// Work executed for a job invocation.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, payload: serde_json::Value) -> Result<serde_json::Value, AppError>;
}

/// Adapts an async closure into a [`JobHandler`].
pub struct FnHandler<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

/// Wraps an async function `payload -> result` as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, AppError>> + Send + 'static,
{
    Arc::new(FnHandler {
        f,
        _marker: PhantomData,
    })
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F, Fut>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, AppError>> + Send + 'static,
{
    async fn handle(&self, payload: serde_json::Value) -> Result<serde_json::Value, AppError> {
        (self.f)(payload).await
    }
}

/// Decodes and validates a typed job payload.
pub fn parse_payload<P>(payload: serde_json::Value) -> Result<P, AppError>
where
    P: DeserializeOwned + Validate,
{
    let parsed: P = serde_json::from_value(payload)
        .map_err(|e| AppError::Validation(ValidationError::InvalidFormat(e.to_string())))?;
    parsed.validate()?;
    Ok(parsed)
}

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// A running invocation whose claim is older than this may be reclaimed
    pub stale_after: Duration,
    /// Reclaims after which an invocation is failed instead of re-run
    pub max_reclaims: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(300),
            max_reclaims: 3,
        }
    }
}

/// Execution properties of a defined job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    /// Whether a second run of the same invocation is harmless. Reclaimed
    /// invocations of non-idempotent jobs are failed, never re-run.
    pub idempotent: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self { idempotent: true }
    }
}

impl JobOptions {
    #[must_use]
    pub fn non_idempotent() -> Self {
        Self { idempotent: false }
    }
}

#[derive(Clone)]
struct JobDefinition {
    handler: Arc<dyn JobHandler>,
    options: JobOptions,
}

/// Outcome of executing one claimed invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded { id: JobId },
    Failed { id: JobId, error: String },
    /// The claim was taken over before the outcome could be recorded
    ClaimLost { id: JobId },
}

impl JobOutcome {
    #[must_use]
    pub fn id(&self) -> JobId {
        match self {
            JobOutcome::Succeeded { id }
            | JobOutcome::Failed { id, .. }
            | JobOutcome::ClaimLost { id } => *id,
        }
    }
}

pub struct JobScheduler {
    jobs: Arc<dyn JobRepository>,
    handlers: RwLock<HashMap<String, JobDefinition>>,
    config: SchedulerConfig,
}

impl JobScheduler {
    #[must_use]
    pub fn new(jobs: Arc<dyn JobRepository>, config: SchedulerConfig) -> Self {
        Self {
            jobs,
            handlers: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Registers an idempotent handler; re-defining a name replaces the
    /// previous handler.
    pub fn define(&self, job_name: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.define_with(job_name, handler, JobOptions::default());
    }

    /// Registers a handler with explicit options.
    pub fn define_with(
        &self,
        job_name: impl Into<String>,
        handler: Arc<dyn JobHandler>,
        options: JobOptions,
    ) {
        let job_name = job_name.into();
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let definition = JobDefinition { handler, options };
        if handlers.insert(job_name.clone(), definition).is_some() {
            info!(job = %job_name, idempotent = options.idempotent, "Replaced job handler");
        } else {
            info!(job = %job_name, idempotent = options.idempotent, "Defined job handler");
        }
    }

    #[must_use]
    pub fn is_defined(&self, job_name: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(job_name)
    }

    fn definition(&self, job_name: &str) -> Option<JobDefinition> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_name)
            .cloned()
    }

    /// Stores a pending invocation and returns its id without running it.
    #[instrument(skip(self, payload))]
    pub async fn enqueue(
        &self,
        job_name: &str,
        payload: serde_json::Value,
    ) -> Result<JobId, AppError> {
        if !self.is_defined(job_name) {
            return Err(ValidationError::field(
                "job_name",
                format!("no handler defined for '{job_name}'"),
            )
            .into());
        }

        let job = self.jobs.insert_job(NewJob::new(job_name, payload)).await?;
        metrics::counter!("jobs_enqueued_total", "job" => job_name.to_string()).increment(1);
        info!(job_id = %job.id, "Job enqueued");
        Ok(job.id)
    }

    /// Serializes a typed payload and enqueues it.
    pub async fn enqueue_payload<P: Serialize>(
        &self,
        job_name: &str,
        payload: &P,
    ) -> Result<JobId, AppError> {
        self.enqueue(job_name, serde_json::to_value(payload)?).await
    }

    /// Creates a new pending invocation from a failed one. The failed
    /// invocation stays as it is; the new one carries its attempt count.
    #[instrument(skip(self))]
    pub async fn requeue(&self, id: JobId) -> Result<JobId, AppError> {
        let failed = self
            .jobs
            .get_job(id)
            .await?
            .ok_or_else(|| AppError::not_found("job", id.to_string()))?;

        if failed.status != JobStatus::Failed {
            return Err(ValidationError::field(
                "status",
                format!("only failed jobs can be re-enqueued (job is {})", failed.status),
            )
            .into());
        }

        let job = self.jobs.insert_job(NewJob::requeue_of(&failed)).await?;
        info!(job_id = %job.id, requeued_from = %id, attempts = job.attempts, "Job re-enqueued");
        Ok(job.id)
    }

    pub async fn get(&self, id: JobId) -> Result<JobInvocation, AppError> {
        self.jobs
            .get_job(id)
            .await?
            .ok_or_else(|| AppError::not_found("job", id.to_string()))
    }

    pub async fn list(
        &self,
        status: Option<JobStatus>,
        limit: i64,
    ) -> Result<Vec<JobInvocation>, AppError> {
        self.jobs.list_jobs(status, limit.clamp(1, 500)).await
    }

    /// Claims a specific pending invocation for `worker_id`.
    pub async fn claim(
        &self,
        id: JobId,
        worker_id: &str,
    ) -> Result<Option<(JobInvocation, JobClaim)>, AppError> {
        let claim = JobClaim::new(worker_id);
        let claimed = self.jobs.claim_job(id, &claim).await?;
        Ok(claimed.map(|job| (job, claim)))
    }

    /// Claims and executes the next available invocation, if any.
    pub async fn run_next(&self, worker_id: &str) -> Result<Option<JobOutcome>, AppError> {
        let claim = JobClaim::new(worker_id);
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let stale_before = Utc::now() - stale_after;

        match self.jobs.claim_next(&claim, stale_before).await? {
            Some(job) => Ok(Some(self.execute(job, &claim).await?)),
            None => Ok(None),
        }
    }

    /// Runs a specific pending invocation to completion on the calling task.
    pub async fn run_job(&self, id: JobId, worker_id: &str) -> Result<Option<JobOutcome>, AppError> {
        match self.claim(id, worker_id).await? {
            Some((job, claim)) => Ok(Some(self.execute(job, &claim).await?)),
            None => Ok(None),
        }
    }

    /// Why a reclaimed invocation must not run again, if it must not.
    fn reclaim_refusal(
        &self,
        job: &JobInvocation,
        definition: Option<&JobDefinition>,
    ) -> Option<String> {
        if job.reclaims == 0 {
            return None;
        }
        if definition.is_some_and(|d| !d.options.idempotent) {
            return Some(format!(
                "claim expired before an outcome was recorded; '{}' is not idempotent and is not re-run",
                job.job_name
            ));
        }
        if job.reclaims > self.config.max_reclaims {
            return Some(format!(
                "claim expired {} times (limit {})",
                job.reclaims, self.config.max_reclaims
            ));
        }
        None
    }

    /// Fails a reclaimed invocation without running it.
    async fn expire(
        &self,
        job: &JobInvocation,
        claim: &JobClaim,
        reason: String,
    ) -> Result<JobOutcome, AppError> {
        if !self.jobs.expire_job(job.id, claim.token, &reason).await? {
            return Ok(JobOutcome::ClaimLost { id: job.id });
        }
        metrics::counter!("jobs_expired_total", "job" => job.job_name.clone()).increment(1);
        warn!(reclaims = job.reclaims, reason = %reason, "Reclaimed job failed without re-running");
        Ok(JobOutcome::Failed {
            id: job.id,
            error: reason,
        })
    }

    /// Executes a claimed invocation and records its outcome.
    #[instrument(skip(self, job, claim), fields(job_id = %job.id, job = %job.job_name, worker = %claim.worker_id))]
    async fn execute(&self, job: JobInvocation, claim: &JobClaim) -> Result<JobOutcome, AppError> {
        metrics::counter!("jobs_claimed_total", "job" => job.job_name.clone()).increment(1);
        let definition = self.definition(&job.job_name);
        if let Some(reason) = self.reclaim_refusal(&job, definition.as_ref()) {
            return self.expire(&job, claim, reason).await;
        }
        let started = Instant::now();

        let result = match definition.map(|d| d.handler) {
            Some(handler) => {
                let payload = job.payload.clone();
                // Spawned so a panicking handler surfaces as a JoinError.
                match tokio::spawn(async move { handler.handle(payload).await }).await {
                    Ok(result) => result,
                    Err(join_err) if join_err.is_panic() => {
                        error!("Job handler panicked");
                        Err(AppError::Internal(format!("handler panicked: {join_err}")))
                    }
                    Err(join_err) => Err(AppError::Internal(format!(
                        "handler task cancelled: {join_err}"
                    ))),
                }
            }
            None => Err(AppError::Internal(format!(
                "no handler defined for '{}'",
                job.job_name
            ))),
        };

        metrics::histogram!("job_duration_seconds", "job" => job.job_name.clone())
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(value) => {
                let recorded = self.jobs.complete_job(job.id, claim.token, Some(value)).await?;
                if !recorded {
                    warn!("Claim lost before success could be recorded");
                    return Ok(JobOutcome::ClaimLost { id: job.id });
                }
                metrics::counter!("jobs_succeeded_total", "job" => job.job_name.clone())
                    .increment(1);
                info!("Job succeeded");
                Ok(JobOutcome::Succeeded { id: job.id })
            }
            Err(e) => {
                let message = e.to_string();
                let recorded = self.jobs.fail_job(job.id, claim.token, &message).await?;
                if !recorded {
                    warn!(error = %message, "Claim lost before failure could be recorded");
                    return Ok(JobOutcome::ClaimLost { id: job.id });
                }
                metrics::counter!("jobs_failed_total", "job" => job.job_name.clone())
                    .increment(1);
                warn!(
                    error = %message,
                    completed_steps = ?e.completed_steps(),
                    "Job failed"
                );
                Ok(JobOutcome::Failed {
                    id: job.id,
                    error: message,
                })
            }
        }
    }
}
