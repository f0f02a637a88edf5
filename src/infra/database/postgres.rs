//! PostgreSQL persistence for wallets and job invocations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use sqlx::{PgPool, Row, postgres::PgPoolOptions, postgres::PgRow};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::{
    AppError, DatabaseError, JobClaim, JobId, JobInvocation, JobRepository, JobStatus, NewJob,
    NewWalletRecord, WalletRecord, WalletRepository,
};

const WALLET_COLUMNS: &str = "wallet_id, user_id, wallet_name, network, address, credentials, \
     is_default, currency, created_at";

const JOB_COLUMNS: &str = "id, job_name, payload, status, attempts, reclaims, last_error, result, \
     requeued_from, claimed_by, claim_token, claimed_at, created_at, updated_at, finished_at";

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// PostgreSQL client with connection pooling. Implements both repositories.
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Create a new PostgreSQL client with custom configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a new PostgreSQL client with default configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run the embedded migrations
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_wallet(row: &PgRow) -> Result<WalletRecord, AppError> {
        let network: String = row.try_get("network").map_err(DatabaseError::from)?;
        let credentials: String = row.try_get("credentials").map_err(DatabaseError::from)?;

        Ok(WalletRecord {
            wallet_id: row.try_get("wallet_id").map_err(DatabaseError::from)?,
            user_id: row.try_get("user_id").map_err(DatabaseError::from)?,
            wallet_name: row.try_get("wallet_name").map_err(DatabaseError::from)?,
            network: network
                .parse()
                .map_err(|e| DatabaseError::Query(format!("stored network: {e}")))?,
            address: row.try_get("address").map_err(DatabaseError::from)?,
            credentials: SecretString::from(credentials),
            is_default: row.try_get("is_default").map_err(DatabaseError::from)?,
            currency: row.try_get("currency").map_err(DatabaseError::from)?,
            created_at: row.try_get("created_at").map_err(DatabaseError::from)?,
        })
    }

    fn row_to_job(row: &PgRow) -> Result<JobInvocation, AppError> {
        let status: String = row.try_get("status").map_err(DatabaseError::from)?;
        let attempts: i32 = row.try_get("attempts").map_err(DatabaseError::from)?;
        let reclaims: i32 = row.try_get("reclaims").map_err(DatabaseError::from)?;

        Ok(JobInvocation {
            id: row.try_get("id").map_err(DatabaseError::from)?,
            job_name: row.try_get("job_name").map_err(DatabaseError::from)?,
            payload: row.try_get("payload").map_err(DatabaseError::from)?,
            status: status
                .parse()
                .map_err(|e| DatabaseError::Query(format!("stored job status: {e}")))?,
            attempts: u32::try_from(attempts).unwrap_or(0),
            reclaims: u32::try_from(reclaims).unwrap_or(0),
            last_error: row.try_get("last_error").map_err(DatabaseError::from)?,
            result: row.try_get("result").map_err(DatabaseError::from)?,
            requeued_from: row.try_get("requeued_from").map_err(DatabaseError::from)?,
            claimed_by: row.try_get("claimed_by").map_err(DatabaseError::from)?,
            claim_token: row.try_get("claim_token").map_err(DatabaseError::from)?,
            claimed_at: row.try_get("claimed_at").map_err(DatabaseError::from)?,
            created_at: row.try_get("created_at").map_err(DatabaseError::from)?,
            updated_at: row.try_get("updated_at").map_err(DatabaseError::from)?,
            finished_at: row.try_get("finished_at").map_err(DatabaseError::from)?,
        })
    }

    fn rows_to_jobs(rows: &[PgRow]) -> Result<Vec<JobInvocation>, AppError> {
        rows.iter().map(Self::row_to_job).collect()
    }
}

#[async_trait]
impl WalletRepository for PostgresClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self, record), fields(wallet_id = %record.wallet_id, user_id = %record.user_id))]
    async fn insert_wallet(&self, record: NewWalletRecord) -> Result<WalletRecord, AppError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO wallets (wallet_id, user_id, wallet_name, network, address,
                                 credentials, is_default, currency, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {WALLET_COLUMNS}
            "#
        ))
        .bind(&record.wallet_id)
        .bind(&record.user_id)
        .bind(&record.wallet_name)
        .bind(record.network.as_str())
        .bind(&record.address)
        .bind(record.credentials.expose_secret())
        .bind(record.is_default)
        .bind(&record.currency)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Self::row_to_wallet(&row)
    }

    #[instrument(skip(self))]
    async fn find_wallets_by_owner(&self, user_id: &str) -> Result<Vec<WalletRecord>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1 ORDER BY created_at ASC, wallet_id ASC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        rows.iter().map(Self::row_to_wallet).collect()
    }

    #[instrument(skip(self))]
    async fn find_wallet(&self, wallet_id: &str) -> Result<Option<WalletRecord>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE wallet_id = $1"
        ))
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        row.as_ref().map(Self::row_to_wallet).transpose()
    }
}

#[async_trait]
impl JobRepository for PostgresClient {
    #[instrument(skip(self, job), fields(job = %job.job_name))]
    async fn insert_job(&self, job: NewJob) -> Result<JobInvocation, AppError> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO job_invocations (id, job_name, payload, status, attempts,
                                         requeued_from, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&job.job_name)
        .bind(&job.payload)
        .bind(JobStatus::Pending.as_str())
        .bind(i32::try_from(job.attempts).unwrap_or(i32::MAX))
        .bind(job.requeued_from)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Self::row_to_job(&row)
    }

    #[instrument(skip(self))]
    async fn get_job(&self, id: JobId) -> Result<Option<JobInvocation>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM job_invocations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    #[instrument(skip(self, claim), fields(worker = %claim.worker_id))]
    async fn claim_job(
        &self,
        id: JobId,
        claim: &JobClaim,
    ) -> Result<Option<JobInvocation>, AppError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE job_invocations
            SET status = 'running', claimed_by = $2, claim_token = $3,
                claimed_at = $4, updated_at = $4
            WHERE id = $1 AND status = 'pending'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&claim.worker_id)
        .bind(claim.token)
        .bind(claim.claimed_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    #[instrument(skip(self, claim), fields(worker = %claim.worker_id))]
    async fn claim_next(
        &self,
        claim: &JobClaim,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<JobInvocation>, AppError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE job_invocations
            SET status = 'running', claimed_by = $1, claim_token = $2,
                claimed_at = $3, updated_at = $3,
                reclaims = reclaims + CASE WHEN status = 'running' THEN 1 ELSE 0 END,
                attempts = attempts + CASE WHEN status = 'running' THEN 1 ELSE 0 END
            WHERE id = (
                SELECT id FROM job_invocations
                WHERE status = 'pending'
                   OR (status = 'running' AND claimed_at < $4)
                ORDER BY created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(&claim.worker_id)
        .bind(claim.token)
        .bind(claim.claimed_at)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    #[instrument(skip(self, result))]
    async fn complete_job(
        &self,
        id: JobId,
        claim_token: Uuid,
        result: Option<serde_json::Value>,
    ) -> Result<bool, AppError> {
        let outcome = sqlx::query(
            r#"
            UPDATE job_invocations
            SET status = 'succeeded', result = $3, last_error = NULL,
                updated_at = NOW(), finished_at = NOW()
            WHERE id = $1 AND status = 'running' AND claim_token = $2
            "#,
        )
        .bind(id)
        .bind(claim_token)
        .bind(result)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(outcome.rows_affected() == 1)
    }

    #[instrument(skip(self, error))]
    async fn fail_job(&self, id: JobId, claim_token: Uuid, error: &str) -> Result<bool, AppError> {
        let outcome = sqlx::query(
            r#"
            UPDATE job_invocations
            SET status = 'failed', attempts = attempts + 1, last_error = $3,
                updated_at = NOW(), finished_at = NOW()
            WHERE id = $1 AND status = 'running' AND claim_token = $2
            "#,
        )
        .bind(id)
        .bind(claim_token)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(outcome.rows_affected() == 1)
    }

    #[instrument(skip(self, error))]
    async fn expire_job(
        &self,
        id: JobId,
        claim_token: Uuid,
        error: &str,
    ) -> Result<bool, AppError> {
        let outcome = sqlx::query(
            r#"
            UPDATE job_invocations
            SET status = 'failed', last_error = $3,
                updated_at = NOW(), finished_at = NOW()
            WHERE id = $1 AND status = 'running' AND claim_token = $2
            "#,
        )
        .bind(id)
        .bind(claim_token)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(outcome.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: i64,
    ) -> Result<Vec<JobInvocation>, AppError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM job_invocations
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Self::rows_to_jobs(&rows)
    }
}
