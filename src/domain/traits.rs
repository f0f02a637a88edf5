//! Domain traits defining contracts for external systems.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;

use super::error::AppError;
use super::types::{
    Balance, CreateWalletRequest, JobClaim, JobId, JobInvocation, JobStatus, NewJob,
    NewWalletRecord, ProposalId, TransactionOutput, TransactionRecord, WalletRecord,
    WalletStatus,
};

/// Persistence contract for wallet records.
#[async_trait]
pub trait WalletRepository: Send + Sync {
    /// Check database connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Insert a wallet record. Fails with `DatabaseError::Duplicate` if the
    /// wallet id is already stored.
    async fn insert_wallet(&self, record: NewWalletRecord) -> Result<WalletRecord, AppError>;

    /// All wallets owned by a user, oldest first
    async fn find_wallets_by_owner(&self, user_id: &str) -> Result<Vec<WalletRecord>, AppError>;

    /// A single wallet by its remote-assigned id
    async fn find_wallet(&self, wallet_id: &str) -> Result<Option<WalletRecord>, AppError>;
}

/// Persistence contract for job invocations.
///
/// `claim_job` and `claim_next` must each be a single atomic compare-and-set:
/// two workers racing for the same invocation never both succeed.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Store a new pending invocation
    async fn insert_job(&self, job: NewJob) -> Result<JobInvocation, AppError>;

    /// Fetch an invocation by id
    async fn get_job(&self, id: JobId) -> Result<Option<JobInvocation>, AppError>;

    /// Claim a specific invocation if (and only if) it is still pending
    async fn claim_job(&self, id: JobId, claim: &JobClaim)
    -> Result<Option<JobInvocation>, AppError>;

    /// Claim the oldest pending invocation, or a running one whose claim is
    /// older than `stale_before`. Taking over a stale claim counts as an
    /// attempt and increments `reclaims`.
    async fn claim_next(
        &self,
        claim: &JobClaim,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<JobInvocation>, AppError>;

    /// Mark a running invocation as succeeded. Returns false if the claim token
    /// no longer matches (the invocation was reclaimed).
    async fn complete_job(
        &self,
        id: JobId,
        claim_token: uuid::Uuid,
        result: Option<serde_json::Value>,
    ) -> Result<bool, AppError>;

    /// Mark a running invocation as failed and increment its attempts. Returns
    /// false if the claim token no longer matches.
    async fn fail_job(
        &self,
        id: JobId,
        claim_token: uuid::Uuid,
        error: &str,
    ) -> Result<bool, AppError>;

    /// Mark a running invocation as failed without counting an attempt. Used
    /// when a reclaimed invocation is given up instead of being re-run.
    async fn expire_job(
        &self,
        id: JobId,
        claim_token: uuid::Uuid,
        error: &str,
    ) -> Result<bool, AppError>;

    /// Invocations for operator inspection, newest first
    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: i64,
    ) -> Result<Vec<JobInvocation>, AppError>;
}

/// Capability bound to one remote wallet's credentials.
///
/// Instances are request-scoped: each import produces a fresh client and no
/// credential state is shared between clients.
#[async_trait]
pub trait RemoteWalletClient: Send + Sync {
    /// Register this client's copayer on a pending wallet
    async fn join_wallet(&self, secret: &SecretString, copayer_name: &str)
    -> Result<(), AppError>;

    /// Current completion state of the wallet
    async fn wallet_status(&self) -> Result<WalletStatus, AppError>;

    /// Request a fresh receiving address
    async fn create_address(&self) -> Result<String, AppError>;

    /// Serialize the client credentials into an opaque blob
    fn export_credentials(&self) -> Result<SecretString, AppError>;

    async fn balance(&self) -> Result<Balance, AppError>;

    async fn transaction_history(&self) -> Result<Vec<TransactionRecord>, AppError>;

    /// Create a draft proposal, returning its remote id
    async fn create_proposal(
        &self,
        outputs: &[TransactionOutput],
        message: Option<&str>,
    ) -> Result<ProposalId, AppError>;

    async fn publish_proposal(&self, proposal_id: &str) -> Result<(), AppError>;

    async fn sign_proposal(&self, proposal_id: &str) -> Result<(), AppError>;

    /// Broadcast a signed proposal, returning the confirmation memo (txid)
    async fn broadcast_proposal(&self, proposal_id: &str) -> Result<String, AppError>;
}

/// A freshly created wallet that may still be waiting for copayers.
pub struct PendingWallet {
    /// Join secret handed to copayers
    pub secret: SecretString,
    pub client: Arc<dyn RemoteWalletClient>,
}

/// Factory for remote wallet clients.
#[async_trait]
pub trait RemoteWalletService: Send + Sync {
    /// Check wallet service connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Create a wallet remotely
    async fn create_wallet(&self, request: &CreateWalletRequest)
    -> Result<PendingWallet, AppError>;

    /// Reconstruct a client from an exported credentials blob
    async fn import_wallet(
        &self,
        credentials: &SecretString,
    ) -> Result<Arc<dyn RemoteWalletClient>, AppError>;
}

/// Delivery of rendered notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), AppError>;
}
