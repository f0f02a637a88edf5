use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::error::{AppError, ValidationError};

/// Identifier assigned to a wallet by the remote wallet service.
pub type WalletId = String;

/// Opaque reference to the owning user.
pub type UserId = String;

/// Identifier of a job invocation.
pub type JobId = Uuid;

/// Identifier assigned to a transaction proposal by the remote wallet service.
pub type ProposalId = String;

/// Network a wallet lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "livenet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(ValidationError::field(
                "network",
                format!("unknown network '{other}'"),
            )),
        }
    }
}

/// Persisted wallet entity.
///
/// A record only exists once provisioning has fully succeeded. The credentials
/// are written once at creation and never handed back to callers; use
/// [`WalletSummary`] for anything that leaves the process.
#[derive(Debug, Clone)]
pub struct WalletRecord {
    pub wallet_id: WalletId,
    pub user_id: UserId,
    pub wallet_name: String,
    pub network: Network,
    /// Initial receiving address derived during provisioning.
    pub address: String,
    pub credentials: SecretString,
    pub is_default: bool,
    pub currency: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WalletRecord {
    #[must_use]
    pub fn summary(&self) -> WalletSummary {
        WalletSummary {
            wallet_id: self.wallet_id.clone(),
            user_id: self.user_id.clone(),
            wallet_name: self.wallet_name.clone(),
            network: self.network,
            address: self.address.clone(),
            is_default: self.is_default,
            currency: self.currency.clone(),
            created_at: self.created_at,
        }
    }
}

/// Insert payload for a wallet record.
#[derive(Debug, Clone)]
pub struct NewWalletRecord {
    pub wallet_id: WalletId,
    pub user_id: UserId,
    pub wallet_name: String,
    pub network: Network,
    pub address: String,
    pub credentials: SecretString,
    pub is_default: bool,
    pub currency: Option<String>,
}

/// Caller-facing view of a wallet record, without credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletSummary {
    pub wallet_id: WalletId,
    pub user_id: UserId,
    pub wallet_name: String,
    pub network: Network,
    pub address: String,
    pub is_default: bool,
    pub currency: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle state of a job invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    /// Allowed transitions: Pending→Running, Running→{Succeeded, Failed}, and
    /// Running→Running when a stale claim is taken over.
    #[must_use]
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(ValidationError::field(
                "status",
                format!("unknown job status '{other}'"),
            )),
        }
    }
}

/// A persisted job invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobInvocation {
    pub id: JobId,
    pub job_name: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: u32,
    /// Times a stale claim on this invocation was taken over by another worker.
    pub reclaims: u32,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
    /// Set when this invocation was re-enqueued from a failed one.
    pub requeued_from: Option<JobId>,
    pub claimed_by: Option<String>,
    #[serde(skip)]
    pub claim_token: Option<Uuid>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobInvocation {
    /// Builds a fresh pending invocation.
    #[must_use]
    pub fn pending(new_job: NewJob) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_name: new_job.job_name,
            payload: new_job.payload,
            status: JobStatus::Pending,
            attempts: new_job.attempts,
            reclaims: 0,
            last_error: None,
            result: None,
            requeued_from: new_job.requeued_from,
            claimed_by: None,
            claim_token: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }
}

/// Insert payload for a job invocation.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_name: String,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub requeued_from: Option<JobId>,
}

impl NewJob {
    pub fn new(job_name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            job_name: job_name.into(),
            payload,
            attempts: 0,
            requeued_from: None,
        }
    }

    /// A new pending invocation carrying over the attempt count of a failed one.
    #[must_use]
    pub fn requeue_of(failed: &JobInvocation) -> Self {
        Self {
            job_name: failed.job_name.clone(),
            payload: failed.payload.clone(),
            attempts: failed.attempts,
            requeued_from: Some(failed.id),
        }
    }
}

/// Exclusive claim stamped on an invocation when a worker takes it.
#[derive(Debug, Clone)]
pub struct JobClaim {
    pub worker_id: String,
    pub token: Uuid,
    pub claimed_at: DateTime<Utc>,
}

impl JobClaim {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            token: Uuid::new_v4(),
            claimed_at: Utc::now(),
        }
    }
}

/// A single payment output of a transaction proposal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct TransactionOutput {
    /// Amount in the smallest currency unit.
    #[validate(range(min = 1))]
    pub amount: u64,
    #[validate(length(min = 1, max = 128))]
    pub destination_address: String,
}

impl TransactionOutput {
    pub fn new(amount: u64, destination_address: impl Into<String>) -> Self {
        Self {
            amount,
            destination_address: destination_address.into(),
        }
    }
}

/// Remote-side stage of a proposal. Only ever advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStage {
    Created,
    Published,
    Signed,
    Broadcast,
}

/// Ephemeral state of a transaction proposal while its pipeline runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionProposal {
    pub proposal_id: ProposalId,
    pub outputs: Vec<TransactionOutput>,
    pub message: Option<String>,
    pub stage: ProposalStage,
}

impl TransactionProposal {
    #[must_use]
    pub fn created(
        proposal_id: ProposalId,
        outputs: Vec<TransactionOutput>,
        message: Option<String>,
    ) -> Self {
        Self {
            proposal_id,
            outputs,
            message,
            stage: ProposalStage::Created,
        }
    }

    /// Moves the proposal to the next stage; stages can only move forward by one.
    pub fn advance(mut self, next: ProposalStage) -> Result<Self, AppError> {
        let expected = match self.stage {
            ProposalStage::Created => Some(ProposalStage::Published),
            ProposalStage::Published => Some(ProposalStage::Signed),
            ProposalStage::Signed => Some(ProposalStage::Broadcast),
            ProposalStage::Broadcast => None,
        };
        if expected != Some(next) {
            return Err(AppError::Internal(format!(
                "proposal {} cannot move from {:?} to {:?}",
                self.proposal_id, self.stage, next
            )));
        }
        self.stage = next;
        Ok(self)
    }

    #[must_use]
    pub fn total_amount(&self) -> u64 {
        self.outputs.iter().map(|o| o.amount).sum()
    }
}

/// Terminal success of the transaction pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProposalReceipt {
    pub proposal: TransactionProposal,
    pub confirmation_memo: String,
}

/// Wallet completion state as reported by the remote service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletStatus {
    pub wallet_id: Option<WalletId>,
    pub complete: bool,
    pub copayers_joined: u8,
    pub copayers_required: u8,
}

/// Parameters for creating a remote wallet.
#[derive(Debug, Clone)]
pub struct CreateWalletRequest {
    pub name: String,
    pub owner_email: String,
    pub required_signers: u8,
    pub total_signers: u8,
    pub network: Network,
}

/// Balance in the smallest currency unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Balance {
    pub total: u64,
    pub locked: u64,
    pub available: u64,
}

/// Entry of a wallet's remote transaction history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionRecord {
    pub txid: String,
    pub action: String,
    pub amount: u64,
    pub fees: Option<u64>,
    pub confirmations: u64,
    pub time: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

/// Payload of the default-wallet provisioning job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ProvisionWalletPayload {
    #[validate(length(min = 1, max = 128))]
    pub user_id: UserId,
    #[validate(email)]
    pub email: String,
    #[validate(length(max = 128))]
    pub display_name: Option<String>,
}

/// Payload of the send-funds job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct SendFundsPayload {
    #[validate(length(min = 1, max = 128))]
    pub user_id: UserId,
    #[validate(length(min = 1, max = 128))]
    pub wallet_id: WalletId,
    #[validate(length(min = 1), nested)]
    pub outputs: Vec<TransactionOutput>,
    #[validate(length(max = 500))]
    pub message: Option<String>,
}

/// Payload of the notification job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct NotificationPayload {
    #[validate(email)]
    pub recipient: String,
    #[validate(length(min = 1, max = 200))]
    pub subject: String,
    pub body: String,
}

/// Health check status for services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health check response for the application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub database: HealthStatus,
    pub wallet_service: HealthStatus,
    pub timestamp: DateTime<Utc>,
}

impl HealthResponse {
    /// The wallet service being down degrades the system; the database being down
    /// makes it unhealthy.
    pub fn new(database: HealthStatus, wallet_service: HealthStatus) -> Self {
        let status = match (&database, &wallet_service) {
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            (HealthStatus::Unhealthy, _) => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };

        Self {
            status,
            database,
            wallet_service,
            timestamp: Utc::now(),
        }
    }
}

/// Error body returned by the HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub r#type: String,
    pub message: String,
}
