//! Domain layer containing core business types, traits, and error definitions.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{
    AppError, ConfigError, DatabaseError, ErrorKind, RemoteServiceError, ValidationError,
};
pub use traits::{
    JobRepository, Notifier, PendingWallet, RemoteWalletClient, RemoteWalletService,
    WalletRepository,
};
pub use types::{
    Balance, CreateWalletRequest, ErrorDetail, ErrorResponse, HealthResponse, HealthStatus,
    JobClaim, JobId, JobInvocation, JobStatus, Network, NewJob, NewWalletRecord,
    NotificationPayload, ProposalId, ProposalReceipt, ProposalStage, ProvisionWalletPayload,
    SendFundsPayload, TransactionOutput, TransactionProposal, TransactionRecord, UserId,
    WalletId, WalletRecord, WalletStatus, WalletSummary,
};
