//! Application service layer.
//!
//! [`WalletService`] holds the use cases the inbound surface calls. Work that
//! talks to the remote wallet service for long stretches (provisioning, queued
//! transfers) goes through the [`JobScheduler`]. Reads run on the caller's
//! task; direct transfers run on a task of their own that outlives the caller.

use std::sync::Arc;

use serde::Serialize;
use tracing::{Instrument, info, instrument, warn};
use validator::Validate;

use super::aggregator::WalletAggregator;
use super::jobs::{JobDependencies, PROVISION_DEFAULT_WALLET, SEND_FUNDS, register_default_jobs};
use super::provisioning::{ProvisioningContext, ProvisioningSettings, ProvisioningWorkflow};
use super::scheduler::{JobScheduler, SchedulerConfig};
use super::transaction::FundsTransfer;
use crate::domain::{
    AppError, Balance, HealthResponse, HealthStatus, JobId, JobInvocation, JobRepository,
    JobStatus, Notifier, ProposalReceipt, ProvisionWalletPayload, RemoteWalletService,
    SendFundsPayload, TransactionRecord, UserId, WalletId, WalletRepository, WalletSummary,
};

/// Collaborators and settings for [`WalletService`].
pub struct ServiceDependencies {
    pub wallets: Arc<dyn WalletRepository>,
    pub jobs: Arc<dyn JobRepository>,
    pub wallet_service: Arc<dyn RemoteWalletService>,
    pub notifier: Arc<dyn Notifier>,
    pub provisioning: ProvisioningSettings,
    pub scheduler: SchedulerConfig,
}

/// One wallet in a user's overview.
#[derive(Debug, Clone, Serialize)]
pub struct WalletView {
    #[serde(flatten)]
    pub wallet: WalletSummary,
    pub balance: Option<Balance>,
    /// Set when the balance could not be fetched
    pub balance_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletOverview {
    pub user_id: UserId,
    pub wallets: Vec<WalletView>,
    /// Wallets whose credentials could not be imported
    pub unavailable: Vec<WalletId>,
}

pub struct WalletService {
    wallets: Arc<dyn WalletRepository>,
    wallet_service: Arc<dyn RemoteWalletService>,
    aggregator: Arc<WalletAggregator>,
    transfers: Arc<FundsTransfer>,
    provisioning: Arc<ProvisioningWorkflow>,
    scheduler: Arc<JobScheduler>,
}

impl WalletService {
    /// Wires the workflows and registers the built-in jobs on a new scheduler.
    #[must_use]
    pub fn new(deps: ServiceDependencies) -> Self {
        let aggregator = Arc::new(WalletAggregator::new(
            Arc::clone(&deps.wallets),
            Arc::clone(&deps.wallet_service),
        ));
        let transfers = Arc::new(FundsTransfer::new(Arc::clone(&aggregator)));
        let provisioning = Arc::new(ProvisioningWorkflow::new(ProvisioningContext {
            wallet_service: Arc::clone(&deps.wallet_service),
            wallets: Arc::clone(&deps.wallets),
            settings: deps.provisioning,
        }));
        let scheduler = Arc::new(JobScheduler::new(deps.jobs, deps.scheduler));

        register_default_jobs(
            &scheduler,
            JobDependencies {
                provisioning: Arc::clone(&provisioning),
                transfers: Arc::clone(&transfers),
                notifier: deps.notifier,
            },
        );

        Self {
            wallets: deps.wallets,
            wallet_service: deps.wallet_service,
            aggregator,
            transfers,
            provisioning,
            scheduler,
        }
    }

    /// The scheduler the worker pool should drain.
    #[must_use]
    pub fn scheduler(&self) -> Arc<JobScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Queues default-wallet provisioning for a new user.
    #[instrument(skip(self, payload), fields(user_id = %payload.user_id))]
    pub async fn provision_default_wallet(
        &self,
        payload: &ProvisionWalletPayload,
    ) -> Result<JobId, AppError> {
        payload.validate()?;
        self.scheduler
            .enqueue_payload(PROVISION_DEFAULT_WALLET, payload)
            .await
    }

    /// Provisions the default wallet on the calling task.
    #[instrument(skip(self, payload), fields(user_id = %payload.user_id))]
    pub async fn provision_default_wallet_now(
        &self,
        payload: &ProvisionWalletPayload,
    ) -> Result<WalletSummary, AppError> {
        let provisioned = self.provisioning.provision_default_wallet(payload).await?;
        Ok(provisioned.record.summary())
    }

    /// Runs the transaction pipeline directly and returns its terminal result.
    ///
    /// The pipeline runs on its own task, so dropping the returned future (a
    /// request timeout or a disconnected client) does not stop it between
    /// remote stages; it still runs to broadcast or to a `StepFailed`.
    pub async fn send_funds(&self, payload: &SendFundsPayload) -> Result<ProposalReceipt, AppError> {
        let transfers = Arc::clone(&self.transfers);
        let payload = payload.clone();
        tokio::spawn(async move { transfers.send(&payload).await }.in_current_span())
            .await
            .map_err(|e| AppError::Internal(format!("transfer task failed: {e}")))?
    }

    /// Queues a transfer; the job result holds the receipt.
    #[instrument(skip(self, payload), fields(user_id = %payload.user_id, wallet_id = %payload.wallet_id))]
    pub async fn enqueue_send_funds(&self, payload: &SendFundsPayload) -> Result<JobId, AppError> {
        payload.validate()?;
        self.scheduler.enqueue_payload(SEND_FUNDS, payload).await
    }

    /// Every wallet of a user with its balance.
    ///
    /// Wallets that cannot be imported are listed as unavailable, and balance
    /// failures are reported per wallet.
    #[instrument(skip(self))]
    pub async fn wallet_overview(&self, user_id: &str) -> Result<WalletOverview, AppError> {
        let loaded = self.aggregator.load_wallets_for_user(user_id).await?;

        let mut wallets = Vec::with_capacity(loaded.len());
        for wallet in &loaded.wallets {
            let (balance, balance_error) = match wallet.client.balance().await {
                Ok(balance) => (Some(balance), None),
                Err(e) => {
                    warn!(wallet_id = %wallet.record.wallet_id, error = %e, "Balance unavailable");
                    (None, Some(e.to_string()))
                }
            };
            wallets.push(WalletView {
                wallet: wallet.record.summary(),
                balance,
                balance_error,
            });
        }

        Ok(WalletOverview {
            user_id: user_id.to_string(),
            wallets,
            unavailable: loaded.failures.into_iter().map(|f| f.wallet_id).collect(),
        })
    }

    #[instrument(skip(self))]
    pub async fn transaction_history(
        &self,
        user_id: &str,
        wallet_id: &str,
    ) -> Result<Vec<TransactionRecord>, AppError> {
        let loaded = self.aggregator.load_wallets_for_user(user_id).await?;
        let wallet = loaded.get_by_wallet_id(wallet_id)?;
        wallet.client.transaction_history().await
    }

    pub async fn job_status(&self, id: JobId) -> Result<JobInvocation, AppError> {
        self.scheduler.get(id).await
    }

    pub async fn requeue_job(&self, id: JobId) -> Result<JobId, AppError> {
        self.scheduler.requeue(id).await
    }

    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: i64,
    ) -> Result<Vec<JobInvocation>, AppError> {
        self.scheduler.list(status, limit).await
    }

    /// Performs a health check on all dependencies.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthResponse {
        let database = match self.wallets.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = ?e, "Database health check failed");
                HealthStatus::Unhealthy
            }
        };

        let wallet_service = match self.wallet_service.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = ?e, "Wallet service health check failed");
                HealthStatus::Unhealthy
            }
        };

        let response = HealthResponse::new(database, wallet_service);
        info!(status = ?response.status, "Health check completed");
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorKind, Network, TransactionOutput, WalletRecord};
    use crate::test_utils::{InMemoryStore, MockNotifier, MockRemoteWalletService, RemoteOp};
    use chrono::Utc;
    use secrecy::SecretString;
    use std::time::Duration;

    struct Fixture {
        store: Arc<InMemoryStore>,
        remote: Arc<MockRemoteWalletService>,
        service: WalletService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let remote = Arc::new(MockRemoteWalletService::new());
        let service = WalletService::new(ServiceDependencies {
            wallets: store.clone(),
            jobs: store.clone(),
            wallet_service: remote.clone(),
            notifier: Arc::new(MockNotifier::new()),
            provisioning: ProvisioningSettings {
                join_poll_interval: Duration::from_millis(1),
                ..Default::default()
            },
            scheduler: SchedulerConfig::default(),
        });
        Fixture {
            store,
            remote,
            service,
        }
    }

    fn payload() -> ProvisionWalletPayload {
        ProvisionWalletPayload {
            user_id: "u1".to_string(),
            email: "a@b.com".to_string(),
            display_name: None,
        }
    }

    fn seed(f: &Fixture, wallet_id: &str, credentials: SecretString) {
        f.store.insert_raw_wallet(WalletRecord {
            wallet_id: wallet_id.to_string(),
            user_id: "u1".to_string(),
            wallet_name: wallet_id.to_string(),
            network: Network::Testnet,
            address: format!("addr-{wallet_id}"),
            credentials,
            is_default: false,
            currency: None,
            created_at: Utc::now(),
        });
    }

    #[tokio::test]
    async fn test_provision_is_queued_not_run() {
        let f = fixture();

        let job_id = f.service.provision_default_wallet(&payload()).await.unwrap();

        let job = f.service.job_status(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.job_name, PROVISION_DEFAULT_WALLET);
        assert_eq!(f.remote.calls(RemoteOp::CreateWallet), 0);
    }

    #[tokio::test]
    async fn test_provision_rejects_invalid_payload_before_enqueue() {
        let f = fixture();
        let bad = ProvisionWalletPayload {
            email: "bad".to_string(),
            ..payload()
        };

        let err = f.service.provision_default_wallet(&bad).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(f.store.all_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_provision_now_returns_summary() {
        let f = fixture();

        let summary = f.service.provision_default_wallet_now(&payload()).await.unwrap();

        assert_eq!(summary.user_id, "u1");
        assert_eq!(summary.wallet_name, "Personal Wallet");
    }

    #[tokio::test]
    async fn test_overview_reports_unavailable_wallets() {
        let f = fixture();
        seed(&f, "w1", f.remote.credentials_for("w1"));
        seed(&f, "w2", SecretString::from("broken"));

        let overview = f.service.wallet_overview("u1").await.unwrap();

        assert_eq!(overview.wallets.len(), 1);
        assert_eq!(overview.wallets[0].wallet.wallet_id, "w1");
        assert_eq!(overview.wallets[0].balance.unwrap().available, 1_000_000);
        assert_eq!(overview.unavailable, vec!["w2".to_string()]);
    }

    #[tokio::test]
    async fn test_overview_tolerates_balance_failures() {
        let f = fixture();
        seed(&f, "w1", f.remote.credentials_for("w1"));
        f.remote.fail_on(RemoteOp::Balance);

        let overview = f.service.wallet_overview("u1").await.unwrap();

        assert!(overview.wallets[0].balance.is_none());
        assert!(overview.wallets[0].balance_error.is_some());
    }

    #[tokio::test]
    async fn test_history_for_unknown_wallet_is_not_found() {
        let f = fixture();
        seed(&f, "w1", f.remote.credentials_for("w1"));

        let history = f.service.transaction_history("u1", "w1").await.unwrap();
        assert_eq!(history.len(), 1);

        let err = f
            .service
            .transaction_history("u1", "w9")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_enqueue_send_funds_validates_outputs() {
        let f = fixture();
        let err = f
            .service
            .enqueue_send_funds(&SendFundsPayload {
                user_id: "u1".to_string(),
                wallet_id: "w1".to_string(),
                outputs: vec![],
                message: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let id = f
            .service
            .enqueue_send_funds(&SendFundsPayload {
                user_id: "u1".to_string(),
                wallet_id: "w1".to_string(),
                outputs: vec![TransactionOutput::new(5, "addr1")],
                message: None,
            })
            .await
            .unwrap();
        assert_eq!(f.service.job_status(id).await.unwrap().job_name, SEND_FUNDS);
    }

    #[tokio::test]
    async fn test_health_check_aggregates_dependencies() {
        let f = fixture();
        assert_eq!(f.service.health_check().await.status, HealthStatus::Healthy);

        f.remote.set_healthy(false);
        assert_eq!(f.service.health_check().await.status, HealthStatus::Degraded);

        f.store.set_healthy(false);
        assert_eq!(f.service.health_check().await.status, HealthStatus::Unhealthy);
    }
}
