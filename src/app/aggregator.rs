//! Reconstruction of a user's remote wallet clients from stored credentials.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::domain::{
    AppError, RemoteServiceError, RemoteWalletClient, RemoteWalletService, WalletId,
    WalletRecord, WalletRepository,
};

/// A stored wallet together with a live client for it.
pub struct AggregatedWallet {
    pub record: WalletRecord,
    pub client: Arc<dyn RemoteWalletClient>,
}

/// A wallet whose client could not be reconstructed.
#[derive(Debug, Clone)]
pub struct AggregationFailure {
    pub wallet_id: WalletId,
    pub error: String,
}

/// Result of [`WalletAggregator::load_wallets_for_user`].
pub struct AggregatedWallets {
    pub wallets: Vec<AggregatedWallet>,
    pub failures: Vec<AggregationFailure>,
}

impl AggregatedWallets {
    /// Looks a wallet up in the already-loaded set. Wallets that failed to load
    /// are reported as not found.
    pub fn get_by_wallet_id(&self, wallet_id: &str) -> Result<&AggregatedWallet, AppError> {
        self.wallets
            .iter()
            .find(|w| w.record.wallet_id == wallet_id)
            .ok_or_else(|| AppError::not_found("wallet", wallet_id))
    }

    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Turns a partially loaded set into an error for callers that need all of it.
    pub fn require_complete(self) -> Result<Self, AppError> {
        if self.is_partial() {
            return Err(AppError::PartialAggregation {
                loaded: self.wallets.len(),
                failed: self.failures.len(),
            });
        }
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }
}

pub struct WalletAggregator {
    wallets: Arc<dyn WalletRepository>,
    wallet_service: Arc<dyn RemoteWalletService>,
}

impl WalletAggregator {
    #[must_use]
    pub fn new(
        wallets: Arc<dyn WalletRepository>,
        wallet_service: Arc<dyn RemoteWalletService>,
    ) -> Self {
        Self {
            wallets,
            wallet_service,
        }
    }

    /// Imports a fresh client for every wallet the user owns.
    ///
    /// Individual import failures are collected, not raised. If every import
    /// failed the remote service is treated as unavailable.
    #[instrument(skip(self))]
    pub async fn load_wallets_for_user(&self, user_id: &str) -> Result<AggregatedWallets, AppError> {
        let records = self.wallets.find_wallets_by_owner(user_id).await?;
        let attempted = records.len();

        let mut wallets = Vec::with_capacity(attempted);
        let mut failures = Vec::new();

        for record in records {
            match self.wallet_service.import_wallet(&record.credentials).await {
                Ok(client) => wallets.push(AggregatedWallet { record, client }),
                Err(e) => {
                    warn!(wallet_id = %record.wallet_id, error = %e, "Failed to import wallet");
                    metrics::counter!("wallet_aggregation_failures_total").increment(1);
                    failures.push(AggregationFailure {
                        wallet_id: record.wallet_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        if wallets.is_empty() && attempted > 0 {
            return Err(RemoteServiceError::Unavailable(format!(
                "none of {attempted} wallet(s) could be loaded"
            ))
            .into());
        }

        info!(loaded = wallets.len(), failed = failures.len(), "Wallets aggregated");
        Ok(AggregatedWallets { wallets, failures })
    }
}
