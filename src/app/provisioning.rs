//! Wallet provisioning workflow: create remote wallet, derive an address, persist.
//!
//! Persistence is deliberately the last step so a stored record always carries
//! an address that was actually derived from a live remote wallet. A failure
//! after `CreateRemoteWallet` leaves an orphaned remote wallet; the step-failure
//! error names the completed steps so it can be reconciled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

use super::pipeline::{Pipeline, WorkflowStep};
use crate::domain::{
    AppError, CreateWalletRequest, DatabaseError, Network, NewWalletRecord,
    ProvisionWalletPayload, RemoteServiceError, RemoteWalletClient, RemoteWalletService,
    UserId, WalletId, WalletRecord, WalletRepository,
};

pub const PROVISIONING_PIPELINE: &str = "wallet_provisioning";

/// Remote wallet parameters used when provisioning.
#[derive(Debug, Clone)]
pub struct ProvisioningSettings {
    pub network: Network,
    pub required_signers: u8,
    pub total_signers: u8,
    /// Copayer name registered for the custodial signer
    pub copayer_name: String,
    pub currency: Option<String>,
    /// How many times to poll for wallet completion after joining
    pub max_join_rounds: u32,
    pub join_poll_interval: Duration,
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            network: Network::Testnet,
            required_signers: 1,
            total_signers: 1,
            copayer_name: "custodian".to_string(),
            currency: Some("btc".to_string()),
            max_join_rounds: 10,
            join_poll_interval: Duration::from_millis(500),
        }
    }
}

/// Collaborators shared by the provisioning steps.
pub struct ProvisioningContext {
    pub wallet_service: Arc<dyn RemoteWalletService>,
    pub wallets: Arc<dyn WalletRepository>,
    pub settings: ProvisioningSettings,
}

/// Input of the provisioning pipeline.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub owner_id: UserId,
    pub owner_email: String,
    pub wallet_name: String,
    pub is_default: bool,
}

/// Output of `CreateRemoteWallet`: a usable remote wallet.
pub struct CreatedWallet {
    pub request: ProvisionRequest,
    pub wallet_id: WalletId,
    pub client: Arc<dyn RemoteWalletClient>,
}

/// Output of `DeriveInitialAddress`.
pub struct AddressedWallet {
    pub created: CreatedWallet,
    pub address: String,
}

/// Result of provisioning: the stored record and whether this run stored it.
#[derive(Debug)]
pub struct ProvisionedWallet {
    pub record: WalletRecord,
    /// False when an existing record was returned instead
    pub created: bool,
    /// Remote wallet created by this run that lost a race to an existing
    /// default wallet and was never persisted
    pub orphaned_wallet_id: Option<WalletId>,
}

impl ProvisionedWallet {
    fn existing(record: WalletRecord) -> Self {
        Self {
            record,
            created: false,
            orphaned_wallet_id: None,
        }
    }
}

pub struct CreateRemoteWallet;

#[async_trait]
impl WorkflowStep<ProvisioningContext> for CreateRemoteWallet {
    type Input = ProvisionRequest;
    type Output = CreatedWallet;

    fn name(&self) -> &'static str {
        "CreateRemoteWallet"
    }

    async fn run(
        &self,
        ctx: &ProvisioningContext,
        request: ProvisionRequest,
    ) -> Result<CreatedWallet, AppError> {
        let settings = &ctx.settings;
        let pending = ctx
            .wallet_service
            .create_wallet(&CreateWalletRequest {
                name: request.wallet_name.clone(),
                owner_email: request.owner_email.clone(),
                required_signers: settings.required_signers,
                total_signers: settings.total_signers,
                network: settings.network,
            })
            .await?;

        pending
            .client
            .join_wallet(&pending.secret, &settings.copayer_name)
            .await?;

        let wallet_id = wait_for_completion(pending.client.as_ref(), settings).await?;
        info!(wallet_id = %wallet_id, owner_id = %request.owner_id, "Remote wallet created");

        Ok(CreatedWallet {
            request,
            wallet_id,
            client: pending.client,
        })
    }
}

/// Polls until the remote service reports a complete wallet with an id.
async fn wait_for_completion(
    client: &dyn RemoteWalletClient,
    settings: &ProvisioningSettings,
) -> Result<WalletId, AppError> {
    let rounds = settings.max_join_rounds.max(1);
    let mut last_status = None;

    for round in 1..=rounds {
        let status = client.wallet_status().await?;
        if status.complete {
            if let Some(wallet_id) = status.wallet_id.clone() {
                return Ok(wallet_id);
            }
        }
        debug!(
            round,
            joined = status.copayers_joined,
            required = status.copayers_required,
            "Wallet not complete yet"
        );
        last_status = Some(status);
        if round < rounds {
            tokio::time::sleep(settings.join_poll_interval).await;
        }
    }

    let (joined, required) = last_status
        .map(|s| (s.copayers_joined, s.copayers_required))
        .unwrap_or_default();
    Err(RemoteServiceError::Rejected(format!(
        "wallet not complete after {rounds} rounds ({joined}/{required} copayers)"
    ))
    .into())
}

pub struct DeriveInitialAddress;

#[async_trait]
impl WorkflowStep<ProvisioningContext> for DeriveInitialAddress {
    type Input = CreatedWallet;
    type Output = AddressedWallet;

    fn name(&self) -> &'static str {
        "DeriveInitialAddress"
    }

    async fn run(
        &self,
        _ctx: &ProvisioningContext,
        created: CreatedWallet,
    ) -> Result<AddressedWallet, AppError> {
        let address = created.client.create_address().await?;
        if address.trim().is_empty() {
            return Err(RemoteServiceError::InvalidResponse(format!(
                "empty address for wallet {}",
                created.wallet_id
            ))
            .into());
        }
        debug!(wallet_id = %created.wallet_id, address = %address, "Derived initial address");
        Ok(AddressedWallet { created, address })
    }
}

pub struct PersistWalletRecord;

#[async_trait]
impl WorkflowStep<ProvisioningContext> for PersistWalletRecord {
    type Input = AddressedWallet;
    type Output = ProvisionedWallet;

    fn name(&self) -> &'static str {
        "PersistWalletRecord"
    }

    async fn run(
        &self,
        ctx: &ProvisioningContext,
        wallet: AddressedWallet,
    ) -> Result<ProvisionedWallet, AppError> {
        let AddressedWallet { created, address } = wallet;
        let credentials = created.client.export_credentials()?;

        let record = NewWalletRecord {
            wallet_id: created.wallet_id.clone(),
            user_id: created.request.owner_id.clone(),
            wallet_name: created.request.wallet_name.clone(),
            network: ctx.settings.network,
            address,
            credentials,
            is_default: created.request.is_default,
            currency: ctx.settings.currency.clone(),
        };

        match ctx.wallets.insert_wallet(record).await {
            Ok(stored) => Ok(ProvisionedWallet {
                record: stored,
                created: true,
                orphaned_wallet_id: None,
            }),
            Err(AppError::Database(DatabaseError::Duplicate(msg))) => {
                resolve_duplicate(ctx, &created, msg).await
            }
            Err(e) => Err(e),
        }
    }
}

/// Maps a rejected insert onto the record that already holds its place: the
/// same wallet stored by an earlier run, or the owner's default wallet stored
/// by a concurrent run.
async fn resolve_duplicate(
    ctx: &ProvisioningContext,
    created: &CreatedWallet,
    msg: String,
) -> Result<ProvisionedWallet, AppError> {
    let owner_id = &created.request.owner_id;

    if let Some(existing) = ctx.wallets.find_wallet(&created.wallet_id).await? {
        if &existing.user_id == owner_id {
            warn!(wallet_id = %existing.wallet_id, "Wallet record already stored");
            return Ok(ProvisionedWallet::existing(existing));
        }
        return Err(AppError::Database(DatabaseError::Duplicate(msg)));
    }

    if created.request.is_default {
        let default = ctx
            .wallets
            .find_wallets_by_owner(owner_id)
            .await?
            .into_iter()
            .find(|w| w.is_default);
        if let Some(default) = default {
            warn!(
                wallet_id = %default.wallet_id,
                orphaned_wallet_id = %created.wallet_id,
                "Default wallet stored concurrently; remote wallet left unpersisted"
            );
            return Ok(ProvisionedWallet {
                record: default,
                created: false,
                orphaned_wallet_id: Some(created.wallet_id.clone()),
            });
        }
    }

    Err(AppError::Database(DatabaseError::Duplicate(msg)))
}

/// Builds the create → derive address → persist pipeline.
pub fn provisioning_pipeline() -> Pipeline<ProvisioningContext, ProvisionRequest, ProvisionedWallet>
{
    Pipeline::new(PROVISIONING_PIPELINE, CreateRemoteWallet)
        .then(DeriveInitialAddress)
        .then(PersistWalletRecord)
}

/// Runs wallet provisioning against its collaborators.
pub struct ProvisioningWorkflow {
    ctx: ProvisioningContext,
    pipeline: Pipeline<ProvisioningContext, ProvisionRequest, ProvisionedWallet>,
}

impl ProvisioningWorkflow {
    #[must_use]
    pub fn new(ctx: ProvisioningContext) -> Self {
        Self {
            ctx,
            pipeline: provisioning_pipeline(),
        }
    }

    /// Runs the full pipeline for an explicit request.
    pub async fn provision(&self, request: ProvisionRequest) -> Result<ProvisionedWallet, AppError> {
        self.pipeline.run(&self.ctx, request).await
    }

    /// Provisions the default wallet of a new user.
    ///
    /// The user id is the idempotency key: if the user already owns a default
    /// wallet it is returned with `created == false` and no remote wallet is
    /// created. The store allows one default wallet per user, so concurrent
    /// runs still converge on a single record.
    #[instrument(skip(self, payload), fields(user_id = %payload.user_id))]
    pub async fn provision_default_wallet(
        &self,
        payload: &ProvisionWalletPayload,
    ) -> Result<ProvisionedWallet, AppError> {
        payload.validate()?;

        let existing = self.ctx.wallets.find_wallets_by_owner(&payload.user_id).await?;
        if let Some(default) = existing.into_iter().find(|w| w.is_default) {
            info!(wallet_id = %default.wallet_id, "User already has a default wallet");
            return Ok(ProvisionedWallet::existing(default));
        }

        let wallet_name = match payload.display_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => format!("{name}'s wallet"),
            _ => "Personal Wallet".to_string(),
        };

        self.provision(ProvisionRequest {
            owner_id: payload.user_id.clone(),
            owner_email: payload.email.clone(),
            wallet_name,
            is_default: true,
        })
        .await
    }
}
