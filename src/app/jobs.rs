//! Job handlers connecting the workflows to the scheduler.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use super::provisioning::ProvisioningWorkflow;
use super::scheduler::{JobHandler, JobOptions, JobScheduler, parse_payload};
use super::transaction::FundsTransfer;
use crate::domain::{
    AppError, NotificationPayload, Notifier, ProvisionWalletPayload, SendFundsPayload,
    WalletRecord,
};

pub const PROVISION_DEFAULT_WALLET: &str = "provision_default_wallet";
pub const SEND_FUNDS: &str = "send_funds";
pub const SEND_NOTIFICATION: &str = "send_notification";

/// Provisions a user's default wallet, then queues a welcome notification.
///
/// Safe to run more than once for the same user: the workflow returns the
/// existing default wallet instead of creating another, and the welcome
/// notification is only queued by the run that stored the wallet.
pub struct ProvisionDefaultWalletJob {
    workflow: Arc<ProvisioningWorkflow>,
    scheduler: Weak<JobScheduler>,
}

impl ProvisionDefaultWalletJob {
    #[must_use]
    pub fn new(workflow: Arc<ProvisioningWorkflow>, scheduler: Weak<JobScheduler>) -> Self {
        Self {
            workflow,
            scheduler,
        }
    }

    async fn enqueue_welcome(
        &self,
        payload: &ProvisionWalletPayload,
        wallet: &WalletRecord,
    ) -> Option<uuid::Uuid> {
        let scheduler = self.scheduler.upgrade()?;
        let notification = welcome_notification(payload, wallet);

        match scheduler
            .enqueue_payload(SEND_NOTIFICATION, &notification)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                // The wallet exists; a lost welcome message does not fail provisioning.
                warn!(wallet_id = %wallet.wallet_id, error = %e, "Could not enqueue welcome notification");
                None
            }
        }
    }
}

fn welcome_notification(payload: &ProvisionWalletPayload, wallet: &WalletRecord) -> NotificationPayload {
    let greeting = match payload.display_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => format!("Hi {name},"),
        _ => "Hi,".to_string(),
    };
    NotificationPayload {
        recipient: payload.email.clone(),
        subject: "Your wallet is ready".to_string(),
        body: format!(
            "{greeting}\n\nYour wallet \"{}\" has been created on {}.\nYou can receive funds at {}.\n",
            wallet.wallet_name, wallet.network, wallet.address
        ),
    }
}

#[async_trait]
impl JobHandler for ProvisionDefaultWalletJob {
    async fn handle(&self, payload: serde_json::Value) -> Result<serde_json::Value, AppError> {
        let payload: ProvisionWalletPayload = parse_payload(payload)?;
        let provisioned = self.workflow.provision_default_wallet(&payload).await?;
        let wallet = &provisioned.record;

        let notification_job = if provisioned.created {
            self.enqueue_welcome(&payload, wallet).await
        } else {
            None
        };

        info!(
            wallet_id = %wallet.wallet_id,
            user_id = %wallet.user_id,
            created = provisioned.created,
            "Default wallet provisioned"
        );
        Ok(json!({
            "wallet": wallet.summary(),
            "created": provisioned.created,
            "orphaned_wallet_id": provisioned.orphaned_wallet_id,
            "notification_job_id": notification_job,
        }))
    }
}

/// Runs the transaction pipeline for a queued transfer; the result is the receipt.
///
/// Not idempotent: a second run would broadcast a second transaction, so the
/// job is defined with [`JobOptions::non_idempotent`].
pub struct SendFundsJob {
    transfers: Arc<FundsTransfer>,
}

impl SendFundsJob {
    #[must_use]
    pub fn new(transfers: Arc<FundsTransfer>) -> Self {
        Self { transfers }
    }
}

#[async_trait]
impl JobHandler for SendFundsJob {
    async fn handle(&self, payload: serde_json::Value) -> Result<serde_json::Value, AppError> {
        let payload: SendFundsPayload = parse_payload(payload)?;
        let receipt = self.transfers.send(&payload).await?;
        Ok(serde_json::to_value(receipt)?)
    }
}

pub struct SendNotificationJob {
    notifier: Arc<dyn Notifier>,
}

impl SendNotificationJob {
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl JobHandler for SendNotificationJob {
    async fn handle(&self, payload: serde_json::Value) -> Result<serde_json::Value, AppError> {
        let payload: NotificationPayload = parse_payload(payload)?;
        self.notifier
            .send(&payload.recipient, &payload.subject, &payload.body)
            .await?;
        Ok(json!({ "delivered_to": payload.recipient }))
    }
}

/// Collaborators needed by the built-in jobs.
pub struct JobDependencies {
    pub provisioning: Arc<ProvisioningWorkflow>,
    pub transfers: Arc<FundsTransfer>,
    pub notifier: Arc<dyn Notifier>,
}

/// Defines the built-in jobs on `scheduler`.
pub fn register_default_jobs(scheduler: &Arc<JobScheduler>, deps: JobDependencies) {
    scheduler.define(
        PROVISION_DEFAULT_WALLET,
        Arc::new(ProvisionDefaultWalletJob::new(
            deps.provisioning,
            Arc::downgrade(scheduler),
        )),
    );
    scheduler.define_with(
        SEND_FUNDS,
        Arc::new(SendFundsJob::new(deps.transfers)),
        JobOptions::non_idempotent(),
    );
    scheduler.define(
        SEND_NOTIFICATION,
        Arc::new(SendNotificationJob::new(deps.notifier)),
    );
}
