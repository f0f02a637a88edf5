//! Transaction proposal workflow: create → publish → sign → broadcast.
//!
//! The remote service enforces the order (a proposal must exist to be
//! published, and be published to be signed or broadcast), and the proposal
//! stage in [`TransactionProposal`] only moves forward. Nothing already
//! acknowledged remotely is ever reversed.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};
use validator::Validate;

use super::aggregator::WalletAggregator;
use super::pipeline::{Pipeline, WorkflowStep};
use crate::domain::{
    AppError, ProposalReceipt, ProposalStage, RemoteServiceError, RemoteWalletClient,
    SendFundsPayload, TransactionOutput, TransactionProposal, ValidationError, WalletId,
};

pub const TRANSACTION_PIPELINE: &str = "transaction_proposal";

/// Request-scoped context: the client of the wallet being spent from.
pub struct TransactionContext {
    pub wallet_id: WalletId,
    pub client: Arc<dyn RemoteWalletClient>,
}

/// Input of the transaction pipeline.
#[derive(Debug, Clone)]
pub struct ProposalDraft {
    pub outputs: Vec<TransactionOutput>,
    pub message: Option<String>,
}

impl ProposalDraft {
    fn validate(&self) -> Result<(), AppError> {
        if self.outputs.is_empty() {
            return Err(ValidationError::field("outputs", "at least one output is required").into());
        }
        for output in &self.outputs {
            output.validate()?;
        }
        Ok(())
    }
}

pub struct CreateProposal;

#[async_trait]
impl WorkflowStep<TransactionContext> for CreateProposal {
    type Input = ProposalDraft;
    type Output = TransactionProposal;

    fn name(&self) -> &'static str {
        "CreateProposal"
    }

    async fn run(
        &self,
        ctx: &TransactionContext,
        draft: ProposalDraft,
    ) -> Result<TransactionProposal, AppError> {
        draft.validate()?;

        let proposal_id = ctx
            .client
            .create_proposal(&draft.outputs, draft.message.as_deref())
            .await?;
        if proposal_id.is_empty() {
            return Err(
                RemoteServiceError::InvalidResponse("empty proposal id".to_string()).into(),
            );
        }

        info!(wallet_id = %ctx.wallet_id, proposal_id = %proposal_id, "Proposal created");
        Ok(TransactionProposal::created(
            proposal_id,
            draft.outputs,
            draft.message,
        ))
    }
}

pub struct PublishProposal;

#[async_trait]
impl WorkflowStep<TransactionContext> for PublishProposal {
    type Input = TransactionProposal;
    type Output = TransactionProposal;

    fn name(&self) -> &'static str {
        "PublishProposal"
    }

    async fn run(
        &self,
        ctx: &TransactionContext,
        proposal: TransactionProposal,
    ) -> Result<TransactionProposal, AppError> {
        ctx.client.publish_proposal(&proposal.proposal_id).await?;
        proposal.advance(ProposalStage::Published)
    }
}

pub struct SignProposal;

#[async_trait]
impl WorkflowStep<TransactionContext> for SignProposal {
    type Input = TransactionProposal;
    type Output = TransactionProposal;

    fn name(&self) -> &'static str {
        "SignProposal"
    }

    async fn run(
        &self,
        ctx: &TransactionContext,
        proposal: TransactionProposal,
    ) -> Result<TransactionProposal, AppError> {
        ctx.client.sign_proposal(&proposal.proposal_id).await?;
        proposal.advance(ProposalStage::Signed)
    }
}

pub struct BroadcastProposal;

#[async_trait]
impl WorkflowStep<TransactionContext> for BroadcastProposal {
    type Input = TransactionProposal;
    type Output = ProposalReceipt;

    fn name(&self) -> &'static str {
        "BroadcastProposal"
    }

    async fn run(
        &self,
        ctx: &TransactionContext,
        proposal: TransactionProposal,
    ) -> Result<ProposalReceipt, AppError> {
        let memo = ctx.client.broadcast_proposal(&proposal.proposal_id).await?;
        let proposal = proposal.advance(ProposalStage::Broadcast)?;
        info!(
            wallet_id = %ctx.wallet_id,
            proposal_id = %proposal.proposal_id,
            memo = %memo,
            "Proposal broadcast"
        );
        Ok(ProposalReceipt {
            proposal,
            confirmation_memo: memo,
        })
    }
}

/// Builds the create → publish → sign → broadcast pipeline.
pub fn transaction_pipeline() -> Pipeline<TransactionContext, ProposalDraft, ProposalReceipt> {
    Pipeline::new(TRANSACTION_PIPELINE, CreateProposal)
        .then(PublishProposal)
        .then(SignProposal)
        .then(BroadcastProposal)
}

/// Sends funds from one of a user's wallets.
///
/// The wallet is resolved through the aggregator, so a wallet owned by someone
/// else, or one whose credentials fail to import, is not found.
pub struct FundsTransfer {
    aggregator: Arc<WalletAggregator>,
    pipeline: Pipeline<TransactionContext, ProposalDraft, ProposalReceipt>,
}

impl FundsTransfer {
    #[must_use]
    pub fn new(aggregator: Arc<WalletAggregator>) -> Self {
        Self {
            aggregator,
            pipeline: transaction_pipeline(),
        }
    }

    #[instrument(skip(self, payload), fields(user_id = %payload.user_id, wallet_id = %payload.wallet_id))]
    pub async fn send(&self, payload: &SendFundsPayload) -> Result<ProposalReceipt, AppError> {
        payload.validate()?;

        let loaded = self
            .aggregator
            .load_wallets_for_user(&payload.user_id)
            .await?;
        let wallet = loaded.get_by_wallet_id(&payload.wallet_id)?;

        let ctx = TransactionContext {
            wallet_id: wallet.record.wallet_id.clone(),
            client: Arc::clone(&wallet.client),
        };
        self.pipeline
            .run(
                &ctx,
                ProposalDraft {
                    outputs: payload.outputs.clone(),
                    message: payload.message.clone(),
                },
            )
            .await
    }
}
