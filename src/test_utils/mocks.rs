//! Mock implementations for testing.
//!
//! These mocks provide in-memory implementations of domain traits
//! that can be configured to simulate various scenarios including
//! success, failure, and edge cases.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{
    AppError, Balance, CreateWalletRequest, DatabaseError, JobClaim, JobId, JobInvocation,
    JobRepository, JobStatus, NewJob, NewWalletRecord, Notifier, PendingWallet, ProposalId,
    ProposalStage, RemoteServiceError, RemoteWalletClient, RemoteWalletService,
    TransactionOutput, TransactionRecord, ValidationError, WalletRecord, WalletRepository,
    WalletStatus,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Configuration for mock behavior.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// If true, operations will fail.
    pub should_fail: bool,
    /// Custom error message for failures.
    pub error_message: Option<String>,
}

impl MockConfig {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
        }
    }
}

/// In-memory store implementing both [`WalletRepository`] and [`JobRepository`].
///
/// Claims are check-and-set under a single lock, so concurrent claims of the
/// same invocation behave like the database's conditional update.
///
/// # Example
///
/// ```
/// use wallet_orchestrator::test_utils::{InMemoryStore, mocks::MockConfig};
///
/// let store = InMemoryStore::new();
/// let failing = InMemoryStore::with_config(MockConfig::failure("DB error"));
/// ```
pub struct InMemoryStore {
    wallets: Mutex<Vec<WalletRecord>>,
    jobs: Mutex<Vec<JobInvocation>>,
    config: MockConfig,
    call_count: AtomicU64,
    is_healthy: AtomicBool,
    fail_wallet_inserts: AtomicBool,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            wallets: Mutex::new(Vec::new()),
            jobs: Mutex::new(Vec::new()),
            config,
            call_count: AtomicU64::new(0),
            is_healthy: AtomicBool::new(true),
            fail_wallet_inserts: AtomicBool::new(false),
        }
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Makes `insert_wallet` fail while leaving reads working.
    pub fn fail_wallet_inserts(&self, fail: bool) {
        self.fail_wallet_inserts.store(fail, Ordering::Relaxed);
    }

    pub fn all_wallets(&self) -> Vec<WalletRecord> {
        lock(&self.wallets).clone()
    }

    pub fn all_jobs(&self) -> Vec<JobInvocation> {
        lock(&self.jobs).clone()
    }

    /// Stores a record as-is, bypassing the repository contract. Used to seed
    /// records with corrupted credentials.
    pub fn insert_raw_wallet(&self, record: WalletRecord) {
        lock(&self.wallets).push(record);
    }

    async fn enter(&self) -> Result<(), AppError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if self.config.should_fail {
            let msg = self
                .config
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock database error".to_string());
            return Err(AppError::Database(DatabaseError::Query(msg)));
        }
        Ok(())
    }

    fn settle(
        &self,
        id: JobId,
        claim_token: Uuid,
        next: JobStatus,
        apply: impl FnOnce(&mut JobInvocation),
    ) -> bool {
        let mut jobs = lock(&self.jobs);
        match jobs.iter_mut().find(|j| j.id == id) {
            Some(job)
                if job.status.can_transition_to(next) && job.claim_token == Some(claim_token) =>
            {
                job.status = next;
                apply(job);
                let now = Utc::now();
                job.updated_at = now;
                job.finished_at = Some(now);
                true
            }
            _ => false,
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn stamp_claim(job: &mut JobInvocation, claim: &JobClaim) {
    job.status = JobStatus::Running;
    job.claimed_by = Some(claim.worker_id.clone());
    job.claim_token = Some(claim.token);
    job.claimed_at = Some(claim.claimed_at);
    job.updated_at = claim.claimed_at;
}

#[async_trait]
impl WalletRepository for InMemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        self.enter().await?;
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Mock database unhealthy".to_string(),
            )));
        }
        Ok(())
    }

    async fn insert_wallet(&self, record: NewWalletRecord) -> Result<WalletRecord, AppError> {
        self.enter().await?;
        if self.fail_wallet_inserts.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Query(
                "Mock wallet insert failure".to_string(),
            )));
        }

        let mut wallets = lock(&self.wallets);
        if wallets.iter().any(|w| w.wallet_id == record.wallet_id) {
            return Err(AppError::Database(DatabaseError::Duplicate(format!(
                "wallet {} already exists",
                record.wallet_id
            ))));
        }
        if record.is_default
            && wallets
                .iter()
                .any(|w| w.user_id == record.user_id && w.is_default)
        {
            return Err(AppError::Database(DatabaseError::Duplicate(format!(
                "user {} already has a default wallet",
                record.user_id
            ))));
        }

        let stored = WalletRecord {
            wallet_id: record.wallet_id,
            user_id: record.user_id,
            wallet_name: record.wallet_name,
            network: record.network,
            address: record.address,
            credentials: record.credentials,
            is_default: record.is_default,
            currency: record.currency,
            created_at: Utc::now(),
        };
        wallets.push(stored.clone());
        Ok(stored)
    }

    async fn find_wallets_by_owner(&self, user_id: &str) -> Result<Vec<WalletRecord>, AppError> {
        self.enter().await?;
        Ok(lock(&self.wallets)
            .iter()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_wallet(&self, wallet_id: &str) -> Result<Option<WalletRecord>, AppError> {
        self.enter().await?;
        Ok(lock(&self.wallets)
            .iter()
            .find(|w| w.wallet_id == wallet_id)
            .cloned())
    }
}

#[async_trait]
impl JobRepository for InMemoryStore {
    async fn insert_job(&self, job: NewJob) -> Result<JobInvocation, AppError> {
        self.enter().await?;
        let job = JobInvocation::pending(job);
        lock(&self.jobs).push(job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<JobInvocation>, AppError> {
        self.enter().await?;
        Ok(lock(&self.jobs).iter().find(|j| j.id == id).cloned())
    }

    async fn claim_job(
        &self,
        id: JobId,
        claim: &JobClaim,
    ) -> Result<Option<JobInvocation>, AppError> {
        self.enter().await?;
        let mut jobs = lock(&self.jobs);
        match jobs.iter_mut().find(|j| j.id == id) {
            Some(job) if job.status == JobStatus::Pending => {
                stamp_claim(job, claim);
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn claim_next(
        &self,
        claim: &JobClaim,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<JobInvocation>, AppError> {
        self.enter().await?;
        let mut jobs = lock(&self.jobs);
        let claimable = jobs.iter_mut().find(|j| match j.status {
            JobStatus::Pending => true,
            JobStatus::Running => j.claimed_at.is_some_and(|at| at < stale_before),
            _ => false,
        });
        Ok(claimable.map(|job| {
            if job.status == JobStatus::Running {
                job.reclaims += 1;
                job.attempts += 1;
            }
            stamp_claim(job, claim);
            job.clone()
        }))
    }

    async fn complete_job(
        &self,
        id: JobId,
        claim_token: Uuid,
        result: Option<serde_json::Value>,
    ) -> Result<bool, AppError> {
        self.enter().await?;
        Ok(self.settle(id, claim_token, JobStatus::Succeeded, |job| {
            job.result = result;
            job.last_error = None;
        }))
    }

    async fn fail_job(&self, id: JobId, claim_token: Uuid, error: &str) -> Result<bool, AppError> {
        self.enter().await?;
        Ok(self.settle(id, claim_token, JobStatus::Failed, |job| {
            job.attempts += 1;
            job.last_error = Some(error.to_string());
        }))
    }

    async fn expire_job(
        &self,
        id: JobId,
        claim_token: Uuid,
        error: &str,
    ) -> Result<bool, AppError> {
        self.enter().await?;
        Ok(self.settle(id, claim_token, JobStatus::Failed, |job| {
            job.last_error = Some(error.to_string());
        }))
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: i64,
    ) -> Result<Vec<JobInvocation>, AppError> {
        self.enter().await?;
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(lock(&self.jobs)
            .iter()
            .rev()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Remote operations observable on [`MockRemoteWalletService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    CreateWallet,
    JoinWallet,
    WalletStatus,
    CreateAddress,
    Export,
    Import,
    Balance,
    History,
    CreateProposal,
    PublishProposal,
    SignProposal,
    BroadcastProposal,
}

#[derive(Serialize, Deserialize)]
struct MockCredentials {
    wallet_id: String,
    copayer_id: String,
}

struct RemoteState {
    calls: Mutex<HashMap<RemoteOp, usize>>,
    failures: Mutex<HashSet<RemoteOp>>,
    proposals: Mutex<HashMap<ProposalId, ProposalStage>>,
    last_created: Mutex<Option<String>>,
    balance: AtomicU64,
    incomplete_rounds: AtomicU32,
    counter: AtomicU64,
    is_healthy: AtomicBool,
    latency_ms: AtomicU64,
}

impl RemoteState {
    /// Waits out the configured latency, then records `op`.
    async fn call(&self, op: RemoteOp) -> Result<(), AppError> {
        let ms = self.latency_ms.load(Ordering::Relaxed);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        self.record(op)
    }

    fn record(&self, op: RemoteOp) -> Result<(), AppError> {
        *lock(&self.calls).entry(op).or_insert(0) += 1;
        if lock(&self.failures).contains(&op) {
            return Err(AppError::RemoteService(RemoteServiceError::Unavailable(
                format!("mock {op:?} failure"),
            )));
        }
        Ok(())
    }

    fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Moves a proposal from `from` to `to`, enforcing the remote ordering.
    fn advance_proposal(
        &self,
        proposal_id: &str,
        from: ProposalStage,
        to: ProposalStage,
    ) -> Result<(), AppError> {
        let mut proposals = lock(&self.proposals);
        match proposals.get_mut(proposal_id) {
            Some(stage) if *stage == from => {
                *stage = to;
                Ok(())
            }
            Some(stage) => Err(AppError::RemoteService(RemoteServiceError::Rejected(
                format!("proposal {proposal_id} is {stage:?}, expected {from:?}"),
            ))),
            None => Err(AppError::RemoteService(RemoteServiceError::Rejected(
                format!("unknown proposal {proposal_id}"),
            ))),
        }
    }
}

/// Scriptable remote wallet service.
///
/// Every operation is counted per [`RemoteOp`], and any operation can be made
/// to fail. Clients produced by the service share its scripting state.
pub struct MockRemoteWalletService {
    state: Arc<RemoteState>,
}

impl MockRemoteWalletService {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(RemoteState {
                calls: Mutex::new(HashMap::new()),
                failures: Mutex::new(HashSet::new()),
                proposals: Mutex::new(HashMap::new()),
                last_created: Mutex::new(None),
                balance: AtomicU64::new(1_000_000),
                incomplete_rounds: AtomicU32::new(0),
                counter: AtomicU64::new(0),
                is_healthy: AtomicBool::new(true),
                latency_ms: AtomicU64::new(0),
            }),
        }
    }

    /// Makes every future call of `op` fail with `Unavailable`.
    pub fn fail_on(&self, op: RemoteOp) {
        lock(&self.state.failures).insert(op);
    }

    pub fn clear_failures(&self) {
        lock(&self.state.failures).clear();
    }

    /// Number of times `op` was attempted.
    pub fn calls(&self, op: RemoteOp) -> usize {
        lock(&self.state.calls).get(&op).copied().unwrap_or(0)
    }

    /// Sets the available balance of every wallet.
    pub fn set_balance(&self, amount: u64) {
        self.state.balance.store(amount, Ordering::Relaxed);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Delays every remote call (except credential export) by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.state.latency_ms.store(ms, Ordering::Relaxed);
    }

    /// Number of status polls a newly created wallet reports as incomplete.
    pub fn set_incomplete_rounds(&self, rounds: u32) {
        self.state.incomplete_rounds.store(rounds, Ordering::Relaxed);
    }

    pub fn last_created_wallet_id(&self) -> Option<String> {
        lock(&self.state.last_created).clone()
    }

    /// A valid credentials blob for `wallet_id`, as `export_credentials` would
    /// produce it.
    pub fn credentials_for(&self, wallet_id: &str) -> SecretString {
        encode_credentials(wallet_id, &format!("copayer-{wallet_id}"))
    }

    fn client(&self, wallet_id: String, incomplete_rounds: u32) -> MockRemoteWalletClient {
        MockRemoteWalletClient {
            copayer_id: format!("copayer-{wallet_id}"),
            wallet_id,
            incomplete_rounds: AtomicU32::new(incomplete_rounds),
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MockRemoteWalletService {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_credentials(wallet_id: &str, copayer_id: &str) -> SecretString {
    let blob = serde_json::json!({ "wallet_id": wallet_id, "copayer_id": copayer_id });
    SecretString::from(blob.to_string())
}

#[async_trait]
impl RemoteWalletService for MockRemoteWalletService {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.state.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::RemoteService(RemoteServiceError::Unavailable(
                "Mock wallet service unhealthy".to_string(),
            )));
        }
        Ok(())
    }

    async fn create_wallet(
        &self,
        request: &CreateWalletRequest,
    ) -> Result<PendingWallet, AppError> {
        self.state.call(RemoteOp::CreateWallet).await?;
        let wallet_id = format!("mock-wallet-{}", self.state.next_id());
        *lock(&self.state.last_created) = Some(wallet_id.clone());

        let rounds = self.state.incomplete_rounds.load(Ordering::Relaxed);
        let client = self.client(wallet_id.clone(), rounds);
        Ok(PendingWallet {
            secret: SecretString::from(format!("secret-{wallet_id}-{}", request.name)),
            client: Arc::new(client),
        })
    }

    async fn import_wallet(
        &self,
        credentials: &SecretString,
    ) -> Result<Arc<dyn RemoteWalletClient>, AppError> {
        self.state.call(RemoteOp::Import).await?;
        let parsed: MockCredentials = serde_json::from_str(credentials.expose_secret())
            .map_err(|e| {
                AppError::Validation(ValidationError::InvalidFormat(format!(
                    "credentials blob: {e}"
                )))
            })?;
        Ok(Arc::new(MockRemoteWalletClient {
            wallet_id: parsed.wallet_id,
            copayer_id: parsed.copayer_id,
            incomplete_rounds: AtomicU32::new(0),
            state: Arc::clone(&self.state),
        }))
    }
}

/// Client bound to one mock wallet.
pub struct MockRemoteWalletClient {
    wallet_id: String,
    copayer_id: String,
    incomplete_rounds: AtomicU32,
    state: Arc<RemoteState>,
}

impl MockRemoteWalletClient {
    pub fn wallet_id(&self) -> &str {
        &self.wallet_id
    }
}

#[async_trait]
impl RemoteWalletClient for MockRemoteWalletClient {
    async fn join_wallet(
        &self,
        _secret: &SecretString,
        _copayer_name: &str,
    ) -> Result<(), AppError> {
        self.state.call(RemoteOp::JoinWallet).await
    }

    async fn wallet_status(&self) -> Result<WalletStatus, AppError> {
        self.state.call(RemoteOp::WalletStatus).await?;
        let pending = self
            .incomplete_rounds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if pending {
            return Ok(WalletStatus {
                wallet_id: None,
                complete: false,
                copayers_joined: 0,
                copayers_required: 1,
            });
        }
        Ok(WalletStatus {
            wallet_id: Some(self.wallet_id.clone()),
            complete: true,
            copayers_joined: 1,
            copayers_required: 1,
        })
    }

    async fn create_address(&self) -> Result<String, AppError> {
        self.state.call(RemoteOp::CreateAddress).await?;
        Ok(format!("addr-{}-{}", self.wallet_id, self.state.next_id()))
    }

    fn export_credentials(&self) -> Result<SecretString, AppError> {
        self.state.record(RemoteOp::Export)?;
        Ok(encode_credentials(&self.wallet_id, &self.copayer_id))
    }

    async fn balance(&self) -> Result<Balance, AppError> {
        self.state.call(RemoteOp::Balance).await?;
        let amount = self.state.balance.load(Ordering::Relaxed);
        Ok(Balance {
            total: amount,
            locked: 0,
            available: amount,
        })
    }

    async fn transaction_history(&self) -> Result<Vec<TransactionRecord>, AppError> {
        self.state.call(RemoteOp::History).await?;
        Ok(vec![TransactionRecord {
            txid: format!("txid-seed-{}", self.wallet_id),
            action: "received".to_string(),
            amount: 250_000,
            fees: None,
            confirmations: 6,
            time: Some(Utc::now()),
            message: None,
        }])
    }

    async fn create_proposal(
        &self,
        outputs: &[TransactionOutput],
        _message: Option<&str>,
    ) -> Result<ProposalId, AppError> {
        self.state.call(RemoteOp::CreateProposal).await?;
        let total: u64 = outputs.iter().map(|o| o.amount).sum();
        if total > self.state.balance.load(Ordering::Relaxed) {
            return Err(AppError::RemoteService(RemoteServiceError::InsufficientFunds));
        }
        let proposal_id = format!("proposal-{}", self.state.next_id());
        lock(&self.state.proposals).insert(proposal_id.clone(), ProposalStage::Created);
        Ok(proposal_id)
    }

    async fn publish_proposal(&self, proposal_id: &str) -> Result<(), AppError> {
        self.state.call(RemoteOp::PublishProposal).await?;
        self.state
            .advance_proposal(proposal_id, ProposalStage::Created, ProposalStage::Published)
    }

    async fn sign_proposal(&self, proposal_id: &str) -> Result<(), AppError> {
        self.state.call(RemoteOp::SignProposal).await?;
        self.state
            .advance_proposal(proposal_id, ProposalStage::Published, ProposalStage::Signed)
    }

    async fn broadcast_proposal(&self, proposal_id: &str) -> Result<String, AppError> {
        self.state.call(RemoteOp::BroadcastProposal).await?;
        self.state
            .advance_proposal(proposal_id, ProposalStage::Signed, ProposalStage::Broadcast)?;
        Ok(format!("txid-{proposal_id}"))
    }
}

/// A notification captured by [`MockNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Notifier that records what it was asked to send.
#[derive(Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<SentNotification>>,
    should_fail: AtomicBool,
}

impl MockNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), AppError> {
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(AppError::RemoteService(RemoteServiceError::Unavailable(
                "Mock notifier failure".to_string(),
            )));
        }
        lock(&self.sent).push(SentNotification {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Network;

    fn new_record(wallet_id: &str, user_id: &str) -> NewWalletRecord {
        NewWalletRecord {
            wallet_id: wallet_id.to_string(),
            user_id: user_id.to_string(),
            wallet_name: "Personal Wallet".to_string(),
            network: Network::Testnet,
            address: "addr".to_string(),
            credentials: SecretString::from("{}"),
            is_default: true,
            currency: None,
        }
    }

    #[tokio::test]
    async fn test_store_rejects_duplicate_wallet_ids() {
        let store = InMemoryStore::new();
        store.insert_wallet(new_record("w1", "u1")).await.unwrap();

        let err = store.insert_wallet(new_record("w1", "u2")).await.unwrap_err();
        assert!(matches!(err, AppError::Database(DatabaseError::Duplicate(_))));
        assert_eq!(store.find_wallets_by_owner("u1").await.unwrap().len(), 1);
        assert!(store.find_wallets_by_owner("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_allows_one_default_wallet_per_user() {
        let store = InMemoryStore::new();
        store.insert_wallet(new_record("w1", "u1")).await.unwrap();

        let err = store.insert_wallet(new_record("w2", "u1")).await.unwrap_err();
        assert!(matches!(err, AppError::Database(DatabaseError::Duplicate(_))));

        let secondary = NewWalletRecord {
            is_default: false,
            ..new_record("w3", "u1")
        };
        store.insert_wallet(secondary).await.unwrap();
        assert_eq!(store.find_wallets_by_owner("u1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_store_failure_and_call_count() {
        let store = InMemoryStore::with_config(MockConfig::failure("Connection timeout"));
        assert!(store.find_wallet("w1").await.is_err());
        assert!(store.get_job(Uuid::new_v4()).await.is_err());
        assert_eq!(store.call_count(), 2);
    }

    #[tokio::test]
    async fn test_claim_token_guards_completion() {
        let store = InMemoryStore::new();
        let job = store
            .insert_job(NewJob::new("echo", serde_json::json!({})))
            .await
            .unwrap();
        let claim = JobClaim::new("w1");
        store.claim_job(job.id, &claim).await.unwrap().unwrap();

        assert!(!store.complete_job(job.id, Uuid::new_v4(), None).await.unwrap());
        assert!(store.complete_job(job.id, claim.token, None).await.unwrap());
        // terminal invocations cannot be settled twice
        assert!(!store.fail_job(job.id, claim.token, "late").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_jobs_newest_first_with_filter() {
        let store = InMemoryStore::new();
        let first = store
            .insert_job(NewJob::new("a", serde_json::json!(1)))
            .await
            .unwrap();
        let second = store
            .insert_job(NewJob::new("b", serde_json::json!(2)))
            .await
            .unwrap();
        store.claim_job(first.id, &JobClaim::new("w")).await.unwrap();

        let all = store.list_jobs(None, 10).await.unwrap();
        assert_eq!(all[0].id, second.id);
        assert_eq!(all.len(), 2);

        let pending = store.list_jobs(Some(JobStatus::Pending), 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id);
    }

    #[tokio::test]
    async fn test_remote_enforces_proposal_order() {
        let remote = MockRemoteWalletService::new();
        let client = remote
            .import_wallet(&remote.credentials_for("w1"))
            .await
            .unwrap();

        let id = client
            .create_proposal(&[TransactionOutput::new(10, "addr1")], None)
            .await
            .unwrap();
        assert!(client.sign_proposal(&id).await.is_err());
        client.publish_proposal(&id).await.unwrap();
        client.sign_proposal(&id).await.unwrap();
        assert_eq!(client.broadcast_proposal(&id).await.unwrap(), format!("txid-{id}"));
    }

    #[tokio::test]
    async fn test_remote_import_rejects_corrupt_blob() {
        let remote = MockRemoteWalletService::new();
        let result = remote.import_wallet(&SecretString::from("not json")).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(remote.calls(RemoteOp::Import), 1);
    }

    #[tokio::test]
    async fn test_exported_credentials_round_trip_through_import() {
        let remote = MockRemoteWalletService::new();
        let pending = remote
            .create_wallet(&CreateWalletRequest {
                name: "w".to_string(),
                owner_email: "a@b.com".to_string(),
                required_signers: 1,
                total_signers: 1,
                network: Network::Testnet,
            })
            .await
            .unwrap();
        let exported = pending.client.export_credentials().unwrap();

        let imported = remote.import_wallet(&exported).await.unwrap();
        let status = imported.wallet_status().await.unwrap();
        assert_eq!(status.wallet_id, remote.last_created_wallet_id());
    }

    #[tokio::test]
    async fn test_mock_notifier_records_and_fails() {
        let notifier = MockNotifier::new();
        notifier.send("a@b.com", "hi", "body").await.unwrap();
        assert_eq!(notifier.sent().len(), 1);

        notifier.set_failing(true);
        assert!(notifier.send("a@b.com", "hi", "body").await.is_err());
        assert_eq!(notifier.sent().len(), 1);
    }
}
