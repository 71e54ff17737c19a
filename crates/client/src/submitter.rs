//! Transaction Submitter
//!
//! Drives one write intent through the pipeline:
//!
//! ```text
//! Idle → Validating → Simulating → Submitted → Confirmed
//!            │            │            └──────→ Failed
//!            └────────────┴──→ Rejected
//! ```
//!
//! Rejected means nothing was sent. Failed means the write reached the node:
//! the broadcast was refused, the transaction reverted, or confirmation
//! timed out. Every Submitted write ends up in the [`TransactionHistory`].
//!
//! ## Key Features
//!
//! - **Local validation**: snapshot checks run before any network call
//! - **Dry run**: a reverting simulation is reported with its decoded
//!   reason and nothing is broadcast
//! - **In-flight guard**: one outstanding submission per [`IntentKey`]
//! - **Detached confirmation**: receipts are awaited on a spawned task, so
//!   dropping the handle never leaves the cache stale or the guard held
//! - **No retries**: exactly one state-changing call per submission

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use splitpool_common::{validate_intent, Address, GroupId, Intent, IntentContext, IntentKey, TxHash};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, Invalidation, LocalCache, TtlClass};
use crate::chain::{ContractWriter, TxReceipt};
use crate::config::TransactionConfig;
use crate::error::{ClientError, ClientResult};
use crate::history::{TransactionHistory, TxRecord, TxStatus};
use crate::session::Session;

// ============ Stages ============

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Idle,
    Validating,
    Simulating,
    Submitted,
    Confirmed,
    Rejected,
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Rejected | Self::Failed)
    }

    pub fn can_advance_to(&self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (*self, next),
            (Idle, Validating)
                | (Validating, Simulating)
                | (Validating, Submitted)
                | (Validating, Rejected)
                | (Simulating, Submitted)
                | (Simulating, Rejected)
                | (Submitted, Confirmed)
                | (Submitted, Failed)
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct StageTracker {
    key: IntentKey,
    tx: watch::Sender<Stage>,
}

impl StageTracker {
    fn advance(&self, next: Stage) {
        let current = *self.tx.borrow();
        if !current.can_advance_to(next) {
            warn!(key = %self.key, %current, %next, "ignoring invalid stage transition");
            return;
        }
        info!(key = %self.key, from = %current, to = %next, "submission stage");
        self.tx.send_replace(next);
    }
}

// ============ In-flight Guard ============

type InFlight = Arc<Mutex<HashSet<IntentKey>>>;

/// Holds an intent key in the in-flight set until dropped
struct InFlightGuard {
    set: InFlight,
    key: IntentKey,
}

impl InFlightGuard {
    fn acquire(set: &InFlight, key: IntentKey) -> ClientResult<Self> {
        if !set.lock().insert(key.clone()) {
            return Err(ClientError::AlreadyInFlight { key });
        }
        Ok(Self {
            set: Arc::clone(set),
            key,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
        debug!(key = %self.key, "in-flight guard released");
    }
}

// ============ Settings ============

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmitterSettings {
    /// Confirmations before a receipt counts as final
    pub confirmations: u64,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
    /// Dry-run every intent before broadcasting
    pub simulate: bool,
}

impl From<&TransactionConfig> for SubmitterSettings {
    fn from(config: &TransactionConfig) -> Self {
        Self {
            confirmations: config.confirmations.max(1),
            confirmation_timeout: Duration::from_secs(config.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            simulate: true,
        }
    }
}

impl Default for SubmitterSettings {
    fn default() -> Self {
        Self::from(&TransactionConfig::default())
    }
}

/// Cache scopes a confirmed intent can have changed
///
/// `expense_group` is the group of the approved expense when it was known
/// at submission time. Without it every balance entry is dropped.
pub fn invalidations_for(
    intent: &Intent,
    expense_group: Option<GroupId>,
    created_pool: Option<Address>,
) -> Vec<Invalidation> {
    match intent {
        Intent::PayShare { pool, .. } => vec![Invalidation::Pool(*pool)],
        Intent::CreatePool { .. } => {
            let mut scopes = vec![Invalidation::PoolIndex];
            scopes.extend(created_pool.map(Invalidation::Pool));
            scopes
        }
        Intent::CreateGroup { .. } => vec![Invalidation::GroupIndex],
        Intent::AddExpense { group_id, .. } => vec![
            Invalidation::Group(*group_id),
            Invalidation::Key(CacheKey::ExpenseCount),
        ],
        Intent::ApproveExpense { expense_id } => vec![
            Invalidation::Expense(*expense_id),
            match expense_group {
                Some(group_id) => Invalidation::Group(group_id),
                None => Invalidation::Class(TtlClass::Balances),
            },
        ],
        Intent::SettleDebt { group_id, .. } => vec![Invalidation::Group(*group_id)],
    }
}

// ============ Pending Submission ============

/// A broadcast transaction whose confirmation is tracked in the background
pub struct PendingSubmission {
    key: IntentKey,
    tx_hash: TxHash,
    stage: watch::Receiver<Stage>,
    handle: JoinHandle<ClientResult<TxReceipt>>,
}

impl PendingSubmission {
    pub fn key(&self) -> &IntentKey {
        &self.key
    }

    pub fn tx_hash(&self) -> TxHash {
        self.tx_hash
    }

    pub fn stage(&self) -> Stage {
        *self.stage.borrow()
    }

    /// Stage updates, for callers that render progress
    pub fn subscribe(&self) -> watch::Receiver<Stage> {
        self.stage.clone()
    }

    /// Waits for the terminal stage
    pub async fn wait(self) -> ClientResult<TxReceipt> {
        self.handle
            .await
            .map_err(|err| ClientError::TaskAborted(err.to_string()))?
    }

    /// Stops waiting. The transaction still resolves in the background.
    pub fn detach(self) -> TxHash {
        self.tx_hash
    }
}

// ============ Submitter ============

#[derive(Clone)]
pub struct TransactionSubmitter {
    writer: Arc<dyn ContractWriter>,
    session: Arc<Session>,
    cache: Arc<LocalCache>,
    history: Arc<TransactionHistory>,
    in_flight: InFlight,
    settings: SubmitterSettings,
}

impl TransactionSubmitter {
    pub fn new(
        writer: Arc<dyn ContractWriter>,
        session: Arc<Session>,
        cache: Arc<LocalCache>,
        history: Arc<TransactionHistory>,
        settings: SubmitterSettings,
    ) -> Self {
        Self {
            writer,
            session,
            cache,
            history,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            settings,
        }
    }

    pub fn settings(&self) -> &SubmitterSettings {
        &self.settings
    }

    pub fn history(&self) -> &Arc<TransactionHistory> {
        &self.history
    }

    pub fn is_in_flight(&self, key: &IntentKey) -> bool {
        self.in_flight.lock().contains(key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Runs `intent` up to broadcast and hands back the pending submission
    ///
    /// # Errors
    /// - `NotConnected` without a session account
    /// - `AlreadyInFlight` while the same intent key is outstanding
    /// - `Validation` or `Reverted` when the intent is rejected
    pub async fn submit(&self, intent: Intent, mut ctx: IntentContext) -> ClientResult<PendingSubmission> {
        let from = self.session.require_account()?;
        ctx.sender = from;

        let key = intent.key();
        let guard = InFlightGuard::acquire(&self.in_flight, key.clone())?;
        let (tx, stage) = watch::channel(Stage::Idle);
        let tracker = StageTracker {
            key: key.clone(),
            tx,
        };

        // 1. Local checks
        tracker.advance(Stage::Validating);
        if let Err(err) = validate_intent(&intent, &ctx) {
            tracker.advance(Stage::Rejected);
            return Err(err.into());
        }

        // 2. Dry run
        if self.settings.simulate {
            tracker.advance(Stage::Simulating);
            if let Err(err) = self.writer.simulate(from, &intent).await {
                warn!(%key, %err, "dry run failed");
                tracker.advance(Stage::Rejected);
                return Err(err);
            }
        }

        // 3. Broadcast, once
        tracker.advance(Stage::Submitted);
        let tx_hash = match self.writer.broadcast(from, &intent).await {
            Ok(hash) => hash,
            Err(err) => {
                warn!(%key, %err, "broadcast failed");
                self.history
                    .record(TxRecord::not_broadcast(intent.kind(), from, err.to_string()));
                tracker.advance(Stage::Failed);
                return Err(err);
            }
        };
        self.history
            .record(TxRecord::pending(tx_hash, intent.kind(), from));

        // 4. Confirmation in the background
        let confirmation = Confirmation {
            writer: Arc::clone(&self.writer),
            cache: Arc::clone(&self.cache),
            history: Arc::clone(&self.history),
            settings: self.settings,
            expense_group: ctx.expense.as_ref().map(|e| e.group_id),
            tracker,
            intent,
            tx_hash,
            _guard: guard,
        };
        let handle = tokio::spawn(confirmation.run());

        Ok(PendingSubmission {
            key,
            tx_hash,
            stage,
            handle,
        })
    }

    /// Submits and waits for the terminal stage
    pub async fn submit_and_wait(&self, intent: Intent, ctx: IntentContext) -> ClientResult<TxReceipt> {
        self.submit(intent, ctx).await?.wait().await
    }
}

/// State moved into the confirmation task
struct Confirmation {
    writer: Arc<dyn ContractWriter>,
    cache: Arc<LocalCache>,
    history: Arc<TransactionHistory>,
    settings: SubmitterSettings,
    expense_group: Option<GroupId>,
    tracker: StageTracker,
    intent: Intent,
    tx_hash: TxHash,
    _guard: InFlightGuard,
}

impl Confirmation {
    async fn run(self) -> ClientResult<TxReceipt> {
        let tx_hash = self.tx_hash;
        match self.poll().await {
            Ok(receipt) if receipt.succeeded() => {
                self.history.update_status(&tx_hash, TxStatus::Confirmed, None);
                for scope in invalidations_for(&self.intent, self.expense_group, receipt.created_pool) {
                    self.cache.apply(&scope);
                }
                self.tracker.advance(Stage::Confirmed);
                info!(%receipt, "transaction confirmed");
                Ok(receipt)
            }
            Ok(receipt) => {
                let err = ClientError::FailedOnChain { tx_hash };
                self.history
                    .update_status(&tx_hash, TxStatus::Failed, Some(err.to_string()));
                self.tracker.advance(Stage::Failed);
                warn!(%receipt, "transaction reverted");
                Err(err)
            }
            Err(err) => {
                self.history
                    .update_status(&tx_hash, TxStatus::Failed, Some(err.to_string()));
                self.tracker.advance(Stage::Failed);
                warn!(%tx_hash, %err, "confirmation failed");
                Err(err)
            }
        }
    }

    /// Polls until a reverted receipt or enough confirmations
    async fn poll(&self) -> ClientResult<TxReceipt> {
        let deadline = Instant::now() + self.settings.confirmation_timeout;
        loop {
            match self.writer.receipt(self.tx_hash).await {
                Ok(Some(receipt)) if !receipt.succeeded() => return Ok(receipt),
                Ok(Some(receipt)) if receipt.confirmations >= self.settings.confirmations => {
                    return Ok(receipt)
                }
                Ok(Some(receipt)) => {
                    debug!(tx_hash = %self.tx_hash, confirmations = receipt.confirmations, "awaiting confirmations")
                }
                Ok(None) => debug!(tx_hash = %self.tx_hash, "receipt pending"),
                Err(err) => warn!(tx_hash = %self.tx_hash, %err, "receipt poll failed"),
            }

            if Instant::now() >= deadline {
                return Err(ClientError::ConfirmationTimeout {
                    tx_hash: self.tx_hash,
                    waited_secs: self.settings.confirmation_timeout.as_secs(),
                });
            }
            sleep(self.settings.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheTtls;
    use crate::error::ErrorKind;
    use crate::memory::MemoryLedger;
    use splitpool_common::SplitError;

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    fn fast() -> SubmitterSettings {
        SubmitterSettings {
            confirmations: 1,
            confirmation_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
            simulate: true,
        }
    }

    fn submitter(ledger: &Arc<MemoryLedger>, account: Option<Address>) -> TransactionSubmitter {
        let session = Arc::new(Session::new(31_337));
        if let Some(account) = account {
            session.connect(account, 31_337).unwrap();
        }
        TransactionSubmitter::new(
            ledger.clone(),
            session,
            Arc::new(LocalCache::new(CacheTtls::default())),
            Arc::new(TransactionHistory::new()),
            fast(),
        )
    }

    #[test]
    fn stage_transitions() {
        assert!(Stage::Idle.can_advance_to(Stage::Validating));
        assert!(Stage::Simulating.can_advance_to(Stage::Rejected));
        assert!(Stage::Submitted.can_advance_to(Stage::Failed));
        assert!(!Stage::Submitted.can_advance_to(Stage::Rejected));
        assert!(!Stage::Confirmed.can_advance_to(Stage::Failed));
        assert!(!Stage::Idle.can_advance_to(Stage::Submitted));
        assert!(!Stage::Validating.can_advance_to(Stage::Failed));
        assert!(!Stage::Simulating.can_advance_to(Stage::Failed));
        assert!(Stage::Rejected.is_terminal());
    }

    #[test]
    fn approval_invalidates_its_group_when_known() {
        let intent = Intent::ApproveExpense { expense_id: 4 };
        assert_eq!(
            invalidations_for(&intent, Some(2), None),
            vec![Invalidation::Expense(4), Invalidation::Group(2)]
        );
        assert_eq!(
            invalidations_for(&intent, None, None)[1],
            Invalidation::Class(TtlClass::Balances)
        );
    }

    #[test]
    fn created_pool_is_invalidated() {
        let intent = Intent::CreatePool {
            group: Address::ZERO,
            merchant: addr(9),
            total_amount: 100,
            metadata_pointer: 0,
            participants: vec![addr(1)],
        };
        assert_eq!(
            invalidations_for(&intent, None, Some(addr(7))),
            vec![Invalidation::PoolIndex, Invalidation::Pool(addr(7))]
        );
    }

    #[test]
    fn guard_releases_on_drop() {
        let set: InFlight = Arc::default();
        let key = IntentKey::ApproveExpense { expense_id: 1 };

        let guard = InFlightGuard::acquire(&set, key.clone()).unwrap();
        assert!(matches!(
            InFlightGuard::acquire(&set, key.clone()),
            Err(ClientError::AlreadyInFlight { .. })
        ));
        drop(guard);
        assert!(InFlightGuard::acquire(&set, key).is_ok());
    }

    #[tokio::test]
    async fn requires_connected_session() {
        let ledger = Arc::new(MemoryLedger::new(addr(0xfa)));
        let submitter = submitter(&ledger, None);
        let err = submitter
            .submit(
                Intent::ApproveExpense { expense_id: 1 },
                IntentContext::default(),
            )
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[tokio::test]
    async fn validation_rejects_without_network() {
        let ledger = Arc::new(MemoryLedger::new(addr(0xfa)));
        let submitter = submitter(&ledger, Some(addr(1)));
        let intent = Intent::CreatePool {
            group: Address::ZERO,
            merchant: addr(9),
            total_amount: 100,
            metadata_pointer: 0,
            participants: vec![addr(1), addr(2), addr(3)],
        };

        let err = submitter
            .submit(intent.clone(), IntentContext::default())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(matches!(
            err,
            ClientError::Validation(SplitError::NonDivisibleTotal { .. })
        ));
        assert_eq!(ledger.broadcasts(), 0);
        assert!(!submitter.is_in_flight(&intent.key()));
    }

    #[tokio::test]
    async fn confirmed_submission_is_recorded() {
        let ledger = Arc::new(MemoryLedger::new(addr(0xfa)));
        let pool = ledger
            .seed_pool(Address::ZERO, addr(1), addr(9), 100, vec![addr(1), addr(2)])
            .unwrap();
        let submitter = submitter(&ledger, Some(addr(2)));

        let pending = submitter
            .submit(Intent::PayShare { pool, value: 50 }, IntentContext::default())
            .await
            .unwrap();
        let hash = pending.tx_hash();
        let receipt = pending.wait().await.unwrap();

        assert!(receipt.succeeded());
        assert_eq!(receipt.tx_hash, hash);
        assert_eq!(submitter.history().get(&hash).unwrap().status, TxStatus::Confirmed);
        assert_eq!(submitter.in_flight_count(), 0);
        assert!(ledger.pool(&pool).unwrap().has_paid(&addr(2)));
    }

    #[tokio::test]
    async fn on_chain_revert_fails() {
        let ledger = Arc::new(MemoryLedger::new(addr(0xfa)));
        let pool = ledger
            .seed_pool(Address::ZERO, addr(1), addr(9), 100, vec![addr(1), addr(2)])
            .unwrap();
        ledger.revert_next_broadcast();
        let submitter = submitter(&ledger, Some(addr(2)));

        let pending = submitter
            .submit(Intent::PayShare { pool, value: 50 }, IntentContext::default())
            .await
            .unwrap();
        let hash = pending.tx_hash();
        let err = pending.wait().await.unwrap_err();

        assert!(matches!(err, ClientError::FailedOnChain { .. }));
        assert_eq!(err.tx_hash(), Some(hash));
        assert_eq!(submitter.history().get(&hash).unwrap().status, TxStatus::Failed);
        assert!(!ledger.pool(&pool).unwrap().has_paid(&addr(2)));
    }
}
