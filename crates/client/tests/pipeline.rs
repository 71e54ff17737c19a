//! End-to-end submission pipeline over the in-memory ledger

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use splitpool_client::{
    AbiValue, CacheTtls, ClientConfig, ClientError, ClientResult, ContractReader, ErrorKind,
    LedgerView, LocalCache, ManualClock, MemoryLedger, PoolField, ReadCall, Session,
    SplitPoolClient, Stage, SubmitterSettings, TxStatus,
};
use splitpool_common::{Address, Intent, IntentContext, IntentKind, SplitError};
use tokio::sync::Notify;

const CHAIN: u64 = 31_337;

fn addr(b: u8) -> Address {
    Address::repeat_byte(b)
}

struct Harness {
    ledger: Arc<MemoryLedger>,
    client: SplitPoolClient,
}

impl Harness {
    fn new() -> Self {
        let ledger = Arc::new(MemoryLedger::new(addr(0xfa)));
        let clock = Arc::new(ManualClock::new());
        let cache = Arc::new(LocalCache::with_clock(CacheTtls::default(), clock));
        let settings = SubmitterSettings {
            confirmations: 1,
            confirmation_timeout: Duration::from_millis(300),
            poll_interval: Duration::from_millis(5),
            simulate: true,
        };
        let client = SplitPoolClient::with_ledger(
            ledger.clone(),
            Arc::new(Session::new(CHAIN)),
            cache,
            settings,
        );
        Self { ledger, client }
    }

    fn login(&self, account: Address) {
        self.client.session().connect(account, CHAIN).unwrap();
    }

    fn pool(&self) -> Address {
        self.ledger
            .seed_pool(Address::ZERO, addr(1), addr(9), 100, vec![addr(1), addr(2)])
            .unwrap()
    }
}

/// Reader that parks the first collected-amount read after fetching it
struct SlowCollectedRead {
    inner: Arc<MemoryLedger>,
    armed: AtomicBool,
    fetched: Notify,
    release: Notify,
}

impl SlowCollectedRead {
    fn new(inner: Arc<MemoryLedger>) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(true),
            fetched: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl ContractReader for SlowCollectedRead {
    async fn read(&self, call: ReadCall) -> ClientResult<AbiValue> {
        let parks = matches!(
            call,
            ReadCall::Pool {
                field: PoolField::CollectedAmount,
                ..
            }
        );
        let value = self.inner.read(call).await?;
        if parks && self.armed.swap(false, Ordering::SeqCst) {
            self.fetched.notify_one();
            self.release.notified().await;
        }
        Ok(value)
    }
}

// ============ Pools ============

#[tokio::test]
async fn test_pay_share_refreshes_cached_pool() {
    let h = Harness::new();
    let pool = h.pool();
    h.login(addr(2));

    let before = h.client.view().pool(pool, Some(addr(2))).await.unwrap();
    assert_eq!(before.viewer_paid, Some(false));

    let receipt = h.client.pay_share(pool).await.unwrap().wait().await.unwrap();
    assert!(receipt.succeeded());

    let after = h.client.view().pool(pool, Some(addr(2))).await.unwrap();
    assert_eq!(after.state.collected_amount, 50);
    assert_eq!(after.viewer_paid, Some(true));
}

#[tokio::test]
async fn test_second_payment_rejected_locally() {
    let h = Harness::new();
    let pool = h.pool();
    h.login(addr(2));

    h.client.pay_share(pool).await.unwrap().wait().await.unwrap();
    let broadcasts = h.ledger.broadcasts();

    let err = h.client.pay_share(pool).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(h.ledger.broadcasts(), broadcasts);
}

#[tokio::test]
async fn test_duplicate_in_flight_rejected() {
    let h = Harness::new();
    let pool = h.pool();
    h.login(addr(2));
    h.ledger.hold_confirmations();

    let first = h.client.pay_share(pool).await.unwrap();
    let err = h.client.pay_share(pool).await.err().unwrap();
    assert!(matches!(err, ClientError::AlreadyInFlight { .. }));
    assert_eq!(h.ledger.broadcasts(), 1);

    h.ledger.release_confirmations();
    first.wait().await.unwrap();
    assert_eq!(h.client.submitter().in_flight_count(), 0);
}

#[tokio::test]
async fn test_simulation_revert_never_broadcasts() {
    let h = Harness::new();
    let pool = h.pool();
    h.login(addr(2));

    // No pool snapshot, so only the dry run can catch the wrong share
    let err = h
        .client
        .submitter()
        .submit(Intent::PayShare { pool, value: 40 }, IntentContext::default())
        .await
        .err()
        .unwrap();

    assert!(matches!(err, ClientError::Reverted { .. }));
    assert_eq!(err.kind(), ErrorKind::Simulation);
    assert_eq!(h.ledger.broadcasts(), 0);
    assert!(h.client.history().is_empty());
    assert_eq!(h.client.submitter().in_flight_count(), 0);
}

#[tokio::test]
async fn test_held_confirmation_times_out() {
    let h = Harness::new();
    let pool = h.pool();
    h.login(addr(2));
    h.client.view().pool(pool, None).await.unwrap();
    h.ledger.hold_confirmations();

    let pending = h.client.pay_share(pool).await.unwrap();
    let hash = pending.tx_hash();
    let stages = pending.subscribe();
    let err = pending.wait().await.unwrap_err();

    assert!(matches!(err, ClientError::ConfirmationTimeout { .. }));
    assert_eq!(err.tx_hash(), Some(hash));
    assert_eq!(*stages.borrow(), Stage::Failed);
    assert_eq!(h.client.history().get(&hash).unwrap().status, TxStatus::Failed);
    assert_eq!(h.client.submitter().in_flight_count(), 0);

    // Nothing confirmed, so the cached snapshot stays
    let cached = h.client.view().pool(pool, None).await.unwrap();
    assert_eq!(cached.state.collected_amount, 0);
}

#[tokio::test]
async fn test_detached_submission_still_invalidates() {
    let h = Harness::new();
    let pool = h.pool();
    h.login(addr(1));
    h.client.view().pool(pool, None).await.unwrap();

    let hash = h.client.pay_share(pool).await.unwrap().detach();
    for _ in 0..100 {
        if h.client.submitter().in_flight_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(h.client.history().get(&hash).unwrap().status, TxStatus::Confirmed);
    let fresh = h.client.view().pool(pool, None).await.unwrap();
    assert_eq!(fresh.state.collected_amount, 50);
}

#[tokio::test]
async fn test_read_spanning_a_confirmation_is_not_cached() {
    let h = Harness::new();
    let pool = h.pool();
    h.login(addr(2));

    let slow = Arc::new(SlowCollectedRead::new(h.ledger.clone()));
    let view = LedgerView::new(slow.clone(), h.client.view().cache().clone());

    // 1. A read fetches the pre-payment amount and stalls
    let stale = tokio::spawn({
        let view = view.clone();
        async move { view.pool(pool, None).await }
    });
    slow.fetched.notified().await;

    // 2. The payment confirms while it is stalled
    let receipt = h.client.pay_share(pool).await.unwrap().wait().await.unwrap();
    assert!(receipt.succeeded());

    // 3. The stalled read finishes with old data but must not cache it
    slow.release.notify_one();
    let _ = stale.await.unwrap();

    let fresh = view.pool(pool, None).await.unwrap();
    assert_eq!(fresh.state.collected_amount, 50);
    assert_eq!(fresh.state.paid_count, 1);
}

#[tokio::test]
async fn test_refused_broadcast_is_recorded_as_failed() {
    let h = Harness::new();
    let pool = h.pool();
    h.login(addr(2));
    h.ledger.refuse_next_broadcast();

    let err = h.client.pay_share(pool).await.err().unwrap();
    assert!(matches!(err, ClientError::Rpc { .. }));
    assert_eq!(h.ledger.broadcasts(), 0);
    assert_eq!(h.client.submitter().in_flight_count(), 0);

    let records = h.client.history().recent(1);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, TxStatus::Failed);
    assert_eq!(records[0].kind, IntentKind::PayShare);
    assert_eq!(records[0].from, addr(2));
    assert_eq!(records[0].hash, None);

    // Nothing reached the chain, so paying again is allowed
    h.client.pay_share(pool).await.unwrap().wait().await.unwrap();
    assert_eq!(h.client.history().len(), 2);
}

#[tokio::test]
async fn test_create_pool_refreshes_listing() {
    let h = Harness::new();
    h.login(addr(1));
    assert!(h.client.view().all_pools().await.unwrap().is_empty());

    let pending = h
        .client
        .create_pool(Address::ZERO, addr(9), 90, vec![addr(1), addr(2), addr(3)], 0)
        .await
        .unwrap();
    let stages = pending.subscribe();
    let receipt = pending.wait().await.unwrap();
    let created = receipt.created_pool.unwrap();

    assert_eq!(*stages.borrow(), Stage::Confirmed);
    assert_eq!(h.client.view().all_pools().await.unwrap(), vec![created]);
    let pool = h.client.view().pool(created, None).await.unwrap();
    assert_eq!(pool.state.share_per_user, 30);
}

#[tokio::test]
async fn test_uneven_pool_rejected() {
    let h = Harness::new();
    h.login(addr(1));

    let err = h
        .client
        .create_pool(Address::ZERO, addr(9), 100, vec![addr(1), addr(2), addr(3)], 0)
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        ClientError::Validation(SplitError::NonDivisibleTotal { .. })
    ));
    assert_eq!(h.ledger.broadcasts(), 0);
}

// ============ Groups ============

#[tokio::test]
async fn test_group_expense_and_settlement() {
    let h = Harness::new();
    let (a, b, c) = (addr(0xa), addr(0xb), addr(0xc));

    // 1. A creates the group and records an expense
    h.login(a);
    h.client.create_group(vec![b, c], 0).await.unwrap().wait().await.unwrap();
    let group = h.client.view().group(1).await.unwrap();
    assert_eq!(group.members, vec![a, b, c]);

    h.client
        .add_expense(1, 300, vec![a, b, c], 0)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    // 2. Balances move only after the last approval
    for (i, who) in [a, b, c].into_iter().enumerate() {
        h.login(who);
        h.client.approve_expense(1).await.unwrap().wait().await.unwrap();
        let expense = h.client.view().expense(1, Some(who)).await.unwrap();
        assert_eq!(expense.viewer_approved, Some(true));
        assert_eq!(expense.expense.applied, i == 2);
    }

    // 3. A duplicate approval is rejected before broadcast
    let broadcasts = h.ledger.broadcasts();
    let err = h.client.approve_expense(1).await.err().unwrap();
    assert!(matches!(
        err,
        ClientError::Validation(SplitError::ExpenseAlreadyApplied { .. })
            | ClientError::Validation(SplitError::AlreadyApproved { .. })
    ));
    assert_eq!(h.ledger.broadcasts(), broadcasts);

    // 4. B settles the whole debt to A
    h.login(b);
    let summary = h.client.view().balance_summary(1, b).await.unwrap();
    assert_eq!(summary.own_balance, Some(-100));
    assert_eq!(summary.creditors[0].account, a);

    h.client
        .settle_debt(1, a, None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(h.client.view().net_balance(1, b).await.unwrap(), 0);
    assert_eq!(h.client.view().net_balance(1, a).await.unwrap(), 100);

    let settled = h.client.view().balance_summary(1, b).await.unwrap();
    assert_eq!(settled.own_balance, Some(0));
    assert!(settled.creditors.is_empty());
}

#[tokio::test]
async fn test_settle_without_debt_is_rejected() {
    let h = Harness::new();
    let (a, b) = (addr(0xa), addr(0xb));
    h.ledger.seed_group(a, &[a, b], 0).unwrap();
    h.login(b);

    let err = h.client.settle_debt(1, a, None).await.err().unwrap();
    assert!(matches!(
        err,
        ClientError::Validation(SplitError::NothingToSettle { .. })
    ));
}

#[tokio::test]
async fn test_writes_need_a_session() {
    let h = Harness::new();
    let err = h.client.approve_expense(1).await.err().unwrap();
    assert!(matches!(err, ClientError::NotConnected));
}

#[tokio::test]
async fn test_client_from_default_config() {
    let client = SplitPoolClient::from_config(&ClientConfig::default()).unwrap();
    assert!(client.metadata().is_some());
    assert!(!client.session().is_connected());
    assert_eq!(client.session().expected_chain(), 84_532);
}
