//! Pool Escrow Ledger
//!
//! Local mirror of a single pool escrow: N participants each pay an exact
//! share, and once everyone has paid the collected total goes to the
//! merchant.
//!
//! ## Snapshot Model
//!
//! The contract owns the real pool. This crate exists so the client can:
//! - Check a decoded snapshot for internal consistency
//! - Check that one payment moved a pool exactly one share forward
//! - Run an in-process pool for tests and offline use
//!
//! ## Key Features
//!
//! - **Exact shares**: a payment must equal `total / N`, nothing else
//! - **Single payment**: each participant pays once
//! - **Auto-settle**: the last payment flips the pool to `Paid`
//!
//! Pools are mutated only by payments. A `Cancelled` status can be read
//! from the contract but is never produced here.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use splitpool_common::{
    check,
    errors::{SplitError, SplitResult},
    events::{EventLog, LedgerEvent},
    math::share_per_user,
    types::{Address, Amount, MetadataPointer, PoolState, PoolStatus},
    validation::{validate_payment, validate_pool_creation, verify_field_eq, verify_state_delta},
};

// ============ Pool ============

/// An escrow pool with per-participant payment flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct SplitPool {
    state: PoolState,
    /// Parallel to `state.participants`
    paid: Vec<bool>,
}

impl SplitPool {
    /// Opens a new pool after checking its inputs
    pub fn create(
        address: Address,
        creator: Address,
        merchant: Address,
        total_amount: Amount,
        participants: Vec<Address>,
        metadata_pointer: MetadataPointer,
        events: &mut EventLog,
    ) -> SplitResult<Self> {
        check!(
            !creator.is_zero(),
            SplitError::InvalidAddress {
                reason: "invalid creator"
            }
        );
        let share = validate_pool_creation(&merchant, total_amount, &participants)?;

        events.emit(LedgerEvent::PoolCreated {
            pool: address,
            creator,
            merchant,
            total_amount,
            participants: participants.len() as u64,
        });

        let paid = vec![false; participants.len()];
        Ok(Self {
            state: PoolState {
                address,
                creator,
                merchant,
                total_amount,
                collected_amount: 0,
                share_per_user: share,
                participants,
                paid_count: 0,
                status: PoolStatus::Open,
                metadata_pointer,
            },
            paid,
        })
    }

    pub fn state(&self) -> &PoolState {
        &self.state
    }

    pub fn address(&self) -> Address {
        self.state.address
    }

    pub fn status(&self) -> PoolStatus {
        self.state.status
    }

    pub fn has_paid(&self, account: &Address) -> bool {
        self.position(account)
            .map(|i| self.paid[i])
            .unwrap_or(false)
    }

    fn position(&self, account: &Address) -> Option<usize> {
        self.state.participants.iter().position(|p| p == account)
    }

    /// Records a share payment
    pub fn pay_share(
        &mut self,
        payer: Address,
        value: Amount,
        events: &mut EventLog,
    ) -> SplitResult<()> {
        // 1. Open pool, participant, unpaid, exact share
        validate_payment(&self.state, &payer, self.has_paid(&payer), value)?;
        let index = self
            .position(&payer)
            .ok_or(SplitError::NotParticipant { account: payer })?;

        // 2. Record payment
        let collected = self
            .state
            .collected_amount
            .checked_add(value)
            .ok_or(SplitError::Overflow)?;
        self.paid[index] = true;
        self.state.paid_count += 1;
        self.state.collected_amount = collected;

        events.emit(LedgerEvent::ParticipantPaid {
            pool: self.state.address,
            participant: payer,
            amount: value,
        });

        // 3. Last payment releases funds to the merchant
        if self.state.is_fully_funded() {
            self.state.status = PoolStatus::Paid;
            events.emit(LedgerEvent::PoolPaid {
                pool: self.state.address,
                merchant: self.state.merchant,
                amount: self.state.collected_amount,
            });
        }

        Ok(())
    }

    /// Checks the snapshot invariants plus the per-participant flags
    pub fn verify_invariants(&self) -> SplitResult<()> {
        verify_pool_snapshot(&self.state)?;
        check!(
            self.paid.len() == self.state.participants.len(),
            SplitError::InvariantViolated {
                reason: "paid flags out of step with participants"
            }
        );
        let flagged = self.paid.iter().filter(|p| **p).count() as u64;
        check!(
            flagged == self.state.paid_count,
            SplitError::InvariantViolated {
                reason: "paid count differs from paid flags"
            }
        );
        Ok(())
    }
}

// ============ Snapshot Checks ============

/// Checks the invariants every pool snapshot must satisfy
///
/// - `share_per_user * N == total_amount`
/// - `collected_amount == share_per_user * paid_count`
/// - `Paid` exactly when every participant has paid
///
/// A `Cancelled` snapshot is held only to the collected amount check. The
/// contract does not reset its counters when it refunds.
pub fn verify_pool_snapshot(state: &PoolState) -> SplitResult<()> {
    let n = state.participant_count();
    check!(n > 0, SplitError::EmptyParticipants);

    let share = share_per_user(state.total_amount, n)?;
    check!(
        share == state.share_per_user,
        SplitError::InvariantViolated {
            reason: "share does not divide total"
        }
    );

    check!(
        state.paid_count <= n,
        SplitError::InvariantViolated {
            reason: "more payers than participants"
        }
    );
    let expected = state
        .share_per_user
        .checked_mul(state.paid_count as u128)
        .ok_or(SplitError::Overflow)?;
    check!(
        state.collected_amount == expected,
        SplitError::InvariantViolated {
            reason: "collected differs from share times paid count"
        }
    );

    match state.status {
        PoolStatus::Open => check!(
            state.paid_count < n,
            SplitError::InvariantViolated {
                reason: "fully funded pool still open"
            }
        ),
        PoolStatus::Paid => check!(
            state.paid_count == n,
            SplitError::InvariantViolated {
                reason: "paid pool not fully funded"
            }
        ),
        PoolStatus::Cancelled => {}
    }
    Ok(())
}

/// Checks that `new` is exactly `old` after one share payment
pub fn verify_payment_transition(old: &PoolState, new: &PoolState) -> SplitResult<()> {
    // 1. Immutable fields unchanged
    verify_field_eq(&old.address, &new.address)?;
    verify_field_eq(&old.merchant, &new.merchant)?;
    verify_field_eq(old.total_amount, new.total_amount)?;
    verify_field_eq(old.share_per_user, new.share_per_user)?;
    verify_field_eq(&old.participants, &new.participants)?;

    // 2. Only open pools accept payments
    check!(
        old.status == PoolStatus::Open,
        SplitError::PoolNotOpen { status: old.status }
    );

    // 3. One more payer, one more share
    verify_field_eq(old.paid_count + 1, new.paid_count)?;
    verify_state_delta(old.collected_amount, new.collected_amount, old.share_per_user)?;

    // 4. Status follows the paid count
    let expected_status = if new.is_fully_funded() {
        PoolStatus::Paid
    } else {
        PoolStatus::Open
    };
    verify_field_eq(expected_status, new.status)
}

/// Deterministic pool address for a factory deployment
pub fn derive_pool_address(factory: &Address, creator: &Address, nonce: u64) -> Address {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(factory.as_bytes());
    hasher.update(creator.as_bytes());
    hasher.update(nonce.to_le_bytes());
    let result = hasher.finalize();
    let mut address = [0u8; 20];
    address.copy_from_slice(&result[12..]);
    Address(address)
}

// ============ Tests ============

#[cfg(test)]
mod tests {
    use super::*;
    use splitpool_common::events::EventType;

    const SHARE: Amount = 50_000_000_000_000_000;

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    fn create_test_pool(n: u8) -> (SplitPool, EventLog) {
        let mut events = EventLog::new();
        let participants: Vec<Address> = (1..=n).map(addr).collect();
        let pool = SplitPool::create(
            addr(0xee),
            addr(1),
            addr(0xaa),
            SHARE * n as u128,
            participants,
            7,
            &mut events,
        )
        .unwrap();
        (pool, events)
    }

    #[test]
    fn test_create_pool() {
        let (pool, events) = create_test_pool(3);

        assert_eq!(pool.state().share_per_user, SHARE);
        assert_eq!(pool.status(), PoolStatus::Open);
        assert_eq!(events.count_of(EventType::PoolCreated), 1);
        assert!(pool.verify_invariants().is_ok());
    }

    #[test]
    fn test_create_rejects_non_divisible_total() {
        let mut events = EventLog::new();
        let result = SplitPool::create(
            addr(0xee),
            addr(1),
            addr(0xaa),
            100,
            vec![addr(1), addr(2), addr(3)],
            0,
            &mut events,
        );

        assert_eq!(
            result.unwrap_err(),
            SplitError::NonDivisibleTotal {
                total: 100,
                participants: 3
            }
        );
        assert!(!events.has_events());
    }

    #[test]
    fn test_pay_share_updates_collected() {
        let (mut pool, mut events) = create_test_pool(3);

        pool.pay_share(addr(2), SHARE, &mut events).unwrap();

        assert!(pool.has_paid(&addr(2)));
        assert!(!pool.has_paid(&addr(1)));
        assert_eq!(pool.state().paid_count, 1);
        assert_eq!(pool.state().collected_amount, SHARE);
        assert_eq!(pool.status(), PoolStatus::Open);
        assert!(pool.verify_invariants().is_ok());
    }

    #[test]
    fn test_last_payment_settles_pool() {
        let (mut pool, mut events) = create_test_pool(2);

        pool.pay_share(addr(1), SHARE, &mut events).unwrap();
        pool.pay_share(addr(2), SHARE, &mut events).unwrap();

        assert_eq!(pool.status(), PoolStatus::Paid);
        assert_eq!(pool.state().collected_amount, 2 * SHARE);
        assert_eq!(events.count_of(EventType::PoolPaid), 1);
        assert!(pool.verify_invariants().is_ok());
    }

    #[test]
    fn test_double_payment_rejected() {
        let (mut pool, mut events) = create_test_pool(3);

        pool.pay_share(addr(1), SHARE, &mut events).unwrap();
        let result = pool.pay_share(addr(1), SHARE, &mut events);

        assert_eq!(result, Err(SplitError::AlreadyPaid { account: addr(1) }));
        assert_eq!(pool.state().paid_count, 1);
    }

    #[test]
    fn test_wrong_amount_rejected() {
        let (mut pool, mut events) = create_test_pool(2);

        let result = pool.pay_share(addr(1), SHARE - 1, &mut events);

        assert!(matches!(
            result,
            Err(SplitError::IncorrectShareAmount { .. })
        ));
    }

    #[test]
    fn test_paid_pool_is_immutable() {
        let (mut pool, mut events) = create_test_pool(1);
        pool.pay_share(addr(1), SHARE, &mut events).unwrap();
        let before = pool.state().clone();

        assert!(matches!(
            pool.pay_share(addr(1), SHARE, &mut events),
            Err(SplitError::PoolNotOpen { .. })
        ));
        assert_eq!(pool.state(), &before);
    }

    #[test]
    fn test_payment_transition_accepts_one_share() {
        let (mut pool, mut events) = create_test_pool(2);
        let before = pool.state().clone();

        pool.pay_share(addr(1), SHARE, &mut events).unwrap();
        assert!(verify_payment_transition(&before, pool.state()).is_ok());

        let middle = pool.state().clone();
        pool.pay_share(addr(2), SHARE, &mut events).unwrap();
        assert!(verify_payment_transition(&middle, pool.state()).is_ok());
        assert_eq!(pool.status(), PoolStatus::Paid);
    }

    #[test]
    fn test_payment_transition_rejects_skipped_share() {
        let (pool, _) = create_test_pool(3);
        let mut forged = pool.state().clone();
        forged.paid_count = 1;
        forged.collected_amount = SHARE * 2;

        assert_eq!(
            verify_payment_transition(pool.state(), &forged),
            Err(SplitError::InvalidStateTransition)
        );
    }

    #[test]
    fn test_snapshot_rejects_open_full_pool() {
        let (pool, _) = create_test_pool(2);
        let mut bad = pool.state().clone();
        bad.paid_count = 2;
        bad.collected_amount = 2 * SHARE;

        assert!(matches!(
            verify_pool_snapshot(&bad),
            Err(SplitError::InvariantViolated { .. })
        ));
    }

    #[test]
    fn test_snapshot_accepts_cancelled_pool_with_payments() {
        let (pool, _) = create_test_pool(3);
        let mut cancelled = pool.state().clone();
        cancelled.status = PoolStatus::Cancelled;
        cancelled.paid_count = 2;
        cancelled.collected_amount = 2 * SHARE;

        assert!(verify_pool_snapshot(&cancelled).is_ok());

        cancelled.collected_amount = SHARE;
        assert!(matches!(
            verify_pool_snapshot(&cancelled),
            Err(SplitError::InvariantViolated { .. })
        ));
    }

    #[test]
    fn test_derive_pool_address_is_deterministic() {
        let a = derive_pool_address(&addr(1), &addr(2), 0);
        let b = derive_pool_address(&addr(1), &addr(2), 0);
        let c = derive_pool_address(&addr(1), &addr(2), 1);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(!a.is_zero());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn collected_tracks_paid_count(
                n in 1u8..20,
                share in 1u128..1_000_000_000_000_000_000,
                order in proptest::collection::vec(any::<u8>(), 0..40),
            ) {
                let mut events = EventLog::new();
                let participants: Vec<Address> = (1..=n).map(addr).collect();
                let mut pool = SplitPool::create(
                    addr(0xee),
                    addr(1),
                    addr(0xaa),
                    share * n as u128,
                    participants,
                    0,
                    &mut events,
                ).unwrap();

                for pick in order {
                    let payer = addr(pick % n + 1);
                    let _ = pool.pay_share(payer, share, &mut events);

                    let state = pool.state();
                    prop_assert_eq!(state.collected_amount, share * state.paid_count as u128);
                    prop_assert_eq!(
                        state.status == PoolStatus::Paid,
                        state.paid_count == n as u64
                    );
                    prop_assert!(pool.verify_invariants().is_ok());
                }
            }
        }
    }
}
