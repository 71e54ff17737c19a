//! Validation Helpers for SplitPool
//!
//! Pre-flight checks run before anything touches the network. They mirror
//! the contracts' revert conditions so that bad input is rejected locally
//! with the same reason the contract would give.
//!
//! ## Features
//!
//! - `check!` macro for cleaner validation code
//! - Per-intent validators (pool, group, expense, settlement, payment)
//! - `ledger_conserved()` for the closed-ledger law of a group
//!
//! ## Usage
//!
//! ```rust,ignore
//! use splitpool_common::{check, validate_intent, IntentContext};
//!
//! check!(amount > 0, SplitError::ZeroAmount);
//!
//! let ctx = IntentContext::for_sender(me).with_group_members(members);
//! validate_intent(&intent, &ctx)?;
//! ```

use crate::{
    constants::limits,
    errors::{SplitError, SplitResult},
    math,
    types::{Address, Amount, Balance, ExpenseState, Intent, PoolState, PoolStatus},
    Vec,
};

// ============ Validation Macro ============

/// Check a condition and return an error if it fails.
///
/// # Examples
///
/// ```rust,ignore
/// check!(amount > 0, SplitError::ZeroAmount);
///
/// check!(
///     provided == share,
///     SplitError::IncorrectShareAmount { expected: share, provided }
/// );
/// ```
#[macro_export]
macro_rules! check {
    ($condition:expr, $error:expr) => {
        if !($condition) {
            return Err($error);
        }
    };
}

// ============ Common Validation Helpers ============

/// Parse a textual address and reject the zero address.
pub fn parse_address(text: &str) -> SplitResult<Address> {
    let address: Address = text.parse()?;
    require_valid_address(&address, "zero address")?;
    Ok(address)
}

/// Require address to not be zero.
pub fn require_valid_address(address: &Address, reason: &'static str) -> SplitResult<()> {
    check!(!address.is_zero(), SplitError::InvalidAddress { reason });
    Ok(())
}

/// Require an amount to be positive (non-zero).
pub fn require_positive(amount: Amount) -> SplitResult<()> {
    check!(amount > 0, SplitError::ZeroAmount);
    Ok(())
}

/// Require every address to be non-zero and listed once.
pub fn require_unique_addresses(addresses: &[Address]) -> SplitResult<()> {
    for (i, address) in addresses.iter().enumerate() {
        require_valid_address(address, "zero address in list")?;
        check!(
            !addresses[..i].contains(address),
            SplitError::DuplicateAddress { address: *address }
        );
    }
    Ok(())
}

/// Require a list length within `[minimum, maximum]`.
pub fn require_count_in_range(count: usize, minimum: usize, maximum: usize) -> SplitResult<()> {
    check!(count > 0 || minimum == 0, SplitError::EmptyParticipants);
    check!(
        count >= minimum,
        SplitError::TooFewParticipants { count, minimum }
    );
    check!(
        count <= maximum,
        SplitError::TooManyParticipants { count, maximum }
    );
    Ok(())
}

// ============ Ledger Conservation ============

/// Validates that the net balances of one group sum to zero.
///
/// Every expense credits the payer exactly what it debits the
/// participants, and every settlement moves the same amount in both
/// directions, so any non-zero sum means the snapshot is corrupt.
pub fn ledger_conserved<I>(balances: I) -> SplitResult<()>
where
    I: IntoIterator<Item = Balance>,
{
    let sum = math::sum_balances(balances)?;
    check!(sum == 0, SplitError::ConservationViolated { sum });
    Ok(())
}

// ============ State Transition Helpers ============

/// Verify a field value matches expected.
pub fn verify_field_eq<T: PartialEq>(actual: T, expected: T) -> SplitResult<()> {
    check!(actual == expected, SplitError::InvalidStateTransition);
    Ok(())
}

/// Verify an amount grew by exactly `delta`.
pub fn verify_state_delta(old_value: Amount, new_value: Amount, delta: Amount) -> SplitResult<()> {
    let expected = old_value.checked_add(delta).ok_or(SplitError::Overflow)?;
    check!(new_value == expected, SplitError::InvalidStateTransition);
    Ok(())
}

// ============ Per-Operation Validators ============

/// Validates the inputs of a new pool.
///
/// # Returns
/// The exact share each participant will pay
pub fn validate_pool_creation(
    merchant: &Address,
    total_amount: Amount,
    participants: &[Address],
) -> SplitResult<Amount> {
    // 1. Merchant must be a real account
    require_valid_address(merchant, "invalid merchant")?;

    // 2. Amount must be positive
    require_positive(total_amount)?;

    // 3. Participant set within limits, no duplicates
    require_count_in_range(
        participants.len(),
        limits::MIN_POOL_PARTICIPANTS,
        limits::MAX_POOL_PARTICIPANTS,
    )?;
    require_unique_addresses(participants)?;

    // 4. Total must split evenly
    math::share_per_user(total_amount, participants.len() as u64)
}

/// Validates the member list of a new group.
///
/// The creator must be one of the members.
pub fn validate_group_creation(creator: &Address, members: &[Address]) -> SplitResult<()> {
    require_valid_address(creator, "invalid creator")?;
    require_count_in_range(
        members.len(),
        limits::MIN_GROUP_MEMBERS,
        limits::MAX_GROUP_MEMBERS,
    )?;
    require_unique_addresses(members)?;
    check!(
        members.contains(creator),
        SplitError::NotGroupMember {
            group_id: 0,
            account: *creator,
        }
    );
    Ok(())
}

/// Validates a new expense against the group's member list.
pub fn validate_expense_creation(
    group_id: u64,
    payer: &Address,
    amount: Amount,
    participants: &[Address],
    group_members: &[Address],
) -> SplitResult<()> {
    // 1. Amount must be positive
    require_positive(amount)?;

    // 2. Participants non-empty, unique
    require_count_in_range(participants.len(), 1, limits::MAX_GROUP_MEMBERS)?;
    require_unique_addresses(participants)?;

    // 3. Payer and every participant belong to the group
    check!(
        group_members.contains(payer),
        SplitError::NotGroupMember {
            group_id,
            account: *payer,
        }
    );
    if let Some(outsider) = participants.iter().find(|p| !group_members.contains(*p)) {
        return Err(SplitError::NotGroupMember {
            group_id,
            account: *outsider,
        });
    }
    Ok(())
}

/// Validates a settlement against the known balances of both parties.
///
/// `None` for a balance means it is not known locally; the contract will
/// check it.
pub fn validate_settlement(
    debtor: &Address,
    creditor: &Address,
    amount: Amount,
    debtor_balance: Option<Balance>,
    creditor_balance: Option<Balance>,
) -> SplitResult<()> {
    // 1. Creditor must be a real account other than the debtor
    require_valid_address(creditor, "invalid creditor")?;
    check!(debtor != creditor, SplitError::SelfSettlement);

    // 2. Amount must be positive
    require_positive(amount)?;

    // 3. Cannot pay more than owed
    if let Some(balance) = debtor_balance {
        check!(balance < 0, SplitError::NothingToSettle { balance });
        let owed = balance.unsigned_abs();
        check!(
            amount <= owed,
            SplitError::SettlementExceedsDebt {
                owed,
                requested: amount
            }
        );
    }

    // 4. Cannot pay a creditor more than they are owed
    if let Some(balance) = creditor_balance {
        let credit = if balance > 0 { balance.unsigned_abs() } else { 0 };
        check!(
            amount <= credit,
            SplitError::SettlementExceedsCredit {
                credit,
                requested: amount
            }
        );
    }
    Ok(())
}

/// Validates a share payment against a pool snapshot.
pub fn validate_payment(
    pool: &PoolState,
    payer: &Address,
    already_paid: bool,
    value: Amount,
) -> SplitResult<()> {
    // 1. Pool must still be collecting
    check!(
        pool.status == PoolStatus::Open,
        SplitError::PoolNotOpen {
            status: pool.status
        }
    );

    // 2. Payer must be a participant that has not paid
    check!(
        pool.is_participant(payer),
        SplitError::NotParticipant { account: *payer }
    );
    check!(!already_paid, SplitError::AlreadyPaid { account: *payer });

    // 3. Value must match the share exactly
    check!(
        value == pool.share_per_user,
        SplitError::IncorrectShareAmount {
            expected: pool.share_per_user,
            provided: value,
        }
    );
    Ok(())
}

/// Validates an approval against an expense snapshot.
pub fn validate_approval(expense: &ExpenseState, approver: &Address) -> SplitResult<()> {
    check!(
        !expense.applied,
        SplitError::ExpenseAlreadyApplied {
            expense_id: expense.id
        }
    );
    check!(
        expense.is_participant(approver),
        SplitError::NotExpenseParticipant {
            expense_id: expense.id,
            account: *approver,
        }
    );
    check!(
        !expense.has_approved(approver),
        SplitError::AlreadyApproved {
            expense_id: expense.id,
            account: *approver,
        }
    );
    Ok(())
}

// ============ Intent Validation ============

/// Snapshot data known locally when an intent is validated.
///
/// Every field except `sender` is optional. Checks that need a missing
/// field are skipped and left to the contract.
#[derive(Debug, Clone, Default)]
pub struct IntentContext {
    /// Account submitting the intent
    pub sender: Address,
    /// Members of the target group
    pub group_members: Option<Vec<Address>>,
    /// Target pool
    pub pool: Option<PoolState>,
    /// Whether the sender already paid into the target pool
    pub sender_paid: Option<bool>,
    /// Target expense
    pub expense: Option<ExpenseState>,
    /// Sender's net balance in the target group
    pub sender_balance: Option<Balance>,
    /// Creditor's net balance in the target group
    pub creditor_balance: Option<Balance>,
}

impl IntentContext {
    pub fn for_sender(sender: Address) -> Self {
        Self {
            sender,
            ..Default::default()
        }
    }

    pub fn with_group_members(mut self, members: Vec<Address>) -> Self {
        self.group_members = Some(members);
        self
    }

    pub fn with_pool(mut self, pool: PoolState, sender_paid: Option<bool>) -> Self {
        self.pool = Some(pool);
        self.sender_paid = sender_paid;
        self
    }

    pub fn with_expense(mut self, expense: ExpenseState) -> Self {
        self.expense = Some(expense);
        self
    }

    pub fn with_balances(mut self, sender: Option<Balance>, creditor: Option<Balance>) -> Self {
        self.sender_balance = sender;
        self.creditor_balance = creditor;
        self
    }
}

/// Runs every local check that applies to `intent`.
pub fn validate_intent(intent: &Intent, ctx: &IntentContext) -> SplitResult<()> {
    require_valid_address(&ctx.sender, "no sender")?;

    match intent {
        Intent::PayShare { pool, value } => {
            require_valid_address(pool, "invalid pool")?;
            require_positive(*value)?;
            if let Some(state) = &ctx.pool {
                validate_payment(state, &ctx.sender, ctx.sender_paid.unwrap_or(false), *value)?;
            }
        }

        Intent::CreatePool {
            merchant,
            total_amount,
            participants,
            ..
        } => {
            validate_pool_creation(merchant, *total_amount, participants)?;
        }

        Intent::CreateGroup { members, .. } => {
            validate_group_creation(&ctx.sender, members)?;
        }

        Intent::AddExpense {
            group_id,
            amount,
            participants,
            ..
        } => match &ctx.group_members {
            Some(members) => {
                validate_expense_creation(*group_id, &ctx.sender, *amount, participants, members)?
            }
            None => {
                require_positive(*amount)?;
                require_count_in_range(participants.len(), 1, limits::MAX_GROUP_MEMBERS)?;
                require_unique_addresses(participants)?;
            }
        },

        Intent::ApproveExpense { .. } => {
            if let Some(expense) = &ctx.expense {
                validate_approval(expense, &ctx.sender)?;
            }
        }

        Intent::SettleDebt {
            group_id,
            creditor,
            amount,
        } => {
            validate_settlement(
                &ctx.sender,
                creditor,
                *amount,
                ctx.sender_balance,
                ctx.creditor_balance,
            )?;
            if let Some(members) = &ctx.group_members {
                check!(
                    members.contains(creditor),
                    SplitError::NotGroupMember {
                        group_id: *group_id,
                        account: *creditor,
                    }
                );
            }
        }
    }
    Ok(())
}

// ============ Tests ============

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    fn open_pool(participants: Vec<Address>, share: Amount) -> PoolState {
        PoolState {
            address: addr(0xee),
            creator: participants[0],
            merchant: addr(0xaa),
            total_amount: share * participants.len() as u128,
            collected_amount: 0,
            share_per_user: share,
            participants,
            paid_count: 0,
            status: PoolStatus::Open,
            metadata_pointer: 0,
        }
    }

    #[test]
    fn test_check_macro() {
        fn guarded(amount: Amount) -> SplitResult<()> {
            check!(amount > 0, SplitError::ZeroAmount);
            Ok(())
        }
        assert!(guarded(1).is_ok());
        assert_eq!(guarded(0), Err(SplitError::ZeroAmount));
    }

    #[test]
    fn test_parse_address_rejects_zero() {
        assert!(parse_address("0x0000000000000000000000000000000000000000").is_err());
        assert!(parse_address("0xb7247D69B42697B5BEF102213F0bd86bA55db699").is_ok());
        assert!(parse_address("not-an-address").is_err());
    }

    #[test]
    fn test_pool_creation_divisibility() {
        let three = [addr(1), addr(2), addr(3)];
        let two = [addr(1), addr(2)];

        assert_eq!(
            validate_pool_creation(&addr(9), 100, &three),
            Err(SplitError::NonDivisibleTotal {
                total: 100,
                participants: 3
            })
        );
        assert_eq!(validate_pool_creation(&addr(9), 100, &two), Ok(50));
    }

    #[test]
    fn test_pool_creation_rejects_bad_input() {
        assert!(validate_pool_creation(&Address::ZERO, 100, &[addr(1)]).is_err());
        assert_eq!(
            validate_pool_creation(&addr(9), 0, &[addr(1)]),
            Err(SplitError::ZeroAmount)
        );
        assert_eq!(
            validate_pool_creation(&addr(9), 100, &[]),
            Err(SplitError::EmptyParticipants)
        );
        assert_eq!(
            validate_pool_creation(&addr(9), 100, &[addr(1), addr(1)]),
            Err(SplitError::DuplicateAddress { address: addr(1) })
        );

        let crowd: Vec<Address> = (1..=51u8).map(addr).collect();
        assert!(matches!(
            validate_pool_creation(&addr(200), 51, &crowd),
            Err(SplitError::TooManyParticipants { count: 51, .. })
        ));
    }

    #[test]
    fn test_group_creation() {
        assert!(validate_group_creation(&addr(1), &[addr(1), addr(2)]).is_ok());
        assert!(matches!(
            validate_group_creation(&addr(1), &[addr(1)]),
            Err(SplitError::TooFewParticipants { .. })
        ));
        assert!(matches!(
            validate_group_creation(&addr(1), &[addr(2), addr(3)]),
            Err(SplitError::NotGroupMember { .. })
        ));
        assert!(matches!(
            validate_group_creation(&addr(1), &[addr(1), addr(2), addr(2)]),
            Err(SplitError::DuplicateAddress { .. })
        ));
    }

    #[test]
    fn test_expense_participants_must_be_members() {
        let members = [addr(1), addr(2), addr(3)];
        assert!(validate_expense_creation(1, &addr(1), 90, &members, &members).is_ok());
        assert_eq!(
            validate_expense_creation(1, &addr(1), 90, &[addr(2), addr(4)], &members),
            Err(SplitError::NotGroupMember {
                group_id: 1,
                account: addr(4)
            })
        );
        assert_eq!(
            validate_expense_creation(1, &addr(1), 90, &[], &members),
            Err(SplitError::EmptyParticipants)
        );
    }

    #[test]
    fn test_settlement_bounds() {
        let me = addr(2);
        let creditor = addr(1);

        assert!(validate_settlement(&me, &creditor, 300, Some(-300), Some(500)).is_ok());
        assert_eq!(
            validate_settlement(&me, &creditor, 301, Some(-300), Some(500)),
            Err(SplitError::SettlementExceedsDebt {
                owed: 300,
                requested: 301
            })
        );
        assert_eq!(
            validate_settlement(&me, &creditor, 10, Some(0), None),
            Err(SplitError::NothingToSettle { balance: 0 })
        );
        assert_eq!(
            validate_settlement(&me, &creditor, 200, Some(-300), Some(100)),
            Err(SplitError::SettlementExceedsCredit {
                credit: 100,
                requested: 200
            })
        );
        assert_eq!(
            validate_settlement(&me, &me, 1, None, None),
            Err(SplitError::SelfSettlement)
        );
    }

    #[test]
    fn test_payment_validation() {
        let pool = open_pool(vec![addr(1), addr(2)], 50);

        assert!(validate_payment(&pool, &addr(1), false, 50).is_ok());
        assert_eq!(
            validate_payment(&pool, &addr(1), false, 49),
            Err(SplitError::IncorrectShareAmount {
                expected: 50,
                provided: 49
            })
        );
        assert_eq!(
            validate_payment(&pool, &addr(1), true, 50),
            Err(SplitError::AlreadyPaid { account: addr(1) })
        );
        assert_eq!(
            validate_payment(&pool, &addr(3), false, 50),
            Err(SplitError::NotParticipant { account: addr(3) })
        );

        let mut paid = pool;
        paid.status = PoolStatus::Paid;
        assert!(matches!(
            validate_payment(&paid, &addr(1), false, 50),
            Err(SplitError::PoolNotOpen { .. })
        ));
    }

    #[test]
    fn test_validate_intent_uses_context() {
        let members = vec![addr(1), addr(2), addr(3)];
        let ctx = IntentContext::for_sender(addr(1)).with_group_members(members);

        let ok = Intent::AddExpense {
            group_id: 1,
            amount: 90,
            metadata_pointer: 0,
            participants: vec![addr(1), addr(2), addr(3)],
        };
        assert!(validate_intent(&ok, &ctx).is_ok());

        let outsider = Intent::AddExpense {
            group_id: 1,
            amount: 90,
            metadata_pointer: 0,
            participants: vec![addr(7)],
        };
        assert!(matches!(
            validate_intent(&outsider, &ctx),
            Err(SplitError::NotGroupMember { .. })
        ));

        let no_sender = IntentContext::default();
        assert!(validate_intent(&ok, &no_sender).is_err());
    }

    #[test]
    fn test_ledger_conserved() {
        assert!(ledger_conserved([500, -300, -200]).is_ok());
        assert_eq!(
            ledger_conserved([500, -300]),
            Err(SplitError::ConservationViolated { sum: 200 })
        );
    }

    #[test]
    fn test_verify_state_delta() {
        assert!(verify_state_delta(50, 100, 50).is_ok());
        assert!(verify_state_delta(50, 99, 50).is_err());
        assert!(verify_field_eq(1, 1).is_ok());
    }
}
