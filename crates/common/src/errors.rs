//! Error Types for SplitPool
//!
//! Typed errors shared by the accounting mirrors and the client's
//! pre-flight validation. The variants follow the revert reasons of the
//! group ledger and pool contracts so that a local rejection reads the
//! same as an on-chain one.

use core::fmt;

use crate::types::{Address, Amount, Balance, ExpenseId, GroupId, PoolStatus};

/// Result type alias for SplitPool operations
pub type SplitResult<T> = Result<T, SplitError>;

/// Main error enum for all accounting and validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitError {
    // ============ Input Validation Errors ============
    /// Address is malformed or not allowed in this position
    InvalidAddress { reason: &'static str },

    /// Zero amount not allowed
    ZeroAmount,

    /// Invalid amount provided
    InvalidAmount { amount: Amount, reason: AmountErrorReason },

    /// Amount text could not be parsed
    MalformedAmount { reason: &'static str },

    /// A required field is empty
    MissingField { field: &'static str },

    /// Participant / member list is empty
    EmptyParticipants,

    /// Too many participants or members
    TooManyParticipants { count: usize, maximum: usize },

    /// Too few participants or members
    TooFewParticipants { count: usize, minimum: usize },

    /// Same address listed twice
    DuplicateAddress { address: Address },

    /// Address is not a member of the group
    NotGroupMember { group_id: GroupId, account: Address },

    /// Pool total does not split evenly across participants
    NonDivisibleTotal { total: Amount, participants: u64 },

    // ============ Pool Errors ============
    /// Pool is not open for payments
    PoolNotOpen { status: PoolStatus },

    /// Caller is not a participant of the pool
    NotParticipant { account: Address },

    /// Participant already paid their share
    AlreadyPaid { account: Address },

    /// Payment does not match the share
    IncorrectShareAmount { expected: Amount, provided: Amount },

    // ============ Group Errors ============
    /// Group does not exist
    GroupNotFound { group_id: GroupId },

    /// Expense does not exist
    ExpenseNotFound { expense_id: ExpenseId },

    /// Expense was already folded into the ledger
    ExpenseAlreadyApplied { expense_id: ExpenseId },

    /// Caller is not one of the expense participants
    NotExpenseParticipant { expense_id: ExpenseId, account: Address },

    /// Participant already approved this expense
    AlreadyApproved { expense_id: ExpenseId, account: Address },

    /// Debtor has nothing to settle
    NothingToSettle { balance: Balance },

    /// Settlement amount exceeds what the debtor owes
    SettlementExceedsDebt { owed: Amount, requested: Amount },

    /// Settlement amount exceeds what the creditor is owed
    SettlementExceedsCredit { credit: Amount, requested: Amount },

    /// Debtor and creditor are the same account
    SelfSettlement,

    // ============ Math Errors ============
    /// Arithmetic overflow occurred
    Overflow,

    /// Arithmetic underflow occurred
    Underflow,

    /// Division by zero
    DivisionByZero,

    // ============ State Errors ============
    /// Snapshot transition does not match the expected delta
    InvalidStateTransition,

    /// Net balances of a group do not sum to zero
    ConservationViolated { sum: Balance },

    /// A structural invariant does not hold
    InvariantViolated { reason: &'static str },

    /// Raw pool status is outside the known range
    InvalidPoolStatus { raw: u8 },
}

/// Reasons for amount-related errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountErrorReason {
    /// Amount is zero when non-zero required
    Zero,
    /// Amount exceeds maximum
    TooLarge,
    /// Amount has more decimals than the currency supports
    TooPrecise,
    /// Amount doesn't match expected
    Mismatch,
}

impl SplitError {
    /// Returns a stable error code for logging/debugging
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAddress { .. } => "E001_INVALID_ADDRESS",
            Self::ZeroAmount => "E002_ZERO_AMOUNT",
            Self::InvalidAmount { .. } => "E003_INVALID_AMOUNT",
            Self::MalformedAmount { .. } => "E004_MALFORMED_AMOUNT",
            Self::MissingField { .. } => "E005_MISSING_FIELD",
            Self::EmptyParticipants => "E006_EMPTY_PARTICIPANTS",
            Self::TooManyParticipants { .. } => "E007_TOO_MANY_PARTICIPANTS",
            Self::TooFewParticipants { .. } => "E008_TOO_FEW_PARTICIPANTS",
            Self::DuplicateAddress { .. } => "E009_DUPLICATE_ADDRESS",
            Self::NotGroupMember { .. } => "E010_NOT_GROUP_MEMBER",
            Self::NonDivisibleTotal { .. } => "E011_NON_DIVISIBLE_TOTAL",
            Self::PoolNotOpen { .. } => "E020_POOL_NOT_OPEN",
            Self::NotParticipant { .. } => "E021_NOT_PARTICIPANT",
            Self::AlreadyPaid { .. } => "E022_ALREADY_PAID",
            Self::IncorrectShareAmount { .. } => "E023_INCORRECT_SHARE",
            Self::GroupNotFound { .. } => "E030_GROUP_NOT_FOUND",
            Self::ExpenseNotFound { .. } => "E031_EXPENSE_NOT_FOUND",
            Self::ExpenseAlreadyApplied { .. } => "E032_EXPENSE_APPLIED",
            Self::NotExpenseParticipant { .. } => "E033_NOT_EXPENSE_PARTICIPANT",
            Self::AlreadyApproved { .. } => "E034_ALREADY_APPROVED",
            Self::NothingToSettle { .. } => "E035_NOTHING_TO_SETTLE",
            Self::SettlementExceedsDebt { .. } => "E036_EXCEEDS_DEBT",
            Self::SettlementExceedsCredit { .. } => "E037_EXCEEDS_CREDIT",
            Self::SelfSettlement => "E038_SELF_SETTLEMENT",
            Self::Overflow => "E080_OVERFLOW",
            Self::Underflow => "E081_UNDERFLOW",
            Self::DivisionByZero => "E082_DIV_ZERO",
            Self::InvalidStateTransition => "E090_INVALID_STATE",
            Self::ConservationViolated { .. } => "E091_CONSERVATION",
            Self::InvariantViolated { .. } => "E092_INVARIANT",
            Self::InvalidPoolStatus { .. } => "E093_INVALID_POOL_STATUS",
        }
    }
}

impl fmt::Display for SplitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAddress { reason } => write!(f, "invalid address: {reason}"),
            Self::ZeroAmount => write!(f, "amount must be greater than zero"),
            Self::InvalidAmount { amount, reason } => {
                write!(f, "invalid amount {amount}: {reason:?}")
            }
            Self::MalformedAmount { reason } => write!(f, "malformed amount: {reason}"),
            Self::MissingField { field } => write!(f, "{field} is required"),
            Self::EmptyParticipants => write!(f, "at least one participant required"),
            Self::TooManyParticipants { count, maximum } => {
                write!(f, "{count} participants exceeds the maximum of {maximum}")
            }
            Self::TooFewParticipants { count, minimum } => {
                write!(f, "{count} participants is below the minimum of {minimum}")
            }
            Self::DuplicateAddress { address } => write!(f, "duplicate address {address}"),
            Self::NotGroupMember { group_id, account } => {
                write!(f, "{account} is not a member of group {group_id}")
            }
            Self::NonDivisibleTotal {
                total,
                participants,
            } => write!(
                f,
                "total {total} is not evenly divisible by {participants} participants"
            ),
            Self::PoolNotOpen { status } => write!(f, "pool is {}", status.name()),
            Self::NotParticipant { account } => write!(f, "{account} is not a participant"),
            Self::AlreadyPaid { account } => write!(f, "{account} already paid"),
            Self::IncorrectShareAmount { expected, provided } => {
                write!(f, "incorrect share amount: expected {expected}, got {provided}")
            }
            Self::GroupNotFound { group_id } => write!(f, "group {group_id} not found"),
            Self::ExpenseNotFound { expense_id } => write!(f, "expense {expense_id} not found"),
            Self::ExpenseAlreadyApplied { expense_id } => {
                write!(f, "expense {expense_id} already applied")
            }
            Self::NotExpenseParticipant {
                expense_id,
                account,
            } => write!(f, "{account} is not a participant of expense {expense_id}"),
            Self::AlreadyApproved {
                expense_id,
                account,
            } => write!(f, "{account} already approved expense {expense_id}"),
            Self::NothingToSettle { balance } => {
                write!(f, "nothing to settle (balance {balance})")
            }
            Self::SettlementExceedsDebt { owed, requested } => {
                write!(f, "settlement of {requested} exceeds debt of {owed}")
            }
            Self::SettlementExceedsCredit { credit, requested } => {
                write!(f, "settlement of {requested} exceeds creditor balance of {credit}")
            }
            Self::SelfSettlement => write!(f, "cannot settle a debt with yourself"),
            Self::Overflow => write!(f, "arithmetic overflow"),
            Self::Underflow => write!(f, "arithmetic underflow"),
            Self::DivisionByZero => write!(f, "division by zero"),
            Self::InvalidStateTransition => write!(f, "invalid state transition"),
            Self::ConservationViolated { sum } => {
                write!(f, "group balances sum to {sum}, expected zero")
            }
            Self::InvariantViolated { reason } => write!(f, "invariant violated: {reason}"),
            Self::InvalidPoolStatus { raw } => write!(f, "unknown pool status {raw}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SplitError {}
