//! Core Types for SplitPool
//!
//! Addresses, amounts and the snapshot structures mirrored from the
//! group ledger and pool contracts, plus the write intents the client
//! can submit.

use core::fmt;
use core::str::FromStr;

use crate::errors::SplitError;
use crate::Vec;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Amount in the smallest currency unit (wei)
pub type Amount = u128;

/// Signed net balance. Positive means owed, negative means owes.
pub type Balance = i128;

/// Group identifier on the group ledger
pub type GroupId = u64;

/// Expense identifier on the group ledger
pub type ExpenseId = u64;

/// Pointer into the storage pointer contract (resolves to a content address)
pub type MetadataPointer = u64;

// ============ Hex Identifiers ============

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    f.write_str("0x")?;
    for byte in bytes {
        write!(f, "{byte:02x}")?;
    }
    Ok(())
}

fn parse_prefixed_hex<const N: usize>(s: &str) -> Result<[u8; N], SplitError> {
    let digits = s
        .strip_prefix("0x")
        .ok_or(SplitError::InvalidAddress {
            reason: "missing 0x prefix",
        })?;
    if digits.len() != N * 2 {
        return Err(SplitError::InvalidAddress {
            reason: "wrong length",
        });
    }
    let mut out = [0u8; N];
    hex::decode_to_slice(digits, &mut out).map_err(|_| SplitError::InvalidAddress {
        reason: "non-hex character",
    })?;
    Ok(out)
}

/// 20-byte account or contract address
///
/// Text form is exactly `0x` followed by 40 hex characters. The digits are
/// case-insensitive, display is lowercase.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshSerialize, BorshDeserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The zero address. Never a valid participant, member or merchant.
    pub const ZERO: Self = Self([0u8; 20]);

    /// Address with every byte set to `byte`
    pub const fn repeat_byte(byte: u8) -> Self {
        Self([byte; 20])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl FromStr for Address {
    type Err = SplitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_prefixed_hex::<20>(s).map(Self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

/// 32-byte transaction hash
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshSerialize, BorshDeserialize)]
pub struct TxHash(pub [u8; 32]);

impl FromStr for TxHash {
    type Err = SplitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_prefixed_hex::<32>(s).map(Self)
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

macro_rules! hex_serde {
    ($ty:ident, $expecting:literal) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct HexVisitor;

                impl<'de> serde::de::Visitor<'de> for HexVisitor {
                    type Value = $ty;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        f.write_str($expecting)
                    }

                    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<$ty, E> {
                        v.parse().map_err(E::custom)
                    }
                }

                deserializer.deserialize_str(HexVisitor)
            }
        }
    };
}

hex_serde!(Address, "a 0x-prefixed 20-byte hex address");
hex_serde!(TxHash, "a 0x-prefixed 32-byte hex hash");

// ============ Pool Types ============

/// Lifecycle of a pool escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
#[borsh(use_discriminant = true)]
#[repr(u8)]
pub enum PoolStatus {
    /// Collecting shares
    #[default]
    Open = 0,
    /// Every participant paid, merchant settled
    Paid = 1,
    /// Cancelled on chain; only ever read, never produced locally
    Cancelled = 2,
}

impl PoolStatus {
    /// Decodes the contract's `uint8` status
    pub fn from_raw(raw: u8) -> Result<Self, SplitError> {
        match raw {
            0 => Ok(Self::Open),
            1 => Ok(Self::Paid),
            2 => Ok(Self::Cancelled),
            _ => Err(SplitError::InvalidPoolStatus { raw }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::Paid => "Paid",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Paid and Cancelled pools never change again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Open)
    }
}

/// Snapshot of a pool escrow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct PoolState {
    /// Pool contract address
    pub address: Address,
    /// Account that created the pool
    pub creator: Address,
    /// Receiver of the collected funds
    pub merchant: Address,
    /// Total amount to collect
    pub total_amount: Amount,
    /// Amount collected so far
    pub collected_amount: Amount,
    /// Exact amount each participant pays
    pub share_per_user: Amount,
    /// Ordered participant set
    pub participants: Vec<Address>,
    /// Number of participants that paid
    pub paid_count: u64,
    /// Current status
    pub status: PoolStatus,
    /// Metadata pointer
    pub metadata_pointer: MetadataPointer,
}

impl PoolState {
    pub fn participant_count(&self) -> u64 {
        self.participants.len() as u64
    }

    pub fn is_participant(&self, account: &Address) -> bool {
        self.participants.contains(account)
    }

    /// Amount still to be collected
    pub fn remaining_amount(&self) -> Amount {
        self.total_amount.saturating_sub(self.collected_amount)
    }

    pub fn is_fully_funded(&self) -> bool {
        self.paid_count == self.participant_count()
    }
}

// ============ Group Types ============

/// Snapshot of a group on the group ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct GroupState {
    pub id: GroupId,
    /// Creator, always the first member
    pub creator: Address,
    /// Ordered members without duplicates
    pub members: Vec<Address>,
    pub metadata_pointer: MetadataPointer,
}

impl GroupState {
    pub fn is_member(&self, account: &Address) -> bool {
        self.members.contains(account)
    }
}

/// Snapshot of an expense on the group ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct ExpenseState {
    pub id: ExpenseId,
    pub group_id: GroupId,
    /// Member who paid up front
    pub payer: Address,
    pub amount: Amount,
    pub metadata_pointer: MetadataPointer,
    /// Members sharing the cost
    pub participants: Vec<Address>,
    /// Participants that approved, in approval order
    pub approved_by: Vec<Address>,
    /// Folded into net balances
    pub applied: bool,
}

impl ExpenseState {
    pub fn is_participant(&self, account: &Address) -> bool {
        self.participants.contains(account)
    }

    pub fn has_approved(&self, account: &Address) -> bool {
        self.approved_by.contains(account)
    }

    /// Approvals still missing before the expense applies
    pub fn pending_approvals(&self) -> usize {
        self.participants.len().saturating_sub(self.approved_by.len())
    }
}

/// Net balance of one member inside a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct MemberBalance {
    pub account: Address,
    pub balance: Balance,
}

impl MemberBalance {
    pub fn new(account: Address, balance: Balance) -> Self {
        Self { account, balance }
    }

    pub fn standing(&self) -> Standing {
        Standing::of(self.balance)
    }
}

/// Human reading of a signed balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Standing {
    /// Others owe this member
    Owed(Amount),
    /// This member owes others
    Owes(Amount),
    /// Nothing outstanding
    Settled,
}

impl Standing {
    pub fn of(balance: Balance) -> Self {
        if balance > 0 {
            Self::Owed(balance.unsigned_abs())
        } else if balance < 0 {
            Self::Owes(balance.unsigned_abs())
        } else {
            Self::Settled
        }
    }
}

// ============ Intents ============

/// Kind of write a user can submit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntentKind {
    PayShare,
    CreatePool,
    CreateGroup,
    AddExpense,
    ApproveExpense,
    SettleDebt,
}

impl IntentKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PayShare => "payShare",
            Self::CreatePool => "createPool",
            Self::CreateGroup => "createGroup",
            Self::AddExpense => "addExpense",
            Self::ApproveExpense => "approveExpense",
            Self::SettleDebt => "settleDebt",
        }
    }
}

/// A state-changing action the user wants performed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    /// Pay the caller's share into a pool
    PayShare { pool: Address, value: Amount },
    /// Deploy a new pool through the factory
    CreatePool {
        /// Group ledger the pool belongs to (zero when standalone)
        group: Address,
        merchant: Address,
        total_amount: Amount,
        metadata_pointer: MetadataPointer,
        participants: Vec<Address>,
    },
    /// Create a group. The caller becomes the first member.
    CreateGroup {
        members: Vec<Address>,
        metadata_pointer: MetadataPointer,
    },
    /// Record an expense paid by the caller
    AddExpense {
        group_id: GroupId,
        amount: Amount,
        metadata_pointer: MetadataPointer,
        participants: Vec<Address>,
    },
    /// Approve an expense the caller participates in
    ApproveExpense { expense_id: ExpenseId },
    /// Pay down the caller's debt to a creditor
    SettleDebt {
        group_id: GroupId,
        creditor: Address,
        amount: Amount,
    },
}

impl Intent {
    pub fn kind(&self) -> IntentKind {
        match self {
            Self::PayShare { .. } => IntentKind::PayShare,
            Self::CreatePool { .. } => IntentKind::CreatePool,
            Self::CreateGroup { .. } => IntentKind::CreateGroup,
            Self::AddExpense { .. } => IntentKind::AddExpense,
            Self::ApproveExpense { .. } => IntentKind::ApproveExpense,
            Self::SettleDebt { .. } => IntentKind::SettleDebt,
        }
    }

    /// Native value attached to the call
    pub fn value(&self) -> Amount {
        match self {
            Self::PayShare { value, .. } => *value,
            Self::SettleDebt { amount, .. } => *amount,
            _ => 0,
        }
    }

    /// Logical identity used to reject duplicate in-flight submissions
    pub fn key(&self) -> IntentKey {
        match self {
            Self::PayShare { pool, .. } => IntentKey::PayShare { pool: *pool },
            Self::CreatePool {
                merchant,
                total_amount,
                participants,
                ..
            } => IntentKey::CreatePool {
                merchant: *merchant,
                total_amount: *total_amount,
                participants: sorted(participants),
            },
            Self::CreateGroup { members, .. } => IntentKey::CreateGroup {
                members: sorted(members),
            },
            Self::AddExpense {
                group_id,
                amount,
                participants,
                ..
            } => IntentKey::AddExpense {
                group_id: *group_id,
                amount: *amount,
                participants: sorted(participants),
            },
            Self::ApproveExpense { expense_id } => IntentKey::ApproveExpense {
                expense_id: *expense_id,
            },
            Self::SettleDebt {
                group_id, creditor, ..
            } => IntentKey::SettleDebt {
                group_id: *group_id,
                creditor: *creditor,
            },
        }
    }
}

fn sorted(addresses: &[Address]) -> Vec<Address> {
    let mut out: Vec<Address> = addresses.to_vec();
    out.sort_unstable();
    out.dedup();
    out
}

/// Logical identity of an intent
///
/// Two intents with the same key target the same on-chain effect, so only
/// one of them may be outstanding at a time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IntentKey {
    PayShare { pool: Address },
    CreatePool {
        merchant: Address,
        total_amount: Amount,
        participants: Vec<Address>,
    },
    CreateGroup { members: Vec<Address> },
    AddExpense {
        group_id: GroupId,
        amount: Amount,
        participants: Vec<Address>,
    },
    ApproveExpense { expense_id: ExpenseId },
    SettleDebt { group_id: GroupId, creditor: Address },
}

impl fmt::Display for IntentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PayShare { pool } => write!(f, "payShare:{pool}"),
            Self::CreatePool {
                merchant,
                total_amount,
                participants,
            } => write!(
                f,
                "createPool:{merchant}:{total_amount}:{}",
                participants.len()
            ),
            Self::CreateGroup { members } => write!(f, "createGroup:{}", members.len()),
            Self::AddExpense {
                group_id,
                amount,
                participants,
            } => write!(f, "addExpense:{group_id}:{amount}:{}", participants.len()),
            Self::ApproveExpense { expense_id } => write!(f, "approveExpense:{expense_id}"),
            Self::SettleDebt { group_id, creditor } => {
                write!(f, "settleDebt:{group_id}:{creditor}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse_is_case_insensitive() {
        let lower: Address = "0xa465899391d17473a49b8db1e95b8f31697687c1".parse().unwrap();
        let mixed: Address = "0xa465899391d17473A49B8db1e95b8f31697687c1".parse().unwrap();
        assert_eq!(lower, mixed);
        assert_eq!(
            mixed.to_string(),
            "0xa465899391d17473a49b8db1e95b8f31697687c1"
        );
    }

    #[test]
    fn test_address_rejects_malformed() {
        assert!("a465899391d17473a49b8db1e95b8f31697687c1".parse::<Address>().is_err());
        assert!("0x1234".parse::<Address>().is_err());
        assert!("0xz465899391d17473a49b8db1e95b8f31697687c1".parse::<Address>().is_err());
        assert!("0Xa465899391d17473a49b8db1e95b8f31697687c1".parse::<Address>().is_err());
        assert!(" 0xa465899391d17473a49b8db1e95b8f31697687c1".parse::<Address>().is_err());
        assert!("0xa465899391d17473a49b8db1e95b8f31697687c1\n".parse::<Address>().is_err());
    }

    #[test]
    fn test_address_serde_as_hex() {
        let addr = Address::repeat_byte(0xab);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{addr}\""));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn test_pool_status_from_raw() {
        assert_eq!(PoolStatus::from_raw(0).unwrap(), PoolStatus::Open);
        assert_eq!(PoolStatus::from_raw(2).unwrap(), PoolStatus::Cancelled);
        assert_eq!(
            PoolStatus::from_raw(7),
            Err(SplitError::InvalidPoolStatus { raw: 7 })
        );
        assert!(PoolStatus::Paid.is_terminal());
        assert!(!PoolStatus::Open.is_terminal());
    }

    #[test]
    fn test_standing() {
        assert_eq!(Standing::of(500), Standing::Owed(500));
        assert_eq!(Standing::of(-300), Standing::Owes(300));
        assert_eq!(Standing::of(0), Standing::Settled);
    }

    #[test]
    fn test_intent_key_ignores_participant_order() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let first = Intent::AddExpense {
            group_id: 1,
            amount: 90,
            metadata_pointer: 0,
            participants: vec![a, b],
        };
        let second = Intent::AddExpense {
            group_id: 1,
            amount: 90,
            metadata_pointer: 9,
            participants: vec![b, a],
        };
        assert_eq!(first.key(), second.key());
        assert_eq!(first.kind().name(), "addExpense");
    }

    #[test]
    fn test_settle_key_scoped_to_creditor() {
        let settle = |creditor| Intent::SettleDebt {
            group_id: 3,
            creditor,
            amount: 10,
        };
        let a = settle(Address::repeat_byte(1));
        let b = settle(Address::repeat_byte(2));
        assert_ne!(a.key(), b.key());
        assert_eq!(a.value(), 10);
    }
}
