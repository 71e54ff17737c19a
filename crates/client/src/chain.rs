//! Chain boundary
//!
//! Every contract read goes through [`ContractReader`] and comes back as a
//! tagged [`AbiValue`]. Every write goes through [`ContractWriter`]. The
//! JSON-RPC ledger and the in-memory ledger both implement these traits.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use splitpool_common::{Address, ExpenseId, GroupId, Intent, TxHash};

use crate::error::ClientResult;

// ============ Reads ============

/// Scalar getters of a pool contract
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PoolField {
    Merchant,
    Creator,
    TotalAmount,
    CollectedAmount,
    Status,
    SharePerUser,
    PaidCount,
    MetadataPointer,
    ParticipantsLength,
}

impl PoolField {
    /// Fields without which a pool view is meaningless
    pub const REQUIRED: [PoolField; 8] = [
        PoolField::Merchant,
        PoolField::Creator,
        PoolField::TotalAmount,
        PoolField::CollectedAmount,
        PoolField::Status,
        PoolField::SharePerUser,
        PoolField::PaidCount,
        PoolField::ParticipantsLength,
    ];

    /// Solidity getter name
    pub fn getter(&self) -> &'static str {
        match self {
            Self::Merchant => "merchant",
            Self::Creator => "creator",
            Self::TotalAmount => "totalAmount",
            Self::CollectedAmount => "collectedAmount",
            Self::Status => "status",
            Self::SharePerUser => "sharePerUser",
            Self::PaidCount => "paidCount",
            Self::MetadataPointer => "metadataPointer",
            Self::ParticipantsLength => "participantsLength",
        }
    }
}

/// A single contract read
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReadCall {
    // Group ledger
    GroupCount,
    Group(GroupId),
    GroupMembers(GroupId),
    GroupBalances(GroupId),
    NetBalance(GroupId, Address),
    ExpenseCount,
    Expense(ExpenseId),
    ExpenseParticipants(ExpenseId),
    ExpenseApproved(ExpenseId, Address),

    // Pool factory
    AllPools,
    PoolsByGroup(Address),

    // Pool
    Pool { pool: Address, field: PoolField },
    PoolParticipantAt { pool: Address, index: u64 },
    PoolHasPaid { pool: Address, account: Address },
}

impl ReadCall {
    /// Contract function name, for logs and error messages
    pub fn function(&self) -> &'static str {
        match self {
            Self::GroupCount => "groupCount",
            Self::Group(_) => "groups",
            Self::GroupMembers(_) => "getMembers",
            Self::GroupBalances(_) => "getGroupBalances",
            Self::NetBalance(..) => "netBalance",
            Self::ExpenseCount => "expenseCount",
            Self::Expense(_) => "expenses",
            Self::ExpenseParticipants(_) => "getExpenseParticipants",
            Self::ExpenseApproved(..) => "expenseApproved",
            Self::AllPools => "getAllPools",
            Self::PoolsByGroup(_) => "getPoolsByGroup",
            Self::Pool { field, .. } => field.getter(),
            Self::PoolParticipantAt { .. } => "participantAt",
            Self::PoolHasPaid { .. } => "hasPaid",
        }
    }
}

/// Decoded return value of a contract call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbiValue {
    Address(Address),
    Uint(u128),
    Int(i128),
    Bool(bool),
    Addresses(Vec<Address>),
    Ints(Vec<i128>),
    Tuple(Vec<AbiValue>),
}

impl AbiValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Address(_) => "address",
            Self::Uint(_) => "uint",
            Self::Int(_) => "int",
            Self::Bool(_) => "bool",
            Self::Addresses(_) => "address[]",
            Self::Ints(_) => "int[]",
            Self::Tuple(_) => "tuple",
        }
    }
}

#[async_trait]
pub trait ContractReader: Send + Sync {
    async fn read(&self, call: ReadCall) -> ClientResult<AbiValue>;
}

// ============ Writes ============

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// Outcome of a mined transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub status: ReceiptStatus,
    pub block_number: u64,
    /// Blocks on top of, and including, the one that mined the transaction
    pub confirmations: u64,
    /// Address of a pool deployed by this transaction, when known
    pub created_pool: Option<Address>,
}

impl TxReceipt {
    pub fn succeeded(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

impl fmt::Display for TxReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} in block {} ({} confirmations)",
            self.tx_hash, self.status, self.block_number, self.confirmations
        )
    }
}

#[async_trait]
pub trait ContractWriter: Send + Sync {
    /// Dry run as `from`. A revert comes back as `ClientError::Reverted`.
    async fn simulate(&self, from: Address, intent: &Intent) -> ClientResult<()>;

    /// Broadcasts the state-changing call and returns its hash
    async fn broadcast(&self, from: Address, intent: &Intent) -> ClientResult<TxHash>;

    /// Receipt of a broadcast transaction, `None` while still pending
    async fn receipt(&self, tx_hash: TxHash) -> ClientResult<Option<TxReceipt>>;
}
