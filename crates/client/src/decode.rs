//! Tagged values to domain entities
//!
//! Reads come back from the chain boundary as [`AbiValue`]s. The helpers here
//! check the shape of each value and build validated domain types from them,
//! so nothing untyped escapes into the rest of the client.

use splitpool_common::{
    validation::ledger_conserved, Address, Balance, ExpenseId, ExpenseState, GroupId, GroupState,
    MemberBalance, PoolStatus, SplitError,
};
use thiserror::Error;

use crate::chain::AbiValue;

pub type DecodeResult<T> = Result<T, DecodeError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{call}: expected {expected}, got {actual}")]
    UnexpectedShape {
        call: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("{0}: value out of range")]
    OutOfRange(&'static str),
    #[error("{field}: {source}")]
    Invalid {
        field: &'static str,
        source: SplitError,
    },
    #[error("return data truncated")]
    Truncated,
    #[error("{0} does not exist")]
    Missing(String),
    #[error("{members} members but {balances} balances")]
    LengthMismatch { members: usize, balances: usize },
}

impl DecodeError {
    fn shape(call: &'static str, expected: &'static str, actual: &AbiValue) -> Self {
        Self::UnexpectedShape {
            call,
            expected,
            actual: actual.type_name(),
        }
    }
}

// ============ Scalars ============

pub fn as_address(call: &'static str, value: AbiValue) -> DecodeResult<Address> {
    match value {
        AbiValue::Address(address) => Ok(address),
        other => Err(DecodeError::shape(call, "address", &other)),
    }
}

pub fn as_uint(call: &'static str, value: AbiValue) -> DecodeResult<u128> {
    match value {
        AbiValue::Uint(n) => Ok(n),
        other => Err(DecodeError::shape(call, "uint", &other)),
    }
}

pub fn as_u64(call: &'static str, value: AbiValue) -> DecodeResult<u64> {
    let n = as_uint(call, value)?;
    u64::try_from(n).map_err(|_| DecodeError::OutOfRange(call))
}

pub fn as_int(call: &'static str, value: AbiValue) -> DecodeResult<i128> {
    match value {
        AbiValue::Int(n) => Ok(n),
        other => Err(DecodeError::shape(call, "int", &other)),
    }
}

pub fn as_bool(call: &'static str, value: AbiValue) -> DecodeResult<bool> {
    match value {
        AbiValue::Bool(b) => Ok(b),
        other => Err(DecodeError::shape(call, "bool", &other)),
    }
}

pub fn as_status(call: &'static str, value: AbiValue) -> DecodeResult<PoolStatus> {
    let raw = as_uint(call, value)?;
    let raw = u8::try_from(raw).map_err(|_| DecodeError::OutOfRange(call))?;
    PoolStatus::from_raw(raw).map_err(|source| DecodeError::Invalid {
        field: call,
        source,
    })
}

// ============ Composites ============

pub fn as_addresses(call: &'static str, value: AbiValue) -> DecodeResult<Vec<Address>> {
    match value {
        AbiValue::Addresses(list) => Ok(list),
        other => Err(DecodeError::shape(call, "address[]", &other)),
    }
}

pub fn as_ints(call: &'static str, value: AbiValue) -> DecodeResult<Vec<i128>> {
    match value {
        AbiValue::Ints(list) => Ok(list),
        other => Err(DecodeError::shape(call, "int[]", &other)),
    }
}

/// Unpacks a tuple of exactly `arity` elements
pub fn as_tuple(call: &'static str, value: AbiValue, arity: usize) -> DecodeResult<Vec<AbiValue>> {
    match value {
        AbiValue::Tuple(items) if items.len() == arity => Ok(items),
        AbiValue::Tuple(_) => Err(DecodeError::Truncated),
        other => Err(DecodeError::shape(call, "tuple", &other)),
    }
}

// ============ Entities ============

/// Builds a group from `groups(id)` = `(creator, metadataPointer, exists)`
/// and `getMembers(id)`
pub fn decode_group(id: GroupId, record: AbiValue, members: Vec<Address>) -> DecodeResult<GroupState> {
    let mut fields = as_tuple("groups", record, 3)?.into_iter();
    let (Some(creator), Some(pointer), Some(exists)) = (fields.next(), fields.next(), fields.next())
    else {
        return Err(DecodeError::Truncated);
    };

    if !as_bool("groups", exists)? {
        return Err(DecodeError::Missing(format!("group {id}")));
    }

    Ok(GroupState {
        id,
        creator: as_address("groups", creator)?,
        members,
        metadata_pointer: as_u64("groups", pointer)?,
    })
}

/// Builds an expense from
/// `expenses(id)` = `(groupId, payer, amount, metadataPointer, applied, exists)`
/// plus its participants and the participants that approved
pub fn decode_expense(
    id: ExpenseId,
    record: AbiValue,
    participants: Vec<Address>,
    approved_by: Vec<Address>,
) -> DecodeResult<ExpenseState> {
    let fields = as_tuple("expenses", record, 6)?;
    let [group_id, payer, amount, pointer, applied, exists]: [AbiValue; 6] = fields
        .try_into()
        .map_err(|_| DecodeError::Truncated)?;

    if !as_bool("expenses", exists)? {
        return Err(DecodeError::Missing(format!("expense {id}")));
    }

    let amount = as_uint("expenses", amount)?;
    if amount == 0 {
        return Err(DecodeError::Invalid {
            field: "expenses.amount",
            source: SplitError::ZeroAmount,
        });
    }

    Ok(ExpenseState {
        id,
        group_id: as_u64("expenses", group_id)?,
        payer: as_address("expenses", payer)?,
        amount,
        metadata_pointer: as_u64("expenses", pointer)?,
        participants,
        approved_by,
        applied: as_bool("expenses", applied)?,
    })
}

/// Pairs `getGroupBalances(id)` = `(members, balances)` and checks the
/// ledger is closed
pub fn decode_balances(value: AbiValue) -> DecodeResult<Vec<MemberBalance>> {
    let fields = as_tuple("getGroupBalances", value, 2)?;
    let [members, balances]: [AbiValue; 2] =
        fields.try_into().map_err(|_| DecodeError::Truncated)?;
    let members = as_addresses("getGroupBalances", members)?;
    let balances: Vec<Balance> = as_ints("getGroupBalances", balances)?;

    if members.len() != balances.len() {
        return Err(DecodeError::LengthMismatch {
            members: members.len(),
            balances: balances.len(),
        });
    }

    ledger_conserved(balances.iter().copied()).map_err(|source| DecodeError::Invalid {
        field: "getGroupBalances",
        source,
    })?;

    Ok(members
        .into_iter()
        .zip(balances)
        .map(|(account, balance)| MemberBalance::new(account, balance))
        .collect())
}
