//! Contract ABI encoding
//!
//! Just enough of the Solidity ABI for the ledger contracts: 4-byte Keccak
//! selectors, 32-byte words for static types, head/tail layout for dynamic
//! arrays, and revert data decoding.
//!
//! Values wider than `u128` / `i128` are rejected on decode. No amount the
//! client deals with comes close.

use sha3::{Digest, Keccak256};
use splitpool_common::{Address, Intent};

use crate::chain::{AbiValue, PoolField, ReadCall};
use crate::decode::{DecodeError, DecodeResult};

pub const WORD: usize = 32;

/// `Error(string)`
pub const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
/// `Panic(uint256)`
pub const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

/// Custom errors of the group ledger, pool and factory contracts
pub const KNOWN_ERRORS: [&str; 24] = [
    // Group ledger
    "InvalidMembers()",
    "GroupNotFound(uint256)",
    "NotMember(uint256,address)",
    "ZeroAmount()",
    "NothingToSettle()",
    "InvalidMetadataPointer()",
    "InvalidParticipants()",
    "ExpenseNotFound(uint256)",
    "ExpenseAlreadyApplied(uint256)",
    "NotParticipant(uint256,address)",
    "AlreadyApproved(uint256,address)",
    // Pool
    "InvalidSettlementToken(address)",
    "PoolAlreadyPaid()",
    "PoolCancelled()",
    "PoolNotFullyFunded(uint256,uint256)",
    "OutstandingDebts(address,uint256)",
    "NonDivisibleTotal(uint256,uint256)",
    "NotParticipant(address)",
    "AlreadyPaid(address)",
    "IncorrectShareAmount(uint256,uint256)",
    "DirectEthTransferNotAllowed()",
    // Factory
    "InvalidMerchant(address)",
    "InvalidTotalAmount()",
    "UnsupportedSettlementToken(address)",
];

/// `PoolCreated(pool, creator, group, merchant, settlementToken, totalAmount, metadataPointer, participantsLength)`
pub const POOL_CREATED_EVENT: &str =
    "PoolCreated(address,address,address,address,address,uint256,uint256,uint256)";

// ============ Selectors ============

pub fn keccak(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn event_topic(signature: &str) -> [u8; 32] {
    keccak(signature.as_bytes())
}

// ============ Encoding ============

/// Argument of an encoded call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    Address(Address),
    Uint(u128),
    Int(i128),
    Bool(bool),
    Addresses(Vec<Address>),
}

pub fn uint_word(n: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[16..].copy_from_slice(&n.to_be_bytes());
    word
}

pub fn int_word(n: i128) -> [u8; WORD] {
    let fill = if n < 0 { 0xff } else { 0x00 };
    let mut word = [fill; WORD];
    word[16..].copy_from_slice(&n.to_be_bytes());
    word
}

pub fn address_word(address: &Address) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

fn static_word(token: &Token) -> [u8; WORD] {
    match token {
        Token::Address(a) => address_word(a),
        Token::Uint(n) => uint_word(*n),
        Token::Int(n) => int_word(*n),
        Token::Bool(b) => uint_word(u128::from(*b)),
        Token::Addresses(_) => [0u8; WORD],
    }
}

/// Encodes `args` with the head/tail layout
pub fn encode_args(args: &[Token]) -> Vec<u8> {
    let head_len = args.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for arg in args {
        match arg {
            Token::Addresses(list) => {
                head.extend_from_slice(&uint_word((head_len + tail.len()) as u128));
                tail.extend_from_slice(&uint_word(list.len() as u128));
                for address in list {
                    tail.extend_from_slice(&address_word(address));
                }
            }
            other => head.extend_from_slice(&static_word(other)),
        }
    }

    head.extend_from_slice(&tail);
    head
}

/// Selector followed by encoded arguments
pub fn encode_call(signature: &str, args: &[Token]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend_from_slice(&encode_args(args));
    data
}

// ============ Decoding ============

/// Expected shape of a return value
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbiType {
    Address,
    Uint,
    Int,
    Bool,
    Addresses,
    Ints,
}

fn word_at(data: &[u8], offset: usize) -> DecodeResult<&[u8]> {
    let end = offset.checked_add(WORD).ok_or(DecodeError::Truncated)?;
    data.get(offset..end).ok_or(DecodeError::Truncated)
}

fn read_uint(word: &[u8]) -> DecodeResult<u128> {
    if word[..16].iter().any(|b| *b != 0) {
        return Err(DecodeError::OutOfRange("uint256"));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low))
}

fn read_int(word: &[u8]) -> DecodeResult<i128> {
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    let value = i128::from_be_bytes(low);
    let fill = if value < 0 { 0xff } else { 0x00 };
    if word[..16].iter().any(|b| *b != fill) {
        return Err(DecodeError::OutOfRange("int256"));
    }
    Ok(value)
}

fn read_address(word: &[u8]) -> DecodeResult<Address> {
    if word[..12].iter().any(|b| *b != 0) {
        return Err(DecodeError::OutOfRange("address"));
    }
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&word[12..]);
    Ok(Address(bytes))
}

fn read_bool(word: &[u8]) -> DecodeResult<bool> {
    match read_uint(word)? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(DecodeError::OutOfRange("bool")),
    }
}

fn read_usize(word: &[u8]) -> DecodeResult<usize> {
    usize::try_from(read_uint(word)?).map_err(|_| DecodeError::OutOfRange("offset"))
}

fn read_array<T>(
    data: &[u8],
    offset: usize,
    read: impl Fn(&[u8]) -> DecodeResult<T>,
) -> DecodeResult<Vec<T>> {
    let len = read_usize(word_at(data, offset)?)?;
    // Each element needs a full word, so a length beyond the data is bogus
    if len > data.len() / WORD {
        return Err(DecodeError::Truncated);
    }
    (0..len)
        .map(|i| word_at(data, offset + WORD * (i + 1)).and_then(&read))
        .collect()
}

fn decode_at(ty: &AbiType, data: &[u8], head: usize) -> DecodeResult<AbiValue> {
    let word = word_at(data, head)?;
    match ty {
        AbiType::Address => read_address(word).map(AbiValue::Address),
        AbiType::Uint => read_uint(word).map(AbiValue::Uint),
        AbiType::Int => read_int(word).map(AbiValue::Int),
        AbiType::Bool => read_bool(word).map(AbiValue::Bool),
        AbiType::Addresses => {
            read_array(data, read_usize(word)?, read_address).map(AbiValue::Addresses)
        }
        AbiType::Ints => read_array(data, read_usize(word)?, read_int).map(AbiValue::Ints),
    }
}

/// Decodes return data. One output yields the bare value, several a tuple.
pub fn decode_output(types: &[AbiType], data: &[u8]) -> DecodeResult<AbiValue> {
    let mut values = types
        .iter()
        .enumerate()
        .map(|(i, ty)| decode_at(ty, data, i * WORD))
        .collect::<DecodeResult<Vec<_>>>()?;

    if values.len() == 1 {
        return values.pop().ok_or(DecodeError::Truncated);
    }
    Ok(AbiValue::Tuple(values))
}

// ============ Revert Data ============

fn decode_string(data: &[u8]) -> DecodeResult<String> {
    let offset = read_usize(word_at(data, 0)?)?;
    let len = read_usize(word_at(data, offset)?)?;
    let start = offset + WORD;
    let bytes = data
        .get(start..start.checked_add(len).ok_or(DecodeError::Truncated)?)
        .ok_or(DecodeError::Truncated)?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn param_types(signature: &str) -> Vec<&str> {
    signature
        .split_once('(')
        .and_then(|(_, rest)| rest.strip_suffix(')'))
        .map(|params| params.split(',').filter(|p| !p.is_empty()).collect())
        .unwrap_or_default()
}

fn format_custom_error(signature: &str, args: &[u8]) -> String {
    let name = signature.split('(').next().unwrap_or(signature);
    let rendered: Vec<String> = param_types(signature)
        .iter()
        .enumerate()
        .map(|(i, ty)| {
            let word = match word_at(args, i * WORD) {
                Ok(word) => word,
                Err(_) => return "?".to_string(),
            };
            let value = match *ty {
                "address" => read_address(word).map(|a| a.to_string()),
                _ => read_uint(word).map(|n| n.to_string()),
            };
            value.unwrap_or_else(|_| "?".to_string())
        })
        .collect();
    format!("{name}({})", rendered.join(", "))
}

/// Human readable reason for revert data
pub fn decode_revert(data: &[u8]) -> String {
    if data.len() < 4 {
        return "execution reverted".to_string();
    }
    let (head, args) = data.split_at(4);

    if head == ERROR_STRING_SELECTOR {
        return decode_string(args).unwrap_or_else(|_| "execution reverted".to_string());
    }
    if head == PANIC_SELECTOR {
        return match word_at(args, 0).and_then(read_uint) {
            Ok(code) => format!("panic 0x{code:02x}"),
            Err(_) => "panic".to_string(),
        };
    }

    KNOWN_ERRORS
        .iter()
        .find(|signature| selector(signature) == head)
        .map(|signature| format_custom_error(signature, args))
        .unwrap_or_else(|| format!("unknown error 0x{}", hex::encode(head)))
}

// ============ Contract Surface ============

/// Contract a call is sent to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    GroupLedger,
    PoolFactory,
    Pool(Address),
}

/// Calldata and expected outputs of a read
pub fn encode_read(call: &ReadCall) -> (Target, Vec<u8>, Vec<AbiType>) {
    use AbiType as T;
    match call {
        ReadCall::GroupCount => (
            Target::GroupLedger,
            encode_call("groupCount()", &[]),
            vec![T::Uint],
        ),
        ReadCall::Group(id) => (
            Target::GroupLedger,
            encode_call("groups(uint256)", &[Token::Uint(u128::from(*id))]),
            vec![T::Address, T::Uint, T::Bool],
        ),
        ReadCall::GroupMembers(id) => (
            Target::GroupLedger,
            encode_call("getMembers(uint256)", &[Token::Uint(u128::from(*id))]),
            vec![T::Addresses],
        ),
        ReadCall::GroupBalances(id) => (
            Target::GroupLedger,
            encode_call("getGroupBalances(uint256)", &[Token::Uint(u128::from(*id))]),
            vec![T::Addresses, T::Ints],
        ),
        ReadCall::NetBalance(id, user) => (
            Target::GroupLedger,
            encode_call(
                "netBalance(uint256,address)",
                &[Token::Uint(u128::from(*id)), Token::Address(*user)],
            ),
            vec![T::Int],
        ),
        ReadCall::ExpenseCount => (
            Target::GroupLedger,
            encode_call("expenseCount()", &[]),
            vec![T::Uint],
        ),
        ReadCall::Expense(id) => (
            Target::GroupLedger,
            encode_call("expenses(uint256)", &[Token::Uint(u128::from(*id))]),
            vec![T::Uint, T::Address, T::Uint, T::Uint, T::Bool, T::Bool],
        ),
        ReadCall::ExpenseParticipants(id) => (
            Target::GroupLedger,
            encode_call(
                "getExpenseParticipants(uint256)",
                &[Token::Uint(u128::from(*id))],
            ),
            vec![T::Addresses],
        ),
        ReadCall::ExpenseApproved(id, user) => (
            Target::GroupLedger,
            encode_call(
                "expenseApproved(uint256,address)",
                &[Token::Uint(u128::from(*id)), Token::Address(*user)],
            ),
            vec![T::Bool],
        ),
        ReadCall::AllPools => (
            Target::PoolFactory,
            encode_call("getAllPools()", &[]),
            vec![T::Addresses],
        ),
        ReadCall::PoolsByGroup(group) => (
            Target::PoolFactory,
            encode_call("getPoolsByGroup(address)", &[Token::Address(*group)]),
            vec![T::Addresses],
        ),
        ReadCall::Pool { pool, field } => {
            let output = match field {
                PoolField::Merchant | PoolField::Creator => T::Address,
                _ => T::Uint,
            };
            let signature = format!("{}()", field.getter());
            (Target::Pool(*pool), encode_call(&signature, &[]), vec![output])
        }
        ReadCall::PoolParticipantAt { pool, index } => (
            Target::Pool(*pool),
            encode_call("participantAt(uint256)", &[Token::Uint(u128::from(*index))]),
            vec![T::Address],
        ),
        ReadCall::PoolHasPaid { pool, account } => (
            Target::Pool(*pool),
            encode_call("hasPaid(address)", &[Token::Address(*account)]),
            vec![T::Bool],
        ),
    }
}

/// Calldata of a write. The attached value is `intent.value()`.
pub fn encode_intent(intent: &Intent) -> (Target, Vec<u8>) {
    match intent {
        Intent::PayShare { pool, .. } => (Target::Pool(*pool), encode_call("payShare()", &[])),
        Intent::CreatePool {
            group,
            merchant,
            total_amount,
            metadata_pointer,
            participants,
        } => (
            Target::PoolFactory,
            encode_call(
                "createPool(address,address,address,uint256,uint256,address[])",
                &[
                    Token::Address(*group),
                    Token::Address(*merchant),
                    // Native currency
                    Token::Address(Address::ZERO),
                    Token::Uint(*total_amount),
                    Token::Uint(u128::from(*metadata_pointer)),
                    Token::Addresses(participants.clone()),
                ],
            ),
        ),
        Intent::CreateGroup {
            members,
            metadata_pointer,
        } => (
            Target::GroupLedger,
            encode_call(
                "createGroup(address[],uint256)",
                &[
                    Token::Addresses(members.clone()),
                    Token::Uint(u128::from(*metadata_pointer)),
                ],
            ),
        ),
        Intent::AddExpense {
            group_id,
            amount,
            metadata_pointer,
            participants,
        } => (
            Target::GroupLedger,
            encode_call(
                "addExpense(uint256,uint256,uint256,address[])",
                &[
                    Token::Uint(u128::from(*group_id)),
                    Token::Uint(*amount),
                    Token::Uint(u128::from(*metadata_pointer)),
                    Token::Addresses(participants.clone()),
                ],
            ),
        ),
        Intent::ApproveExpense { expense_id } => (
            Target::GroupLedger,
            encode_call(
                "approveExpense(uint256)",
                &[Token::Uint(u128::from(*expense_id))],
            ),
        ),
        Intent::SettleDebt {
            group_id,
            creditor,
            amount,
        } => (
            Target::GroupLedger,
            encode_call(
                "settleDebt(uint256,address,uint256,address)",
                &[
                    Token::Uint(u128::from(*group_id)),
                    Token::Address(*creditor),
                    Token::Uint(*amount),
                    Token::Address(Address::ZERO),
                ],
            ),
        ),
    }
}
