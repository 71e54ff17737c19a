//! Mathematical Utilities for SplitPool
//!
//! Checked share division and signed balance arithmetic. Every operation
//! returns an error instead of wrapping.

use crate::constants::precision;
use crate::errors::{SplitError, SplitResult};
use crate::types::{Amount, Balance};

/// Exact per-participant share of a pool total
///
/// Pools only accept totals that divide evenly, so a remainder is an error
/// rather than something to round away.
pub fn share_per_user(total: Amount, participants: u64) -> SplitResult<Amount> {
    if participants == 0 {
        return Err(SplitError::DivisionByZero);
    }
    let n = participants as Amount;
    if total % n != 0 {
        return Err(SplitError::NonDivisibleTotal {
            total,
            participants,
        });
    }
    Ok(total / n)
}

/// Floor share of an expense and the remainder that stays unallocated
///
/// # Returns
/// `(share, remainder)` where `share * participants + remainder == amount`
pub fn split_evenly(amount: Amount, participants: u64) -> SplitResult<(Amount, Amount)> {
    if participants == 0 {
        return Err(SplitError::DivisionByZero);
    }
    let n = participants as Amount;
    Ok((amount / n, amount % n))
}

/// Collection progress in basis points (10_000 = fully collected)
pub fn progress_bps(collected: Amount, total: Amount) -> u64 {
    if total == 0 {
        return 0;
    }
    let bps = collected.saturating_mul(precision::BPS_DENOMINATOR as u128) / total;
    bps.min(precision::BPS_DENOMINATOR as u128) as u64
}

/// Converts an unsigned amount into a signed balance delta
pub fn to_signed(amount: Amount) -> SplitResult<Balance> {
    Balance::try_from(amount).map_err(|_| SplitError::Overflow)
}

/// Raises a balance by `amount`
pub fn credit(balance: Balance, amount: Amount) -> SplitResult<Balance> {
    balance
        .checked_add(to_signed(amount)?)
        .ok_or(SplitError::Overflow)
}

/// Lowers a balance by `amount`
pub fn debit(balance: Balance, amount: Amount) -> SplitResult<Balance> {
    balance
        .checked_sub(to_signed(amount)?)
        .ok_or(SplitError::Underflow)
}

/// Checked sum of signed balances
pub fn sum_balances<I>(balances: I) -> SplitResult<Balance>
where
    I: IntoIterator<Item = Balance>,
{
    balances
        .into_iter()
        .try_fold(0i128, |acc, b| acc.checked_add(b).ok_or(SplitError::Overflow))
}

/// Parses a decimal string such as `"0.05"` into base units
///
/// # Arguments
/// * `text` - Non-negative decimal, at most `decimals` fractional digits
/// * `decimals` - Decimal places of the currency (18 for ETH)
pub fn parse_units(text: &str, decimals: u32) -> SplitResult<Amount> {
    let text = text.trim();
    if text.is_empty() {
        return Err(SplitError::MalformedAmount { reason: "empty" });
    }
    let (whole, fraction) = match text.split_once('.') {
        Some((w, f)) => (w, f),
        None => (text, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(SplitError::MalformedAmount { reason: "no digits" });
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SplitError::MalformedAmount {
            reason: "not a decimal number",
        });
    }
    if fraction.len() > decimals as usize {
        return Err(SplitError::MalformedAmount {
            reason: "too many decimal places",
        });
    }

    let scale = 10u128.checked_pow(decimals).ok_or(SplitError::Overflow)?;
    let mut value: Amount = 0;
    for b in whole.bytes() {
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as u128))
            .ok_or(SplitError::Overflow)?;
    }
    value = value.checked_mul(scale).ok_or(SplitError::Overflow)?;

    let mut frac: Amount = 0;
    for b in fraction.bytes() {
        frac = frac * 10 + (b - b'0') as u128;
    }
    let pad = 10u128.pow(decimals - fraction.len() as u32);
    value
        .checked_add(frac * pad)
        .ok_or(SplitError::Overflow)
}
