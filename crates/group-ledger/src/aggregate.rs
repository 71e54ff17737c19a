//! Balance Aggregator
//!
//! Turns the per-member net balances of one group into what the current
//! user needs to see: their own balance, who they owe, who owes them, and
//! a row per member.

use serde::{Deserialize, Serialize};

use splitpool_common::{
    check,
    errors::{SplitError, SplitResult},
    types::{Address, Amount, Balance, MemberBalance, Standing},
};

/// One member on the other side of the user's balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterparty {
    pub account: Address,
    /// Magnitude of the counterparty's balance
    pub amount: Amount,
}

/// One member row for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRow {
    pub account: Address,
    pub balance: Balance,
    pub standing: Standing,
    /// Row belongs to the current user
    pub is_me: bool,
}

/// Aggregated view of a group's balances for one user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSummary {
    /// The user's own balance, `None` when they are not listed
    pub own_balance: Option<Balance>,
    /// Members the user can settle with (only when the user owes)
    pub creditors: Vec<Counterparty>,
    /// Members that owe (only when the user is owed)
    pub debtors: Vec<Counterparty>,
    /// Every member in input order
    pub rows: Vec<BalanceRow>,
    /// Sum of all positive balances in the group
    pub total_credit: Amount,
    /// Magnitude of the sum of all negative balances in the group
    pub total_debt: Amount,
}

impl BalanceSummary {
    pub fn own_standing(&self) -> Option<Standing> {
        self.own_balance.map(Standing::of)
    }

    /// Nothing outstanding anywhere in the group
    pub fn is_settled(&self) -> bool {
        self.total_credit == 0 && self.total_debt == 0
    }

    pub fn creditor(&self, account: &Address) -> Option<&Counterparty> {
        self.creditors.iter().find(|c| c.account == *account)
    }
}

/// Builds the summary of `balances` as seen by `me`
///
/// Zero balances show up as `Settled` rows and never as settlement
/// candidates.
pub fn summarize(balances: &[MemberBalance], me: &Address) -> BalanceSummary {
    let own_balance = balances
        .iter()
        .find(|b| b.account == *me)
        .map(|b| b.balance);

    let mut summary = BalanceSummary {
        own_balance,
        ..Default::default()
    };

    for entry in balances {
        let is_me = entry.account == *me;
        summary.rows.push(BalanceRow {
            account: entry.account,
            balance: entry.balance,
            standing: entry.standing(),
            is_me,
        });

        let magnitude = entry.balance.unsigned_abs();
        if entry.balance > 0 {
            summary.total_credit = summary.total_credit.saturating_add(magnitude);
        } else if entry.balance < 0 {
            summary.total_debt = summary.total_debt.saturating_add(magnitude);
        }

        if is_me {
            continue;
        }
        match own_balance {
            Some(own) if own < 0 && entry.balance > 0 => summary.creditors.push(Counterparty {
                account: entry.account,
                amount: magnitude,
            }),
            Some(own) if own > 0 && entry.balance < 0 => summary.debtors.push(Counterparty {
                account: entry.account,
                amount: magnitude,
            }),
            _ => {}
        }
    }

    summary
}

/// Checks that the summary could have come from a closed ledger
///
/// Creditors listed for the user cannot be owed more than the group owes
/// in total, and likewise for debtors.
pub fn check_consistency(summary: &BalanceSummary) -> SplitResult<()> {
    let listed_credit = summary
        .creditors
        .iter()
        .try_fold(0u128, |acc, c| acc.checked_add(c.amount))
        .ok_or(SplitError::Overflow)?;
    check!(
        listed_credit <= summary.total_debt,
        SplitError::InvariantViolated {
            reason: "creditors owed more than total debt"
        }
    );

    let listed_debt = summary
        .debtors
        .iter()
        .try_fold(0u128, |acc, d| acc.checked_add(d.amount))
        .ok_or(SplitError::Overflow)?;
    check!(
        listed_debt <= summary.total_credit,
        SplitError::InvariantViolated {
            reason: "debtors owe more than total credit"
        }
    );
    Ok(())
}

/// Largest amount the user can settle with `creditor` in one payment
///
/// `None` when the user owes nothing or `creditor` is not owed.
pub fn max_settlement(summary: &BalanceSummary, creditor: &Address) -> Option<Amount> {
    let own = summary.own_balance.filter(|b| *b < 0)?;
    let entry = summary.creditor(creditor)?;
    Some(own.unsigned_abs().min(entry.amount))
}
