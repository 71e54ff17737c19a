//! Group Ledger
//!
//! Local mirror of the group ledger contract: groups of members, shared
//! expenses that need every participant's approval, and settlements that
//! pay down debt between two members.
//!
//! ## Closed Ledger
//!
//! Net balances inside a group always sum to zero:
//! - Applying an expense debits each participant `share` and credits the
//!   payer `share * N`, so the two sides match exactly
//! - A settlement moves the same amount toward zero on both sides
//!
//! ## Key Features
//!
//! - **Approval gate**: an expense changes balances only after every
//!   participant approved it, and exactly once
//! - **Bounded settlement**: a debtor cannot pay more than they owe, and
//!   a creditor cannot receive more than they are owed
//! - **Balance aggregation**: see [`aggregate`]

pub mod aggregate;

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use splitpool_common::{
    check,
    errors::{SplitError, SplitResult},
    events::{EventLog, LedgerEvent},
    math::{credit, debit, split_evenly},
    types::{
        Address, Amount, Balance, ExpenseId, ExpenseState, GroupId, GroupState, MemberBalance,
        MetadataPointer,
    },
    validation::{
        ledger_conserved, validate_approval, validate_expense_creation, validate_group_creation,
        validate_settlement,
    },
};

pub use aggregate::{check_consistency, max_settlement, summarize, BalanceRow, BalanceSummary, Counterparty};

// ============ Ledger State ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
struct GroupEntry {
    state: GroupState,
    balances: BTreeMap<Address, Balance>,
}

/// All groups and expenses of one group ledger deployment
///
/// Identifiers start at 1, like the contract's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct GroupLedger {
    groups: BTreeMap<GroupId, GroupEntry>,
    expenses: BTreeMap<ExpenseId, ExpenseState>,
    group_count: GroupId,
    expense_count: ExpenseId,
}

impl GroupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group_count(&self) -> GroupId {
        self.group_count
    }

    pub fn expense_count(&self) -> ExpenseId {
        self.expense_count
    }

    // ============ Groups ============

    /// Creates a group. `creator` must be listed and becomes the first member.
    pub fn create_group(
        &mut self,
        creator: Address,
        members: &[Address],
        metadata_pointer: MetadataPointer,
        events: &mut EventLog,
    ) -> SplitResult<GroupId> {
        validate_group_creation(&creator, members)?;

        let mut ordered = Vec::with_capacity(members.len());
        ordered.push(creator);
        ordered.extend(members.iter().copied().filter(|m| *m != creator));

        let id = self.group_count.checked_add(1).ok_or(SplitError::Overflow)?;
        self.group_count = id;

        let member_count = ordered.len() as u64;
        let balances = ordered.iter().map(|m| (*m, 0)).collect();
        self.groups.insert(
            id,
            GroupEntry {
                state: GroupState {
                    id,
                    creator,
                    members: ordered,
                    metadata_pointer,
                },
                balances,
            },
        );

        events.emit(LedgerEvent::GroupCreated {
            group_id: id,
            creator,
            members: member_count,
        });
        Ok(id)
    }

    fn entry(&self, group_id: GroupId) -> SplitResult<&GroupEntry> {
        self.groups
            .get(&group_id)
            .ok_or(SplitError::GroupNotFound { group_id })
    }

    fn entry_mut(&mut self, group_id: GroupId) -> SplitResult<&mut GroupEntry> {
        self.groups
            .get_mut(&group_id)
            .ok_or(SplitError::GroupNotFound { group_id })
    }

    pub fn group(&self, group_id: GroupId) -> SplitResult<&GroupState> {
        self.entry(group_id).map(|e| &e.state)
    }

    pub fn members(&self, group_id: GroupId) -> SplitResult<&[Address]> {
        self.entry(group_id).map(|e| e.state.members.as_slice())
    }

    /// Groups `account` belongs to, in id order
    pub fn groups_of(&self, account: &Address) -> Vec<GroupId> {
        self.groups
            .iter()
            .filter(|(_, e)| e.state.is_member(account))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Net balance of `account`. Non-members read as zero.
    pub fn net_balance(&self, group_id: GroupId, account: &Address) -> SplitResult<Balance> {
        let entry = self.entry(group_id)?;
        Ok(entry.balances.get(account).copied().unwrap_or(0))
    }

    /// Net balances of every member, in member order
    pub fn group_balances(&self, group_id: GroupId) -> SplitResult<Vec<MemberBalance>> {
        let entry = self.entry(group_id)?;
        Ok(entry
            .state
            .members
            .iter()
            .map(|m| MemberBalance::new(*m, entry.balances.get(m).copied().unwrap_or(0)))
            .collect())
    }

    /// Checks that the group's balances sum to zero
    pub fn verify_conservation(&self, group_id: GroupId) -> SplitResult<()> {
        let entry = self.entry(group_id)?;
        ledger_conserved(entry.balances.values().copied())
    }

    // ============ Expenses ============

    /// Records an expense paid by `payer`. Balances do not move yet.
    pub fn add_expense(
        &mut self,
        payer: Address,
        group_id: GroupId,
        amount: Amount,
        metadata_pointer: MetadataPointer,
        participants: &[Address],
        events: &mut EventLog,
    ) -> SplitResult<ExpenseId> {
        let members = self.members(group_id)?;
        validate_expense_creation(group_id, &payer, amount, participants, members)?;

        let id = self.expense_count.checked_add(1).ok_or(SplitError::Overflow)?;
        self.expense_count = id;
        self.expenses.insert(
            id,
            ExpenseState {
                id,
                group_id,
                payer,
                amount,
                metadata_pointer,
                participants: participants.to_vec(),
                approved_by: Vec::new(),
                applied: false,
            },
        );

        events.emit(LedgerEvent::ExpenseCreated {
            group_id,
            expense_id: id,
            payer,
            amount,
        });
        Ok(id)
    }

    pub fn expense(&self, expense_id: ExpenseId) -> SplitResult<&ExpenseState> {
        self.expenses
            .get(&expense_id)
            .ok_or(SplitError::ExpenseNotFound { expense_id })
    }

    /// Expenses of one group, in id order
    pub fn expenses_of(&self, group_id: GroupId) -> Vec<&ExpenseState> {
        self.expenses
            .values()
            .filter(|e| e.group_id == group_id)
            .collect()
    }

    pub fn is_approved(&self, expense_id: ExpenseId, account: &Address) -> bool {
        self.expenses
            .get(&expense_id)
            .map(|e| e.has_approved(account))
            .unwrap_or(false)
    }

    /// Records one participant's approval
    ///
    /// # Returns
    /// `true` when this approval was the last one and the expense applied
    pub fn approve_expense(
        &mut self,
        approver: Address,
        expense_id: ExpenseId,
        events: &mut EventLog,
    ) -> SplitResult<bool> {
        // 1. Participant who has not approved, expense still pending
        let expense = self.expense(expense_id)?;
        validate_approval(expense, &approver)?;

        // 2. Record approval
        let complete = expense.pending_approvals() == 1;
        if let Some(expense) = self.expenses.get_mut(&expense_id) {
            expense.approved_by.push(approver);
        }
        events.emit(LedgerEvent::ExpenseApproved {
            expense_id,
            participant: approver,
        });

        // 3. Last approval folds the expense into balances
        if complete {
            self.apply_expense(expense_id, events)?;
        }
        Ok(complete)
    }

    fn apply_expense(&mut self, expense_id: ExpenseId, events: &mut EventLog) -> SplitResult<()> {
        let expense = self.expense(expense_id)?.clone();
        check!(
            !expense.applied,
            SplitError::ExpenseAlreadyApplied { expense_id }
        );

        let n = expense.participants.len() as u64;
        let (share, _remainder) = split_evenly(expense.amount, n)?;
        let payer_credit = share.checked_mul(n as u128).ok_or(SplitError::Overflow)?;

        // Compute every new balance before writing any of them
        let entry = self.entry(expense.group_id)?;
        let mut updated = entry.balances.clone();
        for participant in &expense.participants {
            let current = updated.get(participant).copied().unwrap_or(0);
            updated.insert(*participant, debit(current, share)?);
        }
        let payer_balance = updated.get(&expense.payer).copied().unwrap_or(0);
        updated.insert(expense.payer, credit(payer_balance, payer_credit)?);

        self.entry_mut(expense.group_id)?.balances = updated;
        if let Some(stored) = self.expenses.get_mut(&expense_id) {
            stored.applied = true;
        }

        events.emit(LedgerEvent::ExpenseApplied {
            group_id: expense.group_id,
            expense_id,
            share,
        });
        Ok(())
    }

    // ============ Settlement ============

    /// Debtor pays `amount` to creditor, moving both balances toward zero
    pub fn settle_debt(
        &mut self,
        debtor: Address,
        group_id: GroupId,
        creditor: Address,
        amount: Amount,
        events: &mut EventLog,
    ) -> SplitResult<()> {
        let entry = self.entry(group_id)?;
        check!(
            entry.state.is_member(&debtor),
            SplitError::NotGroupMember {
                group_id,
                account: debtor
            }
        );
        check!(
            entry.state.is_member(&creditor),
            SplitError::NotGroupMember {
                group_id,
                account: creditor
            }
        );

        let debtor_balance = entry.balances.get(&debtor).copied().unwrap_or(0);
        let creditor_balance = entry.balances.get(&creditor).copied().unwrap_or(0);
        validate_settlement(
            &debtor,
            &creditor,
            amount,
            Some(debtor_balance),
            Some(creditor_balance),
        )?;

        let new_debtor = credit(debtor_balance, amount)?;
        let new_creditor = debit(creditor_balance, amount)?;
        let entry = self.entry_mut(group_id)?;
        entry.balances.insert(debtor, new_debtor);
        entry.balances.insert(creditor, new_creditor);

        events.emit(LedgerEvent::DebtSettled {
            group_id,
            from: debtor,
            to: creditor,
            amount,
        });
        Ok(())
    }
}

// ============ Tests ============
