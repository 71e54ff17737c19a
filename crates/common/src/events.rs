//! Ledger Events for SplitPool
//!
//! Events mirror what the pool and group ledger contracts emit. The local
//! accounting models push them into an [`EventLog`] so callers can see
//! exactly which effects an operation had.

use crate::types::{Address, Amount, ExpenseId, GroupId};
use crate::Vec;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// Event types for indexing and filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
#[borsh(use_discriminant = true)]
#[repr(u8)]
pub enum EventType {
    // Pool Events (0x01 - 0x1F)
    PoolCreated = 0x01,
    ParticipantPaid = 0x02,
    PoolPaid = 0x03,

    // Group Events (0x20 - 0x3F)
    GroupCreated = 0x20,
    ExpenseCreated = 0x21,
    ExpenseApproved = 0x22,
    ExpenseApplied = 0x23,
    DebtSettled = 0x24,
}

/// All events the ledgers can emit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub enum LedgerEvent {
    // ============ Pool Events ============
    PoolCreated {
        pool: Address,
        creator: Address,
        merchant: Address,
        total_amount: Amount,
        participants: u64,
    },

    ParticipantPaid {
        pool: Address,
        participant: Address,
        amount: Amount,
    },

    /// Collected funds released to the merchant
    PoolPaid {
        pool: Address,
        merchant: Address,
        amount: Amount,
    },

    // ============ Group Events ============
    GroupCreated {
        group_id: GroupId,
        creator: Address,
        members: u64,
    },

    ExpenseCreated {
        group_id: GroupId,
        expense_id: ExpenseId,
        payer: Address,
        amount: Amount,
    },

    ExpenseApproved {
        expense_id: ExpenseId,
        participant: Address,
    },

    /// Expense folded into net balances
    ExpenseApplied {
        group_id: GroupId,
        expense_id: ExpenseId,
        share: Amount,
    },

    DebtSettled {
        group_id: GroupId,
        from: Address,
        to: Address,
        amount: Amount,
    },
}

impl LedgerEvent {
    /// Get the event type for filtering
    pub fn event_type(&self) -> EventType {
        match self {
            Self::PoolCreated { .. } => EventType::PoolCreated,
            Self::ParticipantPaid { .. } => EventType::ParticipantPaid,
            Self::PoolPaid { .. } => EventType::PoolPaid,
            Self::GroupCreated { .. } => EventType::GroupCreated,
            Self::ExpenseCreated { .. } => EventType::ExpenseCreated,
            Self::ExpenseApproved { .. } => EventType::ExpenseApproved,
            Self::ExpenseApplied { .. } => EventType::ExpenseApplied,
            Self::DebtSettled { .. } => EventType::DebtSettled,
        }
    }

    /// Group the event belongs to, if it is a group event that carries one
    pub fn group_id(&self) -> Option<GroupId> {
        match self {
            Self::GroupCreated { group_id, .. }
            | Self::ExpenseCreated { group_id, .. }
            | Self::ExpenseApplied { group_id, .. }
            | Self::DebtSettled { group_id, .. } => Some(*group_id),
            _ => None,
        }
    }

    /// Pool the event belongs to, if it is a pool event
    pub fn pool(&self) -> Option<Address> {
        match self {
            Self::PoolCreated { pool, .. }
            | Self::ParticipantPaid { pool, .. }
            | Self::PoolPaid { pool, .. } => Some(*pool),
            _ => None,
        }
    }
}

/// Event log for collecting the events of one or more operations
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<LedgerEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Emit an event (add to log)
    pub fn emit(&mut self, event: LedgerEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    /// Take ownership of all events
    pub fn into_events(self) -> Vec<LedgerEvent> {
        self.events
    }

    /// Filter events by type
    pub fn filter_by_type(&self, event_type: EventType) -> Vec<&LedgerEvent> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    pub fn count_of(&self, event_type: EventType) -> usize {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
