//! Typed, cached reads
//!
//! [`LedgerView`] turns raw contract reads into domain snapshots. Every
//! result goes through the [`LocalCache`] under the key it was read for, so
//! a second read within the TTL never touches the chain.
//!
//! ## Degradation
//!
//! - A failed *required* pool field voids the whole pool view
//! - A failed *optional* field (metadata pointer, viewer paid flag) is
//!   reported as `None` and leaves the other fields alone
//! - The `try_*` helpers turn any failure into `None` plus a warning

use std::future::Future;
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};
use splitpool_common::{
    math::progress_bps, Address, Amount, Balance, ExpenseId, ExpenseState, GroupId, GroupState,
    MemberBalance, MetadataPointer, PoolState,
};
use splitpool_group::{check_consistency, summarize, BalanceSummary};
use splitpool_pool::verify_pool_snapshot;
use tracing::{debug, warn};

use crate::cache::{CacheKey, LocalCache};
use crate::chain::{AbiValue, ContractReader, PoolField, ReadCall};
use crate::decode::{self, DecodeError};
use crate::error::ClientResult;

/// An expense as seen by one viewer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseView {
    pub expense: ExpenseState,
    /// `None` when the viewer is not a participant
    pub viewer_approved: Option<bool>,
}

impl ExpenseView {
    pub fn approvals(&self) -> usize {
        self.expense.approved_by.len()
    }
}

/// A pool as seen by one viewer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolView {
    /// Snapshot. Its metadata pointer is 0 when that read failed.
    pub state: PoolState,
    pub metadata_pointer: Option<MetadataPointer>,
    /// `None` without a viewer or when the read failed
    pub viewer_paid: Option<bool>,
}

impl PoolView {
    pub fn progress_bps(&self) -> u64 {
        progress_bps(self.state.collected_amount, self.state.total_amount)
    }

    pub fn remaining(&self) -> Amount {
        self.state.remaining_amount()
    }
}

#[derive(Clone)]
pub struct LedgerView {
    reader: Arc<dyn ContractReader>,
    cache: Arc<LocalCache>,
}

impl LedgerView {
    pub fn new(reader: Arc<dyn ContractReader>, cache: Arc<LocalCache>) -> Self {
        Self { reader, cache }
    }

    pub fn cache(&self) -> &Arc<LocalCache> {
        &self.cache
    }

    async fn cached<T, F, Fut>(&self, key: CacheKey, load: F) -> ClientResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        if let Some(value) = self.cache.get::<T>(&key) {
            return Ok(value);
        }
        debug!(?key, "cache miss");
        let generation = self.cache.generation();
        let value = load().await?;
        self.cache.put_if_generation(key, value.clone(), generation);
        Ok(value)
    }

    async fn read(&self, call: ReadCall) -> ClientResult<AbiValue> {
        self.reader.read(call).await
    }

    // ============ Groups ============

    pub async fn group_count(&self) -> ClientResult<GroupId> {
        self.cached(CacheKey::GroupCount, || async {
            let value = self.read(ReadCall::GroupCount).await?;
            Ok(decode::as_u64("groupCount", value)?)
        })
        .await
    }

    pub async fn group_members(&self, group_id: GroupId) -> ClientResult<Vec<Address>> {
        self.cached(CacheKey::GroupMembers(group_id), || async {
            let value = self.read(ReadCall::GroupMembers(group_id)).await?;
            Ok(decode::as_addresses("getMembers", value)?)
        })
        .await
    }

    pub async fn group(&self, group_id: GroupId) -> ClientResult<GroupState> {
        self.cached(CacheKey::Group(group_id), || async {
            let record = self.read(ReadCall::Group(group_id)).await?;
            // Group existence first, so a missing group reports as missing
            let probe = decode::decode_group(group_id, record, Vec::new())?;
            let members = self.group_members(group_id).await?;
            Ok(GroupState { members, ..probe })
        })
        .await
    }

    pub async fn group_balances(&self, group_id: GroupId) -> ClientResult<Vec<MemberBalance>> {
        self.cached(CacheKey::GroupBalances(group_id), || async {
            let value = self.read(ReadCall::GroupBalances(group_id)).await?;
            Ok(decode::decode_balances(value)?)
        })
        .await
    }

    pub async fn net_balance(&self, group_id: GroupId, account: Address) -> ClientResult<Balance> {
        self.cached(CacheKey::NetBalance(group_id, account), || async {
            let value = self.read(ReadCall::NetBalance(group_id, account)).await?;
            Ok(decode::as_int("netBalance", value)?)
        })
        .await
    }

    /// Groups `me` belongs to, in id order
    pub async fn user_groups(&self, me: Address) -> ClientResult<Vec<GroupState>> {
        self.cached(CacheKey::UserGroups(me), || async {
            let count = self.group_count().await?;
            let lookups = (1..=count).map(|id| self.group(id));
            let mut groups = Vec::new();
            for (id, result) in (1..=count).zip(join_all(lookups).await) {
                match result {
                    Ok(group) if group.is_member(&me) => groups.push(group),
                    Ok(_) => {}
                    Err(err) => warn!(group_id = id, %err, "skipping unreadable group"),
                }
            }
            Ok(groups)
        })
        .await
    }

    pub async fn balance_summary(&self, group_id: GroupId, me: Address) -> ClientResult<BalanceSummary> {
        let balances = self.group_balances(group_id).await?;
        let summary = summarize(&balances, &me);
        check_consistency(&summary).map_err(|source| DecodeError::Invalid {
            field: "getGroupBalances",
            source,
        })?;
        Ok(summary)
    }

    // ============ Expenses ============

    pub async fn expense_count(&self) -> ClientResult<ExpenseId> {
        self.cached(CacheKey::ExpenseCount, || async {
            let value = self.read(ReadCall::ExpenseCount).await?;
            Ok(decode::as_u64("expenseCount", value)?)
        })
        .await
    }

    async fn expense_state(&self, expense_id: ExpenseId) -> ClientResult<ExpenseState> {
        self.cached(CacheKey::Expense(expense_id), || async {
            let (record, participants) = futures::try_join!(
                self.read(ReadCall::Expense(expense_id)),
                self.read(ReadCall::ExpenseParticipants(expense_id)),
            )?;
            let participants = decode::as_addresses("getExpenseParticipants", participants)?;

            let approvals = try_join_all(
                participants
                    .iter()
                    .map(|p| self.read(ReadCall::ExpenseApproved(expense_id, *p))),
            )
            .await?;
            let mut approved_by = Vec::new();
            for (participant, flag) in participants.iter().zip(approvals) {
                if decode::as_bool("expenseApproved", flag)? {
                    approved_by.push(*participant);
                }
            }

            Ok(decode::decode_expense(
                expense_id,
                record,
                participants,
                approved_by,
            )?)
        })
        .await
    }

    pub async fn expense(&self, expense_id: ExpenseId, viewer: Option<Address>) -> ClientResult<ExpenseView> {
        let expense = self.expense_state(expense_id).await?;
        let viewer_approved = viewer
            .filter(|v| expense.is_participant(v))
            .map(|v| expense.has_approved(&v));
        Ok(ExpenseView {
            expense,
            viewer_approved,
        })
    }

    /// Expenses of one group, in id order
    pub async fn group_expenses(&self, group_id: GroupId) -> ClientResult<Vec<ExpenseState>> {
        self.cached(CacheKey::GroupExpenses(group_id), || async {
            let count = self.expense_count().await?;
            let lookups = (1..=count).map(|id| self.expense_state(id));
            let mut expenses = Vec::new();
            for (id, result) in (1..=count).zip(join_all(lookups).await) {
                match result {
                    Ok(expense) if expense.group_id == group_id => expenses.push(expense),
                    Ok(_) => {}
                    Err(err) => warn!(expense_id = id, %err, "skipping unreadable expense"),
                }
            }
            Ok(expenses)
        })
        .await
    }

    // ============ Pools ============

    pub async fn all_pools(&self) -> ClientResult<Vec<Address>> {
        self.cached(CacheKey::AllPools, || async {
            let value = self.read(ReadCall::AllPools).await?;
            Ok(decode::as_addresses("getAllPools", value)?)
        })
        .await
    }

    pub async fn pools_by_group(&self, group: Address) -> ClientResult<Vec<Address>> {
        self.cached(CacheKey::PoolsByGroup(group), || async {
            let value = self.read(ReadCall::PoolsByGroup(group)).await?;
            Ok(decode::as_addresses("getPoolsByGroup", value)?)
        })
        .await
    }

    pub async fn pool(&self, pool: Address, viewer: Option<Address>) -> ClientResult<PoolView> {
        self.cached(CacheKey::Pool { pool, viewer }, || self.load_pool(pool, viewer))
            .await
    }

    async fn load_pool(&self, pool: Address, viewer: Option<Address>) -> ClientResult<PoolView> {
        // 1. Every scalar field at once
        let required = try_join_all(
            PoolField::REQUIRED
                .iter()
                .map(|field| self.read(ReadCall::Pool { pool, field: *field })),
        );
        let pointer = self.read(ReadCall::Pool {
            pool,
            field: PoolField::MetadataPointer,
        });
        let paid = async {
            match viewer {
                Some(account) => Some(self.read(ReadCall::PoolHasPaid { pool, account }).await),
                None => None,
            }
        };
        let (required, pointer, paid) = futures::join!(required, pointer, paid);

        // 2. Required fields, in PoolField::REQUIRED order
        let mut fields = required?.into_iter();
        let mut next = |call: &'static str| fields.next().ok_or(DecodeError::Truncated).map(|v| (call, v));
        let (c, v) = next("merchant")?;
        let merchant = decode::as_address(c, v)?;
        let (c, v) = next("creator")?;
        let creator = decode::as_address(c, v)?;
        let (c, v) = next("totalAmount")?;
        let total_amount = decode::as_uint(c, v)?;
        let (c, v) = next("collectedAmount")?;
        let collected_amount = decode::as_uint(c, v)?;
        let (c, v) = next("status")?;
        let status = decode::as_status(c, v)?;
        let (c, v) = next("sharePerUser")?;
        let share_per_user = decode::as_uint(c, v)?;
        let (c, v) = next("paidCount")?;
        let paid_count = decode::as_u64(c, v)?;
        let (c, v) = next("participantsLength")?;
        let participant_count = decode::as_u64(c, v)?;

        // 3. Optional fields degrade on their own
        let metadata_pointer = match pointer
            .and_then(|v| decode::as_u64("metadataPointer", v).map_err(Into::into))
        {
            Ok(p) => Some(p),
            Err(err) => {
                warn!(%pool, %err, "metadata pointer unavailable");
                None
            }
        };
        let viewer_paid = match paid {
            Some(Ok(value)) => match decode::as_bool("hasPaid", value) {
                Ok(flag) => Some(flag),
                Err(err) => {
                    warn!(%pool, %err, "paid flag unreadable");
                    None
                }
            },
            Some(Err(err)) => {
                warn!(%pool, %err, "paid flag unavailable");
                None
            }
            None => None,
        };

        // 4. Participant list
        let participants = try_join_all(
            (0..participant_count).map(|index| self.read(ReadCall::PoolParticipantAt { pool, index })),
        )
        .await?
        .into_iter()
        .map(|v| decode::as_address("participantAt", v))
        .collect::<Result<Vec<_>, _>>()?;

        let state = PoolState {
            address: pool,
            creator,
            merchant,
            total_amount,
            collected_amount,
            share_per_user,
            participants,
            paid_count,
            status,
            metadata_pointer: metadata_pointer.unwrap_or(0),
        };
        verify_pool_snapshot(&state).map_err(|source| DecodeError::Invalid {
            field: "pool",
            source,
        })?;

        Ok(PoolView {
            state,
            metadata_pointer,
            viewer_paid,
        })
    }

    /// Pools `me` created or participates in
    pub async fn user_pools(&self, me: Address) -> ClientResult<Vec<PoolView>> {
        self.cached(CacheKey::UserPools(me), || async {
            let addresses = self.all_pools().await?;
            let lookups = addresses.iter().map(|pool| self.pool(*pool, Some(me)));
            let mut pools = Vec::new();
            for (address, result) in addresses.iter().zip(join_all(lookups).await) {
                match result {
                    Ok(view) if view.state.creator == me || view.state.is_participant(&me) => {
                        pools.push(view)
                    }
                    Ok(_) => {}
                    Err(err) => warn!(pool = %address, %err, "skipping unreadable pool"),
                }
            }
            Ok(pools)
        })
        .await
    }

    // ============ Degraded Reads ============

    pub async fn try_group(&self, group_id: GroupId) -> Option<GroupState> {
        self.group(group_id)
            .await
            .map_err(|err| warn!(group_id, %err, "group unavailable"))
            .ok()
    }

    pub async fn try_group_balances(&self, group_id: GroupId) -> Option<Vec<MemberBalance>> {
        self.group_balances(group_id)
            .await
            .map_err(|err| warn!(group_id, %err, "balances unavailable"))
            .ok()
    }

    pub async fn try_balance_summary(&self, group_id: GroupId, me: Address) -> Option<BalanceSummary> {
        self.balance_summary(group_id, me)
            .await
            .map_err(|err| warn!(group_id, %err, "balance summary unavailable"))
            .ok()
    }

    pub async fn try_pool(&self, pool: Address, viewer: Option<Address>) -> Option<PoolView> {
        self.pool(pool, viewer)
            .await
            .map_err(|err| warn!(%pool, %err, "pool unavailable"))
            .ok()
    }

    pub async fn try_expense(&self, expense_id: ExpenseId, viewer: Option<Address>) -> Option<ExpenseView> {
        self.expense(expense_id, viewer)
            .await
            .map_err(|err| warn!(expense_id, %err, "expense unavailable"))
            .ok()
    }
}
