//! In-memory ledger
//!
//! Runs the group ledger and pool escrows in process behind the same
//! reader and writer traits as the JSON-RPC ledger. Used by the tests and
//! for offline use.
//!
//! Every broadcast is mined at once into its own block. Faults can be
//! injected to exercise the degraded paths:
//! - reads of selected pool fields fail
//! - receipts stay pending until released
//! - the next broadcast reverts after a clean dry run
//! - the next broadcast is refused by the node outright

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use splitpool_common::{
    Address, Amount, EventLog, GroupId, Intent, LedgerEvent, MetadataPointer, SplitError, TxHash,
};
use splitpool_group::GroupLedger;
use splitpool_pool::{derive_pool_address, verify_payment_transition, SplitPool};
use tracing::debug;

use crate::chain::{
    AbiValue, ContractReader, ContractWriter, PoolField, ReadCall, ReceiptStatus, TxReceipt,
};
use crate::decode::DecodeError;
use crate::error::{ClientError, ClientResult};

#[derive(Clone, Debug)]
struct MinedTx {
    block_number: u64,
    status: ReceiptStatus,
    created_pool: Option<Address>,
}

#[derive(Clone, Debug, Default)]
struct LedgerState {
    groups: GroupLedger,
    pools: BTreeMap<Address, SplitPool>,
    /// Creation order
    pool_list: Vec<Address>,
    pools_by_group: BTreeMap<Address, Vec<Address>>,
    pool_nonce: u64,
    events: EventLog,
}

impl LedgerState {
    /// Applies `intent` as sent by `from`, all or nothing. Returns the
    /// deployed pool, if any.
    fn execute(
        &mut self,
        factory: &Address,
        from: Address,
        intent: &Intent,
    ) -> Result<Option<Address>, SplitError> {
        let mut next = self.clone();
        let created = next.apply(factory, from, intent)?;
        next.verify(intent)?;
        *self = next;
        Ok(created)
    }

    fn apply(
        &mut self,
        factory: &Address,
        from: Address,
        intent: &Intent,
    ) -> Result<Option<Address>, SplitError> {
        match intent {
            Intent::PayShare { pool, value } => {
                let escrow = self
                    .pools
                    .get_mut(pool)
                    .ok_or(SplitError::InvalidAddress { reason: "no pool at address" })?;
                let before = escrow.state().clone();
                escrow.pay_share(from, *value, &mut self.events)?;
                verify_payment_transition(&before, escrow.state())?;
                Ok(None)
            }
            Intent::CreatePool {
                group,
                merchant,
                total_amount,
                metadata_pointer,
                participants,
            } => {
                let address = derive_pool_address(factory, &from, self.pool_nonce);
                let escrow = SplitPool::create(
                    address,
                    from,
                    *merchant,
                    *total_amount,
                    participants.clone(),
                    *metadata_pointer,
                    &mut self.events,
                )?;
                self.pool_nonce += 1;
                self.pools.insert(address, escrow);
                self.pool_list.push(address);
                self.pools_by_group.entry(*group).or_default().push(address);
                Ok(Some(address))
            }
            Intent::CreateGroup {
                members,
                metadata_pointer,
            } => {
                self.groups
                    .create_group(from, members, *metadata_pointer, &mut self.events)?;
                Ok(None)
            }
            Intent::AddExpense {
                group_id,
                amount,
                metadata_pointer,
                participants,
            } => {
                self.groups.add_expense(
                    from,
                    *group_id,
                    *amount,
                    *metadata_pointer,
                    participants,
                    &mut self.events,
                )?;
                Ok(None)
            }
            Intent::ApproveExpense { expense_id } => {
                self.groups
                    .approve_expense(from, *expense_id, &mut self.events)?;
                Ok(None)
            }
            Intent::SettleDebt {
                group_id,
                creditor,
                amount,
            } => {
                self.groups
                    .settle_debt(from, *group_id, *creditor, *amount, &mut self.events)?;
                Ok(None)
            }
        }
    }

    /// Post-conditions of an applied intent
    fn verify(&self, intent: &Intent) -> Result<(), SplitError> {
        match intent {
            Intent::PayShare { pool, .. } => match self.pools.get(pool) {
                Some(escrow) => escrow.verify_invariants(),
                None => Err(SplitError::InvalidAddress { reason: "no pool at address" }),
            },
            Intent::CreatePool { .. } => match self.pool_list.last().and_then(|a| self.pools.get(a)) {
                Some(escrow) => escrow.verify_invariants(),
                None => Err(SplitError::InvalidStateTransition),
            },
            Intent::CreateGroup { .. } => self.groups.verify_conservation(self.groups.group_count()),
            Intent::AddExpense { group_id, .. } | Intent::SettleDebt { group_id, .. } => {
                self.groups.verify_conservation(*group_id)
            }
            Intent::ApproveExpense { expense_id } => {
                let group_id = self.groups.expense(*expense_id)?.group_id;
                self.groups.verify_conservation(group_id)
            }
        }
    }

    fn pool(&self, pool: &Address) -> ClientResult<&SplitPool> {
        // A call to an address without code returns no data
        self.pools
            .get(pool)
            .ok_or(ClientError::Decode(DecodeError::Truncated))
    }

    fn read(&self, call: &ReadCall) -> ClientResult<AbiValue> {
        let groups = &self.groups;
        let value = match call {
            ReadCall::GroupCount => AbiValue::Uint(u128::from(groups.group_count())),
            ReadCall::Group(id) => match groups.group(*id) {
                Ok(group) => AbiValue::Tuple(vec![
                    AbiValue::Address(group.creator),
                    AbiValue::Uint(u128::from(group.metadata_pointer)),
                    AbiValue::Bool(true),
                ]),
                Err(_) => AbiValue::Tuple(vec![
                    AbiValue::Address(Address::ZERO),
                    AbiValue::Uint(0),
                    AbiValue::Bool(false),
                ]),
            },
            ReadCall::GroupMembers(id) => AbiValue::Addresses(groups.members(*id).map_err(revert)?.to_vec()),
            ReadCall::GroupBalances(id) => {
                let balances = groups.group_balances(*id).map_err(revert)?;
                AbiValue::Tuple(vec![
                    AbiValue::Addresses(balances.iter().map(|b| b.account).collect()),
                    AbiValue::Ints(balances.iter().map(|b| b.balance).collect()),
                ])
            }
            ReadCall::NetBalance(id, account) => {
                AbiValue::Int(groups.net_balance(*id, account).map_err(revert)?)
            }
            ReadCall::ExpenseCount => AbiValue::Uint(u128::from(groups.expense_count())),
            ReadCall::Expense(id) => match groups.expense(*id) {
                Ok(expense) => AbiValue::Tuple(vec![
                    AbiValue::Uint(u128::from(expense.group_id)),
                    AbiValue::Address(expense.payer),
                    AbiValue::Uint(expense.amount),
                    AbiValue::Uint(u128::from(expense.metadata_pointer)),
                    AbiValue::Bool(expense.applied),
                    AbiValue::Bool(true),
                ]),
                Err(_) => AbiValue::Tuple(vec![
                    AbiValue::Uint(0),
                    AbiValue::Address(Address::ZERO),
                    AbiValue::Uint(0),
                    AbiValue::Uint(0),
                    AbiValue::Bool(false),
                    AbiValue::Bool(false),
                ]),
            },
            ReadCall::ExpenseParticipants(id) => {
                AbiValue::Addresses(groups.expense(*id).map_err(revert)?.participants.clone())
            }
            ReadCall::ExpenseApproved(id, account) => {
                AbiValue::Bool(groups.is_approved(*id, account))
            }
            ReadCall::AllPools => AbiValue::Addresses(self.pool_list.clone()),
            ReadCall::PoolsByGroup(group) => AbiValue::Addresses(
                self.pools_by_group.get(group).cloned().unwrap_or_default(),
            ),
            ReadCall::Pool { pool, field } => {
                let state = self.pool(pool)?.state();
                match field {
                    PoolField::Merchant => AbiValue::Address(state.merchant),
                    PoolField::Creator => AbiValue::Address(state.creator),
                    PoolField::TotalAmount => AbiValue::Uint(state.total_amount),
                    PoolField::CollectedAmount => AbiValue::Uint(state.collected_amount),
                    PoolField::Status => AbiValue::Uint(state.status as u128),
                    PoolField::SharePerUser => AbiValue::Uint(state.share_per_user),
                    PoolField::PaidCount => AbiValue::Uint(u128::from(state.paid_count)),
                    PoolField::MetadataPointer => {
                        AbiValue::Uint(u128::from(state.metadata_pointer))
                    }
                    PoolField::ParticipantsLength => {
                        AbiValue::Uint(u128::from(state.participant_count()))
                    }
                }
            }
            ReadCall::PoolParticipantAt { pool, index } => {
                let state = self.pool(pool)?.state();
                let participant = usize::try_from(*index)
                    .ok()
                    .and_then(|i| state.participants.get(i))
                    .ok_or_else(|| ClientError::reverted("index out of bounds"))?;
                AbiValue::Address(*participant)
            }
            ReadCall::PoolHasPaid { pool, account } => {
                AbiValue::Bool(self.pool(pool)?.has_paid(account))
            }
        };
        Ok(value)
    }
}

fn revert(err: SplitError) -> ClientError {
    ClientError::reverted(err.to_string())
}

#[derive(Debug, Default)]
struct Faults {
    failing_fields: HashSet<PoolField>,
    hold_confirmations: bool,
    revert_next_broadcast: bool,
    refuse_next_broadcast: bool,
}

/// In-process ledger implementing [`ContractReader`] and [`ContractWriter`]
pub struct MemoryLedger {
    factory: Address,
    state: Mutex<LedgerState>,
    mined: Mutex<HashMap<TxHash, MinedTx>>,
    faults: Mutex<Faults>,
    block_number: AtomicU64,
    tx_nonce: AtomicU64,
    reads: AtomicU64,
    broadcasts: AtomicU64,
}

impl MemoryLedger {
    pub fn new(factory: Address) -> Self {
        Self {
            factory,
            state: Mutex::new(LedgerState::default()),
            mined: Mutex::new(HashMap::new()),
            faults: Mutex::new(Faults::default()),
            block_number: AtomicU64::new(1),
            tx_nonce: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
        }
    }

    // ============ Seeding ============

    /// Creates a group directly, bypassing the write path
    pub fn seed_group(
        &self,
        creator: Address,
        members: &[Address],
        metadata_pointer: MetadataPointer,
    ) -> ClientResult<GroupId> {
        let mut state = self.state.lock();
        let state = &mut *state;
        Ok(state
            .groups
            .create_group(creator, members, metadata_pointer, &mut state.events)?)
    }

    /// Deploys a pool directly, bypassing the write path
    pub fn seed_pool(
        &self,
        group: Address,
        creator: Address,
        merchant: Address,
        total_amount: Amount,
        participants: Vec<Address>,
    ) -> ClientResult<Address> {
        let intent = Intent::CreatePool {
            group,
            merchant,
            total_amount,
            metadata_pointer: 0,
            participants,
        };
        let created = self.state.lock().execute(&self.factory, creator, &intent)?;
        created.ok_or_else(|| ClientError::reverted("pool not deployed"))
    }

    /// Applies an intent directly, bypassing the write path
    pub fn seed(&self, from: Address, intent: &Intent) -> ClientResult<()> {
        self.state.lock().execute(&self.factory, from, intent)?;
        Ok(())
    }

    // ============ Fault Injection ============

    pub fn fail_pool_field(&self, field: PoolField) {
        self.faults.lock().failing_fields.insert(field);
    }

    pub fn hold_confirmations(&self) {
        self.faults.lock().hold_confirmations = true;
    }

    pub fn release_confirmations(&self) {
        self.faults.lock().hold_confirmations = false;
    }

    pub fn revert_next_broadcast(&self) {
        self.faults.lock().revert_next_broadcast = true;
    }

    /// The next broadcast fails before a hash is assigned
    pub fn refuse_next_broadcast(&self) {
        self.faults.lock().refuse_next_broadcast = true;
    }

    // ============ Inspection ============

    /// Number of reads served so far
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of transactions broadcast so far
    pub fn broadcasts(&self) -> u64 {
        self.broadcasts.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.state.lock().events.events().to_vec()
    }

    pub fn group_ledger(&self) -> GroupLedger {
        self.state.lock().groups.clone()
    }

    pub fn pool(&self, address: &Address) -> Option<SplitPool> {
        self.state.lock().pools.get(address).cloned()
    }

    /// Mines `n` empty blocks
    pub fn advance_blocks(&self, n: u64) {
        self.block_number.fetch_add(n, Ordering::SeqCst);
    }

    fn next_hash(&self, from: &Address) -> TxHash {
        let nonce = self.tx_nonce.fetch_add(1, Ordering::SeqCst);
        let mut bytes = [0u8; 32];
        bytes[..20].copy_from_slice(from.as_bytes());
        bytes[24..].copy_from_slice(&nonce.to_be_bytes());
        TxHash(bytes)
    }
}

#[async_trait]
impl ContractReader for MemoryLedger {
    async fn read(&self, call: ReadCall) -> ClientResult<AbiValue> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let ReadCall::Pool { field, .. } = &call {
            if self.faults.lock().failing_fields.contains(field) {
                return Err(ClientError::rpc(-32000, format!("{} unavailable", field.getter())));
            }
        }
        self.state.lock().read(&call)
    }
}

#[async_trait]
impl ContractWriter for MemoryLedger {
    async fn simulate(&self, from: Address, intent: &Intent) -> ClientResult<()> {
        let mut scratch = self.state.lock().clone();
        scratch
            .execute(&self.factory, from, intent)
            .map(|_| ())
            .map_err(revert)
    }

    async fn broadcast(&self, from: Address, intent: &Intent) -> ClientResult<TxHash> {
        if std::mem::take(&mut self.faults.lock().refuse_next_broadcast) {
            return Err(ClientError::rpc(-32000, "transaction refused"));
        }
        self.broadcasts.fetch_add(1, Ordering::SeqCst);
        let tx_hash = self.next_hash(&from);
        let block_number = self.block_number.fetch_add(1, Ordering::SeqCst) + 1;

        let forced_revert = std::mem::take(&mut self.faults.lock().revert_next_broadcast);
        let outcome = if forced_revert {
            Err(SplitError::InvalidStateTransition)
        } else {
            self.state.lock().execute(&self.factory, from, intent)
        };

        let mined = match outcome {
            Ok(created_pool) => MinedTx {
                block_number,
                status: ReceiptStatus::Success,
                created_pool,
            },
            Err(err) => {
                debug!(%tx_hash, %err, "transaction reverted on chain");
                MinedTx {
                    block_number,
                    status: ReceiptStatus::Reverted,
                    created_pool: None,
                }
            }
        };
        self.mined.lock().insert(tx_hash, mined);
        Ok(tx_hash)
    }

    async fn receipt(&self, tx_hash: TxHash) -> ClientResult<Option<TxReceipt>> {
        if self.faults.lock().hold_confirmations {
            return Ok(None);
        }
        let head = self.block_number.load(Ordering::SeqCst);
        Ok(self.mined.lock().get(&tx_hash).map(|tx| TxReceipt {
            tx_hash,
            status: tx.status,
            block_number: tx.block_number,
            confirmations: head.saturating_sub(tx.block_number) + 1,
            created_pool: tx.created_pool,
        }))
    }
}
