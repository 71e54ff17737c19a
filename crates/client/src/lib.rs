//! SplitPool Client
//!
//! Read, compose and write pipeline for the SplitPool bill-splitting
//! contracts: pooled escrows that collect an exact share from every
//! participant, and group ledgers that track who owes whom.
//!
//! ## Layers
//!
//! - **Chain boundary** ([`chain`]): reader and writer traits, implemented
//!   over JSON-RPC ([`rpc`]) and in process ([`memory`])
//! - **Reads** ([`reader`]): typed, cached snapshots built by [`decode`]
//! - **Writes** ([`submitter`]): validate, simulate, broadcast, confirm,
//!   then invalidate the [`cache`]
//! - **Facade** ([`SplitPoolClient`]): builds each intent's validation
//!   context from fresh snapshots and submits it
//!
//! The client never holds authoritative state. Everything it keeps is a
//! snapshot with a TTL that a confirmed write invalidates.

pub mod abi;
pub mod cache;
pub mod chain;
pub mod config;
pub mod decode;
pub mod error;
pub mod history;
pub mod memory;
pub mod metadata;
pub mod reader;
pub mod rpc;
pub mod session;
pub mod submitter;

use std::sync::Arc;

use splitpool_common::{
    Address, Amount, ExpenseId, GroupId, Intent, IntentContext, MetadataPointer, SplitError,
};
use splitpool_group::max_settlement;
use tracing::info;

pub use cache::{CacheKey, CacheTtls, Clock, Invalidation, LocalCache, ManualClock, SystemClock};
pub use chain::{AbiValue, ContractReader, ContractWriter, PoolField, ReadCall, TxReceipt};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult, ErrorKind};
pub use history::{TransactionHistory, TxRecord, TxStatus};
pub use memory::MemoryLedger;
pub use metadata::{GatewayMetadataClient, MemoryMetadataStore, MetadataFetcher};
pub use reader::{ExpenseView, LedgerView, PoolView};
pub use rpc::JsonRpcLedger;
pub use session::Session;
pub use submitter::{PendingSubmission, Stage, SubmitterSettings, TransactionSubmitter};

/// Reads, compose helpers and submission behind one handle
#[derive(Clone)]
pub struct SplitPoolClient {
    view: LedgerView,
    submitter: TransactionSubmitter,
    session: Arc<Session>,
    metadata: Option<Arc<dyn MetadataFetcher>>,
}

impl SplitPoolClient {
    /// Client over any ledger that can both read and write
    pub fn with_ledger<L>(
        ledger: Arc<L>,
        session: Arc<Session>,
        cache: Arc<LocalCache>,
        settings: SubmitterSettings,
    ) -> Self
    where
        L: ContractReader + ContractWriter + 'static,
    {
        let reader: Arc<dyn ContractReader> = ledger.clone();
        let writer: Arc<dyn ContractWriter> = ledger;
        Self {
            view: LedgerView::new(reader, Arc::clone(&cache)),
            submitter: TransactionSubmitter::new(
                writer,
                Arc::clone(&session),
                cache,
                Arc::new(TransactionHistory::new()),
                settings,
            ),
            session,
            metadata: None,
        }
    }

    /// JSON-RPC client with gateway metadata, as configured
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        let ledger = Arc::new(JsonRpcLedger::from_config(config)?);
        let cache = Arc::new(LocalCache::new(config.cache.ttls()));
        let metadata = GatewayMetadataClient::from_config(&config.metadata, Arc::clone(&cache))?;
        let client = Self::with_ledger(
            ledger,
            Arc::new(Session::new(config.chain_id)),
            cache,
            SubmitterSettings::from(&config.transaction),
        )
        .with_metadata(Arc::new(metadata));
        info!(rpc = %config.rpc_url, chain_id = config.chain_id, "client ready");
        Ok(client)
    }

    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataFetcher>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn view(&self) -> &LedgerView {
        &self.view
    }

    pub fn submitter(&self) -> &TransactionSubmitter {
        &self.submitter
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn metadata(&self) -> Option<&Arc<dyn MetadataFetcher>> {
        self.metadata.as_ref()
    }

    pub fn history(&self) -> &Arc<TransactionHistory> {
        self.submitter.history()
    }

    // ============ Compose ============

    /// Pays the connected account's exact share into `pool`
    pub async fn pay_share(&self, pool: Address) -> ClientResult<PendingSubmission> {
        let me = self.session.require_account()?;
        let snapshot = self.view.pool(pool, Some(me)).await?;
        let intent = Intent::PayShare {
            pool,
            value: snapshot.state.share_per_user,
        };
        let ctx = IntentContext::for_sender(me).with_pool(snapshot.state, snapshot.viewer_paid);
        self.submitter.submit(intent, ctx).await
    }

    /// Settles debt to `creditor`
    ///
    /// Without an amount the largest settlement the balances allow is used.
    pub async fn settle_debt(
        &self,
        group_id: GroupId,
        creditor: Address,
        amount: Option<Amount>,
    ) -> ClientResult<PendingSubmission> {
        let me = self.session.require_account()?;
        let (amount, summary) = match amount {
            Some(amount) => (amount, self.view.try_balance_summary(group_id, me).await),
            None => {
                let summary = self.view.balance_summary(group_id, me).await?;
                let amount = max_settlement(&summary, &creditor).ok_or(
                    SplitError::NothingToSettle {
                        balance: summary.own_balance.unwrap_or(0),
                    },
                )?;
                (amount, Some(summary))
            }
        };

        let mut ctx = IntentContext::for_sender(me);
        if let Some(summary) = &summary {
            let creditor_balance = summary
                .rows
                .iter()
                .find(|row| row.account == creditor)
                .map(|row| row.balance);
            ctx = ctx.with_balances(summary.own_balance, creditor_balance);
        }
        if let Some(group) = self.view.try_group(group_id).await {
            ctx = ctx.with_group_members(group.members);
        }

        let intent = Intent::SettleDebt {
            group_id,
            creditor,
            amount,
        };
        self.submitter.submit(intent, ctx).await
    }

    pub async fn approve_expense(&self, expense_id: ExpenseId) -> ClientResult<PendingSubmission> {
        let me = self.session.require_account()?;
        let mut ctx = IntentContext::for_sender(me);
        if let Some(view) = self.view.try_expense(expense_id, Some(me)).await {
            ctx = ctx.with_expense(view.expense);
        }
        self.submitter
            .submit(Intent::ApproveExpense { expense_id }, ctx)
            .await
    }

    /// Creates a group. The connected account is put first when missing.
    pub async fn create_group(
        &self,
        members: Vec<Address>,
        metadata_pointer: MetadataPointer,
    ) -> ClientResult<PendingSubmission> {
        let me = self.session.require_account()?;
        let mut ordered = Vec::with_capacity(members.len() + 1);
        ordered.push(me);
        ordered.extend(members.into_iter().filter(|m| *m != me));

        let intent = Intent::CreateGroup {
            members: ordered,
            metadata_pointer,
        };
        self.submitter
            .submit(intent, IntentContext::for_sender(me))
            .await
    }

    pub async fn add_expense(
        &self,
        group_id: GroupId,
        amount: Amount,
        participants: Vec<Address>,
        metadata_pointer: MetadataPointer,
    ) -> ClientResult<PendingSubmission> {
        let me = self.session.require_account()?;
        let mut ctx = IntentContext::for_sender(me);
        if let Some(group) = self.view.try_group(group_id).await {
            ctx = ctx.with_group_members(group.members);
        }
        let intent = Intent::AddExpense {
            group_id,
            amount,
            metadata_pointer,
            participants,
        };
        self.submitter.submit(intent, ctx).await
    }

    pub async fn create_pool(
        &self,
        group: Address,
        merchant: Address,
        total_amount: Amount,
        participants: Vec<Address>,
        metadata_pointer: MetadataPointer,
    ) -> ClientResult<PendingSubmission> {
        let me = self.session.require_account()?;
        let intent = Intent::CreatePool {
            group,
            merchant,
            total_amount,
            metadata_pointer,
            participants,
        };
        self.submitter
            .submit(intent, IntentContext::for_sender(me))
            .await
    }
}
