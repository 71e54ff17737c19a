use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use splitpool_client::{
    ClientConfig, GatewayMetadataClient, JsonRpcLedger, LocalCache, PendingSubmission, Session,
    SplitPoolClient, SubmitterSettings,
};
use splitpool_common::constants::chain::DECIMALS;
use splitpool_common::{parse_address, parse_units, Address, Amount, ExpenseId, GroupId, SplitError};

#[derive(Parser)]
#[command(author, version, about = "SplitPool bill-splitting client")]
struct Cli {
    #[arg(short, long, global = true, default_value = "config/splitpool.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

/// Account that signs writes, or views reads
#[derive(Args)]
struct AccountArg {
    #[arg(short, long, value_parser = parse_address)]
    account: Address,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    GenerateConfig,
    /// Show a group's balances as seen by an account
    Balances {
        group: GroupId,
        #[command(flatten)]
        me: AccountArg,
    },
    /// Show a group and its expenses
    Group { group: GroupId },
    /// Show an expense and its approvals
    Expense {
        expense: ExpenseId,
        #[arg(long)]
        viewer: Option<Address>,
    },
    /// Show a pool
    Pool {
        pool: Address,
        #[arg(long)]
        viewer: Option<Address>,
    },
    /// Pay the account's share into a pool
    PayShare {
        pool: Address,
        #[command(flatten)]
        me: AccountArg,
    },
    /// Settle debt to a creditor (in ETH, defaults to the largest allowed)
    Settle {
        group: GroupId,
        creditor: Address,
        #[arg(long, value_parser = parse_eth)]
        amount: Option<Amount>,
        #[command(flatten)]
        me: AccountArg,
    },
    /// Approve an expense
    Approve {
        expense: ExpenseId,
        #[command(flatten)]
        me: AccountArg,
    },
    /// Create a group with the account as first member
    CreateGroup {
        #[arg(long, value_delimiter = ',', required = true)]
        members: Vec<Address>,
        #[arg(long, default_value_t = 0)]
        metadata_pointer: u64,
        #[command(flatten)]
        me: AccountArg,
    },
    /// Record an expense paid by the account (amount in ETH)
    AddExpense {
        group: GroupId,
        #[arg(value_parser = parse_eth)]
        amount: Amount,
        #[arg(long, value_delimiter = ',', required = true)]
        participants: Vec<Address>,
        #[arg(long, default_value_t = 0)]
        metadata_pointer: u64,
        #[command(flatten)]
        me: AccountArg,
    },
    /// Deploy a pool through the factory (total in ETH)
    CreatePool {
        merchant: Address,
        #[arg(value_parser = parse_eth)]
        total: Amount,
        #[arg(long, value_delimiter = ',', required = true)]
        participants: Vec<Address>,
        /// Group ledger the pool belongs to
        #[arg(long, default_value_t = Address::ZERO)]
        group: Address,
        #[arg(long, default_value_t = 0)]
        metadata_pointer: u64,
        #[command(flatten)]
        me: AccountArg,
    },
}

fn parse_eth(text: &str) -> Result<Amount, SplitError> {
    parse_units(text, DECIMALS)
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    if let Commands::GenerateConfig = cli.command {
        return generate_config(cli.config);
    }

    let config = load_config(&cli.config)?;
    let client = connect(&config).await?;

    match cli.command {
        Commands::GenerateConfig => {}
        Commands::Balances { group, me } => {
            let summary = client.view().balance_summary(group, me.account).await?;
            print_json(&summary)?;
        }
        Commands::Group { group } => {
            let state = client.view().group(group).await?;
            let expenses = client.view().group_expenses(group).await?;
            print_json(&state)?;
            print_json(&expenses)?;
        }
        Commands::Expense { expense, viewer } => {
            print_json(&client.view().expense(expense, viewer).await?)?;
        }
        Commands::Pool { pool, viewer } => {
            print_json(&client.view().pool(pool, viewer).await?)?;
        }
        Commands::PayShare { pool, me } => {
            login(&client, &me)?;
            finish(client.pay_share(pool).await?).await?;
        }
        Commands::Settle {
            group,
            creditor,
            amount,
            me,
        } => {
            login(&client, &me)?;
            finish(client.settle_debt(group, creditor, amount).await?).await?;
        }
        Commands::Approve { expense, me } => {
            login(&client, &me)?;
            finish(client.approve_expense(expense).await?).await?;
        }
        Commands::CreateGroup {
            members,
            metadata_pointer,
            me,
        } => {
            login(&client, &me)?;
            finish(client.create_group(members, metadata_pointer).await?).await?;
        }
        Commands::AddExpense {
            group,
            amount,
            participants,
            metadata_pointer,
            me,
        } => {
            login(&client, &me)?;
            finish(
                client
                    .add_expense(group, amount, participants, metadata_pointer)
                    .await?,
            )
            .await?;
        }
        Commands::CreatePool {
            merchant,
            total,
            participants,
            group,
            metadata_pointer,
            me,
        } => {
            login(&client, &me)?;
            finish(
                client
                    .create_pool(group, merchant, total, participants, metadata_pointer)
                    .await?,
            )
            .await?;
        }
    }

    Ok(())
}

fn generate_config(path: PathBuf) -> Result<()> {
    let config = ClientConfig::default();
    config.save(&path)?;
    info!(?path, "wrote default configuration");
    Ok(())
}

fn load_config(path: &Path) -> Result<ClientConfig> {
    if path.exists() {
        Ok(ClientConfig::load(path)?)
    } else {
        info!(?path, "no configuration file, using defaults");
        Ok(ClientConfig::default())
    }
}

struct Connected {
    client: SplitPoolClient,
    chain_id: u64,
}

impl std::ops::Deref for Connected {
    type Target = SplitPoolClient;

    fn deref(&self) -> &SplitPoolClient {
        &self.client
    }
}

async fn connect(config: &ClientConfig) -> Result<Connected> {
    let ledger = Arc::new(JsonRpcLedger::from_config(config)?);
    let chain_id = ledger.chain_id().await?;
    if chain_id != config.chain_id {
        return Err(anyhow!(
            "node at {} is on chain {chain_id}, configuration expects {}",
            config.rpc_url,
            config.chain_id
        ));
    }

    let cache = Arc::new(LocalCache::new(config.cache.ttls()));
    let metadata = GatewayMetadataClient::from_config(&config.metadata, Arc::clone(&cache))?;
    let client = SplitPoolClient::with_ledger(
        ledger,
        Arc::new(Session::new(config.chain_id)),
        cache,
        SubmitterSettings::from(&config.transaction),
    )
    .with_metadata(Arc::new(metadata));
    info!(rpc = %config.rpc_url, chain_id, "connected");
    Ok(Connected { client, chain_id })
}

fn login(client: &Connected, me: &AccountArg) -> Result<()> {
    client.session().connect(me.account, client.chain_id)?;
    Ok(())
}

async fn finish(pending: PendingSubmission) -> Result<()> {
    info!(tx_hash = %pending.tx_hash(), key = %pending.key(), "submitted");
    let receipt = pending.wait().await?;
    println!("{receipt}");
    if let Some(pool) = receipt.created_pool {
        println!("pool deployed at {pool}");
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
