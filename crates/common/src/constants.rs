//! Client Constants
//!
//! Network parameters, freshness windows and input limits shared by the
//! accounting crates and the client.

/// Network the default deployment lives on
pub mod chain {
    /// Base Sepolia chain id
    pub const CHAIN_ID: u64 = 84_532;
    /// Human readable network name
    pub const CHAIN_NAME: &str = "Base Sepolia";
    /// Native currency symbol
    pub const CURRENCY: &str = "ETH";
    /// Decimal places of the native currency
    pub const DECIMALS: u32 = 18;
    /// One unit of native currency in wei
    pub const ONE: u128 = 1_000_000_000_000_000_000;
    /// Default public RPC endpoint
    pub const DEFAULT_RPC_URL: &str = "https://sepolia.base.org";
    /// Block explorer base URL
    pub const BLOCK_EXPLORER: &str = "https://sepolia.basescan.org";
}

/// Deployed contract addresses for the default network
pub mod contracts {
    /// Group ledger contract
    pub const SPLIT_GROUP: &str = "0xa465899391d17473A49B8db1e95b8f31697687c1";
    /// Pool factory contract
    pub const SPLIT_POOL_FACTORY: &str = "0xb7247D69B42697B5BEF102213F0bd86bA55db699";
}

/// Freshness windows for cached chain state (seconds)
pub mod cache {
    /// Group membership and group metadata
    pub const GROUP_TTL_SECS: u64 = 5 * 60;
    /// Group balances and expense state
    pub const BALANCES_TTL_SECS: u64 = 3 * 60;
    /// Pool state
    pub const POOL_TTL_SECS: u64 = 3 * 60;
    /// Off-chain metadata blobs (content addressed)
    pub const METADATA_TTL_SECS: u64 = 10 * 60;
}

/// Input limits enforced before submission
pub mod limits {
    /// Maximum participants in a pool
    pub const MAX_POOL_PARTICIPANTS: usize = 50;
    /// Minimum participants in a pool
    pub const MIN_POOL_PARTICIPANTS: usize = 1;
    /// Maximum members in a group
    pub const MAX_GROUP_MEMBERS: usize = 100;
    /// Minimum members in a group
    pub const MIN_GROUP_MEMBERS: usize = 2;
    /// Number of transactions kept in the local history
    pub const MAX_TRANSACTION_HISTORY: usize = 50;
}

/// Transaction submission parameters
pub mod transaction {
    /// Confirmations required before a write counts as confirmed
    pub const CONFIRMATIONS_REQUIRED: u64 = 1;
    /// How long to wait for a receipt before reporting a timeout
    pub const CONFIRMATION_TIMEOUT_SECS: u64 = 60;
    /// Interval between receipt polls
    pub const RECEIPT_POLL_INTERVAL_MS: u64 = 1_000;
    /// Timeout for a single RPC request
    pub const REQUEST_TIMEOUT_SECS: u64 = 15;
}

/// Off-chain metadata retrieval
pub mod metadata {
    /// Public IPFS gateways, tried in order
    pub const IPFS_GATEWAYS: [&str; 4] = [
        "https://w3s.link/ipfs",
        "https://ipfs.io/ipfs",
        "https://cloudflare-ipfs.com/ipfs",
        "https://gateway.pinata.cloud/ipfs",
    ];
    /// Per-gateway fetch timeout
    pub const FETCH_TIMEOUT_SECS: u64 = 10;
}

/// Precision helpers
pub mod precision {
    /// Basis points denominator (100% = 10_000)
    pub const BPS_DENOMINATOR: u64 = 10_000;
}
