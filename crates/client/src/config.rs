use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use splitpool_common::{constants, Address};

use crate::cache::CacheTtls;
use crate::error::{ClientError, ClientResult};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub contracts: ContractAddresses,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub transaction: TransactionConfig,
}

fn default_request_timeout_secs() -> u64 {
    constants::transaction::REQUEST_TIMEOUT_SECS
}

impl ClientConfig {
    pub fn load(path: &Path) -> ClientResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|err| ClientError::Config(format!("unable to parse config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> ClientResult<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        let encoded = toml::to_string_pretty(self)
            .map_err(|err| ClientError::Config(format!("unable to encode config: {err}")))?;
        fs::write(path, encoded)?;
        Ok(())
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.rpc_url.trim().is_empty() {
            return Err(ClientError::Config("rpc_url is empty".into()));
        }
        if self.chain_id == 0 {
            return Err(ClientError::Config("chain_id must be non-zero".into()));
        }
        self.contracts.split_group_address()?;
        self.contracts.pool_factory_address()?;
        if self.metadata.gateways.is_empty() {
            return Err(ClientError::Config("at least one metadata gateway is required".into()));
        }
        if self.transaction.confirmations == 0 {
            return Err(ClientError::Config("confirmations must be at least 1".into()));
        }
        if self.transaction.poll_interval_ms == 0 {
            return Err(ClientError::Config("poll_interval_ms must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: constants::chain::DEFAULT_RPC_URL.to_string(),
            chain_id: constants::chain::CHAIN_ID,
            request_timeout_secs: default_request_timeout_secs(),
            contracts: ContractAddresses::default(),
            cache: CacheConfig::default(),
            metadata: MetadataConfig::default(),
            transaction: TransactionConfig::default(),
        }
    }
}

// ============ Sections ============

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractAddresses {
    pub split_group: String,
    pub pool_factory: String,
}

fn parse_contract(name: &str, text: &str) -> ClientResult<Address> {
    let address: Address = text
        .parse()
        .map_err(|err| ClientError::Config(format!("{name}: {err}")))?;
    if address.is_zero() {
        return Err(ClientError::Config(format!("{name}: zero address")));
    }
    Ok(address)
}

impl ContractAddresses {
    pub fn split_group_address(&self) -> ClientResult<Address> {
        parse_contract("split_group", &self.split_group)
    }

    pub fn pool_factory_address(&self) -> ClientResult<Address> {
        parse_contract("pool_factory", &self.pool_factory)
    }
}

impl Default for ContractAddresses {
    fn default() -> Self {
        Self {
            split_group: constants::contracts::SPLIT_GROUP.to_string(),
            pool_factory: constants::contracts::SPLIT_POOL_FACTORY.to_string(),
        }
    }
}

/// Cache TTLs in seconds
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    #[serde(default = "default_group_ttl")]
    pub group_ttl_secs: u64,
    #[serde(default = "default_balances_ttl")]
    pub balances_ttl_secs: u64,
    #[serde(default = "default_pool_ttl")]
    pub pool_ttl_secs: u64,
    #[serde(default = "default_metadata_ttl")]
    pub metadata_ttl_secs: u64,
}

fn default_group_ttl() -> u64 {
    constants::cache::GROUP_TTL_SECS
}

fn default_balances_ttl() -> u64 {
    constants::cache::BALANCES_TTL_SECS
}

fn default_pool_ttl() -> u64 {
    constants::cache::POOL_TTL_SECS
}

fn default_metadata_ttl() -> u64 {
    constants::cache::METADATA_TTL_SECS
}

impl CacheConfig {
    pub fn ttls(&self) -> CacheTtls {
        CacheTtls {
            group: Duration::from_secs(self.group_ttl_secs),
            balances: Duration::from_secs(self.balances_ttl_secs),
            pool: Duration::from_secs(self.pool_ttl_secs),
            metadata: Duration::from_secs(self.metadata_ttl_secs),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            group_ttl_secs: default_group_ttl(),
            balances_ttl_secs: default_balances_ttl(),
            pool_ttl_secs: default_pool_ttl(),
            metadata_ttl_secs: default_metadata_ttl(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetadataConfig {
    /// Tried in order
    pub gateways: Vec<String>,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

fn default_fetch_timeout() -> u64 {
    constants::metadata::FETCH_TIMEOUT_SECS
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            gateways: constants::metadata::IPFS_GATEWAYS
                .iter()
                .map(|g| g.to_string())
                .collect(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionConfig {
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_confirmations() -> u64 {
    constants::transaction::CONFIRMATIONS_REQUIRED
}

fn default_confirmation_timeout() -> u64 {
    constants::transaction::CONFIRMATION_TIMEOUT_SECS
}

fn default_poll_interval() -> u64 {
    constants::transaction::RECEIPT_POLL_INTERVAL_MS
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            confirmations: default_confirmations(),
            confirmation_timeout_secs: default_confirmation_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chain_id, 84_532);
        assert_eq!(config.cache.ttls(), CacheTtls::default());
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("splitpool.toml");

        let mut config = ClientConfig::default();
        config.cache.pool_ttl_secs = 30;
        config.save(&path).unwrap();

        let loaded = ClientConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_sections_take_defaults() {
        let config: ClientConfig =
            toml::from_str("rpc_url = \"http://localhost:8545\"\nchain_id = 31337\n").unwrap();

        assert_eq!(config.transaction, TransactionConfig::default());
        assert_eq!(config.metadata.gateways.len(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_contract_address_is_rejected() {
        let mut config = ClientConfig::default();
        config.contracts.pool_factory = "0x1234".into();
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));

        config.contracts.pool_factory = format!("{}", Address::ZERO);
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));
    }

    #[test]
    fn contracts_section_names_only_the_called_contracts() {
        let encoded = toml::to_string_pretty(&ClientConfig::default()).unwrap();
        assert!(encoded.contains("split_group"));
        assert!(encoded.contains("pool_factory"));
        assert!(!encoded.contains("storage_pointer"));
    }

    #[test]
    fn zero_confirmations_rejected() {
        let mut config = ClientConfig::default();
        config.transaction.confirmations = 0;
        assert!(config.validate().is_err());
    }
}
