//! Off-chain metadata
//!
//! Names, descriptions and receipts live off chain as JSON documents under a
//! content address. The on-chain records only carry a pointer.
//!
//! ## Key Features
//!
//! - **Gateway fallback**: sources are tried in order, the first success wins
//! - **Cached**: a fetched document is kept for the metadata TTL
//! - **Typed views**: group, pool and expense documents deserialize into
//!   their own structs

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use splitpool_common::Address;
use tracing::{debug, warn};

use crate::cache::{CacheKey, LocalCache};
use crate::config::MetadataConfig;
use crate::error::{ClientError, ClientResult};

// ============ Documents ============

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberLabel {
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Milliseconds since the Unix epoch
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<MemberLabel>,
}

impl GroupMetadata {
    /// Display name for `account`, if the document labels it
    pub fn label_of(&self, account: &Address) -> Option<&str> {
        self.members
            .iter()
            .find(|m| m.address == *account)
            .and_then(|m| m.name.as_deref())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMetadata {
    pub merchant_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseMetadata {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_image: Option<String>,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

// ============ Content Addresses ============

const BASE58: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// CIDv0 (`Qm` + 44 base58) or CIDv1 (`bafy`/`bafk` + 52 base32)
pub fn is_valid_cid(cid: &str) -> bool {
    if let Some(rest) = cid.strip_prefix("Qm") {
        return rest.len() == 44 && rest.chars().all(|c| BASE58.contains(c));
    }
    if let Some(rest) = cid.strip_prefix("bafy").or_else(|| cid.strip_prefix("bafk")) {
        return rest.len() == 52
            && rest
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    }
    false
}

/// Turns `ipfs://<cid>` or a bare CID into a gateway URL. HTTP URLs pass
/// through unchanged.
pub fn resolve_ipfs_url(uri: &str, gateway: &str) -> String {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return uri.to_string();
    }
    let cid = uri.strip_prefix("ipfs://").unwrap_or(uri);
    format!("{}/{}", gateway.trim_end_matches('/'), cid)
}

/// Hex SHA-256 of the canonical JSON bytes
pub fn content_address(document: &Value) -> ClientResult<String> {
    let bytes = serde_json::to_vec(document)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

// ============ Traits ============

#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch(&self, cid: &str) -> ClientResult<Value>;
}

#[async_trait]
pub trait MetadataUploader: Send + Sync {
    /// Stores the document and returns its content address
    async fn upload(&self, document: &Value) -> ClientResult<String>;
}

async fn fetch_typed<T: DeserializeOwned>(
    fetcher: &(dyn MetadataFetcher + '_),
    cid: &str,
) -> ClientResult<T> {
    let value = fetcher.fetch(cid).await?;
    Ok(serde_json::from_value(value)?)
}

pub async fn fetch_group_metadata(
    fetcher: &(dyn MetadataFetcher + '_),
    cid: &str,
) -> ClientResult<GroupMetadata> {
    fetch_typed(fetcher, cid).await
}

pub async fn fetch_pool_metadata(
    fetcher: &(dyn MetadataFetcher + '_),
    cid: &str,
) -> ClientResult<PoolMetadata> {
    fetch_typed(fetcher, cid).await
}

pub async fn fetch_expense_metadata(
    fetcher: &(dyn MetadataFetcher + '_),
    cid: &str,
) -> ClientResult<ExpenseMetadata> {
    fetch_typed(fetcher, cid).await
}

// ============ HTTP Gateway ============

/// One public IPFS gateway
pub struct HttpGateway {
    base: String,
    http: Client,
}

impl HttpGateway {
    pub fn new(base: impl Into<String>, timeout: Duration) -> ClientResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base: base.into(),
            http,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }
}

#[async_trait]
impl MetadataFetcher for HttpGateway {
    async fn fetch(&self, cid: &str) -> ClientResult<Value> {
        if !is_valid_cid(cid) {
            return Err(ClientError::MetadataUnavailable {
                cid: cid.to_string(),
            });
        }
        let url = resolve_ipfs_url(cid, &self.base);
        let response = self.http.get(&url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}

// ============ Fallback Client ============

/// Tries each source in order and caches the first document found
pub struct GatewayMetadataClient {
    sources: Vec<Arc<dyn MetadataFetcher>>,
    cache: Arc<LocalCache>,
}

impl GatewayMetadataClient {
    pub fn with_sources(sources: Vec<Arc<dyn MetadataFetcher>>, cache: Arc<LocalCache>) -> Self {
        Self { sources, cache }
    }

    pub fn from_config(config: &MetadataConfig, cache: Arc<LocalCache>) -> ClientResult<Self> {
        let timeout = Duration::from_secs(config.fetch_timeout_secs);
        let sources = config
            .gateways
            .iter()
            .map(|base| {
                HttpGateway::new(base.clone(), timeout)
                    .map(|g| Arc::new(g) as Arc<dyn MetadataFetcher>)
            })
            .collect::<ClientResult<Vec<_>>>()?;
        Ok(Self::with_sources(sources, cache))
    }
}

#[async_trait]
impl MetadataFetcher for GatewayMetadataClient {
    async fn fetch(&self, cid: &str) -> ClientResult<Value> {
        let key = CacheKey::Metadata(cid.to_string());
        if let Some(document) = self.cache.get::<Value>(&key) {
            return Ok(document);
        }

        for (index, source) in self.sources.iter().enumerate() {
            match source.fetch(cid).await {
                Ok(document) => {
                    debug!(cid, gateway = index, "metadata fetched");
                    self.cache.put(key, document.clone());
                    return Ok(document);
                }
                Err(err) => warn!(cid, gateway = index, %err, "gateway failed, trying next"),
            }
        }

        Err(ClientError::MetadataUnavailable {
            cid: cid.to_string(),
        })
    }
}

// ============ Memory Store ============

/// Content-addressed document store held in memory
#[derive(Default)]
pub struct MemoryMetadataStore {
    documents: RwLock<HashMap<String, Value>>,
    fetches: AtomicU64,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `document` under an explicit address
    pub fn insert(&self, cid: impl Into<String>, document: Value) {
        self.documents.write().insert(cid.into(), document);
    }

    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataFetcher for MemoryMetadataStore {
    async fn fetch(&self, cid: &str) -> ClientResult<Value> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.documents
            .read()
            .get(cid)
            .cloned()
            .ok_or_else(|| ClientError::MetadataUnavailable {
                cid: cid.to_string(),
            })
    }
}

#[async_trait]
impl MetadataUploader for MemoryMetadataStore {
    async fn upload(&self, document: &Value) -> ClientResult<String> {
        let cid = content_address(document)?;
        self.documents.write().insert(cid.clone(), document.clone());
        Ok(cid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CID_V0: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";

    #[test]
    fn cid_formats() {
        assert!(is_valid_cid(CID_V0));
        assert!(is_valid_cid(&format!("bafy{}", "a".repeat(52))));
        assert!(is_valid_cid(&format!("bafk{}", "2".repeat(52))));

        assert!(!is_valid_cid("Qm123"));
        // 0, O, I and l are not base58
        assert!(!is_valid_cid(&format!("Qm{}", "0".repeat(44))));
        assert!(!is_valid_cid(&format!("bafy{}", "A".repeat(52))));
        assert!(!is_valid_cid(""));
    }

    #[test]
    fn ipfs_urls() {
        assert_eq!(
            resolve_ipfs_url(&format!("ipfs://{CID_V0}"), "https://ipfs.io/ipfs/"),
            format!("https://ipfs.io/ipfs/{CID_V0}")
        );
        assert_eq!(
            resolve_ipfs_url("https://example.com/a.json", "https://ipfs.io/ipfs"),
            "https://example.com/a.json"
        );
    }

    #[test]
    fn group_document_shape() {
        let doc = json!({
            "name": "Trip",
            "createdAt": 1_700_000_000_000u64,
            "members": [{ "address": format!("{}", Address::repeat_byte(1)), "name": "Ana" }]
        });
        let meta: GroupMetadata = serde_json::from_value(doc).unwrap();

        assert_eq!(meta.name, "Trip");
        assert_eq!(meta.description, None);
        assert_eq!(meta.label_of(&Address::repeat_byte(1)), Some("Ana"));
        assert_eq!(meta.label_of(&Address::repeat_byte(2)), None);
    }

    #[tokio::test]
    async fn upload_is_content_addressed() {
        let store = MemoryMetadataStore::new();
        let doc = json!({ "title": "Dinner", "createdAt": 1 });

        let first = store.upload(&doc).await.unwrap();
        let second = store.upload(&doc).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);

        let meta = fetch_expense_metadata(&store, &first).await.unwrap();
        assert_eq!(meta.title, "Dinner");
    }

    #[tokio::test]
    async fn falls_back_and_caches() {
        let empty = Arc::new(MemoryMetadataStore::new());
        let full = Arc::new(MemoryMetadataStore::new());
        full.insert("cid-1", json!({ "merchantName": "Cafe", "createdAt": 5 }));

        let client = GatewayMetadataClient::with_sources(
            vec![
                empty.clone() as Arc<dyn MetadataFetcher>,
                full.clone() as Arc<dyn MetadataFetcher>,
            ],
            Arc::new(LocalCache::default()),
        );

        let meta = fetch_pool_metadata(&client, "cid-1").await.unwrap();
        assert_eq!(meta.merchant_name, "Cafe");
        assert_eq!(empty.fetches(), 1);
        assert_eq!(full.fetches(), 1);

        // Served from cache
        fetch_pool_metadata(&client, "cid-1").await.unwrap();
        assert_eq!(full.fetches(), 1);
    }

    #[tokio::test]
    async fn every_source_failing_is_unavailable() {
        let client = GatewayMetadataClient::with_sources(
            vec![Arc::new(MemoryMetadataStore::new()) as Arc<dyn MetadataFetcher>],
            Arc::new(LocalCache::default()),
        );
        assert!(matches!(
            client.fetch("missing").await,
            Err(ClientError::MetadataUnavailable { .. })
        ));
    }
}
