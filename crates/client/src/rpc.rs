//! Ethereum JSON-RPC ledger
//!
//! Implements the chain boundary against a JSON-RPC endpoint:
//! - reads and dry runs through `eth_call`
//! - writes through `eth_sendTransaction`, signed by the node or wallet
//!   bridge for the connected account
//! - confirmation through `eth_getTransactionReceipt` and `eth_blockNumber`

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use splitpool_common::{Address, Intent, TxHash};
use tracing::{debug, warn};

use crate::abi::{self, Target};
use crate::chain::{AbiValue, ContractReader, ContractWriter, ReadCall, ReceiptStatus, TxReceipt};
use crate::config::ClientConfig;
use crate::decode::DecodeError;
use crate::error::{ClientError, ClientResult};

pub const JSONRPC_VERSION: &str = "2.0";

// ============ Wire Types ============

#[derive(Clone, Debug, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

#[derive(Clone, Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Raw revert bytes, when the node attached them
    fn revert_data(&self) -> Option<Vec<u8>> {
        let text = match &self.data {
            Some(Value::String(s)) => s.as_str(),
            Some(Value::Object(map)) => map.get("data")?.as_str()?,
            _ => return None,
        };
        decode_hex(text).ok()
    }

    fn into_client_error(self) -> ClientError {
        if let Some(data) = self.revert_data() {
            return ClientError::reverted(abi::decode_revert(&data));
        }
        if self.message.contains("revert") {
            return ClientError::reverted(self.message);
        }
        ClientError::rpc(self.code, self.message)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    block_number: Option<String>,
    #[serde(default)]
    logs: Vec<RpcLog>,
}

#[derive(Clone, Debug, Deserialize)]
struct RpcLog {
    #[serde(default)]
    topics: Vec<String>,
}

// ============ Hex Helpers ============

fn decode_hex(text: &str) -> Result<Vec<u8>, DecodeError> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    hex::decode(digits).map_err(|_| DecodeError::OutOfRange("hex data"))
}

fn parse_quantity(text: &str) -> Result<u64, DecodeError> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    u64::from_str_radix(digits, 16).map_err(|_| DecodeError::OutOfRange("quantity"))
}

fn quantity(n: u128) -> String {
    format!("0x{n:x}")
}

fn data_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Pool address from the indexed `pool` topic of a `PoolCreated` log
fn created_pool(logs: &[RpcLog]) -> Option<Address> {
    let topic = data_hex(&abi::event_topic(abi::POOL_CREATED_EVENT));
    logs.iter()
        .filter(|log| log.topics.first().map(|t| t.eq_ignore_ascii_case(&topic)) == Some(true))
        .find_map(|log| {
            let word = decode_hex(log.topics.get(1)?).ok()?;
            let mut bytes = [0u8; 20];
            bytes.copy_from_slice(word.get(12..32)?);
            Some(Address(bytes))
        })
}

// ============ Ledger ============

/// Contract reader and writer over JSON-RPC
pub struct JsonRpcLedger {
    inner: Client,
    url: Url,
    group_ledger: Address,
    pool_factory: Address,
    next_id: AtomicU64,
}

impl JsonRpcLedger {
    pub fn new(
        url: Url,
        group_ledger: Address,
        pool_factory: Address,
        timeout: Duration,
    ) -> ClientResult<Self> {
        let inner = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            inner,
            url,
            group_ledger,
            pool_factory,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        let url = Url::parse(&config.rpc_url)
            .map_err(|e| ClientError::Config(format!("invalid rpc_url: {e}")))?;
        Self::new(
            url,
            config.contracts.split_group_address()?,
            config.contracts.pool_factory_address()?,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn endpoint(&self) -> &Url {
        &self.url
    }

    fn target_address(&self, target: Target) -> Address {
        match target {
            Target::GroupLedger => self.group_ledger,
            Target::PoolFactory => self.pool_factory,
            Target::Pool(address) => address,
        }
    }

    /// Issues a raw JSON-RPC call. The inner result carries the node's own
    /// error object so callers can inspect revert data.
    async fn request(
        &self,
        method: &str,
        params: Value,
    ) -> ClientResult<Result<Value, JsonRpcError>> {
        let payload = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: method.to_owned(),
            params,
        };
        debug!(method, id = payload.id, "rpc request");

        let response = self
            .inner
            .post(self.url.clone())
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        let response: JsonRpcResponse = response.json().await?;

        match (response.result, response.error) {
            (_, Some(error)) => Ok(Err(error)),
            (Some(result), None) => Ok(Ok(result)),
            (None, None) => Ok(Ok(Value::Null)),
        }
    }

    async fn call_method(&self, method: &str, params: Value) -> ClientResult<Value> {
        self.request(method, params)
            .await?
            .map_err(JsonRpcError::into_client_error)
    }

    fn transaction(&self, from: Address, intent: &Intent) -> Value {
        let (target, data) = abi::encode_intent(intent);
        json!({
            "from": from.to_string(),
            "to": self.target_address(target).to_string(),
            "data": data_hex(&data),
            "value": quantity(intent.value()),
        })
    }

    pub async fn block_number(&self) -> ClientResult<u64> {
        let value = self.call_method("eth_blockNumber", json!([])).await?;
        let text = value.as_str().ok_or(DecodeError::UnexpectedShape {
            call: "eth_blockNumber",
            expected: "quantity",
            actual: "json",
        })?;
        Ok(parse_quantity(text)?)
    }

    pub async fn chain_id(&self) -> ClientResult<u64> {
        let value = self.call_method("eth_chainId", json!([])).await?;
        let text = value.as_str().ok_or(DecodeError::UnexpectedShape {
            call: "eth_chainId",
            expected: "quantity",
            actual: "json",
        })?;
        Ok(parse_quantity(text)?)
    }
}

#[async_trait]
impl ContractReader for JsonRpcLedger {
    async fn read(&self, call: ReadCall) -> ClientResult<AbiValue> {
        let (target, data, outputs) = abi::encode_read(&call);
        let params = json!([
            {
                "to": self.target_address(target).to_string(),
                "data": data_hex(&data),
            },
            "latest"
        ]);

        let value = self.call_method("eth_call", params).await?;
        let text = value.as_str().ok_or(DecodeError::UnexpectedShape {
            call: call.function(),
            expected: "hex data",
            actual: "json",
        })?;
        let bytes = decode_hex(text)?;
        Ok(abi::decode_output(&outputs, &bytes)?)
    }
}

#[async_trait]
impl ContractWriter for JsonRpcLedger {
    async fn simulate(&self, from: Address, intent: &Intent) -> ClientResult<()> {
        let params = json!([self.transaction(from, intent), "latest"]);
        match self.request("eth_call", params).await? {
            Ok(_) => Ok(()),
            Err(error) => {
                let err = error.into_client_error();
                warn!(kind = intent.kind().name(), %err, "dry run failed");
                Err(err)
            }
        }
    }

    async fn broadcast(&self, from: Address, intent: &Intent) -> ClientResult<TxHash> {
        let params = json!([self.transaction(from, intent)]);
        let value = self.call_method("eth_sendTransaction", params).await?;
        let text = value.as_str().ok_or(DecodeError::UnexpectedShape {
            call: "eth_sendTransaction",
            expected: "hash",
            actual: "json",
        })?;
        text.parse::<TxHash>()
            .map_err(|source| ClientError::Decode(DecodeError::Invalid {
                field: "transaction hash",
                source,
            }))
    }

    async fn receipt(&self, tx_hash: TxHash) -> ClientResult<Option<TxReceipt>> {
        let value = self
            .call_method("eth_getTransactionReceipt", json!([tx_hash.to_string()]))
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        let receipt: RpcReceipt = serde_json::from_value(value)?;
        let Some(block) = receipt.block_number.as_deref() else {
            return Ok(None);
        };
        let block_number = parse_quantity(block)?;
        let head = self.block_number().await?;

        let status = match receipt.status.as_deref().map(parse_quantity).transpose()? {
            Some(0) => ReceiptStatus::Reverted,
            _ => ReceiptStatus::Success,
        };
        let tx_hash = receipt
            .transaction_hash
            .parse::<TxHash>()
            .unwrap_or(tx_hash);

        Ok(Some(TxReceipt {
            tx_hash,
            status,
            block_number,
            confirmations: head.saturating_sub(block_number) + 1,
            created_pool: created_pool(&receipt.logs),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantities() {
        assert_eq!(parse_quantity("0x1a"), Ok(26));
        assert_eq!(parse_quantity("0x0"), Ok(0));
        assert!(parse_quantity("0xzz").is_err());
        assert_eq!(quantity(255), "0xff");
    }

    #[test]
    fn revert_data_from_error_object() {
        let mut data = abi::selector("AlreadyPaid(address)").to_vec();
        data.extend_from_slice(&abi::address_word(&Address::repeat_byte(1)));

        let error = JsonRpcError {
            code: 3,
            message: "execution reverted".into(),
            data: Some(Value::String(data_hex(&data))),
        };
        match error.into_client_error() {
            ClientError::Reverted { reason } => assert!(reason.starts_with("AlreadyPaid(")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn nested_revert_data() {
        let error = JsonRpcError {
            code: -32000,
            message: "boom".into(),
            data: Some(json!({ "data": data_hex(&abi::selector("PoolCancelled()")) })),
        };
        assert!(matches!(
            error.into_client_error(),
            ClientError::Reverted { reason } if reason == "PoolCancelled()"
        ));
    }

    #[test]
    fn plain_rpc_error() {
        let error = JsonRpcError {
            code: -32601,
            message: "method not found".into(),
            data: None,
        };
        assert!(matches!(
            error.into_client_error(),
            ClientError::Rpc { code: -32601, .. }
        ));
    }

    #[test]
    fn pool_address_from_logs() {
        let pool = Address::repeat_byte(0x42);
        let logs = vec![
            RpcLog {
                topics: vec![data_hex(&[0u8; 32])],
            },
            RpcLog {
                topics: vec![
                    data_hex(&abi::event_topic(abi::POOL_CREATED_EVENT)),
                    data_hex(&abi::address_word(&pool)),
                ],
            },
        ];
        assert_eq!(created_pool(&logs), Some(pool));
        assert_eq!(created_pool(&logs[..1]), None);
    }

    #[test]
    fn response_with_error() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"error":{"code":3,"message":"execution reverted","data":"0x"}}"#;
        let response: JsonRpcResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.error.map(|e| e.code), Some(3));
    }
}
