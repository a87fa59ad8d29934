use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy_primitives::U256;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::RpcError;
use crate::types::FinalRecord;

/// Ethereum JSON-RPC client.
///
/// Cloning shares the underlying connection pool; construct a fresh client
/// when a caller needs its own connections (immediate-finality testers).
#[derive(Debug, Clone)]
pub struct EthRpcClient {
    url: String,
    client: reqwest::Client,
    request_id: Arc<AtomicU64>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
    #[allow(dead_code)]
    id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Block data returned from eth_getBlockByNumber (headers only).
#[derive(Debug, Clone, Deserialize)]
pub struct EthBlock {
    pub number: String,
    pub timestamp: String,
}

impl EthRpcClient {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            request_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": self.next_id(),
        });

        let resp = self.client.post(&self.url).json(&body).send().await?;
        let text = resp.text().await?;
        let parsed: JsonRpcResponse<T> =
            serde_json::from_str(&text).map_err(|e| RpcError::Malformed {
                method: method.to_string(),
                detail: format!("{}: {}", e, truncate_body(&text)),
            })?;

        if let Some(err) = parsed.error {
            return Err(RpcError::Endpoint {
                code: err.code,
                message: err.message,
            });
        }

        parsed.result.ok_or_else(|| RpcError::Malformed {
            method: method.to_string(),
            detail: "no result in response".to_string(),
        })
    }

    /// Get the latest block number
    pub async fn block_number(&self) -> Result<u64, RpcError> {
        let hex: String = self.call("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&hex)
    }

    /// Get block header by number.
    pub async fn get_block_by_number(&self, height: u64) -> Result<Option<EthBlock>, RpcError> {
        let hex_height = format!("0x{:x}", height);
        self.call("eth_getBlockByNumber", json!([hex_height, false]))
            .await
    }

    /// Get chain ID
    pub async fn chain_id(&self) -> Result<u64, RpcError> {
        let hex: String = self.call("eth_chainId", json!([])).await?;
        parse_hex_u64(&hex)
    }

    /// Get current gas price in wei
    pub async fn gas_price(&self) -> Result<u64, RpcError> {
        let hex: String = self.call("eth_gasPrice", json!([])).await?;
        parse_hex_u64(&hex)
    }

    /// Get pending transaction count (nonce) for an address
    pub async fn get_transaction_count(&self, address: &str) -> Result<u64, RpcError> {
        let hex: String = self
            .call("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        parse_hex_u64(&hex)
    }

    /// Send a raw signed transaction, returning its hash.
    pub async fn send_raw_transaction(&self, raw_tx: &str) -> Result<String, RpcError> {
        self.call("eth_sendRawTransaction", json!([raw_tx])).await
    }

    /// Send a raw signed transaction and wait for its receipt in one round
    /// trip. Only supported by fast-finality endpoints.
    pub async fn send_raw_transaction_sync(&self, raw_tx: &str) -> Result<FinalRecord, RpcError> {
        let receipt: Value = self
            .call("eth_sendRawTransactionSync", json!([raw_tx]))
            .await?;
        parse_receipt(&receipt)
    }

    /// Get transaction receipt, or None while the transaction is pending.
    pub async fn get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<FinalRecord>, RpcError> {
        let result: Option<Value> = self
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        result.as_ref().map(parse_receipt).transpose()
    }

    /// Get account balance in wei
    pub async fn get_balance(&self, address: &str) -> Result<U256, RpcError> {
        let hex: String = self
            .call("eth_getBalance", json!([address, "latest"]))
            .await?;
        parse_hex_u256(&hex)
    }
}

/// Extract the fields the engine cares about from a receipt object.
fn parse_receipt(receipt: &Value) -> Result<FinalRecord, RpcError> {
    let field = |name: &str| -> Result<&str, RpcError> {
        receipt
            .get(name)
            .and_then(|v| v.as_str())
            .ok_or_else(|| RpcError::Malformed {
                method: "eth_getTransactionReceipt".to_string(),
                detail: format!("missing field {}", name),
            })
    };

    let tx_hash = field("transactionHash")?.to_string();
    let block_number = parse_hex_u64(field("blockNumber")?)?;
    let gas_used = parse_hex_u64(field("gasUsed")?)?;
    let success = receipt
        .get("status")
        .and_then(|s| s.as_str())
        .map(|s| s == "0x1")
        .unwrap_or(true);

    Ok(FinalRecord {
        tx_hash,
        block_number,
        gas_used,
        success,
    })
}

/// First 200 characters of a response body for error context. Char-based
/// so a multi-byte body cannot split a boundary.
fn truncate_body(text: &str) -> String {
    text.chars().take(200).collect()
}

/// Parse a hex string (with or without 0x prefix) to u64
pub fn parse_hex_u64(hex: &str) -> Result<u64, RpcError> {
    let stripped = hex.strip_prefix("0x").unwrap_or(hex);
    u64::from_str_radix(stripped, 16).map_err(|e| RpcError::Malformed {
        method: "hex".to_string(),
        detail: format!("{}: {}", e, hex),
    })
}

/// Parse a hex string to U256
pub fn parse_hex_u256(hex: &str) -> Result<U256, RpcError> {
    let stripped = hex.strip_prefix("0x").unwrap_or(hex);
    U256::from_str_radix(stripped, 16).map_err(|e| RpcError::Malformed {
        method: "hex".to_string(),
        detail: format!("{}: {}", e, hex),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_with_and_without_prefix() {
        assert_eq!(parse_hex_u64("0x10").unwrap(), 16);
        assert_eq!(parse_hex_u64("ff").unwrap(), 255);
        assert!(parse_hex_u64("0xzz").is_err());
    }

    #[test]
    fn body_truncation_respects_char_boundaries() {
        let body = format!("{}\u{20ac}tail", "a".repeat(199));
        // Byte index 200 falls inside the euro sign; slicing there would
        // panic.
        let short = truncate_body(&body);
        assert_eq!(short.chars().count(), 200);
        assert!(short.ends_with('\u{20ac}'));
        assert_eq!(truncate_body("short"), "short");
    }

    #[test]
    fn parses_receipt_fields() {
        let receipt = json!({
            "transactionHash": "0xabc",
            "blockNumber": "0x2a",
            "gasUsed": "0x5208",
            "status": "0x1",
        });
        let rec = parse_receipt(&receipt).unwrap();
        assert_eq!(rec.tx_hash, "0xabc");
        assert_eq!(rec.block_number, 42);
        assert_eq!(rec.gas_used, 21000);
        assert!(rec.success);
    }

    #[test]
    fn reverted_receipt_has_success_false() {
        let receipt = json!({
            "transactionHash": "0xdef",
            "blockNumber": "0x1",
            "gasUsed": "0x5208",
            "status": "0x0",
        });
        assert!(!parse_receipt(&receipt).unwrap().success);
    }
}
