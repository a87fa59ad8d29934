use alloy_primitives::U256;
use async_trait::async_trait;

use crate::error::RpcError;
use crate::rpc::eth::EthRpcClient;
use crate::types::FinalRecord;

/// Capability contract a tester needs from the target ledger.
///
/// The production implementation is [`EthRpcClient`]; tests substitute a
/// scripted mock.
#[async_trait]
pub trait LedgerEndpoint: Send + Sync {
    /// Current pending sequence number for an account.
    async fn current_nonce(&self, address: &str) -> Result<u64, RpcError>;

    /// Native balance of an account in wei.
    async fn balance(&self, address: &str) -> Result<U256, RpcError>;

    /// Submit a signed operation; returns its id.
    async fn submit(&self, raw_tx: &str) -> Result<String, RpcError>;

    /// Submit a signed operation and wait for its final record in the same
    /// round trip. Only meaningful on immediate-finality endpoints.
    async fn submit_sync(&self, raw_tx: &str) -> Result<FinalRecord, RpcError>;

    /// One targeted confirmation read: final record, or None while pending.
    async fn confirmation(&self, tx_hash: &str) -> Result<Option<FinalRecord>, RpcError>;
}

#[async_trait]
impl LedgerEndpoint for EthRpcClient {
    async fn current_nonce(&self, address: &str) -> Result<u64, RpcError> {
        self.get_transaction_count(address).await
    }

    async fn balance(&self, address: &str) -> Result<U256, RpcError> {
        self.get_balance(address).await
    }

    async fn submit(&self, raw_tx: &str) -> Result<String, RpcError> {
        self.send_raw_transaction(raw_tx).await
    }

    async fn submit_sync(&self, raw_tx: &str) -> Result<FinalRecord, RpcError> {
        self.send_raw_transaction_sync(raw_tx).await
    }

    async fn confirmation(&self, tx_hash: &str) -> Result<Option<FinalRecord>, RpcError> {
        self.get_transaction_receipt(tx_hash).await
    }
}
