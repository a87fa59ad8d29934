use thiserror::Error;

/// Structured failure from the JSON-RPC boundary.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("RPC error {code}: {message}")]
    Endpoint { code: i64, message: String },
    #[error("malformed response for {method}: {detail}")]
    Malformed { method: String, detail: String },
}

/// Failure of one transfer attempt sequence inside a tester.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    /// The ledger accepted the transaction but marked it failed.
    #[error("transaction {tx_hash} reverted on-chain")]
    Reverted { tx_hash: String },
    /// Local signing failure. Deterministic, so never retried.
    #[error("signing failed: {0}")]
    Sign(#[from] alloy_signer::Error),
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: RpcError },
}

/// Closed classification of every failure the engine can see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Endpoint/network fault; safe to retry at the same nonce.
    Transient,
    /// Accepted into the ledger but marked failed; never retried.
    Rejected,
    /// Block subscription could not be used; downgrade to polling.
    SubscriptionFailure,
    /// An account is under-funded; fatal to the whole run.
    Insufficiency,
}

/// Classify a transfer failure into the closed kind set.
///
/// Machine-checkable signals first (HTTP status, JSON-RPC code); free-text
/// matching only as a last resort for endpoints that return bare -32000
/// style errors.
pub fn classify(err: &TransferError) -> FailureKind {
    match err {
        TransferError::Reverted { .. } => FailureKind::Rejected,
        // Re-signing the same transaction cannot fix a signing failure.
        TransferError::Sign(_) => FailureKind::Rejected,
        TransferError::RetriesExhausted { last, .. } => classify_rpc(last),
        TransferError::Rpc(rpc) => classify_rpc(rpc),
    }
}

fn classify_rpc(err: &RpcError) -> FailureKind {
    match err {
        // Timeouts, resets, and gateway 5xx all come through reqwest.
        RpcError::Transport(_) => FailureKind::Transient,
        // A response we could not parse is treated like a flaky endpoint,
        // not like a rejection of the operation.
        RpcError::Malformed { .. } => FailureKind::Transient,
        RpcError::Endpoint { code, message } => classify_endpoint(*code, message),
    }
}

fn classify_endpoint(code: i64, message: &str) -> FailureKind {
    match code {
        // Execution reverted (EIP-1474 / geth revert code).
        3 => FailureKind::Rejected,
        // Rate limiting.
        -32005 | 429 => FailureKind::Transient,
        // Internal error / generic server error range.
        -32603 => FailureKind::Transient,
        _ => classify_message(message),
    }
}

fn classify_message(message: &str) -> FailureKind {
    let msg = message.to_ascii_lowercase();
    if msg.contains("revert") || msg.contains("execution failed") {
        FailureKind::Rejected
    } else if msg.contains("insufficient funds") || msg.contains("insufficient balance") {
        FailureKind::Insufficiency
    } else {
        // Timeouts, "too many requests", mempool-full and friends; the
        // retry budget bounds how long we chase these.
        FailureKind::Transient
    }
}
