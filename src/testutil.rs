//! Scripted endpoint mock shared by the tester and confirmation tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use alloy_primitives::U256;
use async_trait::async_trait;

use crate::endpoint::LedgerEndpoint;
use crate::error::RpcError;
use crate::signal::StopSignal;
use crate::types::FinalRecord;

/// Outcome of the next submission, in script order. When the script is
/// empty every submission is accepted and immediately final.
#[derive(Debug, Clone, Copy)]
pub enum MockStep {
    Accept,
    /// Accepted into the ledger but marked failed.
    AcceptReverted,
    /// Endpoint-side transient failure (rate limited).
    Transient,
}

#[derive(Debug)]
struct PendingTx {
    /// "not yet" answers remaining before the receipt appears.
    checks_remaining: u32,
    success: bool,
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<MockStep>,
    submissions: u64,
    successes: u64,
    next_hash: u64,
    pending: HashMap<String, PendingTx>,
    balances: HashMap<String, U256>,
}

/// In-memory [`LedgerEndpoint`] with a per-submission script, manual
/// receipt control, and an optional stop trigger after N confirmed
/// submissions.
#[derive(Debug, Default)]
pub struct MockEndpoint {
    state: Mutex<MockState>,
    nonce_calls: AtomicU64,
    stop_after: Mutex<Option<(Arc<StopSignal>, u64)>>,
}

impl MockEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, steps: impl IntoIterator<Item = MockStep>) {
        self.state.lock().unwrap().script.extend(steps);
    }

    /// Trigger `signal` once `n` submissions have been accepted.
    pub fn stop_after(&self, signal: Arc<StopSignal>, n: u64) {
        *self.stop_after.lock().unwrap() = Some((signal, n));
    }

    /// Pre-register a pending transaction without going through submit.
    /// Returns its hash.
    pub fn submit_pending(&self, hash: &str, checks_remaining: u32, success: bool) -> String {
        self.state.lock().unwrap().pending.insert(
            hash.to_string(),
            PendingTx {
                checks_remaining,
                success,
            },
        );
        hash.to_string()
    }

    /// Make a pending transaction final on its next check.
    pub fn finalize(&self, hash: &str) {
        if let Some(p) = self.state.lock().unwrap().pending.get_mut(hash) {
            p.checks_remaining = 0;
        }
    }

    pub fn set_balance(&self, address: &str, balance: U256) {
        self.state
            .lock()
            .unwrap()
            .balances
            .insert(address.to_string(), balance);
    }

    pub fn submissions(&self) -> u64 {
        self.state.lock().unwrap().submissions
    }

    pub fn nonce_calls(&self) -> u64 {
        self.nonce_calls.load(Ordering::SeqCst)
    }

    fn accept(&self, state: &mut MockState, checks_remaining: u32, success: bool) -> String {
        state.next_hash += 1;
        let hash = format!("0xmock{:04x}", state.next_hash);
        state.pending.insert(
            hash.clone(),
            PendingTx {
                checks_remaining,
                success,
            },
        );
        state.successes += 1;
        let successes = state.successes;
        if let Some((signal, n)) = self.stop_after.lock().unwrap().as_ref() {
            if successes >= *n {
                signal.trigger();
            }
        }
        hash
    }

    fn next_step(&self, state: &mut MockState) -> MockStep {
        state.submissions += 1;
        state.script.pop_front().unwrap_or(MockStep::Accept)
    }

    fn transient() -> RpcError {
        RpcError::Endpoint {
            code: -32005,
            message: "request limit reached".to_string(),
        }
    }
}

#[async_trait]
impl LedgerEndpoint for MockEndpoint {
    async fn current_nonce(&self, _address: &str) -> Result<u64, RpcError> {
        self.nonce_calls.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    async fn balance(&self, address: &str) -> Result<U256, RpcError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .balances
            .get(address)
            .copied()
            .unwrap_or(U256::MAX))
    }

    async fn submit(&self, _raw_tx: &str) -> Result<String, RpcError> {
        let mut state = self.state.lock().unwrap();
        match self.next_step(&mut state) {
            MockStep::Accept => Ok(self.accept(&mut state, 0, true)),
            MockStep::AcceptReverted => Ok(self.accept(&mut state, 0, false)),
            MockStep::Transient => Err(Self::transient()),
        }
    }

    async fn submit_sync(&self, _raw_tx: &str) -> Result<FinalRecord, RpcError> {
        let mut state = self.state.lock().unwrap();
        match self.next_step(&mut state) {
            MockStep::Accept => {
                let hash = self.accept(&mut state, 0, true);
                Ok(FinalRecord {
                    tx_hash: hash,
                    block_number: state.successes,
                    gas_used: 21_000,
                    success: true,
                })
            }
            MockStep::AcceptReverted => {
                let hash = self.accept(&mut state, 0, false);
                Ok(FinalRecord {
                    tx_hash: hash,
                    block_number: state.successes,
                    gas_used: 21_000,
                    success: false,
                })
            }
            MockStep::Transient => Err(Self::transient()),
        }
    }

    async fn confirmation(&self, tx_hash: &str) -> Result<Option<FinalRecord>, RpcError> {
        let mut state = self.state.lock().unwrap();
        match state.pending.get_mut(tx_hash) {
            None => Ok(None),
            Some(p) if p.checks_remaining > 0 => {
                p.checks_remaining -= 1;
                Ok(None)
            }
            Some(p) => Ok(Some(FinalRecord {
                tx_hash: tx_hash.to_string(),
                block_number: 1,
                gas_used: 21_000,
                success: p.success,
            })),
        }
    }
}
