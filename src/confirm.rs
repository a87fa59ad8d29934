use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::endpoint::LedgerEndpoint;
use crate::error::{FailureKind, TransferError};
use crate::rpc::ws;
use crate::types::{ConfirmMode, FinalRecord};

/// Floor for polling sleeps; chains with sub-second blocks still should
/// not hammer the receipt endpoint.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Ceiling for polling sleeps on slow chains.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(3);
/// Bounded wait for establishing the newHeads subscription before
/// downgrading to polling.
pub const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Fan-out point for block arrivals.
///
/// Every pending confirmation registers a one-shot waiter; each new block
/// wakes all of them at once, and each woken tester re-checks only its own
/// transaction. A waiter is removed from the table the moment it wakes (or
/// is dropped), so the table never accumulates settled entries. Teardown
/// wakes everyone so nobody blocks on a dead subscription.
#[derive(Debug, Clone, Default)]
pub struct BlockWatcher {
    inner: Arc<WatcherInner>,
}

#[derive(Debug, Default)]
struct WatcherInner {
    table: Mutex<WaiterTable>,
}

#[derive(Debug, Default)]
struct WaiterTable {
    next_id: u64,
    senders: HashMap<u64, oneshot::Sender<u64>>,
    closed: bool,
}

/// A registered waiter. Deregisters itself on drop.
pub struct BlockWait {
    id: u64,
    rx: oneshot::Receiver<u64>,
    inner: Arc<WatcherInner>,
}

impl BlockWait {
    /// Wait for the next block. Err means the subscription was torn down.
    pub async fn wait(mut self) -> Result<u64, ()> {
        (&mut self.rx).await.map_err(|_| ())
    }
}

impl Drop for BlockWait {
    fn drop(&mut self) {
        let mut table = self.inner.table.lock().expect("watcher poisoned");
        table.senders.remove(&self.id);
    }
}

impl BlockWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register for the next block arrival. If the watcher is already
    /// closed the returned waiter resolves with Err immediately.
    pub fn register(&self) -> BlockWait {
        let (tx, rx) = oneshot::channel();
        let mut table = self.inner.table.lock().expect("watcher poisoned");
        let id = table.next_id;
        table.next_id += 1;
        if !table.closed {
            table.senders.insert(id, tx);
        }
        BlockWait {
            id,
            rx,
            inner: self.inner.clone(),
        }
    }

    /// Wake every currently-registered waiter with the new block height.
    /// Draining the table is what deregisters them; re-waiting means
    /// re-registering.
    pub fn notify_block(&self, height: u64) {
        let senders: Vec<oneshot::Sender<u64>> = {
            let mut table = self.inner.table.lock().expect("watcher poisoned");
            table.senders.drain().map(|(_, tx)| tx).collect()
        };
        for tx in senders {
            let _ = tx.send(height);
        }
    }

    /// Tear down: wake everyone with an error and refuse new waiters.
    pub fn close(&self) {
        let mut table = self.inner.table.lock().expect("watcher poisoned");
        table.closed = true;
        table.senders.clear();
    }

    #[cfg(test)]
    pub fn waiter_count(&self) -> usize {
        self.inner.table.lock().expect("watcher poisoned").senders.len()
    }
}

/// How a submitted transfer is confirmed. Chosen once per run.
#[derive(Debug, Clone)]
pub enum ConfirmStrategy {
    /// Sleep most of the expected confirmation time, then poll.
    Polling,
    /// Wake on every new block and re-check one receipt per block.
    Event(BlockWatcher),
    /// The submission round trip itself returns the final record.
    Immediate,
}

impl ConfirmStrategy {
    pub fn is_immediate(&self) -> bool {
        matches!(self, ConfirmStrategy::Immediate)
    }

    /// Submit one signed transfer and wait until it is final.
    ///
    /// `estimate_ms` is the caller's current confirmation-time estimate;
    /// polling uses it to pace its sleeps. Fails with
    /// [`TransferError::Reverted`] when the ledger accepted but rejected
    /// the operation.
    pub async fn submit_and_confirm<E>(
        &self,
        endpoint: &E,
        raw_tx: &str,
        estimate_ms: f64,
    ) -> Result<FinalRecord, TransferError>
    where
        E: LedgerEndpoint + ?Sized,
    {
        match self {
            ConfirmStrategy::Immediate => {
                let record = endpoint.submit_sync(raw_tx).await?;
                finalized(record)
            }
            ConfirmStrategy::Polling => {
                let tx_hash = endpoint.submit(raw_tx).await?;
                self.poll_until_final(endpoint, &tx_hash, estimate_ms).await
            }
            ConfirmStrategy::Event(watcher) => {
                let tx_hash = endpoint.submit(raw_tx).await?;
                self.await_blocks_until_final(endpoint, watcher, &tx_hash, estimate_ms)
                    .await
            }
        }
    }

    async fn poll_until_final<E>(
        &self,
        endpoint: &E,
        tx_hash: &str,
        estimate_ms: f64,
    ) -> Result<FinalRecord, TransferError>
    where
        E: LedgerEndpoint + ?Sized,
    {
        // Most transfers are not final before ~80% of the estimate has
        // passed; skip the pointless early reads.
        let estimate = Duration::from_millis(estimate_ms.max(0.0) as u64);
        tokio::time::sleep(estimate.mul_f64(0.8).max(MIN_POLL_INTERVAL)).await;

        let interval = (estimate / 4).clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL);
        loop {
            if let Some(record) = endpoint.confirmation(tx_hash).await? {
                return finalized(record);
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn await_blocks_until_final<E>(
        &self,
        endpoint: &E,
        watcher: &BlockWatcher,
        tx_hash: &str,
        estimate_ms: f64,
    ) -> Result<FinalRecord, TransferError>
    where
        E: LedgerEndpoint + ?Sized,
    {
        loop {
            // Register before checking so a block landing between the
            // check and the wait still wakes us.
            let wait = watcher.register();
            if let Some(record) = endpoint.confirmation(tx_hash).await? {
                return finalized(record);
            }
            if wait.wait().await.is_err() {
                // Subscription torn down mid-wait; finish this transfer on
                // the polling path rather than blocking forever.
                tracing::warn!(%tx_hash, "block subscription closed, polling for receipt");
                return self.poll_until_final(endpoint, tx_hash, estimate_ms).await;
            }
        }
    }
}

fn finalized(record: FinalRecord) -> Result<FinalRecord, TransferError> {
    if record.success {
        Ok(record)
    } else {
        Err(TransferError::Reverted {
            tx_hash: record.tx_hash,
        })
    }
}

/// Decision table for the run-level confirmation mode.
///
/// Immediate takes precedence; an event endpoint is used when configured
/// but downgrades to polling if the subscription cannot be established in
/// time; polling is the default.
pub async fn select_strategy(mode: ConfirmMode, ws_url: Option<&str>) -> ConfirmStrategy {
    match (mode, ws_url) {
        (ConfirmMode::Immediate, _) => ConfirmStrategy::Immediate,
        (ConfirmMode::Event, Some(url)) => {
            match ws::subscribe_new_heads(url, SUBSCRIBE_TIMEOUT).await {
                Ok(watcher) => ConfirmStrategy::Event(watcher),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        kind = ?FailureKind::SubscriptionFailure,
                        "block subscription failed, falling back to polling"
                    );
                    ConfirmStrategy::Polling
                }
            }
        }
        (ConfirmMode::Event, None) => {
            tracing::warn!("event mode requested without --ws-rpc, falling back to polling");
            ConfirmStrategy::Polling
        }
        (ConfirmMode::Polling, _) => ConfirmStrategy::Polling,
    }
}
