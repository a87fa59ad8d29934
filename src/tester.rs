use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use tokio::time::Instant;

use crate::confirm::ConfirmStrategy;
use crate::endpoint::LedgerEndpoint;
use crate::error::{classify, FailureKind, TransferError};
use crate::signal::StopSignal;
use crate::types::{Direction, TesterResult, TransferRecord};
use crate::wallet::{build_transfer_tx, AccountPair};

/// Retries after the first attempt of one transfer.
pub const MAX_RETRIES: u32 = 4;
/// First backoff step; doubles per retry.
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Endpoint-level parameters shared by every transfer of a run.
#[derive(Debug, Clone)]
pub struct TransferParams {
    pub chain_id: u64,
    pub gas_limit: u64,
    pub gas_price: u64,
    /// The fixed transfer unit being bounced between the pair.
    pub amount: U256,
    /// Seed for the per-tester confirmation-time estimate, in ms.
    pub baseline_estimate_ms: f64,
}

/// Blend an observed confirmation time into the running estimate.
fn blend_estimate(old_ms: f64, observed_ms: f64) -> f64 {
    old_ms * 0.7 + observed_ms * 0.3
}

/// One concurrent transfer loop owning one account pair.
///
/// Bounces the fixed unit A->B->A->... until the stop signal fires,
/// retrying transient failures with exponential backoff and tracking both
/// nonces locally. Cancellation is observed only between attempts, so an
/// in-flight submission always completes before the loop re-checks the
/// flag.
pub struct Tester<E: LedgerEndpoint> {
    pair: AccountPair,
    endpoint: Arc<E>,
    strategy: ConfirmStrategy,
    stop: Arc<StopSignal>,
    params: TransferParams,
    estimate_ms: f64,
}

impl<E: LedgerEndpoint + 'static> Tester<E> {
    pub fn new(
        pair: AccountPair,
        endpoint: Arc<E>,
        strategy: ConfirmStrategy,
        stop: Arc<StopSignal>,
        params: TransferParams,
    ) -> Self {
        let estimate_ms = params.baseline_estimate_ms;
        Self {
            pair,
            endpoint,
            strategy,
            stop,
            params,
            estimate_ms,
        }
    }

    pub async fn run(mut self) -> TesterResult {
        let pair_index = self.pair.index;
        let mut records = Vec::new();

        // One nonce read per account for the whole run; local state takes
        // over from here and only advances on confirmed success.
        let nonces = async {
            let a = self.endpoint.current_nonce(&self.pair.address_a()).await?;
            let b = self.endpoint.current_nonce(&self.pair.address_b()).await?;
            Ok::<_, crate::error::RpcError>((a, b))
        }
        .await;
        let (mut nonce_a, mut nonce_b) = match nonces {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(pair = pair_index, error = %e, "failed to fetch starting nonces");
                return TesterResult {
                    pair_index,
                    records,
                    completed_cleanly: false,
                };
            }
        };

        let mut on_a = true;
        let mut clean = true;

        while !self.stop.is_stopped() {
            let direction = if on_a { Direction::AToB } else { Direction::BToA };
            let nonce = if on_a { nonce_a } else { nonce_b };

            match self.transfer_with_retry(direction, nonce).await {
                Ok(record) => {
                    if on_a {
                        nonce_a += 1;
                    } else {
                        nonce_b += 1;
                    }
                    records.push(record);
                    on_a = !on_a;
                }
                Err(err) => {
                    tracing::warn!(
                        pair = pair_index,
                        %direction,
                        error = %err,
                        "tester aborting after unrecoverable failure"
                    );
                    clean = false;
                    break;
                }
            }
        }

        // Return leg: the unit must end up back on A. Best effort; a
        // failure here is logged but does not flip the clean flag.
        if !on_a {
            match self.transfer_with_retry(Direction::BToA, nonce_b).await {
                Ok(_) => {
                    tracing::debug!(pair = pair_index, "return leg restored unit to A");
                }
                Err(err) => {
                    tracing::warn!(
                        pair = pair_index,
                        error = %err,
                        "return leg failed; unit left on B"
                    );
                }
            }
        }

        TesterResult {
            pair_index,
            records,
            completed_cleanly: clean,
        }
    }

    /// One transfer, attempted up to `MAX_RETRIES + 1` times at the same
    /// nonce. Only transient failures are retried.
    async fn transfer_with_retry(
        &mut self,
        direction: Direction,
        nonce: u64,
    ) -> Result<TransferRecord, TransferError> {
        let mut attempt = 0u32;
        loop {
            match self.attempt(direction, nonce).await {
                Ok(record) => return Ok(record),
                Err(err) => match classify(&err) {
                    FailureKind::Transient if attempt < MAX_RETRIES => {
                        let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                        tracing::debug!(
                            pair = self.pair.index,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "transient failure, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    FailureKind::Transient => {
                        return Err(match err {
                            TransferError::Rpc(last) => TransferError::RetriesExhausted {
                                attempts: attempt + 1,
                                last,
                            },
                            other => other,
                        });
                    }
                    _ => return Err(err),
                },
            }
        }
    }

    async fn attempt(
        &mut self,
        direction: Direction,
        nonce: u64,
    ) -> Result<TransferRecord, TransferError> {
        let (sender, recipient) = match direction {
            Direction::AToB => (&self.pair.a, self.pair.b.address()),
            Direction::BToA => (&self.pair.b, self.pair.a.address()),
        };
        let raw = build_transfer_tx(sender, recipient, nonce, self.params.amount, &self.params)?;

        let started = Instant::now();
        let record = self
            .strategy
            .submit_and_confirm(&*self.endpoint, &raw, self.estimate_ms)
            .await?;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        // Feed the observed confirmation time back so polling intervals
        // self-tune over the run.
        self.estimate_ms = blend_estimate(self.estimate_ms, latency_ms);

        Ok(TransferRecord {
            tx_hash: record.tx_hash,
            latency_ms,
            gas_used: record.gas_used,
            direction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockEndpoint, MockStep};
    use crate::wallet::generate_pairs;

    fn params() -> TransferParams {
        TransferParams {
            chain_id: 1,
            gas_limit: 21_000,
            gas_price: 1_000_000_000,
            amount: U256::from(1u64),
            baseline_estimate_ms: 1_000.0,
        }
    }

    fn tester(
        endpoint: Arc<MockEndpoint>,
        stop: Arc<StopSignal>,
    ) -> Tester<MockEndpoint> {
        let pair = generate_pairs(1).remove(0);
        Tester::new(pair, endpoint, ConfirmStrategy::Immediate, stop, params())
    }

    #[test]
    fn estimate_blends_seventy_thirty() {
        assert!((blend_estimate(1_000.0, 2_000.0) - 1_300.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_then_succeed() {
        let endpoint = Arc::new(MockEndpoint::new());
        endpoint.script([MockStep::Transient, MockStep::Transient]);
        let stop = Arc::new(StopSignal::new());
        endpoint.stop_after(stop.clone(), 2);

        let t0 = Instant::now();
        let result = tester(endpoint.clone(), stop).run().await;

        // Two transient failures cost 500ms + 1000ms of backoff; the two
        // clean transfers themselves are instant under the mock.
        let elapsed = t0.elapsed();
        assert!(elapsed >= Duration::from_millis(1_500));
        assert!(elapsed < Duration::from_millis(1_700));

        assert!(result.completed_cleanly);
        assert_eq!(result.records.len(), 2);
        assert_eq!(
            result.records.iter().map(|r| r.direction).collect::<Vec<_>>(),
            vec![Direction::AToB, Direction::BToA]
        );
        // 2 transient + 2 accepted, no return leg after an even count.
        assert_eq!(endpoint.submissions(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_abort_uncleanly() {
        let endpoint = Arc::new(MockEndpoint::new());
        endpoint.script(std::iter::repeat(MockStep::Transient).take((MAX_RETRIES + 1) as usize));
        let stop = Arc::new(StopSignal::new());

        let result = tester(endpoint.clone(), stop).run().await;

        assert!(!result.completed_cleanly);
        assert!(result.records.is_empty());
        assert_eq!(endpoint.submissions(), (MAX_RETRIES + 1) as u64);
    }

    #[tokio::test]
    async fn on_chain_revert_is_not_retried() {
        let endpoint = Arc::new(MockEndpoint::new());
        endpoint.script([MockStep::AcceptReverted]);
        let stop = Arc::new(StopSignal::new());

        let result = tester(endpoint.clone(), stop).run().await;

        assert!(!result.completed_cleanly);
        assert!(result.records.is_empty());
        assert_eq!(endpoint.submissions(), 1);
    }

    #[tokio::test]
    async fn clean_stop_after_two_transfers_needs_no_return_leg() {
        let endpoint = Arc::new(MockEndpoint::new());
        let stop = Arc::new(StopSignal::new());
        endpoint.stop_after(stop.clone(), 2);

        let result = tester(endpoint.clone(), stop).run().await;

        assert!(result.completed_cleanly);
        assert_eq!(result.records.len(), 2);
        assert_eq!(endpoint.submissions(), 2);
        // Nonces were fetched once per account and never re-read.
        assert_eq!(endpoint.nonce_calls(), 2);
    }

    #[tokio::test]
    async fn odd_transfer_count_issues_a_return_leg() {
        let endpoint = Arc::new(MockEndpoint::new());
        let stop = Arc::new(StopSignal::new());
        endpoint.stop_after(stop.clone(), 1);

        let result = tester(endpoint.clone(), stop).run().await;

        assert!(result.completed_cleanly);
        assert_eq!(result.records.len(), 1);
        // The compensating B->A transfer is submitted but not recorded.
        assert_eq!(endpoint.submissions(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn return_leg_failure_keeps_the_clean_flag() {
        let endpoint = Arc::new(MockEndpoint::new());
        let stop = Arc::new(StopSignal::new());
        endpoint.stop_after(stop.clone(), 1);
        // First transfer succeeds; every return-leg attempt fails.
        endpoint.script(
            std::iter::once(MockStep::Accept)
                .chain(std::iter::repeat(MockStep::Transient).take((MAX_RETRIES + 1) as usize)),
        );

        let result = tester(endpoint.clone(), stop).run().await;

        assert!(result.completed_cleanly);
        assert_eq!(result.records.len(), 1);
        assert_eq!(endpoint.submissions(), 1 + (MAX_RETRIES + 1) as u64);
    }

    #[tokio::test]
    async fn pre_stopped_signal_runs_no_transfers() {
        let endpoint = Arc::new(MockEndpoint::new());
        let stop = Arc::new(StopSignal::new());
        stop.trigger();

        let result = tester(endpoint.clone(), stop).run().await;

        assert!(result.completed_cleanly);
        assert!(result.records.is_empty());
        assert_eq!(endpoint.submissions(), 0);
    }
}
