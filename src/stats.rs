use crate::types::{GasStats, LatencyStats, TestSummary, TesterBreakdown, TesterResult};

/// Reduce all tester outputs into one summary.
///
/// Only testers that completed cleanly contribute to throughput and
/// latency; an errored tester ran a partial, non-comparable loop. The
/// duration is the authoritative stop-signal window, not the time cleanup
/// finished.
pub fn compute_stats(results: &[TesterResult], actual_duration_ms: u64) -> TestSummary {
    let clean: Vec<&TesterResult> = results.iter().filter(|r| r.completed_cleanly).collect();
    let errored = results.len() - clean.len();

    let mut latencies: Vec<f64> = clean
        .iter()
        .flat_map(|r| r.records.iter().map(|t| t.latency_ms))
        .collect();
    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let total = latencies.len() as u64;
    let gas_total: u64 = clean
        .iter()
        .flat_map(|r| r.records.iter().map(|t| t.gas_used))
        .sum();

    let (avg, min, max) = if latencies.is_empty() {
        (0.0, 0.0, 0.0)
    } else {
        (
            latencies.iter().sum::<f64>() / latencies.len() as f64,
            latencies[0],
            latencies[latencies.len() - 1],
        )
    };

    let tps = if actual_duration_ms > 0 {
        total as f64 / (actual_duration_ms as f64 / 1000.0)
    } else {
        0.0
    };

    TestSummary {
        total_transfers: total,
        duration_ms: actual_duration_ms,
        tps,
        latency: LatencyStats {
            min,
            max,
            avg,
            p50: percentile(&latencies, 50.0),
            p95: percentile(&latencies, 95.0),
            p99: percentile(&latencies, 99.0),
        },
        gas: GasStats {
            total: gas_total,
            avg: if total > 0 {
                gas_total as f64 / total as f64
            } else {
                0.0
            },
        },
        clean_testers: clean.len(),
        errored_testers: errored,
    }
}

/// Nearest-rank percentile over ascending `sorted`: the element at index
/// `ceil(p/100 * n) - 1`, clamped into bounds. Zero on empty input.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let rank = (p / 100.0 * n as f64).ceil() as isize - 1;
    let idx = rank.clamp(0, n as isize - 1) as usize;
    sorted[idx]
}

/// Per-tester diagnostic lines, clean and errored alike.
pub fn per_tester_breakdown(results: &[TesterResult]) -> Vec<TesterBreakdown> {
    results
        .iter()
        .map(|r| {
            let n = r.records.len();
            let avg = if n > 0 {
                r.records.iter().map(|t| t.latency_ms).sum::<f64>() / n as f64
            } else {
                0.0
            };
            TesterBreakdown {
                pair_index: r.pair_index,
                transfers: n as u64,
                avg_latency_ms: avg,
                completed_cleanly: r.completed_cleanly,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, TransferRecord};

    fn record(latency_ms: f64) -> TransferRecord {
        TransferRecord {
            tx_hash: "0x0".into(),
            latency_ms,
            gas_used: 21_000,
            direction: Direction::AToB,
        }
    }

    fn result(pair_index: usize, latencies: &[f64], clean: bool) -> TesterResult {
        TesterResult {
            pair_index,
            records: latencies.iter().copied().map(record).collect(),
            completed_cleanly: clean,
        }
    }

    #[test]
    fn percentile_of_empty_is_zero() {
        assert_eq!(percentile(&[], 50.0), 0.0);
        assert_eq!(percentile(&[], 99.0), 0.0);
    }

    #[test]
    fn percentile_nearest_rank() {
        let v = [100.0, 200.0, 300.0, 400.0, 500.0];
        assert_eq!(percentile(&v, 50.0), 300.0);
        assert_eq!(percentile(&v, 95.0), 500.0);
        assert_eq!(percentile(&v, 99.0), 500.0);
    }

    #[test]
    fn errored_testers_are_excluded_from_aggregates() {
        let results = vec![
            result(0, &[100.0, 200.0], true),
            result(1, &[5000.0, 5000.0, 5000.0], false),
        ];
        let summary = compute_stats(&results, 10_000);
        assert_eq!(summary.total_transfers, 2);
        assert_eq!(summary.clean_testers, 1);
        assert_eq!(summary.errored_testers, 1);
        assert!((summary.latency.avg - 150.0).abs() < 1e-9);
        assert!((summary.tps - 0.2).abs() < 1e-9);
    }

    #[test]
    fn no_clean_transfers_yields_zeroed_metrics() {
        let results = vec![result(0, &[100.0], false)];
        let summary = compute_stats(&results, 5_000);
        assert_eq!(summary.total_transfers, 0);
        assert_eq!(summary.tps, 0.0);
        assert_eq!(summary.latency.p99, 0.0);
        assert_eq!(summary.gas.avg, 0.0);
    }

    #[test]
    fn breakdown_covers_errored_testers() {
        let results = vec![
            result(0, &[100.0, 300.0], true),
            result(1, &[400.0], false),
        ];
        let breakdown = per_tester_breakdown(&results);
        assert_eq!(breakdown.len(), 2);
        assert_eq!(breakdown[0].transfers, 2);
        assert!((breakdown[0].avg_latency_ms - 200.0).abs() < 1e-9);
        assert!(!breakdown[1].completed_cleanly);
        assert_eq!(breakdown[1].transfers, 1);
    }

    #[test]
    fn gas_totals_come_from_clean_records_only() {
        let results = vec![result(0, &[100.0, 100.0], true), result(1, &[100.0], false)];
        let summary = compute_stats(&results, 1_000);
        assert_eq!(summary.gas.total, 42_000);
        assert!((summary.gas.avg - 21_000.0).abs() < 1e-9);
    }
}
