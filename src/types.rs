use serde::{Deserialize, Serialize};

/// Which way the unit moved for one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    AToB,
    BToA,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::AToB => write!(f, "A->B"),
            Direction::BToA => write!(f, "B->A"),
        }
    }
}

/// One confirmed transfer. Append-only; never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub tx_hash: String,
    pub latency_ms: f64,
    pub gas_used: u64,
    pub direction: Direction,
}

/// Output of one tester loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TesterResult {
    pub pair_index: usize,
    pub records: Vec<TransferRecord>,
    /// False when the loop aborted on an unrecoverable error. Errored
    /// results are excluded from aggregate stats but still shown
    /// per-tester.
    pub completed_cleanly: bool,
}

/// Final confirmation of a submitted transaction as reported by the
/// endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalRecord {
    pub tx_hash: String,
    pub block_number: u64,
    pub gas_used: u64,
    /// False means the ledger accepted the transaction but marked it
    /// failed (reverted).
    pub success: bool,
}

/// Latency statistics over all clean transfers, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Gas statistics over all clean transfers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasStats {
    pub total: u64,
    pub avg: f64,
}

/// Aggregate statistics for one run. Computed once, after all testers
/// finish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSummary {
    pub total_transfers: u64,
    pub duration_ms: u64,
    pub tps: f64,
    pub latency: LatencyStats,
    pub gas: GasStats,
    pub clean_testers: usize,
    pub errored_testers: usize,
}

/// Per-tester diagnostic line, reported for clean and errored testers
/// alike.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TesterBreakdown {
    pub pair_index: usize,
    pub transfers: u64,
    pub avg_latency_ms: f64,
    pub completed_cleanly: bool,
}

/// Chain parameters probed from the endpoint before a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainInfo {
    pub chain_id: u64,
    pub gas_price: u64,
    pub latest_height: u64,
    pub block_time_avg: f64,
}

/// Full report written by `--output-file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReport {
    pub chain_id: u64,
    pub started_at: String,
    pub pairs: usize,
    pub summary: TestSummary,
    pub testers: Vec<TesterBreakdown>,
}

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, clap::ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

/// Confirmation mode requested on the command line. The effective
/// strategy is resolved by `confirm::select_strategy`.
#[derive(Debug, Clone, Copy, PartialEq, clap::ValueEnum)]
pub enum ConfirmMode {
    Polling,
    Event,
    Immediate,
}
