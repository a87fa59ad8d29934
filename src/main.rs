mod confirm;
mod config;
mod curve;
mod endpoint;
mod error;
mod executor;
mod report;
mod rpc;
mod signal;
mod stats;
mod tester;
#[cfg(test)]
mod testutil;
mod types;
mod wallet;

use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy_primitives::U256;
use alloy_signer_local::PrivateKeySigner;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::curve::TrafficCurve;
use crate::rpc::eth::EthRpcClient;
use crate::signal::StopSignal;
use crate::tester::{Tester, TransferParams};
use crate::types::{ConfirmMode, FinalReport, OutputFormat, TesterResult};

#[derive(Parser)]
#[command(name = "xferbench")]
#[command(about = "Transfer throughput and latency benchmark for EVM JSON-RPC endpoints")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the benchmark - concurrent transfer ping-pong over funded account pairs
    Run {
        /// Ethereum JSON-RPC endpoint URL
        #[arg(long)]
        rpc: String,

        /// Websocket endpoint URL for the newHeads subscription (event mode)
        #[arg(long)]
        ws_rpc: Option<String>,

        /// Master private key that funds the worker pairs (hex)
        #[arg(long)]
        key: String,

        /// Number of account pairs, each driven by its own tester
        #[arg(long, default_value = "8")]
        pairs: usize,

        /// Run duration in seconds
        #[arg(long, default_value = "60")]
        duration: u64,

        /// Transfer amount in wei (the unit bounced between each pair)
        #[arg(long, default_value = "1")]
        amount: u64,

        /// Gas limit per transfer
        #[arg(long, default_value = "21000")]
        gas_limit: u64,

        /// Gas price in wei (0 = auto)
        #[arg(long, default_value = "0")]
        gas_price: u64,

        /// Confirmation mode
        #[arg(long, value_enum, default_value = "polling")]
        confirm: ConfirmMode,

        /// Baseline confirmation-time estimate in ms (default: probed block time)
        #[arg(long)]
        estimate_ms: Option<f64>,

        /// Skip funding the worker pairs from the master key
        #[arg(long)]
        no_fund: bool,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        output: OutputFormat,

        /// Output file path for the JSON report
        #[arg(long)]
        output_file: Option<String>,

        /// Output file path for the per-transfer CSV
        #[arg(long)]
        csv_file: Option<String>,
    },

    /// Display probed chain parameters
    Info {
        /// Ethereum JSON-RPC endpoint URL
        #[arg(long)]
        rpc: String,
    },

    /// Generate and display a traffic curve for a given duration
    Shape {
        /// Schedule duration in seconds
        #[arg(long, default_value = "600")]
        duration: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            rpc,
            ws_rpc,
            key,
            pairs,
            duration,
            amount,
            gas_limit,
            gas_price,
            confirm,
            estimate_ms,
            no_fund,
            output,
            output_file,
            csv_file,
        } => {
            let args = RunArgs {
                rpc,
                ws_rpc,
                key,
                pairs,
                duration,
                amount,
                gas_limit,
                gas_price,
                confirm,
                estimate_ms,
                no_fund,
                output,
                output_file,
                csv_file,
            };
            run_benchmark(args).await
        }
        Commands::Info { rpc } => {
            let client = EthRpcClient::new(&rpc);
            let info = config::probe_chain(&client).await?;
            report::print_chain_info(&info);
            Ok(())
        }
        Commands::Shape { duration } => {
            let curve = TrafficCurve::generate(duration * 1000);
            report::print_curve(&curve);
            Ok(())
        }
    }
}

struct RunArgs {
    rpc: String,
    ws_rpc: Option<String>,
    key: String,
    pairs: usize,
    duration: u64,
    amount: u64,
    gas_limit: u64,
    gas_price: u64,
    confirm: ConfirmMode,
    estimate_ms: Option<f64>,
    no_fund: bool,
    output: OutputFormat,
    output_file: Option<String>,
    csv_file: Option<String>,
}

async fn run_benchmark(args: RunArgs) -> anyhow::Result<()> {
    let key_hex = args.key.strip_prefix("0x").unwrap_or(&args.key);
    let master: PrivateKeySigner = key_hex
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid private key: {}", e))?;

    let client = EthRpcClient::new(&args.rpc);
    let info = config::probe_chain(&client).await?;
    tracing::info!(
        chain_id = info.chain_id,
        block_time = info.block_time_avg,
        "Probed chain"
    );

    let params = TransferParams {
        chain_id: info.chain_id,
        gas_limit: args.gas_limit,
        gas_price: if args.gas_price == 0 {
            info.gas_price
        } else {
            args.gas_price
        },
        amount: U256::from(args.amount),
        baseline_estimate_ms: args
            .estimate_ms
            .unwrap_or(info.block_time_avg * 1000.0),
    };

    tracing::info!(pairs = args.pairs, "Generating worker account pairs");
    let pairs = wallet::generate_pairs(args.pairs);

    if !args.no_fund {
        wallet::fund_pairs(&master, &pairs, &params, &client).await?;
    }

    let endpoint = Arc::new(client.clone());
    wallet::preflight_check(&endpoint, &pairs, &params).await?;

    let strategy = confirm::select_strategy(args.confirm, args.ws_rpc.as_deref()).await;

    let stop = Arc::new(StopSignal::new());
    tokio::spawn(signal::arm(
        stop.clone(),
        Duration::from_secs(args.duration),
    ));

    let started_at = chrono::Utc::now().to_rfc3339();
    let start = Instant::now();

    // Every pair runs unconditionally in parallel; the pair count is the
    // caller's offered-load knob. Immediate mode gets one connection pool
    // per tester so a slow synchronous confirmation cannot stall others.
    let mut handles = Vec::with_capacity(pairs.len());
    for pair in pairs {
        let tester_endpoint = if strategy.is_immediate() {
            Arc::new(EthRpcClient::new(&args.rpc))
        } else {
            endpoint.clone()
        };
        let tester = Tester::new(
            pair,
            tester_endpoint,
            strategy.clone(),
            stop.clone(),
            params.clone(),
        );
        handles.push(tokio::spawn(tester.run()));
    }

    let mut results: Vec<TesterResult> = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await?);
    }

    // All testers finishing early (every one errored out) still ends the
    // run; fix the stop timestamp now if the deadline never fired.
    if !stop.is_stopped() {
        stop.trigger();
    }
    let actual_duration = stop
        .stopped_at()
        .map(|at| at.saturating_duration_since(start))
        .unwrap_or_else(|| start.elapsed());

    let summary = stats::compute_stats(&results, actual_duration.as_millis() as u64);
    let testers = stats::per_tester_breakdown(&results);
    let final_report = FinalReport {
        chain_id: info.chain_id,
        started_at,
        pairs: args.pairs,
        summary,
        testers,
    };

    match args.output {
        OutputFormat::Table => report::print_summary(&final_report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&final_report)?),
    }
    if let Some(ref path) = args.output_file {
        report::write_json(path, &final_report)?;
        tracing::info!(path, "Wrote JSON report");
    }
    if let Some(ref path) = args.csv_file {
        report::write_csv(path, &results)?;
        tracing::info!(path, "Wrote transfer CSV");
    }

    Ok(())
}
