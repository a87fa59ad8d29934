use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};

use crate::curve::TrafficCurve;
use crate::types::{ChainInfo, FinalReport, TesterResult};

/// Print the final summary report
pub fn print_summary(report: &FinalReport) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        Cell::new("Metric").fg(Color::Cyan),
        Cell::new("Value").fg(Color::Cyan),
    ]);

    let s = &report.summary;
    table.add_row(vec!["Chain ID", &report.chain_id.to_string()]);
    table.add_row(vec!["Started", &report.started_at]);
    table.add_row(vec!["Account Pairs", &report.pairs.to_string()]);
    table.add_row(vec![
        "Duration",
        &format!("{:.1}s", s.duration_ms as f64 / 1000.0),
    ]);
    table.add_row(vec!["", ""]);
    table.add_row(vec!["Confirmed Transfers", &s.total_transfers.to_string()]);
    table.add_row(vec!["Throughput", &format!("{:.2} tx/s", s.tps)]);
    table.add_row(vec![
        "Clean / Errored Testers",
        &format!("{} / {}", s.clean_testers, s.errored_testers),
    ]);
    table.add_row(vec!["", ""]);
    table.add_row(vec!["Latency Min", &format!("{:.0}ms", s.latency.min)]);
    table.add_row(vec!["Latency Avg", &format!("{:.0}ms", s.latency.avg)]);
    table.add_row(vec!["Latency P50", &format!("{:.0}ms", s.latency.p50)]);
    table.add_row(vec!["Latency P95", &format!("{:.0}ms", s.latency.p95)]);
    table.add_row(vec!["Latency P99", &format!("{:.0}ms", s.latency.p99)]);
    table.add_row(vec!["Latency Max", &format!("{:.0}ms", s.latency.max)]);
    table.add_row(vec!["", ""]);
    table.add_row(vec!["Gas Used Total", &s.gas.total.to_string()]);
    table.add_row(vec!["Gas Used Avg", &format!("{:.0}", s.gas.avg)]);

    println!("\n{table}");

    print_breakdown(report);
}

/// Per-tester diagnostic table; errored testers are shown with their
/// partial counts and a marker.
fn print_breakdown(report: &FinalReport) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        Cell::new("Pair").fg(Color::Cyan),
        Cell::new("Transfers").fg(Color::Cyan),
        Cell::new("Avg Latency").fg(Color::Cyan),
        Cell::new("Status").fg(Color::Cyan),
    ]);

    for t in &report.testers {
        let status = if t.completed_cleanly {
            Cell::new("ok")
        } else {
            Cell::new("(errored)").fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(t.pair_index.to_string()),
            Cell::new(t.transfers.to_string()),
            Cell::new(format!("{:.0}ms", t.avg_latency_ms)),
            status,
        ]);
    }

    println!("\n{table}");
}

/// Print probed chain parameters
pub fn print_chain_info(info: &ChainInfo) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        Cell::new("Parameter").fg(Color::Cyan),
        Cell::new("Value").fg(Color::Cyan),
    ]);
    table.add_row(vec!["Chain ID", &info.chain_id.to_string()]);
    table.add_row(vec!["Gas Price", &format!("{} wei", info.gas_price)]);
    table.add_row(vec!["Latest Height", &info.latest_height.to_string()]);
    table.add_row(vec![
        "Block Time Avg",
        &format!("{:.2}s", info.block_time_avg),
    ]);
    println!("\n{table}");
}

/// Print a generated traffic curve as a waypoint schedule
pub fn print_curve(curve: &TrafficCurve) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        Cell::new("Elapsed").fg(Color::Cyan),
        Cell::new("Target Utilization").fg(Color::Cyan),
    ]);
    for w in curve.waypoints() {
        table.add_row(vec![
            format!("{:.0}s", w.at_ms as f64 / 1000.0),
            format!("{:.0}%", w.target * 100.0),
        ]);
    }
    println!("\n{table}");
}

/// Write the final report as JSON
pub fn write_json(path: &str, report: &FinalReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Write every transfer record as CSV, errored testers included
pub fn write_csv(path: &str, results: &[TesterResult]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "pair",
        "direction",
        "tx_hash",
        "latency_ms",
        "gas_used",
        "completed_cleanly",
    ])?;

    for result in results {
        for record in &result.records {
            writer.write_record(&[
                result.pair_index.to_string(),
                record.direction.to_string(),
                record.tx_hash.clone(),
                format!("{:.1}", record.latency_ms),
                record.gas_used.to_string(),
                result.completed_cleanly.to_string(),
            ])?;
        }
    }

    writer.flush()?;
    Ok(())
}
