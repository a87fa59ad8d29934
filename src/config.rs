use anyhow::Result;

use crate::rpc::eth::{parse_hex_u64, EthRpcClient};
use crate::types::ChainInfo;

/// Probe chain parameters from the endpoint before a run.
///
/// The block-time estimate seeds the baseline confirmation-time estimate
/// when the caller does not supply one.
pub async fn probe_chain(client: &EthRpcClient) -> Result<ChainInfo> {
    let chain_id = client.chain_id().await?;
    let gas_price = client.gas_price().await?;
    let latest_height = client.block_number().await?;
    let block_time_avg = estimate_block_time(client, latest_height).await;

    Ok(ChainInfo {
        chain_id,
        gas_price,
        latest_height,
        block_time_avg,
    })
}

/// Estimate average block time in seconds from recent blocks.
async fn estimate_block_time(client: &EthRpcClient, latest: u64) -> f64 {
    let sample_size = 10u64;
    let start_height = latest.saturating_sub(sample_size);

    let start_block = client.get_block_by_number(start_height).await;
    let end_block = client.get_block_by_number(latest).await;

    match (start_block, end_block) {
        (Ok(Some(start)), Ok(Some(end))) => {
            let start_ts = parse_hex_u64(&start.timestamp).unwrap_or(0);
            let end_ts = parse_hex_u64(&end.timestamp).unwrap_or(0);
            if end_ts > start_ts && latest > start_height {
                (end_ts - start_ts) as f64 / (latest - start_height) as f64
            } else {
                2.0 // Default fallback
            }
        }
        _ => 2.0,
    }
}
