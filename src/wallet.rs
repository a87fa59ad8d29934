use std::sync::Arc;
use std::time::Instant;

use alloy_consensus::transaction::RlpEcdsaTx;
use alloy_consensus::TxLegacy;
use alloy_network::TxSignerSync;
use alloy_primitives::{hex, Address, TxKind, U256};
use alloy_signer_local::PrivateKeySigner;
use anyhow::{Context, Result};

use crate::endpoint::LedgerEndpoint;
use crate::executor::bounded_map;
use crate::rpc::eth::EthRpcClient;
use crate::tester::TransferParams;

/// Concurrency cap for read/funding fan-out against the endpoint.
const ENDPOINT_FANOUT_LIMIT: usize = 10;
/// Transactions of fee headroom funded per account.
const FEE_HEADROOM_TXS: u64 = 40;
/// How long to wait for one funding transaction to land.
const FUNDING_CONFIRM_TIMEOUT_SECS: u64 = 120;

/// Two accounts dedicated to one tester. Created once before the run,
/// never shared.
#[derive(Debug, Clone)]
pub struct AccountPair {
    pub index: usize,
    pub a: PrivateKeySigner,
    pub b: PrivateKeySigner,
}

impl AccountPair {
    pub fn address_a(&self) -> String {
        format!("{:?}", self.a.address())
    }

    pub fn address_b(&self) -> String {
        format!("{:?}", self.b.address())
    }
}

/// Generate `count` pairs of random worker wallets.
pub fn generate_pairs(count: usize) -> Vec<AccountPair> {
    (0..count)
        .map(|index| AccountPair {
            index,
            a: PrivateKeySigner::random(),
            b: PrivateKeySigner::random(),
        })
        .collect()
}

/// Build and sign one legacy value transfer, returning the raw hex
/// payload ready for submission.
pub fn build_transfer_tx(
    signer: &PrivateKeySigner,
    to: Address,
    nonce: u64,
    amount: U256,
    params: &TransferParams,
) -> Result<String, alloy_signer::Error> {
    let mut tx = TxLegacy {
        chain_id: Some(params.chain_id),
        nonce,
        gas_price: params.gas_price as u128,
        gas_limit: params.gas_limit,
        to: TxKind::Call(to),
        value: amount,
        input: Default::default(),
    };

    let sig = signer.sign_transaction_sync(&mut tx)?;
    let mut buf = Vec::new();
    tx.rlp_encode_signed(&sig, &mut buf);
    Ok(format!("0x{}", hex::encode(&buf)))
}

/// Native balance each account must hold before the run: fee headroom for
/// both sides, plus the transfer unit itself on account A.
pub fn required_balance(params: &TransferParams, holds_unit: bool) -> U256 {
    let headroom =
        U256::from(params.gas_price) * U256::from(params.gas_limit) * U256::from(FEE_HEADROOM_TXS);
    if holds_unit {
        headroom + params.amount
    } else {
        headroom
    }
}

/// Fund every pair account from the master key.
///
/// Master-nonce submissions are strictly sequential and paced; receipt
/// waits run through the bounded executor so the endpoint is not hammered
/// by a burst of reads.
pub async fn fund_pairs(
    master: &PrivateKeySigner,
    pairs: &[AccountPair],
    params: &TransferParams,
    client: &EthRpcClient,
) -> Result<()> {
    let master_address = format!("{:?}", master.address());

    // Fresh gas price with a 2x premium so funding is not stuck behind
    // leftovers from a previous run.
    let funding_gas_price = client.gas_price().await?.max(params.gas_price) * 2;
    let mut master_nonce = client
        .get_transaction_count(&master_address)
        .await
        .context("failed to get master nonce")?;

    let targets: Vec<(Address, U256)> = pairs
        .iter()
        .flat_map(|p| {
            [
                (p.a.address(), required_balance(params, true)),
                (p.b.address(), required_balance(params, false)),
            ]
        })
        .collect();

    tracing::info!(
        accounts = targets.len(),
        gas_price = funding_gas_price,
        "Funding worker accounts"
    );

    let funding_params = TransferParams {
        gas_price: funding_gas_price,
        gas_limit: 21_000,
        ..params.clone()
    };

    let mut fund_hashes = Vec::with_capacity(targets.len());
    for (i, (to, amount)) in targets.iter().enumerate() {
        let raw = build_transfer_tx(master, *to, master_nonce, *amount, &funding_params)?;
        let hash = client
            .send_raw_transaction(&raw)
            .await
            .with_context(|| format!("failed to fund account {:?}", to))?;
        fund_hashes.push(hash);
        master_nonce += 1;

        // Pace the sends to avoid RPC saturation.
        if (i + 1) % 5 == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }
    }

    tracing::info!(count = fund_hashes.len(), "Waiting for funding confirmations");
    let client = client.clone();
    let outcomes = bounded_map(fund_hashes, ENDPOINT_FANOUT_LIMIT, move |_, hash| {
        let client = client.clone();
        async move { wait_funding_receipt(&client, &hash).await }
    })
    .await;

    for outcome in outcomes {
        outcome?;
    }
    tracing::info!("All worker accounts funded");
    Ok(())
}

async fn wait_funding_receipt(client: &EthRpcClient, tx_hash: &str) -> Result<()> {
    let start = Instant::now();
    while start.elapsed().as_secs() < FUNDING_CONFIRM_TIMEOUT_SECS {
        if let Ok(Some(record)) = client.get_transaction_receipt(tx_hash).await {
            anyhow::ensure!(record.success, "funding tx {} reverted", tx_hash);
            return Ok(());
        }
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    }
    anyhow::bail!("funding tx {} not confirmed within timeout", tx_hash)
}

/// Verify every account holds its required balance before any tester
/// starts. Any shortfall is fatal to the whole run and reported with the
/// exact per-account deficit.
pub async fn preflight_check<E>(
    endpoint: &Arc<E>,
    pairs: &[AccountPair],
    params: &TransferParams,
) -> Result<()>
where
    E: LedgerEndpoint + 'static,
{
    let accounts: Vec<(String, U256)> = pairs
        .iter()
        .flat_map(|p| {
            [
                (p.address_a(), required_balance(params, true)),
                (p.address_b(), required_balance(params, false)),
            ]
        })
        .collect();

    let endpoint = endpoint.clone();
    let balances = bounded_map(accounts, ENDPOINT_FANOUT_LIMIT, move |_, (address, required)| {
        let endpoint = endpoint.clone();
        async move {
            let available = endpoint.balance(&address).await?;
            Ok::<_, crate::error::RpcError>((address, required, available))
        }
    })
    .await;

    let mut shortfalls = Vec::new();
    for outcome in balances {
        let (address, required, available) = outcome.context("balance check failed")?;
        if available < required {
            shortfalls.push(format!(
                "  {}: required {} wei, available {} wei (short {})",
                address,
                required,
                available,
                required - available
            ));
        }
    }

    if !shortfalls.is_empty() {
        anyhow::bail!("under-funded accounts:\n{}", shortfalls.join("\n"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockEndpoint;

    fn params() -> TransferParams {
        TransferParams {
            chain_id: 1,
            gas_limit: 21_000,
            gas_price: 1_000_000_000,
            amount: U256::from(1u64),
            baseline_estimate_ms: 2_000.0,
        }
    }

    #[test]
    fn signed_transfer_is_hex_encoded() {
        let signer = PrivateKeySigner::random();
        let to = PrivateKeySigner::random().address();
        let raw = build_transfer_tx(&signer, to, 0, U256::from(1u64), &params()).unwrap();
        assert!(raw.starts_with("0x"));
        assert!(raw.len() > 100);
    }

    #[test]
    fn unit_holder_needs_the_unit_on_top_of_headroom() {
        let p = params();
        let with = required_balance(&p, true);
        let without = required_balance(&p, false);
        assert_eq!(with - without, p.amount);
    }

    #[tokio::test]
    async fn preflight_passes_on_funded_accounts() {
        let endpoint = Arc::new(MockEndpoint::new());
        let pairs = generate_pairs(3);
        preflight_check(&endpoint, &pairs, &params()).await.unwrap();
    }

    #[tokio::test]
    async fn preflight_reports_each_shortfall() {
        let endpoint = Arc::new(MockEndpoint::new());
        let pairs = generate_pairs(2);
        endpoint.set_balance(&pairs[0].address_a(), U256::ZERO);
        endpoint.set_balance(&pairs[1].address_b(), U256::from(5u64));

        let err = preflight_check(&endpoint, &pairs, &params())
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("under-funded"));
        assert!(err.contains(&pairs[0].address_a()));
        assert!(err.contains(&pairs[1].address_b()));
        assert!(!err.contains(&pairs[0].address_b()));
    }
}
