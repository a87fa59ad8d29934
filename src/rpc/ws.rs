use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::confirm::BlockWatcher;
use crate::rpc::eth::parse_hex_u64;

/// Establish an `eth_subscribe("newHeads")` subscription and fan block
/// arrivals out through the returned watcher.
///
/// Establishment is bounded by `timeout`; the caller downgrades to polling
/// when this fails. Once established, a reader task runs until the stream
/// ends and closes the watcher on teardown so no waiter blocks forever.
pub async fn subscribe_new_heads(ws_url: &str, timeout: Duration) -> Result<BlockWatcher> {
    let (mut stream, _) = tokio::time::timeout(timeout, connect_async(ws_url))
        .await
        .map_err(|_| anyhow!("timed out connecting to {}", ws_url))?
        .with_context(|| format!("websocket connect to {} failed", ws_url))?;

    let request = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_subscribe",
        "params": ["newHeads"],
    });
    stream.send(Message::Text(request.to_string())).await?;

    let ack = tokio::time::timeout(timeout, stream.next())
        .await
        .map_err(|_| anyhow!("timed out waiting for subscription ack"))?
        .ok_or_else(|| anyhow!("stream closed before subscription ack"))??;
    let ack: Value = match ack {
        Message::Text(text) => serde_json::from_str(&text)?,
        other => anyhow::bail!("unexpected subscription ack frame: {:?}", other),
    };
    let subscription_id = ack
        .get("result")
        .and_then(|r| r.as_str())
        .ok_or_else(|| anyhow!("subscription rejected: {}", ack))?
        .to_string();
    tracing::info!(subscription = %subscription_id, "newHeads subscription established");

    let watcher = BlockWatcher::new();
    let handle = watcher.clone();
    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Some(height) = parse_new_head(&text) {
                        handle.notify_block(height);
                    }
                }
                Ok(Message::Ping(payload)) => {
                    if stream.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
        tracing::warn!("newHeads subscription ended");
        handle.close();
    });

    Ok(watcher)
}

/// Pull the block number out of a newHeads notification, if this frame is
/// one.
fn parse_new_head(text: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("method")?.as_str()? != "eth_subscription" {
        return None;
    }
    let number = value.get("params")?.get("result")?.get("number")?.as_str()?;
    parse_hex_u64(number).ok()
}
