//! Demo driver: consumes the demo trigger's events and measures echo
//! round trips against the demo endpoint.

use anyhow::Result;
use edgebus_node::{DriverOptions, Globals, NodeContext};
use edgebus_proto::NodeType;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const ECHO_ENDPOINT: &str = "demo-endpoint";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let globals = Globals::from_env()?;
    let ctx = NodeContext::connect("demo-driver", NodeType::Driver, globals).await?;
    tracing::info!(node_id = %ctx.node_id(), "driver node connected");

    let mut driver = ctx.new_driver(DriverOptions {
        topics: vec!["demo/timer".to_string()],
    });
    driver.process(|message| {
        tracing::info!(
            source = %message.source,
            body = %String::from_utf8_lossy(&message.body),
            "event received"
        );
    });
    driver.startup().await?;

    // Warm the channel up before the first measured call.
    if let Err(err) = driver.ping(ECHO_ENDPOINT, Duration::from_secs(3)).await {
        tracing::warn!(error = %err, "endpoint not answering pings yet");
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let request = driver.next_message("", b"echo?".to_vec())?;
                let started = Instant::now();
                match driver.execute(ECHO_ENDPOINT, request, Duration::from_secs(3)).await {
                    Ok(reply) => tracing::info!(
                        elapsed = ?started.elapsed(),
                        len = reply.body.len(),
                        "echo round trip"
                    ),
                    Err(err) => tracing::error!(error = %err, "echo call failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    driver.shutdown().await;
    ctx.shutdown().await;
    Ok(())
}
