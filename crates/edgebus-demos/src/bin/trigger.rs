//! Demo trigger: publishes a wall-clock timestamp event every second.

use anyhow::Result;
use edgebus_node::{Globals, NodeContext, TriggerOptions};
use edgebus_proto::{Inspect, NodeType, VirtualNodeInfo};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let globals = Globals::from_env()?;
    let ctx = NodeContext::connect("demo-trigger", NodeType::Trigger, globals).await?;
    tracing::info!(node_id = %ctx.node_id(), "trigger node connected");

    let mut trigger = ctx.new_trigger(TriggerOptions {
        topic: "demo/timer".to_string(),
        inspect_fn: Some(Arc::new(|| Inspect {
            vendor: "edgebus".to_string(),
            driver_name: "demo-trigger".to_string(),
            virtual_nodes: vec![VirtualNodeInfo {
                virtual_id: "timer".to_string(),
                desc: "1s wall-clock ticker".to_string(),
            }],
            ..Inspect::new(NodeType::Trigger)
        })),
    });
    trigger.startup()?;

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now_ms = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis();
                if let Err(err) = trigger
                    .publish_event("timer", now_ms.to_string().into_bytes())
                    .await
                {
                    tracing::error!(error = %err, "failed to publish event");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    trigger.shutdown();
    ctx.shutdown().await;
    Ok(())
}
