//! Demo endpoint: echoes every request body back to the caller.

use anyhow::Result;
use edgebus_node::{EndpointOptions, Globals, NodeContext};
use edgebus_proto::{Inspect, NodeType, VirtualNodeInfo};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let globals = Globals::from_env()?;
    let ctx = NodeContext::connect("demo-endpoint", NodeType::Endpoint, globals).await?;
    tracing::info!(node_id = %ctx.node_id(), "endpoint node connected");

    let mut endpoint = ctx.new_endpoint(EndpointOptions {
        inspect_fn: Some(Arc::new(|| Inspect {
            vendor: "edgebus".to_string(),
            driver_name: "demo-endpoint".to_string(),
            virtual_nodes: vec![VirtualNodeInfo {
                virtual_id: "main".to_string(),
                desc: "echo endpoint".to_string(),
            }],
            ..Inspect::new(NodeType::Endpoint)
        })),
    });
    endpoint.serve(|request| {
        tracing::debug!(source = %request.source, len = request.body.len(), "echoing request");
        request.body
    });
    endpoint.startup().await?;

    ctx.term_await().await?;

    endpoint.shutdown().await;
    ctx.shutdown().await;
    Ok(())
}
