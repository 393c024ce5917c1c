//! Startup self-description announcements.
//!
//! Subscribers that connect slightly after a role does would miss a single
//! inspect broadcast, so the document is re-published on a bounded schedule
//! of widening intervals. This is a settling burst, not a perpetual
//! heartbeat; liveness is covered by the retained offline/online markers.

use crate::connection::Connection;
use edgebus_proto::topics::TOPIC_NODES_INSPECT;
use edgebus_proto::Inspect;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Callback producing the node's current self-description.
pub type InspectFn = Arc<dyn Fn() -> Inspect + Send + Sync>;

const ANNOUNCE_DELAYS: [Duration; 5] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

/// Publish the inspect document immediately, then re-publish at widening
/// intervals. The returned handle is aborted on role shutdown.
pub(crate) fn spawn_inspect_burst(
    connection: Arc<Connection>,
    node_id: String,
    inspect_fn: InspectFn,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        publish_inspect(&connection, &node_id, &inspect_fn).await;
        for delay in ANNOUNCE_DELAYS {
            tokio::time::sleep(delay).await;
            publish_inspect(&connection, &node_id, &inspect_fn).await;
        }
    })
}

async fn publish_inspect(connection: &Connection, node_id: &str, inspect_fn: &InspectFn) {
    let inspect = inspect_fn().namespaced(node_id);
    match inspect.to_json() {
        Ok(payload) => {
            if let Err(err) = connection.publish(TOPIC_NODES_INSPECT, false, payload).await {
                tracing::warn!(node_id, error = %err, "failed to publish inspect document");
            } else {
                tracing::debug!(node_id, "inspect document published");
            }
        }
        Err(err) => tracing::warn!(node_id, error = %err, "failed to serialize inspect document"),
    }
}
