use edgebus_node::{DriverOptions, EndpointOptions, Globals, NodeContext, TriggerOptions};
use edgebus_proto::NodeType;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

fn integration_globals() -> Option<Globals> {
    if std::env::var("EDGEBUS_INTEGRATION").is_err() {
        eprintln!("Skipping integration test; set EDGEBUS_INTEGRATION=1 to run");
        return None;
    }
    let mut globals = Globals::from_env().expect("invalid EDGEBUS_* environment");
    globals.mqtt_max_retry = 3;
    Some(globals)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn event_roundtrip() {
    let Some(globals) = integration_globals() else {
        return;
    };
    let suffix = Uuid::new_v4().simple().to_string();

    let trigger_ctx = NodeContext::connect(
        format!("it-trigger-{suffix}"),
        NodeType::Trigger,
        globals.clone(),
    )
    .await
    .unwrap();
    let driver_ctx = NodeContext::connect(format!("it-driver-{suffix}"), NodeType::Driver, globals)
        .await
        .unwrap();

    let mut driver = driver_ctx.new_driver(DriverOptions {
        topics: vec![format!("it/{suffix}/door")],
    });
    let (tx, mut rx) = mpsc::unbounded_channel();
    driver.process(move |message| {
        let _ = tx.send(message);
    });
    driver.startup().await.unwrap();

    let mut trigger = trigger_ctx.new_trigger(TriggerOptions {
        topic: format!("it/{suffix}/door"),
        inspect_fn: None,
    });
    trigger.startup().unwrap();

    // Let the subscription settle before publishing.
    tokio::time::sleep(Duration::from_millis(200)).await;
    trigger.publish_event("door1", b"OPEN".to_vec()).await.unwrap();

    let message = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timeout waiting for event")
        .expect("event channel closed");

    assert_eq!(message.source, format!("{}:door1", trigger_ctx.node_id()));
    assert_eq!(message.body, b"OPEN");

    trigger.shutdown();
    driver.shutdown().await;
    trigger_ctx.shutdown().await;
    driver_ctx.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn execute_echo_roundtrip() {
    let Some(globals) = integration_globals() else {
        return;
    };
    let suffix = Uuid::new_v4().simple().to_string();
    let endpoint_node = format!("it-echo-{suffix}");

    let endpoint_ctx =
        NodeContext::connect(endpoint_node.clone(), NodeType::Endpoint, globals.clone())
            .await
            .unwrap();
    let driver_ctx = NodeContext::connect(format!("it-caller-{suffix}"), NodeType::Driver, globals)
        .await
        .unwrap();

    let mut endpoint = endpoint_ctx.new_endpoint(EndpointOptions::default());
    endpoint.serve(|request| request.body);
    endpoint.startup().await.unwrap();

    let mut driver = driver_ctx.new_driver(DriverOptions::default());
    driver.startup().await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    driver
        .ping(&endpoint_node, Duration::from_secs(2))
        .await
        .unwrap();

    let request = driver.next_message("", b"knock".to_vec()).unwrap();
    let sequence_id = request.sequence_id;
    let reply = driver
        .execute(&endpoint_node, request, Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(reply.sequence_id, sequence_id);
    assert_eq!(reply.body, b"knock");

    endpoint.shutdown().await;
    driver.shutdown().await;
    endpoint_ctx.shutdown().await;
    driver_ctx.shutdown().await;
}
