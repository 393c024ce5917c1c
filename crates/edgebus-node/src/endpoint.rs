//! Endpoint role: answers requests addressed to this node.

use crate::announce::{self, InspectFn};
use crate::connection::{Connection, ConnectionError, Delivery};
use crate::seq::SequenceIds;
use edgebus_proto::address::AddressError;
use edgebus_proto::topics::{self, TopicError};
use edgebus_proto::{ControlVar, Message, SourceAddress};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Attempts before a failed reply publish is dropped. Publish failures here
/// are transport hiccups, not business errors; the caller's timeout covers
/// the lost reply.
const REPLY_PUBLISH_ATTEMPTS: u32 = 3;
const REPLY_PUBLISH_DELAY: Duration = Duration::from_millis(100);

/// Request handler mapping an inbound message to a reply body.
pub type RequestHandler = Arc<dyn Fn(Message) -> Vec<u8> + Send + Sync>;

/// Endpoint construction options.
#[derive(Default)]
pub struct EndpointOptions {
    /// Optional self-description producer; when set, the inspect document
    /// is broadcast in a startup burst.
    pub inspect_fn: Option<InspectFn>,
}

/// A request server bound to one node.
pub struct Endpoint {
    connection: Arc<Connection>,
    node_id: String,
    sequence_ids: Arc<SequenceIds>,
    opts: EndpointOptions,
    handler: Option<RequestHandler>,
    listen_filter: Option<String>,
    recv_task: Option<JoinHandle<()>>,
    announce_task: Option<JoinHandle<()>>,
}

impl Endpoint {
    pub(crate) fn new(
        connection: Arc<Connection>,
        node_id: String,
        sequence_ids: Arc<SequenceIds>,
        opts: EndpointOptions,
    ) -> Self {
        Self {
            connection,
            node_id,
            sequence_ids,
            opts,
            handler: None,
            listen_filter: None,
            recv_task: None,
            announce_task: None,
        }
    }

    /// The owning node id.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Install the request handler. Must be called before [`Self::startup`].
    pub fn serve(&mut self, handler: impl Fn(Message) -> Vec<u8> + Send + Sync + 'static) {
        self.handler = Some(Arc::new(handler));
    }

    /// Build a data message sourced `nodeId:virtualId` with a fresh
    /// sequence id.
    ///
    /// # Errors
    ///
    /// Returns error if `virtual_id` contains a reserved character.
    pub fn next_message(&self, virtual_id: &str, body: Vec<u8>) -> Result<Message, AddressError> {
        let source = SourceAddress::new(&self.node_id, virtual_id)?;
        Ok(Message::data(
            source.to_string(),
            self.sequence_ids.next(),
            body,
        ))
    }

    /// Subscribe to this node's request topic and start answering.
    ///
    /// Each delivery is handled on its own task, so one slow request cannot
    /// starve the others on the same subscription.
    ///
    /// # Errors
    ///
    /// Returns error if no handler was installed or the subscription fails.
    pub async fn startup(&mut self) -> Result<(), EndpointError> {
        let handler = self.handler.clone().ok_or(EndpointError::NoHandler)?;
        let filter = topics::request_listen(&self.node_id)?;
        let mut deliveries = self.connection.subscribe(&filter).await?;

        let connection = Arc::clone(&self.connection);
        let node_id = self.node_id.clone();
        self.recv_task = Some(tokio::spawn(async move {
            while let Some(delivery) = deliveries.recv().await {
                tokio::spawn(handle_request(
                    Arc::clone(&connection),
                    node_id.clone(),
                    Arc::clone(&handler),
                    delivery,
                ));
            }
        }));

        if let Some(inspect_fn) = &self.opts.inspect_fn {
            self.announce_task = Some(announce::spawn_inspect_burst(
                Arc::clone(&self.connection),
                self.node_id.clone(),
                Arc::clone(inspect_fn),
            ));
        }

        self.listen_filter = Some(filter);
        tracing::info!(node_id = %self.node_id, "endpoint started");
        Ok(())
    }

    /// Stop accepting requests and cancel the scheduled announcements.
    /// Requests already being handled run to completion.
    pub async fn shutdown(&mut self) {
        if let Some(task) = self.announce_task.take() {
            task.abort();
        }
        if let Some(task) = self.recv_task.take() {
            task.abort();
        }
        if let Some(filter) = self.listen_filter.take() {
            if let Err(err) = self.connection.unsubscribe(&filter).await {
                tracing::warn!(filter, error = %err, "unsubscribe failed during shutdown");
            }
        }
        tracing::info!(node_id = %self.node_id, "endpoint stopped");
    }
}

async fn handle_request(
    connection: Arc<Connection>,
    node_id: String,
    handler: RequestHandler,
    delivery: Delivery,
) {
    if !Message::validate(&delivery.payload) {
        tracing::warn!(topic = %delivery.topic, "discarding foreign frame");
        return;
    }
    let request = match Message::decode(&delivery.payload) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!(topic = %delivery.topic, error = %err, "discarding undecodable frame");
            return;
        }
    };
    let Some(caller) = topics::caller_from_request(&delivery.topic) else {
        tracing::warn!(topic = %delivery.topic, "request topic has no caller segment");
        return;
    };

    let sequence_id = request.sequence_id;
    let reply = match request.control {
        ControlVar::Ping => Message::pong(node_id.as_str(), sequence_id),
        ControlVar::Data => {
            let body = handler(request);
            Message::data(node_id.as_str(), sequence_id, body)
        }
        ControlVar::Pong => {
            tracing::debug!(topic = %delivery.topic, "ignoring stray pong");
            return;
        }
    };

    let reply_topic = match topics::reply_send(caller, &node_id) {
        Ok(topic) => topic,
        Err(err) => {
            tracing::warn!(caller, error = %err, "cannot build reply topic");
            return;
        }
    };

    publish_reply(&connection, &reply_topic, reply.encode()).await;
}

/// Publish a reply with bounded retries and a short fixed delay between
/// attempts.
async fn publish_reply(connection: &Connection, topic: &str, payload: Vec<u8>) {
    for attempt in 1..=REPLY_PUBLISH_ATTEMPTS {
        match connection.publish(topic, false, payload.clone()).await {
            Ok(()) => return,
            Err(err) => {
                tracing::warn!(topic, attempt, error = %err, "reply publish failed");
                if attempt < REPLY_PUBLISH_ATTEMPTS {
                    tokio::time::sleep(REPLY_PUBLISH_DELAY).await;
                }
            }
        }
    }
    tracing::error!(
        topic,
        attempts = REPLY_PUBLISH_ATTEMPTS,
        "reply dropped after repeated publish failures"
    );
}

/// Errors for endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// Startup requires a handler
    #[error("no request handler installed")]
    NoHandler,
    /// Topic construction failed
    #[error(transparent)]
    Topic(#[from] TopicError),
    /// Broker operation failed
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
