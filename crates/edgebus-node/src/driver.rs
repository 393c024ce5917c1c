//! Driver role: issues correlated calls and consumes events.

use crate::config::Globals;
use crate::connection::{Connection, ConnectionError};
use crate::router::Router;
use crate::seq::SequenceIds;
use edgebus_proto::address::AddressError;
use edgebus_proto::topics::{self, TopicError};
use edgebus_proto::{ControlVar, Message, SourceAddress, Statistics};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Event handler invoked for every decoded event/value delivery.
pub type EventHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Driver construction options.
#[derive(Default)]
pub struct DriverOptions {
    /// User topic patterns of interest, e.g. `door/+`. Both the event and
    /// the value channel of each pattern are subscribed.
    pub topics: Vec<String>,
}

/// A request client and event consumer bound to one node.
pub struct Driver {
    connection: Arc<Connection>,
    globals: Arc<Globals>,
    node_id: String,
    sequence_ids: Arc<SequenceIds>,
    opts: DriverOptions,
    router: Arc<Router>,
    handler: Option<EventHandler>,
    stats: Arc<DriverStats>,
    reply_filter: Option<String>,
    event_filters: Vec<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl Driver {
    pub(crate) fn new(
        connection: Arc<Connection>,
        globals: Arc<Globals>,
        node_id: String,
        sequence_ids: Arc<SequenceIds>,
        opts: DriverOptions,
    ) -> Self {
        let router = Arc::new(Router::new(globals.router_miss_threshold));
        Self {
            connection,
            globals,
            node_id,
            sequence_ids,
            opts,
            router,
            handler: None,
            stats: Arc::new(DriverStats::new()),
            reply_filter: None,
            event_filters: Vec::new(),
            tasks: Vec::new(),
        }
    }

    /// The owning node id.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Install the event handler fed by the subscribed event/value topics.
    /// Must be called before [`Self::startup`] for event consumption to
    /// begin.
    pub fn process(&mut self, handler: impl Fn(Message) + Send + Sync + 'static) {
        self.handler = Some(Arc::new(handler));
    }

    /// Build a data message with a fresh sequence id, sourced from this
    /// node (optionally a virtual sub-device of it).
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

    /// Subscribe the reply channel, the configured event topics, and start
    /// the statistics ticker.
    ///
    /// # Errors
    ///
    /// Returns error if a topic is rejected or a subscription fails.
    pub async fn startup(&mut self) -> Result<(), DriverError> {
        let reply_filter = topics::reply_listen(&self.node_id)?;
        let mut replies = self.connection.subscribe(&reply_filter).await?;
        let router = Arc::clone(&self.router);
        let stats = Arc::clone(&self.stats);
        self.tasks.push(tokio::spawn(async move {
            while let Some(delivery) = replies.recv().await {
                stats.record(delivery.payload.len());
                router.dispatch(&delivery.topic, &delivery.payload);
            }
        }));

        if let Some(handler) = self.handler.clone() {
            for user_topic in &self.opts.topics {
                for filter in [topics::events(user_topic)?, topics::values(user_topic)?] {
                    let mut deliveries = self.connection.subscribe(&filter).await?;
                    let handler = Arc::clone(&handler);
                    let stats = Arc::clone(&self.stats);
                    self.tasks.push(tokio::spawn(async move {
                        while let Some(delivery) = deliveries.recv().await {
                            if !Message::validate(&delivery.payload) {
                                tracing::warn!(topic = %delivery.topic, "discarding foreign frame");
                                continue;
                            }
                            match Message::decode(&delivery.payload) {
                                Ok(message) => {
                                    stats.record(delivery.payload.len());
                                    handler(message);
                                }
                                Err(err) => {
                                    tracing::warn!(
                                        topic = %delivery.topic,
                                        error = %err,
                                        "discarding undecodable frame"
                                    );
                                }
                            }
                        }
                    }));
                    self.event_filters.push(filter);
                }
            }
        }

        self.tasks.push(spawn_statistics_ticker(
            Arc::clone(&self.connection),
            self.node_id.clone(),
            Arc::clone(&self.stats),
            self.globals.statistics_interval,
        )?);

        self.reply_filter = Some(reply_filter);
        tracing::info!(node_id = %self.node_id, "driver started");
        Ok(())
    }

    /// Issue a correlated request; the callback fires with the reply or
    /// with the publish error.
    ///
    /// On publish failure the callback is invoked immediately and no
    /// pending call is registered.
    ///
    /// # Errors
    ///
    /// Returns error if a topic cannot be built from the callee id.
    pub async fn call<F>(&self, callee: &str, request: Message, callback: F) -> Result<(), CallError>
    where
        F: FnOnce(Result<Message, CallError>) + Send + 'static,
    {
        let request_topic = topics::request_send(callee, &self.node_id)?;
        let reply_topic = topics::reply_send(&self.node_id, callee)?;
        let payload = request.encode();
        self.stats.record(payload.len());

        if let Err(err) = self.connection.publish(&request_topic, false, payload).await {
            callback(Err(CallError::Transport(err.to_string())));
            return Ok(());
        }

        self.router.register(
            &reply_topic,
            request.sequence_id,
            Box::new(move |reply| callback(Ok(reply))),
        );
        Ok(())
    }

    /// Issue a request and wait for the reply or the timeout, whichever
    /// comes first.
    ///
    /// On timeout the abandoned pending call is left to the router's
    /// miss-count reaping; a late reply is silently dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Timeout`] when the wait expires, the transport
    /// error when the publish fails, or a topic error for a malformed
    /// callee id.
    pub async fn execute(
        &self,
        callee: &str,
        request: Message,
        timeout: Duration,
    ) -> Result<Message, CallError> {
        let (tx, rx) = oneshot::channel();
        self.call(callee, request, move |result| {
            let _ = tx.send(result);
        })
        .await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CallError::Canceled),
            Err(_) => Err(CallError::Timeout(timeout)),
        }
    }

    /// Warm up the channel to a callee with a ping/pong probe.
    ///
    /// # Errors
    ///
    /// Returns error if the probe fails, times out, or the callee answers
    /// with something other than a pong.
    pub async fn ping(&self, callee: &str, timeout: Duration) -> Result<(), CallError> {
        let probe = Message::ping(self.node_id.as_str(), self.sequence_ids.next());
        let reply = self.execute(callee, probe, timeout).await?;
        if reply.control == ControlVar::Pong {
            Ok(())
        } else {
            Err(CallError::UnexpectedReply)
        }
    }

    /// Current statistics snapshot.
    #[must_use]
    pub fn statistics(&self) -> Statistics {
        self.stats.snapshot()
    }

    /// Stop consuming deliveries and cancel the statistics ticker.
    pub async fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(filter) = self.reply_filter.take() {
            if let Err(err) = self.connection.unsubscribe(&filter).await {
                tracing::warn!(filter, error = %err, "unsubscribe failed during shutdown");
            }
        }
        for filter in self.event_filters.drain(..) {
            if let Err(err) = self.connection.unsubscribe(&filter).await {
                tracing::warn!(filter, error = %err, "unsubscribe failed during shutdown");
            }
        }
        tracing::info!(node_id = %self.node_id, "driver stopped");
    }
}

fn spawn_statistics_ticker(
    connection: Arc<Connection>,
    node_id: String,
    stats: Arc<DriverStats>,
    interval: Duration,
) -> Result<JoinHandle<()>, DriverError> {
    let topic = topics::statistics(&node_id)?;
    Ok(tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let snapshot = stats.snapshot();
            match snapshot.to_json() {
                Ok(payload) => {
                    if let Err(err) = connection.publish(&topic, false, payload).await {
                        tracing::warn!(topic, error = %err, "failed to publish statistics");
                    }
                }
                Err(err) => tracing::warn!(error = %err, "failed to serialize statistics"),
            }
        }
    }))
}

struct DriverStats {
    started: Instant,
    messages: AtomicU64,
    bytes: AtomicU64,
}

impl DriverStats {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            messages: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    fn record(&self, payload_len: usize) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.bytes
            .fetch_add(u64::try_from(payload_len).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    fn snapshot(&self) -> Statistics {
        Statistics {
            uptime_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            message_count: self.messages.load(Ordering::Relaxed),
            byte_count: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// Errors returned to callers of [`Driver::call`] and [`Driver::execute`].
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// Request publish failed
    #[error("request publish failed: {0}")]
    Transport(String),
    /// No reply within the deadline; always recoverable by retrying
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    /// Completion channel dropped before resolving
    #[error("call was canceled")]
    Canceled,
    /// A probe was answered with an unexpected control byte
    #[error("unexpected reply control byte")]
    UnexpectedReply,
    /// Topic construction failed
    #[error(transparent)]
    Topic(#[from] TopicError),
}

/// Errors for driver lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Topic construction failed
    #[error(transparent)]
    Topic(#[from] TopicError),
    /// Broker operation failed
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
