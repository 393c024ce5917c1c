//! Trigger role: publishes events and values.

use crate::announce::{self, InspectFn};
use crate::config::Globals;
use crate::connection::{Connection, ConnectionError};
use crate::seq::SequenceIds;
use edgebus_proto::address::AddressError;
use edgebus_proto::topics::{self, TopicError};
use edgebus_proto::{Message, SourceAddress};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Trigger construction options.
pub struct TriggerOptions {
    /// User topic events and values are published under.
    pub topic: String,
    /// Optional self-description producer; when set, the inspect document
    /// is broadcast in a startup burst.
    pub inspect_fn: Option<InspectFn>,
}

/// An event source bound to one node.
pub struct Trigger {
    connection: Arc<Connection>,
    globals: Arc<Globals>,
    node_id: String,
    sequence_ids: Arc<SequenceIds>,
    opts: TriggerOptions,
    events_topic: Option<String>,
    values_topic: Option<String>,
    announce_task: Option<JoinHandle<()>>,
}

impl Trigger {
    pub(crate) fn new(
        connection: Arc<Connection>,
        globals: Arc<Globals>,
        node_id: String,
        sequence_ids: Arc<SequenceIds>,
        opts: TriggerOptions,
    ) -> Self {
        Self {
            connection,
            globals,
            node_id,
            sequence_ids,
            opts,
            events_topic: None,
            values_topic: None,
            announce_task: None,
        }
    }

    /// The owning node id.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
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

    /// Resolve the topic strings and kick off the announcement burst.
    ///
    /// # Errors
    ///
    /// Returns error if the configured user topic is rejected.
    pub fn startup(&mut self) -> Result<(), TriggerError> {
        self.events_topic = Some(topics::events(&self.opts.topic)?);
        self.values_topic = Some(topics::values(&self.opts.topic)?);

        if let Some(inspect_fn) = &self.opts.inspect_fn {
            self.announce_task = Some(announce::spawn_inspect_burst(
                Arc::clone(&self.connection),
                self.node_id.clone(),
                Arc::clone(inspect_fn),
            ));
        }

        tracing::info!(node_id = %self.node_id, topic = %self.opts.topic, "trigger started");
        Ok(())
    }

    /// Publish an event from a virtual sub-device.
    ///
    /// # Errors
    ///
    /// Returns error if the role has not started, the virtual id is
    /// malformed, or the publish fails.
    pub async fn publish_event(&self, virtual_id: &str, body: Vec<u8>) -> Result<(), TriggerError> {
        let topic = self.events_topic.as_ref().ok_or(TriggerError::NotStarted)?;
        self.publish_message(topic, virtual_id, body).await
    }

    /// Publish a sampled value from a virtual sub-device.
    ///
    /// # Errors
    ///
    /// Returns error if the role has not started, the virtual id is
    /// malformed, or the publish fails.
    pub async fn publish_value(&self, virtual_id: &str, body: Vec<u8>) -> Result<(), TriggerError> {
        let topic = self.values_topic.as_ref().ok_or(TriggerError::NotStarted)?;
        self.publish_message(topic, virtual_id, body).await
    }

    async fn publish_message(
        &self,
        topic: &str,
        virtual_id: &str,
        body: Vec<u8>,
    ) -> Result<(), TriggerError> {
        let message = self.next_message(virtual_id, body)?;
        self.connection
            .publish(topic, self.globals.mqtt_retained, message.encode())
            .await?;
        Ok(())
    }

    /// Cancel the scheduled announcements.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.announce_task.take() {
            task.abort();
        }
        tracing::info!(node_id = %self.node_id, "trigger stopped");
    }
}

/// Errors for trigger operations.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    /// Operation requires a completed startup
    #[error("trigger has not been started")]
    NotStarted,
    /// Configured or supplied topic segment rejected
    #[error(transparent)]
    Topic(#[from] TopicError),
    /// Virtual id rejected
    #[error(transparent)]
    Address(#[from] AddressError),
    /// Broker publish failed
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
