//! Node context: identity, configuration, and role construction.
//!
//! A hosting process builds one context, which owns the broker connection;
//! every role created from it shares that connection, the configuration,
//! and the sequence-id generator. There are no process-wide singletons.

use crate::config::Globals;
use crate::connection::{Connection, ConnectionError};
use crate::driver::{Driver, DriverOptions};
use crate::endpoint::{Endpoint, EndpointOptions};
use crate::seq::SequenceIds;
use crate::trigger::{Trigger, TriggerOptions};
use edgebus_proto::address::{self, AddressError};
use edgebus_proto::topics::{self, TopicError};
use edgebus_proto::{Message, NodeType, SourceAddress};
use std::sync::Arc;

/// Shared environment for the roles of one node.
pub struct NodeContext {
    globals: Arc<Globals>,
    node_id: String,
    role: NodeType,
    connection: Arc<Connection>,
    sequence_ids: Arc<SequenceIds>,
}

impl NodeContext {
    /// Validate the node id, dial the broker, and block until connected.
    ///
    /// The role type names the last-will topic; create one context per
    /// hosted role type when a process runs several.
    ///
    /// # Errors
    ///
    /// Returns error if the node id is malformed or the connect retries are
    /// exhausted.
    pub async fn connect(
        node_id: impl Into<String>,
        role: NodeType,
        globals: Globals,
    ) -> Result<Self, ContextError> {
        let node_id = node_id.into();
        if node_id.is_empty() {
            return Err(ContextError::Address(AddressError::EmptyNodeId));
        }
        address::validate_component(&node_id)?;

        let globals = Arc::new(globals);
        let mut connection = Connection::connect(&node_id, role, Arc::clone(&globals))?;
        connection.await_connected().await?;

        Ok(Self {
            sequence_ids: Arc::new(SequenceIds::new(&node_id)),
            connection: Arc::new(connection),
            globals,
            node_id,
            role,
        })
    }

    /// This node's id.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// The role type the context was connected as.
    #[must_use]
    pub fn role(&self) -> NodeType {
        self.role
    }

    /// The shared connection configuration.
    #[must_use]
    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    /// Create a trigger bound to this context.
    #[must_use]
    pub fn new_trigger(&self, opts: TriggerOptions) -> Trigger {
        Trigger::new(
            Arc::clone(&self.connection),
            Arc::clone(&self.globals),
            self.node_id.clone(),
            Arc::clone(&self.sequence_ids),
            opts,
        )
    }

    /// Create an endpoint bound to this context.
    #[must_use]
    pub fn new_endpoint(&self, opts: EndpointOptions) -> Endpoint {
        Endpoint::new(
            Arc::clone(&self.connection),
            self.node_id.clone(),
            Arc::clone(&self.sequence_ids),
            opts,
        )
    }

    /// Create a driver bound to this context.
    #[must_use]
    pub fn new_driver(&self, opts: DriverOptions) -> Driver {
        Driver::new(
            Arc::clone(&self.connection),
            Arc::clone(&self.globals),
            self.node_id.clone(),
            Arc::clone(&self.sequence_ids),
            opts,
        )
    }

    /// Build a data message with a fresh sequence id.
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

    /// Publish a state message for this node.
    ///
    /// # Errors
    ///
    /// Returns error if the publish fails.
    pub async fn publish_state(&self, payload: Vec<u8>) -> Result<(), ContextError> {
        let topic = topics::states(&self.node_id)?;
        self.connection.publish(&topic, false, payload).await?;
        Ok(())
    }

    /// Publish this node's property document, retained so late subscribers
    /// see the last value.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the publish fails.
    pub async fn publish_properties(&self, properties: &serde_json::Value) -> Result<(), ContextError> {
        let topic = topics::properties(&self.node_id)?;
        let payload =
            serde_json::to_vec(properties).map_err(|e| ContextError::Serialize(e.to_string()))?;
        self.connection.publish_retained(&topic, payload).await?;
        Ok(())
    }

    /// Block until the process receives an interrupt signal.
    ///
    /// # Errors
    ///
    /// Returns error if the signal listener cannot be installed.
    pub async fn term_await(&self) -> std::io::Result<()> {
        tokio::signal::ctrl_c().await?;
        tracing::debug!("interrupt signal received");
        Ok(())
    }

    /// Disconnect from the broker after the configured grace period.
    pub async fn shutdown(self) {
        self.connection.disconnect().await;
    }
}

/// Errors for context operations.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// Node id rejected
    #[error(transparent)]
    Address(#[from] AddressError),
    /// Topic construction failed
    #[error(transparent)]
    Topic(#[from] TopicError),
    /// Broker operation failed
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// Property document serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
}
