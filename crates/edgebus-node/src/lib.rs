//! # Edgebus Node
//!
//! Runtime library for edge nodes exchanging events and request/reply
//! calls over a shared MQTT broker, with no process needing a direct
//! network address for another.
//!
//! ## Architecture
//!
//! A hosting process builds one [`NodeContext`], which dials the broker
//! with retry and a retained last-will, then constructs roles from it:
//!
//! - [`Trigger`]: publishes events/values under its topic
//! - [`Endpoint`]: answers requests addressed to this node
//! - [`Driver`]: issues correlated requests and consumes events
//!
//! Replies are matched to calls by sequence id in the driver's
//! [`Router`]; delivery order is never relied upon. Triggers and
//! endpoints broadcast a self-description document at startup so fleet
//! inventory can discover their virtual sub-devices.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod announce;
pub mod config;
pub mod connection;
pub mod context;
pub mod driver;
pub mod endpoint;
pub mod router;
pub mod seq;
pub mod trigger;

pub use announce::InspectFn;
pub use config::Globals;
pub use connection::{Connection, ConnectionError, Delivery};
pub use context::{ContextError, NodeContext};
pub use driver::{CallError, Driver, DriverOptions};
pub use endpoint::{Endpoint, EndpointOptions};
pub use router::Router;
pub use seq::SequenceIds;
pub use trigger::{Trigger, TriggerOptions};
