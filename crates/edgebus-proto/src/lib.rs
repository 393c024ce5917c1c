//! # Edgebus Protocol
//!
//! Wire protocol definitions and MQTT topic scheme for the edgebus
//! messaging substrate.
//!
//! ## Frame
//!
//! Every payload crossing the broker is wrapped in a compact binary frame:
//!
//! ```text
//! [magic:1][version:1][control:1][sequence_id:8][source:N][0x00][body:rest]
//! ```
//!
//! ## MQTT Topics
//!
//! All topics live under the fixed root `edgebus/`, one sub-namespace per
//! logical channel (events, values, requests, replies, liveness, inspect).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod frame;
pub mod inspect;
pub mod topics;

pub use address::SourceAddress;
pub use frame::{ControlVar, FrameError, Message};
pub use inspect::{Inspect, NodeType, Statistics, VirtualNodeInfo};
