//! State-synchronization engine
//!
//! One engine instance exists per upstream connection. It owns the mirror,
//! the pending-request map, the subscription registry and the session set,
//! and processes every inbound chunk, discovery step and session message
//! sequentially on a single actor task.

mod actor;
mod commands;
mod correlator;
pub mod discovery;
mod fanout;
mod handle;
mod registry;
mod write;


use serde_json::Value;
use thiserror::Error;

use crate::mirror::MirrorError;
use crate::protocol::CodecError;

pub use actor::Engine;
pub use commands::EngineCommand;
pub use correlator::{Correlator, Waiter};
pub use discovery::{DeviceTreeBuilder, DiscoverySummary};
pub use fanout::{Fanout, SessionId, SessionSender};
pub use handle::EngineHandle;
pub use registry::{Binding, SubscriptionRegistry};
pub use write::{set_value, WriteKind, WriteRequest};

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine stopped, usually because the upstream connection closed
    #[error("upstream connection closed")]
    Closed,

    #[error("framing error: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Mirror(#[from] MirrorError),
}

/// Device discovery errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("{path}: missing required property '{property}'")]
    MissingProperty { path: String, property: &'static str },

    #[error("{path}: property '{property}' has unexpected value {value}")]
    InvalidProperty {
        path: String,
        property: &'static str,
        value: Value,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl DiscoveryError {
    /// Whether discovery as a whole must stop (as opposed to skipping one branch)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DiscoveryError::Engine(EngineError::Closed | EngineError::Codec(_))
        )
    }
}

/// Session write message errors
#[derive(Debug, Error)]
pub enum ClientMessageError {
    #[error("malformed session message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown session message type '{0}'")]
    UnknownType(String),
}
