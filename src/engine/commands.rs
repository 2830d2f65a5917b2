//! Commands processed by the engine actor
//!
//! Fire-and-forget commands carry inbound bytes, subscriptions and session
//! traffic. Commands with a `response` channel are request-response and are
//! answered once the actor has applied them.

use bytes::Bytes;
use tokio::sync::oneshot;

use super::correlator::Waiter;
use super::fanout::{SessionId, SessionSender};
use super::registry::Binding;
use crate::mirror::{ChannelRef, ChannelSend, Device, Input, MirrorError};

#[derive(Debug)]
pub enum EngineCommand {
    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------
    /// Raw chunk read from the upstream socket
    Inbound(Bytes),

    /// Upstream socket reached EOF or failed
    UpstreamClosed,

    // -------------------------------------------------------------------------
    // Correlation and subscriptions
    // -------------------------------------------------------------------------
    /// Transmit `get <path>` and resolve `waiter` with the response
    Get { path: String, waiter: Waiter },

    /// Transmit `subscribe <path>` and bind its updates to mirror fields
    Subscribe { path: String, bindings: Vec<Binding> },

    // -------------------------------------------------------------------------
    // Mirror population (discovery)
    // -------------------------------------------------------------------------
    AddDevice {
        device: Device,
        response: oneshot::Sender<Result<(), MirrorError>>,
    },

    AddInput {
        device_id: String,
        input: Input,
        response: oneshot::Sender<Result<(), MirrorError>>,
    },

    AddSend {
        owner: ChannelRef,
        send: ChannelSend,
        response: oneshot::Sender<Result<(), MirrorError>>,
    },

    /// Copy of the current mirror
    Snapshot {
        response: oneshot::Sender<Vec<Device>>,
    },

    // -------------------------------------------------------------------------
    // Sessions
    // -------------------------------------------------------------------------
    /// Register a session; its first message is the `Devices` snapshot
    Join {
        tx: SessionSender,
        response: oneshot::Sender<SessionId>,
    },

    Leave { id: SessionId },

    /// Raw write message received from a session
    ClientMessage { id: SessionId, text: String },

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------
    Shutdown,
}
