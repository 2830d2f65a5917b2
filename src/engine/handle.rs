//! EngineHandle - public API for the engine actor
//!
//! Fire-and-forget methods for transport and session traffic, async methods
//! with oneshot channels where the caller needs an answer.

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use super::commands::EngineCommand;
use super::fanout::{SessionId, SessionSender};
use super::registry::Binding;
use super::EngineError;
use crate::mirror::{ChannelRef, ChannelSend, Device, Input};

#[derive(Debug, Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    pub fn new(cmd_tx: mpsc::UnboundedSender<EngineCommand>) -> Self {
        Self { cmd_tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(make(tx)).map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    // =========================================================================
    // Transport (fire-and-forget)
    // =========================================================================

    /// Hand a chunk read from the upstream socket to the engine.
    /// Returns false once the engine has stopped.
    pub fn inbound(&self, chunk: Bytes) -> bool {
        self.cmd_tx.send(EngineCommand::Inbound(chunk)).is_ok()
    }

    /// Report that the upstream socket closed
    pub fn upstream_closed(&self) {
        let _ = self.cmd_tx.send(EngineCommand::UpstreamClosed);
    }

    // =========================================================================
    // Correlation and subscriptions
    // =========================================================================

    /// Issue `get <path>` and wait for the response on that path.
    ///
    /// There is no timeout: the future completes when a response arrives or
    /// fails with `EngineError::Closed` when the engine stops.
    pub async fn get(&self, path: impl Into<String>) -> Result<Value, EngineError> {
        let path = path.into();
        self.request(|waiter| EngineCommand::Get { path, waiter }).await
    }

    pub fn subscribe(&self, path: String, bindings: Vec<Binding>) -> Result<(), EngineError> {
        self.cmd_tx
            .send(EngineCommand::Subscribe { path, bindings })
            .map_err(|_| EngineError::Closed)
    }

    // =========================================================================
    // Mirror
    // =========================================================================

    pub async fn add_device(&self, device: Device) -> Result<(), EngineError> {
        Ok(self
            .request(|response| EngineCommand::AddDevice { device, response })
            .await??)
    }

    pub async fn add_input(&self, device_id: &str, input: Input) -> Result<(), EngineError> {
        let device_id = device_id.to_string();
        Ok(self
            .request(|response| EngineCommand::AddInput {
                device_id,
                input,
                response,
            })
            .await??)
    }

    pub async fn add_send(&self, owner: &ChannelRef, send: ChannelSend) -> Result<(), EngineError> {
        let owner = owner.clone();
        Ok(self
            .request(|response| EngineCommand::AddSend {
                owner,
                send,
                response,
            })
            .await??)
    }

    pub async fn snapshot(&self) -> Result<Vec<Device>, EngineError> {
        self.request(|response| EngineCommand::Snapshot { response })
            .await
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Register a session. The `Devices` snapshot is the first message `tx`
    /// receives.
    pub async fn join(&self, tx: SessionSender) -> Result<SessionId, EngineError> {
        self.request(|response| EngineCommand::Join { tx, response })
            .await
    }

    pub fn leave(&self, id: SessionId) {
        let _ = self.cmd_tx.send(EngineCommand::Leave { id });
    }

    /// Forward a raw session message; invalid ones are logged by the engine
    pub fn client_message(&self, id: SessionId, text: String) {
        let _ = self.cmd_tx.send(EngineCommand::ClientMessage { id, text });
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn is_alive(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(EngineCommand::Shutdown);
    }
}
