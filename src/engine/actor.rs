//! Engine - single owner of all synchronization state
//!
//! `Engine` holds the mirror, correlator, subscription registry, session set
//! and frame decoder. Its methods are synchronous; `run` wraps them in an
//! actor loop so that every mutation happens on one task, in arrival order.
//!
//! ```text
//!  upstream reader ──Inbound──┐
//!  discovery task ──Get/Add───┼──► command_rx ──► Engine ──► outbound (frames)
//!  sessions ──Join/Message────┘                     │
//!                                                   └──────► session channels
//! ```

use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::commands::EngineCommand;
use super::correlator::{Correlator, Waiter};
use super::fanout::{Fanout, SessionId, SessionSender};
use super::handle::EngineHandle;
use super::registry::{Binding, SubscriptionRegistry};
use super::write::{WriteKind, WriteRequest};
use super::{ClientMessageError, EngineError};
use crate::mirror::{ChannelRef, Mirror};
use crate::protocol::{Command, Frame, FrameDecoder, InputChange, ServerMessage};

pub struct Engine {
    mirror: Mirror,
    correlator: Correlator,
    registry: SubscriptionRegistry,
    fanout: Fanout,
    decoder: FrameDecoder,
    /// Encoded frames for the upstream writer, in transmit order
    outbound: mpsc::UnboundedSender<Bytes>,
    frame_count: u64,
}

impl Engine {
    pub fn new(outbound: mpsc::UnboundedSender<Bytes>, buffer_capacity: usize) -> Self {
        Self {
            mirror: Mirror::new(),
            correlator: Correlator::new(),
            registry: SubscriptionRegistry::new(),
            fanout: Fanout::new(),
            decoder: FrameDecoder::new(buffer_capacity),
            outbound,
            frame_count: 0,
        }
    }

    /// Spawn the engine actor.
    ///
    /// The returned task finishes with `Err(EngineError::Closed)` when the
    /// upstream goes away, with a codec error on a fatal framing error, and
    /// with `Ok(())` on shutdown.
    pub fn spawn(
        outbound: mpsc::UnboundedSender<Bytes>,
        buffer_capacity: usize,
    ) -> (EngineHandle, JoinHandle<Result<(), EngineError>>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let engine = Engine::new(outbound, buffer_capacity);
        let task = tokio::spawn(engine.run(cmd_rx));

        info!("Engine spawned");
        (EngineHandle::new(cmd_tx), task)
    }

    pub async fn run(
        mut self,
        mut command_rx: mpsc::UnboundedReceiver<EngineCommand>,
    ) -> Result<(), EngineError> {
        debug!("Engine run loop started");

        let result = loop {
            let Some(cmd) = command_rx.recv().await else {
                break Ok(());
            };

            match cmd {
                EngineCommand::Inbound(chunk) => {
                    if let Err(e) = self.on_chunk(&chunk) {
                        break Err(e);
                    }
                }
                EngineCommand::UpstreamClosed => break Err(EngineError::Closed),

                EngineCommand::Get { path, waiter } => self.enqueue_get(path, waiter),
                EngineCommand::Subscribe { path, bindings } => self.subscribe(path, bindings),

                EngineCommand::AddDevice { device, response } => {
                    let _ = response.send(self.mirror.insert_device(device));
                }
                EngineCommand::AddInput {
                    device_id,
                    input,
                    response,
                } => {
                    let _ = response.send(self.mirror.insert_input(&device_id, input));
                }
                EngineCommand::AddSend {
                    owner,
                    send,
                    response,
                } => {
                    let _ = response.send(self.mirror.insert_send(&owner, send));
                }
                EngineCommand::Snapshot { response } => {
                    let _ = response.send(self.mirror.devices().to_vec());
                }

                EngineCommand::Join { tx, response } => {
                    let id = self.join(tx);
                    let _ = response.send(id);
                }
                EngineCommand::Leave { id } => self.leave(id),
                EngineCommand::ClientMessage { id, text } => {
                    if let Err(e) = self.handle_client_message(id, &text) {
                        warn!("Unknown message on session #{}: {} ({})", id, text, e);
                    }
                }

                EngineCommand::Shutdown => {
                    info!("Engine received shutdown command");
                    break Ok(());
                }
            }
        };

        info!(
            frames = self.frame_count,
            sessions = self.fanout.len(),
            pending = self.correlator.pending_paths(),
            "Engine run loop terminated"
        );
        result
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    pub fn sessions(&self) -> usize {
        self.fanout.len()
    }

    // =========================================================================
    // Upstream traffic
    // =========================================================================

    fn transmit(&self, command: Command) {
        debug!("→ {}", command);
        if self.outbound.send(command.encode()).is_err() {
            warn!("Upstream writer is gone, dropping '{}'", command);
        }
    }

    /// Transmit `get <path>` and return the eventual response
    pub fn send_get(&mut self, path: impl Into<String>) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        self.enqueue_get(path.into(), tx);
        rx
    }

    fn enqueue_get(&mut self, path: String, waiter: Waiter) {
        self.correlator.enqueue(path.clone(), waiter);
        self.transmit(Command::Get { path });
    }

    pub fn subscribe(&mut self, path: String, bindings: Vec<Binding>) {
        let key = self.registry.register(&path, bindings);
        trace!(path = %key, "Subscription registered");
        self.transmit(Command::Subscribe { path });
    }

    /// Feed a raw chunk from the upstream socket. Only an overflow is an error.
    pub fn on_chunk(&mut self, chunk: &[u8]) -> Result<(), EngineError> {
        for frame in self.decoder.decode(chunk)? {
            match frame {
                Ok(frame) => self.on_frame(frame),
                Err(e) => warn!("Dropping inbound frame: {}", e),
            }
        }
        Ok(())
    }

    /// Dispatch a decoded frame to pending requests, then to subscriptions
    pub fn on_frame(&mut self, frame: Frame) {
        self.frame_count += 1;
        trace!(path = %frame.path, "← frame");

        let resolved = self.correlator.resolve(&frame.path, &frame.data);

        let bindings = self.registry.bindings(&frame.path);
        for binding in bindings {
            if let Err(e) = self.mirror.apply(&binding.target, binding.field, &frame.data) {
                warn!(path = %frame.path, "Dropping subscription update: {}", e);
                continue;
            }

            let change = InputChange::new(&binding.target, binding.field.key(), frame.data.clone());
            if let Some(payload) = encode(&ServerMessage::Input(change)) {
                let delivered = self.fanout.broadcast(&payload);
                trace!(path = %frame.path, delivered, "Change broadcast");
            }
        }

        if resolved == 0 && bindings.is_empty() {
            trace!(path = %frame.path, "Ignoring unsolicited frame");
        }
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Register a session and queue the full snapshot as its first message
    pub fn join(&mut self, tx: SessionSender) -> SessionId {
        let id = self.fanout.join(tx);

        let snapshot = ServerMessage::Devices {
            devices: self.mirror.devices().to_vec(),
        };
        if let Some(payload) = encode(&snapshot) {
            self.fanout.send_to(id, payload);
        }

        info!("New session #{} ({} connected)", id, self.fanout.len());
        id
    }

    pub fn leave(&mut self, id: SessionId) {
        if self.fanout.leave(id) {
            info!("#{} session closed ({} connected)", id, self.fanout.len());
        }
    }

    /// Decode a session write and forward it upstream
    pub fn handle_client_message(
        &mut self,
        id: SessionId,
        text: &str,
    ) -> Result<(), ClientMessageError> {
        let request = WriteRequest::parse(text)?;
        debug!(session = id, kind = %request.kind, target = %request.target, "Session write");
        self.write(&request);
        Ok(())
    }

    // =========================================================================
    // Write path
    // =========================================================================

    pub fn write(&mut self, request: &WriteRequest) {
        self.transmit(request.command());
    }

    pub fn update_gain(&mut self, target: ChannelRef, value: Value) {
        self.write(&WriteRequest::new(WriteKind::Gain, target, value));
    }

    pub fn update_pan(&mut self, target: ChannelRef, value: Value) {
        self.write(&WriteRequest::new(WriteKind::Pan, target, value));
    }

    /// Solo exists on inputs only; do not call this with a send target
    pub fn update_solo(&mut self, target: ChannelRef, value: Value) {
        self.write(&WriteRequest::new(WriteKind::Solo, target, value));
    }

    pub fn update_mute(&mut self, target: ChannelRef, value: Value) {
        self.write(&WriteRequest::new(WriteKind::Mute, target, value));
    }
}

fn encode(msg: &ServerMessage) -> Option<Arc<str>> {
    match serde_json::to_string(msg) {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            warn!("Failed to serialize session message: {}", e);
            None
        }
    }
}
