//! Upstream mixer connection
//!
//! Owns the TCP socket to the mixer engine. A reader task feeds raw chunks to
//! the engine actor, a writer task drains encoded frames onto the socket in
//! order. The supervisor connects, runs discovery, publishes the engine for
//! the HTTP layer, and reconnects with a linear backoff when the link drops.

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::UpstreamConfig;
use crate::engine::{
    DeviceTreeBuilder, DiscoveryError, DiscoverySummary, Engine, EngineError, EngineHandle,
};

/// Engine of the current connection, `None` while disconnected
pub type SharedEngine = Arc<RwLock<Option<EngineHandle>>>;

const READ_CHUNK: usize = 4096;

/// Delay before reconnect attempt `retry` (1-based): 1 s per attempt, capped at 30 s
pub fn backoff_delay(retry: u32) -> Duration {
    let delay_ms = std::cmp::min(30_000, 1000 * u64::from(retry));
    Duration::from_millis(delay_ms)
}

/// One live connection and the tasks serving it
pub struct UpstreamLink {
    handle: EngineHandle,
    engine_task: JoinHandle<Result<(), EngineError>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl UpstreamLink {
    pub async fn connect(config: &UpstreamConfig) -> Result<Self> {
        let address = config.address();
        let stream = TcpStream::connect(&address)
            .await
            .with_context(|| format!("Failed to connect to mixer at {}", address))?;
        stream.set_nodelay(true).context("Failed to set TCP_NODELAY")?;

        Ok(Self::attach(stream, config.buffer_capacity))
    }

    /// Start the engine, reader and writer for an established stream
    pub fn attach(stream: TcpStream, buffer_capacity: usize) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (handle, engine_task) = Engine::spawn(outbound_tx, buffer_capacity);

        let reader = tokio::spawn(read_loop(read_half, handle.clone()));
        let writer = tokio::spawn(write_loop(write_half, outbound_rx));

        Self {
            handle,
            engine_task,
            reader,
            writer,
        }
    }

    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    pub async fn discover(&self) -> Result<DiscoverySummary, DiscoveryError> {
        DeviceTreeBuilder::new(self.handle.clone()).run().await
    }

    /// Wait for the connection to end. Call at most once.
    pub async fn closed(&mut self) -> Result<(), EngineError> {
        match (&mut self.engine_task).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Engine task failed: {}", e);
                Err(EngineError::Closed)
            }
        }
    }
}

impl Drop for UpstreamLink {
    fn drop(&mut self) {
        self.handle.shutdown();
        self.reader.abort();
        self.writer.abort();
    }
}

async fn read_loop(mut socket: OwnedReadHalf, engine: EngineHandle) {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        buf.reserve(READ_CHUNK);
        match socket.read_buf(&mut buf).await {
            Ok(0) => {
                info!("Connection closed");
                break;
            }
            Ok(n) => {
                debug!(bytes = n, "← chunk");
                if !engine.inbound(buf.split().freeze()) {
                    return;
                }
            }
            Err(e) => {
                warn!("Upstream read error: {}", e);
                break;
            }
        }
    }
    engine.upstream_closed();
}

async fn write_loop(mut socket: OwnedWriteHalf, mut outbound: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = socket.write_all(&frame).await {
            warn!("Upstream write error: {}", e);
            break;
        }
    }
    let _ = socket.shutdown().await;
}

/// Keep a discovered engine published in `shared` for as long as possible.
///
/// `ready` fires after the first successful discovery. Returns an error when
/// the connection is lost and `config.reconnect` is off.
pub async fn run_supervised(
    config: UpstreamConfig,
    shared: SharedEngine,
    ready: oneshot::Sender<()>,
) -> Result<()> {
    let mut ready = Some(ready);
    let mut retry: u32 = 0;

    loop {
        let outcome = serve_once(&config, &shared, &mut ready, &mut retry).await;
        *shared.write() = None;

        let reason = match outcome {
            Ok(()) => "connection closed".to_string(),
            Err(e) => format!("{:#}", e),
        };
        if !config.reconnect {
            anyhow::bail!("Upstream {}: {}", config.address(), reason);
        }
        warn!("Upstream {} lost: {}", config.address(), reason);

        retry += 1;
        let delay = backoff_delay(retry);
        info!("⏳ Mixer reconnect #{} in {}ms", retry, delay.as_millis());
        sleep(delay).await;
    }
}

async fn serve_once(
    config: &UpstreamConfig,
    shared: &SharedEngine,
    ready: &mut Option<oneshot::Sender<()>>,
    retry: &mut u32,
) -> Result<()> {
    let mut link = UpstreamLink::connect(config).await?;
    info!("Connected to {}. Retrieving devices...", config.address());

    let summary = link.discover().await.context("Device discovery failed")?;
    debug!(?summary, "Mirror ready");
    *retry = 0;

    *shared.write() = Some(link.handle().clone());
    if let Some(tx) = ready.take() {
        let _ = tx.send(());
    }

    match link.closed().await {
        Ok(()) | Err(EngineError::Closed) => Ok(()),
        Err(e) => Err(e).context("Upstream stream failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    #[test]
    fn test_backoff_delay() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(5), Duration::from_secs(5));
        assert_eq!(backoff_delay(30), Duration::from_secs(30));
        assert_eq!(backoff_delay(500), Duration::from_secs(30));
    }

    fn frame(path: &str, data: serde_json::Value) -> Vec<u8> {
        let mut bytes = json!({ "path": path, "data": data }).to_string().into_bytes();
        bytes.push(0);
        bytes
    }

    /// Accept one client and answer discovery for a device without channels,
    /// writing each response in two pieces. Once discovery is answered, keeps
    /// the socket open until `release` fires and returns every command received.
    async fn fake_mixer(listener: TcpListener, release: oneshot::Receiver<()>) -> Vec<String> {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        let mut pending = Vec::new();
        let mut buf = [0u8; 1024];

        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return received;
            }
            pending.extend_from_slice(&buf[..n]);

            while let Some(end) = pending.iter().position(|b| *b == 0) {
                let command = String::from_utf8(pending.drain(..=end).collect()).unwrap();
                let command = command.trim_end_matches('\0').to_string();

                let reply = match command.as_str() {
                    "get /devices" => Some(frame("/devices", json!({"children": {"7": {}}}))),
                    "get /devices/7" => Some(frame(
                        "/devices/7",
                        json!({"properties": {
                            "DeviceName": {"value": "Stage"},
                            "DeviceOnline": {"value": false}
                        }}),
                    )),
                    "get /devices/7/inputs" | "get /devices/7/auxs" => {
                        let path = command.trim_start_matches("get ");
                        Some(frame(path, json!({})))
                    }
                    _ => None,
                };
                received.push(command);

                if let Some(reply) = reply {
                    let (head, tail) = reply.split_at(reply.len() / 2);
                    socket.write_all(head).await.unwrap();
                    socket.flush().await.unwrap();
                    socket.write_all(tail).await.unwrap();
                }

                if received.last().map(String::as_str) == Some("get /devices/7/auxs") {
                    let _ = release.await;
                    return received;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_link_discovers_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (release_tx, release_rx) = oneshot::channel();
        let mixer = tokio::spawn(fake_mixer(listener, release_rx));

        let config = UpstreamConfig {
            host: "127.0.0.1".into(),
            port,
            ..UpstreamConfig::default()
        };
        let mut link = UpstreamLink::connect(&config).await.unwrap();
        let summary = link.discover().await.unwrap();
        assert_eq!(summary.devices, 1);

        let devices = link.handle().snapshot().await.unwrap();
        assert_eq!(devices[0].device_id, "7");
        assert_eq!(devices[0].name, "Stage");
        assert!(!devices[0].online);
        assert!(link.handle().is_alive());

        release_tx.send(()).unwrap();
        let received = mixer.await.unwrap();
        assert_eq!(
            received,
            vec![
                "get /devices",
                "get /devices/7",
                "get /devices/7/inputs",
                "get /devices/7/auxs"
            ]
        );

        // The mixer dropped its socket
        assert!(matches!(link.closed().await, Err(EngineError::Closed)));
    }

    #[tokio::test]
    async fn test_supervisor_publishes_engine_and_exits_without_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (release_tx, release_rx) = oneshot::channel();
        let mixer = tokio::spawn(fake_mixer(listener, release_rx));

        let config = UpstreamConfig {
            host: "127.0.0.1".into(),
            port,
            reconnect: false,
            ..UpstreamConfig::default()
        };
        let shared: SharedEngine = Arc::new(RwLock::new(None));
        let (ready_tx, ready_rx) = oneshot::channel();
        let supervisor = tokio::spawn(run_supervised(config, shared.clone(), ready_tx));

        ready_rx.await.unwrap();
        assert!(shared.read().is_some());
        release_tx.send(()).unwrap();
        mixer.await.unwrap();

        let result = supervisor.await.unwrap();
        assert!(result.is_err());
        assert!(shared.read().is_none());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = UpstreamConfig {
            host: "127.0.0.1".into(),
            port,
            ..UpstreamConfig::default()
        };
        assert!(UpstreamLink::connect(&config).await.is_err());
    }
}
