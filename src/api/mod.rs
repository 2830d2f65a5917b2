//! HTTP and WebSocket server for browser sessions
//!
//! Serves the static UI and upgrades WebSocket requests on any path other
//! than `/api/*` into engine sessions. Default port: 8080

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use crate::engine::EngineHandle;
use crate::upstream::SharedEngine;

/// Shared state for HTTP handlers
pub struct ApiState {
    /// Engine of the live upstream connection
    pub engine: SharedEngine,
    /// Directory served for every non-API path
    pub static_dir: PathBuf,
}

/// Build the HTTP router
pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .fallback(ui_or_session)
        .with_state(state)
}

/// Any other path - WebSocket session when upgrading, otherwise a UI file
async fn ui_or_session(
    ws: Option<WebSocketUpgrade>,
    State(state): State<Arc<ApiState>>,
    request: Request,
) -> Response {
    if let Some(ws) = ws {
        return upgrade(ws, &state);
    }

    let result: Result<_, Infallible> = ServeDir::new(&state.static_dir).oneshot(request).await;
    match result {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}

fn upgrade(ws: WebSocketUpgrade, state: &ApiState) -> Response {
    let engine = state.engine.read().clone();
    match engine {
        Some(engine) if engine.is_alive() => {
            ws.on_upgrade(move |socket| handle_session(socket, engine))
        }
        _ => (StatusCode::SERVICE_UNAVAILABLE, "mixer not connected").into_response(),
    }
}

/// Relay one browser session: engine messages out, write requests in
async fn handle_session(mut socket: WebSocket, engine: EngineHandle) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = match engine.join(tx).await {
        Ok(id) => id,
        Err(e) => {
            warn!("Rejecting session: {}", e);
            let _ = socket.close().await;
            return;
        }
    };

    loop {
        tokio::select! {
            // Snapshot and change notifications from the engine
            outbound = rx.recv() => {
                match outbound {
                    Some(payload) => {
                        if socket.send(Message::Text(payload.to_string())).await.is_err() {
                            debug!("Session #{} disconnected", id);
                            break;
                        }
                    }
                    None => {
                        debug!("Engine closed session #{}", id);
                        break;
                    }
                }
            }
            // Write requests from the browser
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => engine.client_message(id, text),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => engine.client_message(id, text),
                        Err(e) => warn!("Dropping non UTF-8 message on session #{}: {}", id, e),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("Session #{} error: {}", id, e);
                        break;
                    }
                }
            }
        }
    }

    engine.leave(id);
}

/// GET /api/health - Health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// Bind and run the HTTP server
pub async fn start_server(state: Arc<ApiState>, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server on {}", addr))?;
    info!("Listening on http://{}", listener.local_addr()?);

    serve(listener, state).await
}

/// Run the HTTP server on an already bound listener
pub async fn serve(listener: TcpListener, state: Arc<ApiState>) -> Result<()> {
    axum::serve(listener, build_router(state))
        .await
        .context("HTTP server error")
}
