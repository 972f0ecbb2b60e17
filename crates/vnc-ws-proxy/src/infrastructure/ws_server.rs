//! WebSocket server: accept loop and per-connection task management.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections from browsers.
//! 3. Upgrading each connection to a WebSocket session, but only on the
//!    configured path.  Any other path is answered with HTTP 404 during the
//!    upgrade.
//! 4. Capturing the request metadata (path, query, headers, peer address)
//!    for the address resolver.
//! 5. Handing the upgraded connection, wrapped as a byte stream, to the
//!    [`ProxyOrchestrator`].
//! 6. Stopping when the `running` flag is cleared, then closing every
//!    session that is still copying bytes.
//!
//! # Scalability
//!
//! Each browser connection runs in its own Tokio task.  The accept loop never
//! blocks on a session: it accepts a connection and immediately spawns a task
//! for it before accepting the next one.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn};

use crate::domain::{ConnectionRequest, ServerConfig};
use crate::infrastructure::orchestrator::ProxyOrchestrator;
use crate::infrastructure::ws_stream::WsByteStream;

/// How long one `accept()` may block before the `running` flag is re-checked.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

// ── Public API ────────────────────────────────────────────────────────────────

/// Runs the WebSocket accept loop until `running` is set to `false`.
///
/// Binds a TCP listener on `server.bind_addr` and then behaves like
/// [`serve_listener`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound (e.g., the port is
/// already in use or the process lacks permission to bind).
pub async fn run_server(
    server: ServerConfig,
    orchestrator: Arc<ProxyOrchestrator>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(server.bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {}", server.bind_addr))?;

    info!(
        "vnc proxy listening on ws://{}{}",
        server.bind_addr, server.ws_path
    );

    serve_listener(listener, server.ws_path, orchestrator, running).await
}

/// Runs the accept loop on an already-bound listener.
///
/// Tests bind port `0` and pass the listener in so they know the port.
///
/// On shutdown every live session is closed before returning.
///
/// # Errors
///
/// Currently infallible once the listener exists; the `Result` mirrors
/// [`run_server`].
pub async fn serve_listener(
    listener: TcpListener,
    ws_path: String,
    orchestrator: Arc<ProxyOrchestrator>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let ws_path: Arc<str> = Arc::from(ws_path);

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // A short timeout lets the loop notice the shutdown flag even when no
        // browsers are connecting.
        match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("new browser connection from {peer_addr}");
                let orchestrator = Arc::clone(&orchestrator);
                let ws_path = Arc::clone(&ws_path);
                tokio::spawn(async move {
                    handle_browser_connection(stream, peer_addr, &ws_path, orchestrator).await;
                });
            }
            Ok(Err(e)) => {
                // Transient accept error (e.g., too many open file descriptors).
                error!("accept error: {e}");
            }
            Err(_) => {
                // No new connection in the last poll interval.
            }
        }
    }

    let closed = orchestrator.close_all();
    if closed > 0 {
        info!("closed {closed} live session(s) on shutdown");
    }
    Ok(())
}

// ── Per-connection handler ────────────────────────────────────────────────────

/// Top-level handler for one browser connection.
///
/// Wraps [`run_connection`] and logs the outcome.  A failed upgrade or a
/// failed connection attempt never affects other connections.
async fn handle_browser_connection(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    ws_path: &str,
    orchestrator: Arc<ProxyOrchestrator>,
) {
    match run_connection(raw_stream, peer_addr, ws_path, orchestrator).await {
        Ok(()) => debug!("connection {peer_addr} finished"),
        Err(e) => warn!("connection {peer_addr} failed: {e:#}"),
    }
}

/// Upgrades one TCP connection and bridges it to its backend.
///
/// # Errors
///
/// Returns an error if the WebSocket upgrade fails (including the 404 for a
/// wrong path) or the session could not be established.
async fn run_connection(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    ws_path: &str,
    orchestrator: Arc<ProxyOrchestrator>,
) -> anyhow::Result<()> {
    // ── Step 1: Complete the WebSocket handshake ───────────────────────────────
    let mut captured = None;
    let callback = |req: &Request, resp: Response| {
        let request = capture_request(peer_addr, req);
        if request.path != ws_path {
            return Err(not_found());
        }
        captured = Some(request);
        Ok(resp)
    };
    let ws_stream = accept_hdr_async(raw_stream, callback)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let request = captured
        .with_context(|| format!("WebSocket upgrade from {peer_addr} carried no request"))?;

    // ── Step 2: Bridge to the backend ─────────────────────────────────────────
    let client = WsByteStream::new(ws_stream);
    let outcome = orchestrator.serve(client, &request).await?;

    match &outcome.error {
        Some(e) => warn!(
            session = %outcome.key,
            backend = %outcome.backend,
            "session ended abnormally: {e}"
        ),
        None => info!(
            session = %outcome.key,
            backend = %outcome.backend,
            backend_tls = outcome.backend_tls,
            bytes_to_backend = outcome.bytes_to_backend,
            bytes_to_client = outcome.bytes_to_client,
            "session ended"
        ),
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Copies what the resolver may need out of the HTTP upgrade request.
fn capture_request(peer_addr: SocketAddr, req: &Request) -> ConnectionRequest {
    let mut request = ConnectionRequest::from_uri(Some(peer_addr), &req.uri().to_string());
    // An absolute-form URI (`ws://host/ws`) would otherwise leave the
    // authority in `path`.
    request.path = req.uri().path().to_string();
    request.query = req.uri().query().map(str::to_string);
    for (name, value) in req.headers() {
        if let Ok(value) = value.to_str() {
            request
                .headers
                .insert(name.as_str().to_ascii_lowercase(), value.to_string());
        }
    }
    request
}

fn not_found() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("not found".to_string()));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

// ── Tests ─────────────────────────────────────────────────────────────────────
