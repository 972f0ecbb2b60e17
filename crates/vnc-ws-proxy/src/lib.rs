//! vnc-ws-proxy library crate.
//!
//! This crate lets browser VNC clients (e.g. noVNC) reach VNC servers through
//! a WebSocket.  Bytes are relayed unchanged, with one exception: when a
//! backend offers VeNCrypt as its preferred security type, the proxy takes
//! over the security handshake, upgrades its own connection to the backend
//! to TLS with an X.509 client identity, and tells the browser that no
//! security is needed.  The browser never sees TLS.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Browser (RFB over WebSocket binary frames)
//!         ↕
//! [vnc-ws-proxy]
//!   ├── domain/           Pure types: ProxyConfig, ConnectionRequest, SessionKey
//!   ├── application/      Handshake steps, AddressResolver, ProxyError
//!   └── infrastructure/
//!         ├── ws_server/     WebSocket accept loop (tokio-tungstenite)
//!         ├── orchestrator/  Resolve, dial, negotiate, bridge
//!         ├── negotiator/    VeNCrypt probe + TLS upgrade (rustls)
//!         └── peer/          Two-way byte copy and teardown
//!         ↕
//! VNC server (plain RFB, or RFB inside TLS after VeNCrypt)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async code.
//! - `application` depends on `domain` and `rfb-core`, and is generic over
//!   `AsyncRead + AsyncWrite` so it can be tested with in-memory pipes.
//! - `infrastructure` depends on all other layers plus `tokio`, `rustls`, and
//!   `tungstenite`.
//!
//! # Embedding
//!
//! ```rust,no_run
//! use std::sync::{atomic::AtomicBool, Arc};
//! use vnc_ws_proxy::domain::ProxyConfig;
//! use vnc_ws_proxy::infrastructure::{run_server, ProxyOrchestrator};
//!
//! # async fn start() -> anyhow::Result<()> {
//! let config = ProxyConfig::default();
//! let orchestrator = Arc::new(ProxyOrchestrator::configure(None, config.settings)?);
//! run_server(config.server, orchestrator, Arc::new(AtomicBool::new(true))).await
//! # }
//! ```

/// Domain layer: pure configuration and identity types (no I/O).
pub mod domain;

/// Application layer: handshake logic, address resolution, error taxonomy.
pub mod application;

/// Infrastructure layer: WebSocket server, backend dialing, TLS, sessions.
pub mod infrastructure;
