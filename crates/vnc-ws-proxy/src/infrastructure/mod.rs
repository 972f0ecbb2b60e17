//! Infrastructure layer for vnc-ws-proxy.
//!
//! The infrastructure layer handles all I/O: accepting WebSocket connections
//! from browsers, dialing VNC backends, and wrapping the backend socket in
//! TLS when the backend asks for VeNCrypt.
//!
//! # Responsibilities
//!
//! - Binding a TCP listener and performing the WebSocket HTTP upgrade
//! - Presenting a WebSocket as a plain byte stream
//! - Dialing backends with a timeout and enabling TCP keep-alive
//! - Probing the backend and upgrading the backend leg to TLS
//! - Pairing client and backend transports and copying bytes both ways
//! - Tracking live sessions and closing them on shutdown
//! - Loading the TOML configuration file
//!
//! # What does NOT belong here?
//!
//! - The byte-level handshake steps (that is the application layer)
//! - Configuration types (those are the domain layer)
//! - CLI parsing (that is done in `main.rs`)

pub mod backend;
pub mod config_file;
pub mod negotiator;
pub mod orchestrator;
pub mod peer;
pub mod registry;
pub mod tls;
pub mod ws_server;
pub mod ws_stream;

// Re-export the primary entry points so `main.rs` can call them concisely.
pub use config_file::{load_config, parse_config, ConfigError};
pub use orchestrator::{ProxyOrchestrator, SessionOutcome};
pub use ws_server::{run_server, serve_listener};
