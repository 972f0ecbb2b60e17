//! Domain layer for vnc-ws-proxy.
//!
//! The domain layer contains plain data types that have no dependencies on
//! I/O, networking, or external frameworks.  This makes them easy to test in
//! isolation and to share between the application and infrastructure layers.
//!
//! # What belongs in the domain layer?
//!
//! - Configuration structures (listener, backend, TLS material)
//! - Session identity and the session snapshot used for enumeration
//! - The request metadata handed to address resolvers
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, `TcpStream`, or `WebSocket` types
//! - File I/O or environment variable reading
//! - Anything that could block or fail due to external state

pub mod config;
pub mod request;
pub mod session;

pub use config::{ProxyConfig, ProxySettings, SecurityReplyMode, ServerConfig, TlsMaterial};
pub use request::ConnectionRequest;
pub use session::{SessionInfo, SessionKey};
