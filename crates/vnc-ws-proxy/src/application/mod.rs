//! Application layer for vnc-ws-proxy.
//!
//! The application layer knows *what* happens on a connection: which bytes
//! the RFB/VeNCrypt handshake exchanges, how a backend address is chosen, and
//! which failures end a session.  It delegates *how* bytes move (sockets,
//! TLS, WebSocket framing) to the infrastructure layer.
//!
//! # Responsibilities
//!
//! - The handshake steps, generic over any `AsyncRead + AsyncWrite`
//! - The `AddressResolver` contract and its stock implementations
//! - The `ProxyError` taxonomy and expected-closure classification
//!
//! # What does NOT belong here?
//!
//! - Dialing or listening (that is infrastructure)
//! - Tokio task spawning (that happens in the infrastructure layer)
//! - TLS client configuration (handled by `infrastructure::tls`)

pub mod error;
pub mod handshake;
pub mod resolver;

pub use error::{CopyError, Direction, ProxyError, ResolveError};
pub use resolver::{resolve_guarded, AddressResolver, StaticResolver, TokenResolver};
