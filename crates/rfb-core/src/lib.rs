//! # rfb-core
//!
//! Shared library for the VNC WebSocket proxy containing the pieces of the
//! RFB (Remote Framebuffer) protocol that the proxy needs to terminate the
//! security handshake: version banners, security-type codes, and the
//! fixed-width big-endian wire helpers.
//!
//! This crate knows nothing about WebSockets, TLS, or sockets.  The wire
//! helpers are generic over Tokio's `AsyncRead` / `AsyncWrite`, so they work
//! the same on a `TcpStream`, a TLS stream, or an in-memory duplex pipe.
//!
//! # Architecture overview (for beginners)
//!
//! A VNC session starts with a short plaintext handshake before any pixels
//! are exchanged:
//!
//! ```text
//! Server → Client   "RFB 003.008\n"              (12-byte version banner)
//! Client → Server   "RFB 003.008\n"
//! Server → Client   [count][type][type]...       (offered security types)
//! Client → Server   [type]                       (chosen security type)
//! ... security-type specific exchange (e.g. VeNCrypt → TLS) ...
//! ```
//!
//! After the handshake, the proxy stops interpreting the stream and simply
//! copies bytes in both directions.  This crate defines:
//!
//! - **`protocol::version`** – Parsing and formatting of the 12-byte banner.
//! - **`protocol::security`** – Numeric codes for security types and
//!   VeNCrypt sub-types.
//! - **`protocol::wire`** – Strongly typed readers and writers (`u8`,
//!   big-endian `u32`, fixed-length byte fields).

pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `rfb_core::ProtocolVersion` instead of `rfb_core::protocol::version::ProtocolVersion`.
pub use protocol::security::{SecurityType, VeNCryptSubType};
pub use protocol::version::{ProtocolVersion, VersionError, BANNER_LEN};
pub use protocol::wire::WireError;
