//! Error taxonomy for the proxy.
//!
//! Every failure that can end a connection attempt or a session maps to one
//! [`ProxyError`] variant.  None of them is retried: the variant only decides
//! how loudly the failure is logged before the browser connection is dropped.
//!
//! # Expected vs. abnormal closure
//!
//! Once a session is copying bytes, the normal way for it to end is for one
//! side to hang up.  The other direction then fails with "broken pipe",
//! "connection reset", or a "connection closed" style message.  Those are
//! *expected* closures and are logged at `debug`; anything else is abnormal.

use std::fmt;
use std::io;
use std::time::Duration;

use rfb_core::WireError;
use thiserror::Error;

/// One of the two copy directions of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Browser → VNC server.
    ClientToBackend,
    /// VNC server → browser.
    BackendToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToBackend => f.write_str("source => target"),
            Direction::BackendToClient => f.write_str("target => source"),
        }
    }
}

/// A failed copy, labelled with its direction and both endpoints.
#[derive(Debug, Error)]
#[error("copy {direction} ({from} => {to}) failed: {cause}")]
pub struct CopyError {
    pub direction: Direction,
    /// Endpoint bytes were read from.
    pub from: String,
    /// Endpoint bytes were written to.
    pub to: String,
    /// Bytes copied in this direction before the failure.
    pub transferred: u64,
    #[source]
    pub cause: io::Error,
}

/// Error-text signatures of a connection that was already closed.
const CLOSED_SIGNATURES: &[&str] = &[
    "connection closed",
    "use of closed network connection",
    "already closed",
    "trying to work with closed connection",
];

impl CopyError {
    /// Returns `true` when the error means "the other side went away".
    ///
    /// Checks the I/O error kind first and falls back to the error text,
    /// because errors bubbled up from the WebSocket or TLS layers are often
    /// wrapped in `io::ErrorKind::Other` with only a message to go by.
    pub fn is_expected_closure(&self) -> bool {
        is_closed_connection(&self.cause)
    }
}

/// Classifies an I/O error as an already-closed connection.
pub fn is_closed_connection(err: &io::Error) -> bool {
    use io::ErrorKind::*;
    if matches!(
        err.kind(),
        BrokenPipe | ConnectionReset | ConnectionAborted | NotConnected | UnexpectedEof
    ) {
        return true;
    }
    let text = err.to_string().to_ascii_lowercase();
    CLOSED_SIGNATURES.iter().any(|sig| text.contains(sig))
}

/// Failure reported by an address resolver.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The request carried no usable `token` query parameter.
    #[error("url param 'token' is missing")]
    MissingToken,

    /// The token is not in the configured table.
    #[error("no backend configured for token '{0}'")]
    UnknownToken(String),

    /// The resolver panicked; the panic was contained at the call boundary.
    #[error("resolver aborted: {0}")]
    Aborted(String),

    /// Any other resolver-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Everything that can end a connection attempt or a session.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The backend address could not be determined.
    #[error("get vnc backend failed: {0}")]
    Resolution(#[from] ResolveError),

    /// The backend could not be reached within the dial timeout.
    #[error("cannot connect to vnc backend {addr}: {cause}")]
    Dial {
        addr: String,
        #[source]
        cause: io::Error,
    },

    /// TCP keep-alive could not be configured on the backend socket.
    #[error("enable vnc backend connection keepalive failed: {0}")]
    KeepAlive(#[source] io::Error),

    /// A peer announced an RFB version other than 3.8 (or a malformed banner).
    #[error("security proxying requires RFB protocol version 3.8, but {peer} asked for {banner:?}")]
    VersionMismatch { peer: &'static str, banner: String },

    /// The backend or the client declined a proposed type, sub-type, or version.
    #[error("negotiation failed: {0}")]
    NegotiationRejected(String),

    /// A peer sent a count or value that the handshake cannot accept.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The TLS handshake over the backend socket failed.
    #[error("TLS handshake with vnc backend failed: {0}")]
    TlsHandshake(#[source] io::Error),

    /// Certificates or keys could not be loaded, or the TLS config is invalid.
    #[error("TLS configuration error: {0}")]
    TlsConfiguration(String),

    /// A single negotiation step exceeded its deadline.
    #[error("{step} timed out after {timeout:?}")]
    StepTimeout {
        step: &'static str,
        timeout: Duration,
    },

    /// A read or write failed part-way through the handshake.
    #[error("connection lost during negotiation: {0}")]
    ConnectionLost(#[from] WireError),

    /// A copy direction failed after the session was established.
    #[error(transparent)]
    Copy(#[from] CopyError),
}

impl ProxyError {
    /// Returns `true` for a copy failure that is just the other side hanging up.
    pub fn is_expected_closure(&self) -> bool {
        matches!(self, ProxyError::Copy(e) if e.is_expected_closure())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn copy_error(cause: io::Error) -> CopyError {
        CopyError {
            direction: Direction::BackendToClient,
            from: "10.0.0.5:5900".into(),
            to: "192.168.1.7:51234".into(),
            transferred: 0,
            cause,
        }
    }

    #[test]
    fn test_broken_pipe_is_expected_closure() {
        let err = copy_error(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(err.is_expected_closure());
    }

    #[test]
    fn test_connection_reset_is_expected_closure() {
        let err = copy_error(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(err.is_expected_closure());
    }

    #[test]
    fn test_closed_text_signature_is_expected_closure() {
        // Arrange: an opaque error that only says what happened in its text
        let cause = io::Error::new(io::ErrorKind::Other, "Connection closed normally");

        // Act / Assert
        assert!(copy_error(cause).is_expected_closure());
    }

    #[test]
    fn test_go_style_closed_signature_is_expected_closure() {
        let cause = io::Error::new(
            io::ErrorKind::Other,
            "read tcp: use of closed network connection",
        );
        assert!(copy_error(cause).is_expected_closure());
    }

    #[test]
    fn test_permission_denied_is_abnormal() {
        let err = copy_error(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!err.is_expected_closure());
    }

    #[test]
    fn test_invalid_data_is_abnormal() {
        let cause = io::Error::new(io::ErrorKind::InvalidData, "corrupt TLS record");
        assert!(!copy_error(cause).is_expected_closure());
    }

    #[test]
    fn test_copy_error_message_names_direction_and_endpoints() {
        // Arrange
        let err = copy_error(io::Error::from(io::ErrorKind::BrokenPipe));

        // Act
        let text = err.to_string();

        // Assert
        assert!(text.contains("target => source"));
        assert!(text.contains("10.0.0.5:5900 => 192.168.1.7:51234"));
    }

    #[test]
    fn test_proxy_error_expected_closure_only_for_copy_variant() {
        let closed = ProxyError::Copy(copy_error(io::Error::from(io::ErrorKind::BrokenPipe)));
        let dial = ProxyError::Dial {
            addr: "127.0.0.1:5901".into(),
            cause: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert!(closed.is_expected_closure());
        assert!(!dial.is_expected_closure());
    }

    #[test]
    fn test_version_mismatch_message_shows_banner() {
        let err = ProxyError::VersionMismatch {
            peer: "backend",
            banner: "RFB 003.003\n".into(),
        };
        let text = err.to_string();
        assert!(text.contains("3.8"));
        assert!(text.contains("RFB 003.003"));
    }

    #[test]
    fn test_resolve_error_converts_into_proxy_error() {
        let err: ProxyError = ResolveError::MissingToken.into();
        assert!(matches!(err, ProxyError::Resolution(ResolveError::MissingToken)));
    }
}
