//! TCP connection to the VNC backend.
//!
//! [`dial`] opens the socket with a connect timeout; [`enable_keepalive`]
//! turns on TCP keep-alive probes.  After negotiation the connection is held
//! as a [`BackendStream`], which is either the original socket or the same
//! socket wrapped in TLS.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;

use crate::application::error::ProxyError;

/// Connects to `addr`, giving up after `limit`.
///
/// # Errors
///
/// Returns [`ProxyError::Dial`] when the address does not resolve, the
/// connection is refused, or `limit` elapses first.
pub async fn dial(addr: &str, limit: Duration) -> Result<TcpStream, ProxyError> {
    let stream = timeout(limit, TcpStream::connect(addr))
        .await
        .map_err(|_| ProxyError::Dial {
            addr: addr.to_string(),
            cause: io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect timed out after {limit:?}"),
            ),
        })?
        .map_err(|cause| ProxyError::Dial {
            addr: addr.to_string(),
            cause,
        })?;

    if let Err(e) = stream.set_nodelay(true) {
        tracing::warn!("failed to set TCP_NODELAY on {addr}: {e}");
    }
    Ok(stream)
}

/// Enables TCP keep-alive with `interval` as both idle time and probe interval.
///
/// # Errors
///
/// Returns [`ProxyError::KeepAlive`] if the socket option cannot be set.
pub fn enable_keepalive(stream: &TcpStream, interval: Duration) -> Result<(), ProxyError> {
    let params = TcpKeepalive::new()
        .with_time(interval)
        .with_interval(interval);
    SockRef::from(stream)
        .set_tcp_keepalive(&params)
        .map_err(ProxyError::KeepAlive)
}

/// Host part of a `host:port` address, used as the TLS server name.
///
/// IPv6 literals in brackets (`[::1]:5900`) lose their brackets.
pub fn server_name_of(addr: &str) -> &str {
    let host = match addr.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => addr,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

// ── BackendStream ─────────────────────────────────────────────────────────────

/// The backend leg of a session: plaintext or TLS over the same socket.
///
/// The TLS variant is boxed because a client `TlsStream` is much larger than
/// a `TcpStream`.
pub enum BackendStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl BackendStream {
    /// Returns `true` once the backend leg has been upgraded to TLS.
    pub fn is_encrypted(&self) -> bool {
        matches!(self, BackendStream::Tls(_))
    }

    fn tcp_ref(&self) -> &TcpStream {
        match self {
            BackendStream::Plain(stream) => stream,
            BackendStream::Tls(tls) => tls.get_ref().0,
        }
    }

    /// Remote address of the backend socket, or `"unknown"`.
    pub fn peer_label(&self) -> String {
        self.tcp_ref()
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    }
}

impl std::fmt::Debug for BackendStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_encrypted() { "Tls" } else { "Plain" };
        f.debug_tuple(kind).field(&self.peer_label()).finish()
    }
}

impl AsyncRead for BackendStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            BackendStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for BackendStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            BackendStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            BackendStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            BackendStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            BackendStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
