//! Security negotiation with the VNC backend.
//!
//! [`SecurityNegotiator`] decides, per connection, whether the backend leg
//! stays plaintext or is upgraded to TLS:
//!
//! 1. **Probe.**  A throwaway connection reads the backend's security-type
//!    list.  If VeNCrypt is not the first entry the real connection is handed
//!    back untouched and the client negotiates with the backend itself.
//! 2. **Relay + VeNCrypt.**  Otherwise the proxy runs the RFB handshake on the
//!    real connection, telling the client that only security type *None*
//!    exists, and selects VeNCrypt X.509-None with the backend.
//! 3. **TLS.**  The backend socket is wrapped in a TLS client session.
//!
//! Any failure aborts the whole connection attempt; nothing is retried.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::application::error::ProxyError;
use crate::application::handshake::{negotiate_vencrypt, probe_security_types, relay_rfb_handshake};
use crate::domain::{ProxySettings, SecurityReplyMode};
use crate::infrastructure::backend::{dial, server_name_of, BackendStream};
use crate::infrastructure::tls::TlsUpgrader;

/// Probes the backend and, when it leads with VeNCrypt, upgrades the backend
/// leg to TLS.
#[derive(Debug, Clone)]
pub struct SecurityNegotiator {
    tls: TlsUpgrader,
    dial_timeout: Duration,
    step_timeout: Duration,
    reply_mode: SecurityReplyMode,
}

impl SecurityNegotiator {
    pub fn new(tls: TlsUpgrader, settings: &ProxySettings) -> Self {
        Self {
            tls,
            dial_timeout: settings.dial_timeout,
            step_timeout: settings.handshake_step_timeout,
            reply_mode: settings.security_reply,
        }
    }

    /// Opens a separate connection to `addr` and reports whether the
    /// backend's first offered security type is VeNCrypt.
    ///
    /// The probe connection is closed before returning.
    pub async fn probe(&self, addr: &str) -> Result<bool, ProxyError> {
        let mut probe = dial(addr, self.dial_timeout).await?;
        let is_vencrypt = probe_security_types(&mut probe, self.step_timeout).await?;
        drop(probe);
        debug!(addr, is_vencrypt, "backend probe finished");
        Ok(is_vencrypt)
    }

    /// Returns the backend transport to use for the session.
    ///
    /// `backend` must be a freshly dialed connection to `addr` on which no
    /// bytes have been read yet.
    ///
    /// # Errors
    ///
    /// Any [`ProxyError`] from the probe, the handshake steps, or the TLS
    /// handshake.
    pub async fn negotiate<C>(
        &self,
        addr: &str,
        client: &mut C,
        mut backend: TcpStream,
    ) -> Result<BackendStream, ProxyError>
    where
        C: AsyncRead + AsyncWrite + Unpin + ?Sized,
    {
        if !self.probe(addr).await? {
            debug!(addr, "backend does not lead with VeNCrypt; passing through");
            return Ok(BackendStream::Plain(backend));
        }

        relay_rfb_handshake(&mut backend, client, self.reply_mode, self.step_timeout).await?;
        negotiate_vencrypt(&mut backend, self.step_timeout).await?;

        let tls = self
            .tls
            .upgrade(backend, server_name_of(addr), self.step_timeout)
            .await?;
        info!(
            addr,
            verified = self.tls.verifies_backend(),
            "backend connection upgraded to TLS"
        );
        Ok(BackendStream::Tls(Box::new(tls)))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
