//! Per-connection driver: resolve, dial, negotiate, bridge, tear down.
//!
//! [`ProxyOrchestrator::serve`] is the single entry point used by the
//! WebSocket server for every accepted browser connection:
//!
//! ```text
//!  resolve backend ─▶ dial (timeout) ─▶ keep-alive ─▶ negotiate (if TLS on)
//!        │                                                    │
//!        └──────────── any error ends the attempt ◀───────────┘
//!                                                             ▼
//!                 register PeerSession ─▶ copy both directions ─▶ close + deregister
//! ```
//!
//! `serve` is generic over the client transport.  In production that is a
//! [`WsByteStream`](crate::infrastructure::ws_stream::WsByteStream); tests
//! pass an in-memory `duplex` pipe.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn, Instrument};

use crate::application::error::{CopyError, Direction, ProxyError};
use crate::application::resolver::{resolve_guarded, AddressResolver, StaticResolver};
use crate::domain::{ConnectionRequest, ProxySettings, SessionInfo, SessionKey};
use crate::infrastructure::backend::{dial, enable_keepalive, BackendStream};
use crate::infrastructure::negotiator::SecurityNegotiator;
use crate::infrastructure::peer::PeerSession;
use crate::infrastructure::registry::SessionRegistry;
use crate::infrastructure::tls::TlsUpgrader;

/// How an established session ended.
#[derive(Debug)]
pub struct SessionOutcome {
    pub key: SessionKey,
    /// Backend address the session was bridged to.
    pub backend: String,
    /// `true` when the backend leg ran over TLS.
    pub backend_tls: bool,
    pub bytes_to_backend: u64,
    pub bytes_to_client: u64,
    /// The first copy failure that was *not* an expected closure, if any.
    pub error: Option<CopyError>,
}

/// Accepts client transports and bridges each one to a VNC backend.
pub struct ProxyOrchestrator {
    resolver: Arc<dyn AddressResolver>,
    settings: ProxySettings,
    negotiator: Option<SecurityNegotiator>,
    registry: Arc<SessionRegistry>,
}

impl ProxyOrchestrator {
    /// Builds an orchestrator.
    ///
    /// Without a resolver every connection goes to
    /// `settings.default_backend`.  When `settings.encryption_enabled` is set
    /// the TLS material is loaded here, once, so a bad certificate path fails
    /// at startup.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::TlsConfiguration`] if the TLS material is invalid.
    pub fn configure(
        resolver: Option<Arc<dyn AddressResolver>>,
        settings: ProxySettings,
    ) -> Result<Self, ProxyError> {
        let resolver = resolver.unwrap_or_else(|| {
            Arc::new(StaticResolver::new(settings.default_backend.clone()))
        });

        let negotiator = if settings.encryption_enabled {
            let tls = TlsUpgrader::from_material(&settings.tls)?;
            if !tls.verifies_backend() {
                warn!("no CA bundle configured: backend TLS certificates will NOT be verified");
            }
            Some(SecurityNegotiator::new(tls, &settings))
        } else {
            None
        };

        Ok(Self {
            resolver,
            settings,
            negotiator,
            registry: Arc::new(SessionRegistry::new()),
        })
    }

    /// Snapshots every session that is currently copying bytes.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.registry.snapshot()
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Closes one live session; returns `false` if the key is unknown.
    pub fn close_session(&self, key: &SessionKey) -> bool {
        self.registry.close(key)
    }

    /// Closes every live session; returns how many were closed.
    pub fn close_all(&self) -> usize {
        self.registry.close_all()
    }

    /// Bridges one client transport to its backend until either side ends.
    ///
    /// # Errors
    ///
    /// Returns a [`ProxyError`] if the session could not be established
    /// (resolution, dial, keep-alive, or negotiation failure).  Once the
    /// session is running, copy failures are reported in
    /// [`SessionOutcome::error`] instead.
    pub async fn serve<C>(
        &self,
        client: C,
        request: &ConnectionRequest,
    ) -> Result<SessionOutcome, ProxyError>
    where
        C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let key = SessionKey::new();
        let span = tracing::info_span!("session", session = %key);
        self.serve_inner(key, client, request).instrument(span).await
    }

    async fn serve_inner<C>(
        &self,
        key: SessionKey,
        mut client: C,
        request: &ConnectionRequest,
    ) -> Result<SessionOutcome, ProxyError>
    where
        C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let client_label = request
            .peer_addr
            .map(|a| a.to_string())
            .unwrap_or_else(|| "client".to_string());

        let addr = resolve_guarded(self.resolver.as_ref(), request)?;
        debug!(backend = %addr, "backend resolved");

        let tcp = dial(&addr, self.settings.dial_timeout).await?;
        enable_keepalive(&tcp, self.settings.keepalive_interval)?;

        let backend = match &self.negotiator {
            Some(negotiator) => negotiator.negotiate(&addr, &mut client, tcp).await?,
            None => BackendStream::Plain(tcp),
        };
        let backend_tls = backend.is_encrypted();

        let peer = Arc::new(PeerSession::new(
            key,
            client,
            client_label.clone(),
            backend,
            addr.clone(),
            backend_tls,
        ));
        self.registry.register(peer.clone());
        info!(client = %client_label, backend = %addr, backend_tls, "session established");

        // Backend → client runs on its own task; client → backend runs here.
        let spawned = {
            let peer = Arc::clone(&peer);
            let registry = Arc::clone(&self.registry);
            tokio::spawn(
                async move {
                    let result = peer.copy_backend_to_client().await;
                    peer.close();
                    registry.deregister(&peer.key());
                    result
                }
                .in_current_span(),
            )
        };

        let to_backend = peer.copy_client_to_backend().await;
        peer.close();
        self.registry.deregister(&key);

        let to_client = match spawned.await {
            Ok(result) => result,
            Err(join_err) => Err(CopyError {
                direction: Direction::BackendToClient,
                from: addr.clone(),
                to: client_label.clone(),
                transferred: 0,
                cause: std::io::Error::new(std::io::ErrorKind::Other, join_err.to_string()),
            }),
        };

        let mut error = None;
        let outcome = SessionOutcome {
            key,
            backend: addr,
            backend_tls,
            bytes_to_backend: settle(to_backend, &mut error),
            bytes_to_client: settle(to_client, &mut error),
            error,
        };

        info!(
            bytes_to_backend = outcome.bytes_to_backend,
            bytes_to_client = outcome.bytes_to_client,
            "session closed"
        );
        Ok(outcome)
    }
}

/// Logs a finished copy direction and returns its byte count, including the
/// bytes a failed direction copied before it failed.  The first abnormal
/// failure is kept in `first_error`.
fn settle(result: Result<u64, CopyError>, first_error: &mut Option<CopyError>) -> u64 {
    match result {
        Ok(n) => n,
        Err(e) if e.is_expected_closure() => {
            debug!("{e}");
            e.transferred
        }
        Err(e) => {
            warn!("{e}");
            let transferred = e.transferred;
            first_error.get_or_insert(e);
            transferred
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
