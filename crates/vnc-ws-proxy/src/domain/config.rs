//! Proxy configuration types.
//!
//! [`ProxyConfig`] is the single source of truth for all runtime settings.
//! It is assembled in the infrastructure layer from the TOML file and the
//! CLI/environment overrides, then handed to the server and orchestrator.
//!
//! Configuration is plain data: no global state and no file reads in the
//! domain.  Tests build a `ProxySettings` literal pointing at a loopback
//! backend and run the real orchestrator against it.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Backend used when no resolver is supplied.
pub const DEFAULT_BACKEND_ADDR: &str = "127.0.0.1:5901";

/// Connect timeout for dialing the backend (and the VeNCrypt probe).
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP keep-alive probe interval on the backend connection.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Deadline for each individual read/handshake step during negotiation.
pub const DEFAULT_HANDSHAKE_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// All runtime configuration for the proxy process.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    /// WebSocket listener settings.
    pub server: ServerConfig,

    /// Per-connection proxying behaviour.
    pub settings: ProxySettings,

    /// Token → backend address table for the query-token resolver.
    ///
    /// When empty, every connection goes to `settings.default_backend`.
    pub tokens: BTreeMap<String, String>,
}

/// Where the WebSocket listener binds and which path it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address and port of the WebSocket listener.
    pub bind_addr: SocketAddr,

    /// The only request path accepted for the WebSocket upgrade.
    ///
    /// Other paths are answered with HTTP 404 during the handshake.
    pub ws_path: String,
}

impl Default for ServerConfig {
    /// | Field     | Default        |
    /// |-----------|----------------|
    /// | bind_addr | `0.0.0.0:6080` |
    /// | ws_path   | `/ws`          |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 6080)),
            ws_path: "/ws".to_string(),
        }
    }
}

/// Settings consumed by the orchestrator for every bridged connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    /// Backend address used when no resolver is configured.
    pub default_backend: String,

    /// Whether the VeNCrypt probe and upgrade are attempted at all.
    ///
    /// When `false`, every backend is treated as plaintext and the RFB
    /// handshake passes through the proxy untouched.
    pub encryption_enabled: bool,

    /// Certificate material for the TLS upgrade.
    pub tls: TlsMaterial,

    /// Connect timeout for the backend dial.
    pub dial_timeout: Duration,

    /// TCP keep-alive probe interval for the backend connection.
    pub keepalive_interval: Duration,

    /// Deadline applied to each read and to the TLS handshake while
    /// negotiating.  A stalled backend fails with a step timeout instead of
    /// holding the session forever.
    pub handshake_step_timeout: Duration,

    /// How the proxy answers the backend's security-type list.
    pub security_reply: SecurityReplyMode,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            default_backend: DEFAULT_BACKEND_ADDR.to_string(),
            encryption_enabled: false,
            tls: TlsMaterial::default(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            handshake_step_timeout: DEFAULT_HANDSHAKE_STEP_TIMEOUT,
            security_reply: SecurityReplyMode::default(),
        }
    }
}

/// Paths to the PEM files used for the backend TLS upgrade.
///
/// All three are optional:
///
/// - `client_cert` + `client_key` (both or neither): presented to the
///   backend as the proxy's X.509 identity.
/// - `ca_certs`: when present, the backend certificate chain is verified
///   against it.  When absent, verification is **disabled**.  That mirrors
///   how most VNC servers are deployed (self-signed certificates), but it
///   means the backend is not authenticated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsMaterial {
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub ca_certs: Option<PathBuf>,
}

impl TlsMaterial {
    /// Returns `true` when a client certificate and key are both configured.
    pub fn has_client_identity(&self) -> bool {
        self.client_cert.is_some() && self.client_key.is_some()
    }

    /// Returns `true` when the backend chain will be verified.
    pub fn verifies_backend(&self) -> bool {
        self.ca_certs.is_some()
    }

    /// Checks that the certificate and key are configured together.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when exactly one of
    /// `client_cert` / `client_key` is set.
    pub fn validate(&self) -> Result<(), String> {
        match (&self.client_cert, &self.client_key) {
            (Some(_), None) => Err("client certificate configured without a private key".into()),
            (None, Some(_)) => Err("private key configured without a client certificate".into()),
            _ => Ok(()),
        }
    }
}

/// Reply sent to the backend after it lists its security types.
///
/// RFB 3.8 says the client answers with the *single* byte of the type it
/// chose.  The proxy historically echoes the backend's whole list back
/// instead; with a one-entry list (`[19]`) the two are identical on the wire.
/// `EchoList` keeps that behaviour; `SingleType` sends only the VeNCrypt byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityReplyMode {
    #[default]
    EchoList,
    SingleType,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_server_listens_on_6080_ws() {
        // Arrange / Act
        let cfg = ServerConfig::default();
        // Assert
        assert_eq!(cfg.bind_addr.port(), 6080);
        assert_eq!(cfg.ws_path, "/ws");
    }

    #[test]
    fn test_default_backend_is_local_5901() {
        let settings = ProxySettings::default();
        assert_eq!(settings.default_backend, "127.0.0.1:5901");
    }

    #[test]
    fn test_default_timeouts() {
        let settings = ProxySettings::default();
        assert_eq!(settings.dial_timeout, Duration::from_secs(5));
        assert_eq!(settings.keepalive_interval, Duration::from_secs(30));
        assert_eq!(settings.handshake_step_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_encryption_is_off_by_default() {
        let settings = ProxySettings::default();
        assert!(!settings.encryption_enabled);
        assert_eq!(settings.security_reply, SecurityReplyMode::EchoList);
    }

    #[test]
    fn test_tls_material_without_files_is_valid_and_unverified() {
        let tls = TlsMaterial::default();
        assert!(tls.validate().is_ok());
        assert!(!tls.has_client_identity());
        assert!(!tls.verifies_backend());
    }

    #[test]
    fn test_tls_material_cert_without_key_is_invalid() {
        // Arrange
        let tls = TlsMaterial {
            client_cert: Some("client.pem".into()),
            ..TlsMaterial::default()
        };

        // Act
        let result = tls.validate();

        // Assert
        assert!(result.unwrap_err().contains("private key"));
    }

    #[test]
    fn test_tls_material_key_without_cert_is_invalid() {
        let tls = TlsMaterial {
            client_key: Some("client.key".into()),
            ..TlsMaterial::default()
        };
        assert!(tls.validate().is_err());
    }

    #[test]
    fn test_tls_material_full_identity() {
        let tls = TlsMaterial {
            client_cert: Some("client.pem".into()),
            client_key: Some("client.key".into()),
            ca_certs: Some("ca.pem".into()),
        };
        assert!(tls.validate().is_ok());
        assert!(tls.has_client_identity());
        assert!(tls.verifies_backend());
    }

    #[test]
    fn test_proxy_config_default_has_no_tokens() {
        let cfg = ProxyConfig::default();
        assert!(cfg.tokens.is_empty());
    }
}
