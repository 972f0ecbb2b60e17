//! TOML configuration file for the proxy.
//!
//! Every section and every field is optional; a missing file section means
//! "use the defaults".  Example:
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:6080"
//! path = "/ws"
//!
//! [backend]
//! default_addr = "127.0.0.1:5901"
//! dial_timeout_secs = 5
//! keepalive_secs = 30
//! handshake_step_timeout_secs = 10
//!
//! [tls]
//! enabled = true
//! cert = "/etc/vnc-proxy/client.pem"
//! key = "/etc/vnc-proxy/client.key"
//! ca_certs = "/etc/vnc-proxy/ca.pem"
//! security_reply = "echo-list"
//!
//! [tokens]
//! desktop-1 = "10.0.0.5:5900"
//! ```
//!
//! Unknown keys are rejected so that a typo (`keepalive_sec`) fails loudly
//! instead of silently falling back to a default.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::config::{
    DEFAULT_BACKEND_ADDR, DEFAULT_DIAL_TIMEOUT, DEFAULT_HANDSHAKE_STEP_TIMEOUT,
    DEFAULT_KEEPALIVE_INTERVAL,
};
use crate::domain::{ProxyConfig, ProxySettings, SecurityReplyMode, ServerConfig, TlsMaterial};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The file parsed but a value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── File schema ───────────────────────────────────────────────────────────────

/// Top-level layout of the configuration file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server: ServerSection,
    pub backend: BackendSection,
    pub tls: TlsSection,
    pub tokens: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub bind: SocketAddr,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BackendSection {
    pub default_addr: String,
    pub dial_timeout_secs: u64,
    pub keepalive_secs: u64,
    pub handshake_step_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TlsSection {
    pub enabled: bool,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub ca_certs: Option<PathBuf>,
    pub security_reply: SecurityReplyMode,
}

impl Default for ServerSection {
    fn default() -> Self {
        let server = ServerConfig::default();
        Self {
            bind: server.bind_addr,
            path: server.ws_path,
        }
    }
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            default_addr: DEFAULT_BACKEND_ADDR.to_string(),
            dial_timeout_secs: DEFAULT_DIAL_TIMEOUT.as_secs(),
            keepalive_secs: DEFAULT_KEEPALIVE_INTERVAL.as_secs(),
            handshake_step_timeout_secs: DEFAULT_HANDSHAKE_STEP_TIMEOUT.as_secs(),
        }
    }
}

impl FileConfig {
    /// Converts the file schema into the runtime [`ProxyConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a path that does not start with
    /// `/`, a zero timeout, or a half-configured client identity.
    pub fn into_proxy_config(self) -> Result<ProxyConfig, ConfigError> {
        if !self.server.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "server.path must start with '/', got {:?}",
                self.server.path
            )));
        }
        let secs = |name: &str, value: u64| {
            if value == 0 {
                Err(ConfigError::Invalid(format!("backend.{name} must be greater than zero")))
            } else {
                Ok(Duration::from_secs(value))
            }
        };

        let tls = TlsMaterial {
            client_cert: self.tls.cert,
            client_key: self.tls.key,
            ca_certs: self.tls.ca_certs,
        };
        tls.validate().map_err(ConfigError::Invalid)?;

        Ok(ProxyConfig {
            server: ServerConfig {
                bind_addr: self.server.bind,
                ws_path: self.server.path,
            },
            settings: ProxySettings {
                default_backend: self.backend.default_addr,
                encryption_enabled: self.tls.enabled,
                tls,
                dial_timeout: secs("dial_timeout_secs", self.backend.dial_timeout_secs)?,
                keepalive_interval: secs("keepalive_secs", self.backend.keepalive_secs)?,
                handshake_step_timeout: secs(
                    "handshake_step_timeout_secs",
                    self.backend.handshake_step_timeout_secs,
                )?,
                security_reply: self.tls.security_reply,
            },
            tokens: self.tokens,
        })
    }
}

/// Parses configuration text.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] for malformed TOML and
/// [`ConfigError::Invalid`] for out-of-range values.
pub fn parse_config(content: &str) -> Result<ProxyConfig, ConfigError> {
    let file: FileConfig = toml::from_str(content)?;
    file.into_proxy_config()
}

/// Loads configuration from `path`.
///
/// Unlike a missing *section*, a missing *file* is an error: the path was
/// given explicitly.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
/// [`parse_config`].
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
