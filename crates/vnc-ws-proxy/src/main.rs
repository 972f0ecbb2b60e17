//! VNC WebSocket proxy: entry point.
//!
//! This binary accepts WebSocket connections from browser VNC clients and
//! relays them to VNC servers.  When a backend prefers VeNCrypt, the proxy
//! upgrades the backend connection to TLS itself so that browser clients,
//! which cannot speak VeNCrypt, still get an encrypted backend leg.
//!
//! # Usage
//!
//! ```text
//! vnc-ws-proxy [OPTIONS]
//!
//! Options:
//!   --config  <FILE>   TOML configuration file
//!   --bind    <ADDR>   WebSocket listener address [default: 0.0.0.0:6080]
//!   --path    <PATH>   WebSocket request path [default: /ws]
//!   --backend <ADDR>   Default VNC backend [default: 127.0.0.1:5901]
//!   --tls              Enable the VeNCrypt probe and TLS upgrade
//! ```
//!
//! # Environment variable overrides
//!
//! CLI args take precedence over environment variables, and both take
//! precedence over the configuration file.
//!
//! | Variable            | Description                      |
//! |---------------------|----------------------------------|
//! | `VNC_PROXY_CONFIG`  | Path of the TOML config file     |
//! | `VNC_PROXY_BIND`    | WebSocket listener address       |
//! | `VNC_PROXY_PATH`    | WebSocket request path           |
//! | `VNC_PROXY_BACKEND` | Default VNC backend address      |
//! | `VNC_PROXY_TLS`     | `true` to enable the TLS upgrade |
//!
//! Logging is controlled by `RUST_LOG` (default `info`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vnc_ws_proxy::application::{AddressResolver, TokenResolver};
use vnc_ws_proxy::domain::ProxyConfig;
use vnc_ws_proxy::infrastructure::{load_config, run_server, ProxyOrchestrator};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// WebSocket-to-VNC proxy with transparent VeNCrypt upgrade.
///
/// Every flag is optional.  Unset flags fall back to the configuration file,
/// then to the built-in defaults.
#[derive(Debug, Parser)]
#[command(
    name = "vnc-ws-proxy",
    about = "WebSocket-to-VNC proxy with transparent VeNCrypt/X.509 upgrade",
    version
)]
struct Cli {
    /// Path of a TOML configuration file.
    #[arg(long, env = "VNC_PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Address and port for the WebSocket listener, e.g. `0.0.0.0:6080`.
    #[arg(long, env = "VNC_PROXY_BIND")]
    bind: Option<SocketAddr>,

    /// The only request path accepted for the WebSocket upgrade.
    #[arg(long, env = "VNC_PROXY_PATH")]
    path: Option<String>,

    /// VNC backend used when no token table is configured, or when a
    /// request carries no token.
    #[arg(long, env = "VNC_PROXY_BACKEND")]
    backend: Option<String>,

    /// Probe backends for VeNCrypt and upgrade the backend leg to TLS.
    #[arg(long, env = "VNC_PROXY_TLS")]
    tls: bool,
}

impl Cli {
    /// Loads the configuration file (if any) and applies the CLI overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or `--path` does not
    /// start with `/`.
    fn into_proxy_config(self) -> anyhow::Result<ProxyConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => ProxyConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.server.bind_addr = bind;
        }
        if let Some(path) = self.path {
            anyhow::ensure!(path.starts_with('/'), "--path must start with '/', got {path:?}");
            config.server.ws_path = path;
        }
        if let Some(backend) = self.backend {
            config.settings.default_backend = backend;
        }
        if self.tls {
            config.settings.encryption_enabled = true;
        }
        Ok(config)
    }
}

/// Picks the address resolver for `config`.
///
/// A non-empty token table selects the [`TokenResolver`], falling back to
/// the default backend for requests without a token.  Otherwise `None` is
/// returned and the orchestrator sends everything to the default backend.
fn build_resolver(config: &ProxyConfig) -> Option<Arc<dyn AddressResolver>> {
    if config.tokens.is_empty() {
        return None;
    }
    let resolver = TokenResolver::new(config.tokens.clone())
        .with_fallback(config.settings.default_backend.clone());
    Some(Arc::new(resolver))
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. `tracing_subscriber` is initialised; the level comes from `RUST_LOG`.
/// 2. CLI arguments are parsed and merged with the configuration file.
/// 3. The [`ProxyOrchestrator`] is built.  TLS material is loaded here, so
///    a bad certificate path stops the process before it listens.
/// 4. A Ctrl+C handler clears a shared `AtomicBool`.
/// 5. [`run_server`] accepts browser connections until the flag is cleared.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_proxy_config()?;
    let resolver = build_resolver(&config);

    info!(
        bind = %config.server.bind_addr,
        path = %config.server.ws_path,
        default_backend = %config.settings.default_backend,
        tokens = config.tokens.len(),
        tls = config.settings.encryption_enabled,
        "VNC WebSocket proxy starting"
    );

    let orchestrator = ProxyOrchestrator::configure(resolver, config.settings)
        .context("failed to configure the proxy")?;

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    // The accept loop in `run_server` checks this flag every 200 ms.
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(config.server, Arc::new(orchestrator), running).await?;

    info!("VNC WebSocket proxy stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
