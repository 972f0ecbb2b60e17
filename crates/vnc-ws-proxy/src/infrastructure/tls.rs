//! TLS client for the backend leg.
//!
//! After the VeNCrypt sub-negotiation selects X.509-None, the proxy runs a
//! TLS client handshake directly over the backend socket.  [`TlsUpgrader`]
//! holds the `rustls` client configuration, built once from [`TlsMaterial`]
//! when the orchestrator is configured:
//!
//! | `ca_certs` | client cert + key | Result                                   |
//! |------------|-------------------|------------------------------------------|
//! | set        | set               | verify backend chain, present identity   |
//! | set        | unset             | verify backend chain, no client identity |
//! | unset      | set               | **no verification**, present identity    |
//! | unset      | unset             | **no verification**, no client identity  |
//!
//! Without a CA bundle the backend is *not* authenticated.  Most VNC servers
//! run with self-signed certificates, so this is the common deployment, but
//! it leaves the backend leg open to an active man-in-the-middle.  The
//! orchestrator logs a warning when it builds an unverified upgrader.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::application::error::ProxyError;
use crate::domain::TlsMaterial;

/// Reads every certificate in a PEM file.
///
/// # Errors
///
/// Returns [`ProxyError::TlsConfiguration`] when the file cannot be opened or
/// contains no parsable certificate.
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, ProxyError> {
    let file = File::open(path).map_err(|e| cert_error(path, e))?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| cert_error(path, e))?;
    if certs.is_empty() {
        return Err(cert_error(path, "no certificates found in file"));
    }
    Ok(certs)
}

/// Reads the first private key (PKCS#8, PKCS#1 or SEC1) in a PEM file.
///
/// # Errors
///
/// Returns [`ProxyError::TlsConfiguration`] when the file cannot be opened or
/// holds no key.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ProxyError> {
    let file = File::open(path).map_err(|e| key_error(path, e))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| key_error(path, e))?
        .ok_or_else(|| key_error(path, "no private key found in file"))
}

fn cert_error(path: &Path, cause: impl std::fmt::Display) -> ProxyError {
    ProxyError::TlsConfiguration(format!(
        "failed to load certificate from {}: {cause}",
        path.display()
    ))
}

fn key_error(path: &Path, cause: impl std::fmt::Display) -> ProxyError {
    ProxyError::TlsConfiguration(format!(
        "failed to load private key from {}: {cause}",
        path.display()
    ))
}

// ── TlsUpgrader ───────────────────────────────────────────────────────────────

/// Performs the backend TLS handshake with a prebuilt client configuration.
#[derive(Clone)]
pub struct TlsUpgrader {
    connector: TlsConnector,
    verifies_backend: bool,
}

impl std::fmt::Debug for TlsUpgrader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsUpgrader")
            .field("verifies_backend", &self.verifies_backend)
            .finish_non_exhaustive()
    }
}

impl TlsUpgrader {
    /// Builds the client configuration from certificate paths.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::TlsConfiguration`] when exactly one of the client
    /// certificate and key is configured, when any file fails to load, or
    /// when `rustls` rejects the resulting configuration.
    pub fn from_material(material: &TlsMaterial) -> Result<Self, ProxyError> {
        material.validate().map_err(ProxyError::TlsConfiguration)?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| {
                ProxyError::TlsConfiguration(format!("failed to set protocol versions: {e}"))
            })?;

        let builder = match &material.ca_certs {
            Some(ca_path) => {
                let mut roots = RootCertStore::empty();
                for cert in load_certificates(ca_path)? {
                    roots.add(cert).map_err(|e| cert_error(ca_path, e))?;
                }
                builder.with_root_certificates(roots)
            }
            None => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoCertificateVerification(provider))),
        };

        let config = match (&material.client_cert, &material.client_key) {
            (Some(cert_path), Some(key_path)) => {
                let certs = load_certificates(cert_path)?;
                let key = load_private_key(key_path)?;
                builder.with_client_auth_cert(certs, key).map_err(|e| {
                    ProxyError::TlsConfiguration(format!("invalid client certificate: {e}"))
                })?
            }
            _ => builder.with_no_client_auth(),
        };

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            verifies_backend: material.verifies_backend(),
        })
    }

    /// Returns `true` when the backend chain is checked against a CA bundle.
    pub fn verifies_backend(&self) -> bool {
        self.verifies_backend
    }

    /// Runs the TLS client handshake over `stream`.
    ///
    /// `server_name` is sent as SNI and, when verification is on, checked
    /// against the backend certificate.
    ///
    /// # Errors
    ///
    /// - [`ProxyError::TlsConfiguration`] if `server_name` is not a valid DNS
    ///   name or IP address.
    /// - [`ProxyError::TlsHandshake`] if the handshake fails.
    /// - [`ProxyError::StepTimeout`] if it does not finish within `limit`.
    pub async fn upgrade(
        &self,
        stream: TcpStream,
        server_name: &str,
        limit: Duration,
    ) -> Result<TlsStream<TcpStream>, ProxyError> {
        let name = ServerName::try_from(server_name.to_string()).map_err(|_| {
            ProxyError::TlsConfiguration(format!("invalid TLS server name {server_name:?}"))
        })?;

        match tokio::time::timeout(limit, self.connector.connect(name, stream)).await {
            Ok(Ok(tls)) => Ok(tls),
            Ok(Err(e)) => Err(ProxyError::TlsHandshake(e)),
            Err(_) => Err(ProxyError::StepTimeout {
                step: "TLS handshake",
                timeout: limit,
            }),
        }
    }
}

/// Accepts any backend certificate.  Signatures are still checked so the
/// handshake itself stays well-formed.
#[derive(Debug)]
struct NoCertificateVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
