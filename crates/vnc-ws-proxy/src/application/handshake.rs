//! RFB / VeNCrypt handshake steps.
//!
//! These functions drive the byte-level exchange between the proxy, the
//! browser-side client, and the VNC backend.  They are generic over Tokio's
//! `AsyncRead + AsyncWrite`, so the same code runs against a real
//! `TcpStream`, the WebSocket byte adapter, or an in-memory `duplex` pipe in
//! tests.  Socket handling (dialing, TLS) lives in the infrastructure layer.
//!
//! # Flow (for beginners)
//!
//! ```text
//!  backend                proxy                      client
//!     │ ── banner ──────────▶ │                          │   step 1
//!     │ ◀─ banner (echo) ──── │ ── banner ─────────────▶ │   step 2
//!     │                       │ ◀──────────── banner ─── │   step 3
//!     │ ── count, types ────▶ │                          │   step 4
//!     │                       │ ── [1, None] ──────────▶ │   step 5
//!     │                       │ ◀──────────── None ───── │
//!     │ ◀─ reply ──────────── │                          │   step 6
//!     │                       │  first type == 19?       │   step 7
//!     │ ── 0.2 ─────────────▶ │                          │   step 8
//!     │ ◀─ 0.2 ────────────── │                          │
//!     │ ── ack (0 = ok) ────▶ │                          │
//!     │ ── n, sub-types ────▶ │                          │   step 9
//!     │ ◀─ 260 ────────────── │                          │   step 10
//!     │ ── ack (1 = ok) ────▶ │                          │
//! ```
//!
//! The client is told only that security type *None* is available; the
//! proxy authenticates to the backend on its behalf.  Every read and write is
//! wrapped in the per-step timeout so a stalled peer cannot hold the session.

use std::future::Future;
use std::time::Duration;

use rfb_core::protocol::security::{prefers_vencrypt, NONE_ONLY_OFFER, VENCRYPT_VERSION};
use rfb_core::protocol::wire;
use rfb_core::{ProtocolVersion, SecurityType, VeNCryptSubType, BANNER_LEN};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::application::error::ProxyError;
use crate::domain::SecurityReplyMode;

/// Runs one negotiation step under `limit`, mapping expiry to
/// [`ProxyError::StepTimeout`].
pub async fn with_step_timeout<F, T, E>(
    step: &'static str,
    limit: Duration,
    fut: F,
) -> Result<T, ProxyError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<ProxyError>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(ProxyError::StepTimeout {
            step,
            timeout: limit,
        }),
    }
}

/// Reads a 12-byte banner and requires RFB 3.8.
///
/// `peer` names the side the banner came from ("backend" or "client") and is
/// carried in the [`ProxyError::VersionMismatch`] message.
pub async fn read_version_banner<S>(
    stream: &mut S,
    peer: &'static str,
    step_timeout: Duration,
) -> Result<[u8; BANNER_LEN], ProxyError>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let banner: [u8; BANNER_LEN] = with_step_timeout(
        "read version banner",
        step_timeout,
        wire::read_array(stream, "version banner"),
    )
    .await?;

    match ProtocolVersion::parse(&banner) {
        Ok(version) if version == ProtocolVersion::V3_8 => Ok(banner),
        _ => Err(ProxyError::VersionMismatch {
            peer,
            banner: String::from_utf8_lossy(&banner).into_owned(),
        }),
    }
}

/// Reads the security-type count and the type list that follows it.
///
/// A zero count is the backend refusing the connection outright.
async fn read_security_types<S>(
    backend: &mut S,
    step_timeout: Duration,
) -> Result<Vec<u8>, ProxyError>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let count = with_step_timeout(
        "read security-type count",
        step_timeout,
        wire::read_u8(backend, "security-type count"),
    )
    .await?;
    if count == 0 {
        return Err(ProxyError::ProtocolViolation(
            "backend offered zero security types".into(),
        ));
    }

    with_step_timeout(
        "read security types",
        step_timeout,
        wire::read_bytes(backend, usize::from(count), "security types"),
    )
    .await
}

// ── Probe ─────────────────────────────────────────────────────────────────────

/// Inspects a throwaway backend connection and reports whether the backend's
/// preferred security type is VeNCrypt.
///
/// Performs only the banner exchange and reads the offered type list; the
/// caller closes the connection afterwards.
pub async fn probe_security_types<S>(
    backend: &mut S,
    step_timeout: Duration,
) -> Result<bool, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let banner = read_version_banner(backend, "backend", step_timeout).await?;
    with_step_timeout(
        "write probe version banner",
        step_timeout,
        wire::write_bytes(backend, &banner, "probe version banner"),
    )
    .await?;

    let offered = read_security_types(backend, step_timeout).await?;
    debug!(?offered, "probe read backend security types");
    Ok(prefers_vencrypt(&offered))
}

// ── Main negotiation ──────────────────────────────────────────────────────────

/// Steps 1–7: relays the version banner, hides the real security list from
/// the client, and confirms the backend leads with VeNCrypt.
///
/// Returns the security types the backend offered.
pub async fn relay_rfb_handshake<B, C>(
    backend: &mut B,
    client: &mut C,
    reply_mode: SecurityReplyMode,
    step_timeout: Duration,
) -> Result<Vec<u8>, ProxyError>
where
    B: AsyncRead + AsyncWrite + Unpin + ?Sized,
    C: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    // 1–2. Backend banner, echoed to both sides.
    let banner = read_version_banner(backend, "backend", step_timeout).await?;
    with_step_timeout(
        "write backend version banner",
        step_timeout,
        wire::write_bytes(backend, &banner, "backend version banner"),
    )
    .await?;
    with_step_timeout(
        "write client version banner",
        step_timeout,
        wire::write_bytes(client, &banner, "client version banner"),
    )
    .await?;

    // 3.
    read_version_banner(client, "client", step_timeout).await?;

    // 4.
    let offered = read_security_types(backend, step_timeout).await?;
    debug!(?offered, "backend security types");

    // 5. The client only ever sees "None".
    with_step_timeout(
        "write client security offer",
        step_timeout,
        wire::write_bytes(client, &NONE_ONLY_OFFER, "client security offer"),
    )
    .await?;
    let choice = with_step_timeout(
        "read client security choice",
        step_timeout,
        wire::read_u8(client, "client security choice"),
    )
    .await?;
    if choice != SecurityType::NONE {
        return Err(ProxyError::NegotiationRejected(format!(
            "client chose security type {choice}, expected None"
        )));
    }

    // 6.
    match reply_mode {
        SecurityReplyMode::EchoList => {
            with_step_timeout(
                "write security type reply",
                step_timeout,
                wire::write_bytes(backend, &offered, "security type reply"),
            )
            .await?;
        }
        SecurityReplyMode::SingleType => {
            with_step_timeout(
                "write security type reply",
                step_timeout,
                wire::write_u8(backend, SecurityType::VENCRYPT, "security type reply"),
            )
            .await?;
        }
    }

    // 7.
    if !prefers_vencrypt(&offered) {
        warn!(?offered, "backend connection is not VeNCrypt");
        return Err(ProxyError::NegotiationRejected(format!(
            "backend connection is not VeNCrypt (first offered type {})",
            offered[0]
        )));
    }

    Ok(offered)
}

/// Steps 8–10: agrees VeNCrypt 0.2 and selects the X.509-None sub-type.
///
/// On success the backend expects a TLS `ClientHello` next.
pub async fn negotiate_vencrypt<B>(backend: &mut B, step_timeout: Duration) -> Result<(), ProxyError>
where
    B: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    // 8.
    let [major, minor] = with_step_timeout(
        "read VeNCrypt version",
        step_timeout,
        wire::read_array::<_, 2>(backend, "VeNCrypt version"),
    )
    .await?;
    debug!(major, minor, "backend sent VeNCrypt version");
    if (major, minor) != VENCRYPT_VERSION {
        return Err(ProxyError::NegotiationRejected(format!(
            "only VeNCrypt version 0.2 is supported, but the backend wanted {major}.{minor}"
        )));
    }

    let (want_major, want_minor) = VENCRYPT_VERSION;
    with_step_timeout(
        "write VeNCrypt version reply",
        step_timeout,
        wire::write_bytes(backend, &[want_major, want_minor], "VeNCrypt version reply"),
    )
    .await?;

    let version_ack = with_step_timeout(
        "read VeNCrypt version ack",
        step_timeout,
        wire::read_u8(backend, "VeNCrypt version ack"),
    )
    .await?;
    if version_ack != 0 {
        return Err(ProxyError::NegotiationRejected(
            "backend could not use VeNCrypt version 0.2".into(),
        ));
    }

    // 9.
    let count = with_step_timeout(
        "read VeNCrypt sub-type count",
        step_timeout,
        wire::read_u8(backend, "VeNCrypt sub-type count"),
    )
    .await?;
    let sub_types = with_step_timeout(
        "read VeNCrypt sub-types",
        step_timeout,
        wire::read_u32_list(backend, usize::from(count), "VeNCrypt sub-types"),
    )
    .await?;
    debug!(?sub_types, "backend VeNCrypt sub-types");
    if !sub_types.contains(&VeNCryptSubType::X509_NONE) {
        return Err(ProxyError::NegotiationRejected(
            "backend does not support the X509None VeNCrypt sub-type".into(),
        ));
    }

    // 10.
    with_step_timeout(
        "write VeNCrypt sub-type choice",
        step_timeout,
        wire::write_u32_be(backend, VeNCryptSubType::X509_NONE, "VeNCrypt sub-type choice"),
    )
    .await?;
    let accepted = with_step_timeout(
        "read VeNCrypt sub-type ack",
        step_timeout,
        wire::read_u8(backend, "VeNCrypt sub-type ack"),
    )
    .await?;
    if accepted == 0 {
        return Err(ProxyError::NegotiationRejected(
            "backend did not accept the X509None sub-type".into(),
        ));
    }

    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
