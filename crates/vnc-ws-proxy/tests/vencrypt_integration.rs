//! Integration tests for the VeNCrypt probe and the TLS upgrade.
//!
//! # Purpose
//!
//! These tests run the real orchestrator with encryption enabled against a
//! scripted VNC backend on loopback.  The browser side is an in-memory pipe
//! that speaks the client half of the RFB handshake.
//!
//! # What the scripted backend does
//!
//! ```text
//! backend                                   proxy
//! ───────                                   ─────
//! "RFB 003.008\n"                ───────▶
//!                                ◀───────   "RFB 003.008\n"
//! [count, types...]              ───────▶
//!                                ◀───────   reply (whole list or one byte)
//! [0, 2]                         ───────▶
//!                                ◀───────   [0, 2]
//! 0 (version ok)                 ───────▶
//! [n, sub-types as u32 BE...]    ───────▶
//!                                ◀───────   260 as u32 BE
//! 1 (sub-type ok)                ───────▶
//!                                ◀───────   TLS ClientHello (0x16 ...)
//! ```
//!
//! The proxy probes every backend on a separate connection first.  The
//! probe hangs up after reading the type list, so the backend runs its
//! script once per accepted connection and simply stops when the peer goes
//! away.

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;

use vnc_ws_proxy::application::ProxyError;
use vnc_ws_proxy::domain::{ConnectionRequest, ProxySettings, SecurityReplyMode};
use vnc_ws_proxy::infrastructure::{ProxyOrchestrator, SessionOutcome};

const BANNER: &[u8; 12] = b"RFB 003.008\n";

// ── Scripted backend ──────────────────────────────────────────────────────────

/// How far one backend connection got, reported back to the test.
#[derive(Debug, PartialEq, Eq)]
enum BackendEvent {
    /// The proxy's reply to the security-type list.
    SecurityReply(Vec<u8>),
    /// The first byte read after the sub-type list was sent, if any.
    AfterSubTypes(Option<u8>),
    /// The proxy's sub-type choice.
    SubTypeChoice(u32),
    /// Application bytes read inside TLS.
    TlsPayload(Vec<u8>),
}

#[derive(Clone)]
struct BackendScript {
    types: Vec<u8>,
    sub_types: Vec<u32>,
    reply_len: usize,
    tls: Option<TlsAcceptor>,
    events: mpsc::UnboundedSender<BackendEvent>,
}

async fn spawn_backend(script: BackendScript) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while let Ok((sock, _)) = listener.accept().await {
            let script = script.clone();
            tokio::spawn(async move {
                let _ = run_script(sock, script).await;
            });
        }
    });
    addr
}

async fn run_script(mut sock: TcpStream, script: BackendScript) -> std::io::Result<()> {
    sock.write_all(BANNER).await?;
    let mut banner = [0u8; 12];
    sock.read_exact(&mut banner).await?;

    let mut offer = vec![script.types.len() as u8];
    offer.extend_from_slice(&script.types);
    sock.write_all(&offer).await?;

    // The probe connection ends here.
    let mut reply = vec![0u8; script.reply_len];
    sock.read_exact(&mut reply).await?;
    let _ = script.events.send(BackendEvent::SecurityReply(reply));

    sock.write_all(&[0, 2]).await?;
    let mut version = [0u8; 2];
    sock.read_exact(&mut version).await?;
    sock.write_all(&[0]).await?;

    let mut list = vec![script.sub_types.len() as u8];
    for sub_type in &script.sub_types {
        list.extend_from_slice(&sub_type.to_be_bytes());
    }
    sock.write_all(&list).await?;

    let Some(acceptor) = script.tls else {
        let mut next = [0u8; 1];
        let got = match sock.read(&mut next).await {
            Ok(1) => Some(next[0]),
            _ => None,
        };
        let _ = script.events.send(BackendEvent::AfterSubTypes(got));
        return Ok(());
    };

    let choice = sock.read_u32().await?;
    let _ = script.events.send(BackendEvent::SubTypeChoice(choice));
    sock.write_all(&[1]).await?;

    let mut first = [0u8; 1];
    sock.peek(&mut first).await?;
    let _ = script.events.send(BackendEvent::AfterSubTypes(Some(first[0])));

    let mut tls = acceptor.accept(sock).await?;
    // RFB SecurityResult "OK", now inside TLS.
    tls.write_all(&[0, 0, 0, 0]).await?;
    let mut client_init = [0u8; 1];
    tls.read_exact(&mut client_init).await?;
    let _ = script.events.send(BackendEvent::TlsPayload(client_init.to_vec()));
    tls.write_all(b"ServerInit").await?;
    tls.shutdown().await?;
    Ok(())
}

/// A TLS acceptor with a throwaway self-signed certificate for `localhost`.
fn tls_acceptor() -> TlsAcceptor {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert: CertificateDer<'static> = certified.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));
    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![cert], key)
    .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

// ── Proxy side ────────────────────────────────────────────────────────────────

fn encrypting_orchestrator(backend: String, reply: SecurityReplyMode) -> Arc<ProxyOrchestrator> {
    let settings = ProxySettings {
        default_backend: backend,
        encryption_enabled: true,
        dial_timeout: Duration::from_secs(2),
        handshake_step_timeout: Duration::from_secs(3),
        security_reply: reply,
        ..ProxySettings::default()
    };
    Arc::new(ProxyOrchestrator::configure(None, settings).unwrap())
}

fn serve(
    orchestrator: &Arc<ProxyOrchestrator>,
    proxy_side: DuplexStream,
) -> tokio::task::JoinHandle<Result<SessionOutcome, ProxyError>> {
    let orchestrator = Arc::clone(orchestrator);
    tokio::spawn(async move {
        orchestrator
            .serve(proxy_side, &ConnectionRequest::default())
            .await
    })
}

/// Plays the browser's side of the handshake when the proxy answers with
/// "None only".
async fn browser_accepts_none(browser: &mut DuplexStream) {
    let mut banner = [0u8; 12];
    browser.read_exact(&mut banner).await.unwrap();
    assert_eq!(&banner, BANNER);
    browser.write_all(BANNER).await.unwrap();

    let mut offer = [0u8; 2];
    browser.read_exact(&mut offer).await.unwrap();
    assert_eq!(offer, [1, 1], "client must only be offered security type None");
    browser.write_all(&[1]).await.unwrap();
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<BackendEvent>) -> BackendEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("backend event")
        .expect("backend still running")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// Backend offers [19, 2] and sub-types [256, 260]: the backend leg is
/// upgraded to TLS and the session runs inside it.
#[tokio::test]
async fn test_vencrypt_backend_is_upgraded_to_tls() {
    // Arrange
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let backend = spawn_backend(BackendScript {
        types: vec![19, 2],
        sub_types: vec![256, 260],
        reply_len: 2,
        tls: Some(tls_acceptor()),
        events: events_tx,
    })
    .await;
    let orchestrator = encrypting_orchestrator(backend, SecurityReplyMode::EchoList);
    let (proxy_side, mut browser) = duplex(4096);

    // Act
    let serving = serve(&orchestrator, proxy_side);
    browser_accepts_none(&mut browser).await;

    let mut security_result = [0u8; 4];
    browser.read_exact(&mut security_result).await.unwrap();
    browser.write_all(&[1]).await.unwrap();
    let mut rest = Vec::new();
    browser.read_to_end(&mut rest).await.unwrap();
    let outcome = serving.await.unwrap().unwrap();

    // Assert: the echoed list, the 260 choice, a TLS record, then RFB inside TLS
    assert_eq!(next_event(&mut events).await, BackendEvent::SecurityReply(vec![19, 2]));
    assert_eq!(next_event(&mut events).await, BackendEvent::SubTypeChoice(260));
    assert_eq!(
        next_event(&mut events).await,
        BackendEvent::AfterSubTypes(Some(0x16)),
        "backend leg must be TLS-framed after negotiation"
    );
    assert_eq!(next_event(&mut events).await, BackendEvent::TlsPayload(vec![1]));
    assert_eq!(security_result, [0, 0, 0, 0]);
    assert_eq!(rest, b"ServerInit");
    assert!(outcome.backend_tls);
    assert_eq!(outcome.bytes_to_client, 4 + 10);
    assert_eq!(orchestrator.session_count(), 0);
}

/// With the single-type reply the backend receives exactly one byte (19).
#[tokio::test]
async fn test_single_type_reply_sends_only_vencrypt() {
    // Arrange
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let backend = spawn_backend(BackendScript {
        types: vec![19, 2],
        sub_types: vec![260],
        reply_len: 1,
        tls: Some(tls_acceptor()),
        events: events_tx,
    })
    .await;
    let orchestrator = encrypting_orchestrator(backend, SecurityReplyMode::SingleType);
    let (proxy_side, mut browser) = duplex(4096);

    // Act
    let serving = serve(&orchestrator, proxy_side);
    browser_accepts_none(&mut browser).await;
    let mut security_result = [0u8; 4];
    browser.read_exact(&mut security_result).await.unwrap();
    browser.write_all(&[0]).await.unwrap();
    let mut rest = Vec::new();
    browser.read_to_end(&mut rest).await.unwrap();

    // Assert
    assert_eq!(next_event(&mut events).await, BackendEvent::SecurityReply(vec![19]));
    assert!(serving.await.unwrap().unwrap().backend_tls);
}

/// Sub-types without 260: the attempt is rejected and no TLS handshake is
/// started.
#[tokio::test]
async fn test_missing_x509_none_is_rejected_without_tls() {
    // Arrange
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let backend = spawn_backend(BackendScript {
        types: vec![19],
        sub_types: vec![256, 257, 262],
        reply_len: 1,
        tls: None,
        events: events_tx,
    })
    .await;
    let orchestrator = encrypting_orchestrator(backend, SecurityReplyMode::EchoList);
    let (proxy_side, mut browser) = duplex(4096);

    // Act
    let serving = serve(&orchestrator, proxy_side);
    browser_accepts_none(&mut browser).await;
    let result = serving.await.unwrap();

    // Assert
    match result {
        Err(ProxyError::NegotiationRejected(message)) => {
            assert!(message.contains("X509None"), "unexpected message: {message}")
        }
        other => panic!("expected NegotiationRejected, got {other:?}"),
    }
    assert_eq!(next_event(&mut events).await, BackendEvent::SecurityReply(vec![19]));
    assert_eq!(
        next_event(&mut events).await,
        BackendEvent::AfterSubTypes(None),
        "proxy must hang up instead of starting TLS"
    );
    assert_eq!(orchestrator.session_count(), 0);
}

/// Security types [1, 19]: the probe says "not VeNCrypt" and the client
/// negotiates with the backend directly.
#[tokio::test]
async fn test_backend_preferring_none_passes_through_untouched() {
    // Arrange: a plain RFB backend that offers None first
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while let Ok((mut sock, _)) = listener.accept().await {
            tokio::spawn(async move {
                sock.write_all(BANNER).await.ok()?;
                let mut banner = [0u8; 12];
                sock.read_exact(&mut banner).await.ok()?;
                sock.write_all(&[2, 1, 19]).await.ok()?;
                let mut choice = [0u8; 1];
                sock.read_exact(&mut choice).await.ok()?;
                sock.write_all(&[0, 0, 0, 0]).await.ok()?;
                sock.shutdown().await.ok()
            });
        }
    });
    let orchestrator = encrypting_orchestrator(backend, SecurityReplyMode::EchoList);
    let (proxy_side, mut browser) = duplex(4096);

    // Act: the browser sees the backend's real list and picks None itself
    let serving = serve(&orchestrator, proxy_side);
    let mut banner = [0u8; 12];
    browser.read_exact(&mut banner).await.unwrap();
    browser.write_all(BANNER).await.unwrap();
    let mut offer = [0u8; 3];
    browser.read_exact(&mut offer).await.unwrap();
    browser.write_all(&[1]).await.unwrap();
    let mut rest = Vec::new();
    browser.read_to_end(&mut rest).await.unwrap();
    let outcome = serving.await.unwrap().unwrap();

    // Assert
    assert_eq!(offer, [2, 1, 19]);
    assert_eq!(rest, [0, 0, 0, 0]);
    assert!(!outcome.backend_tls);
    assert_eq!(outcome.bytes_to_backend, 13);
}

/// A backend that speaks RFB 3.3 is refused during the probe.
#[tokio::test]
async fn test_old_protocol_version_is_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while let Ok((mut sock, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = sock.write_all(b"RFB 003.003\n").await;
                let mut sink = Vec::new();
                let _ = sock.read_to_end(&mut sink).await;
            });
        }
    });
    let orchestrator = encrypting_orchestrator(backend, SecurityReplyMode::EchoList);
    let (proxy_side, _browser) = duplex(4096);

    let result = serve(&orchestrator, proxy_side).await.unwrap();

    assert!(matches!(result, Err(ProxyError::VersionMismatch { peer: "backend", .. })));
}
