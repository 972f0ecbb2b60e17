//! One bridged connection: a client transport paired with a backend transport.
//!
//! A [`PeerSession`] owns both legs after negotiation has finished.  Its two
//! copy operations each take one read half and the opposite write half, so
//! they can run on different tasks without sharing a lock on the hot path.
//!
//! # Teardown
//!
//! ```text
//!   copy A ends (EOF, error, or close signal)
//!        │
//!        ▼
//!   close()  ── flag set ──▶ Notify wakes copy B ──▶ copy B exits
//!        │                                             │
//!        └─ drops halves nobody took                   └─ shuts down its writer,
//!                                                         drops its halves
//! ```
//!
//! Once both copy loops have returned every half has been dropped, which
//! closes both sockets.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Notify;
use tracing::debug;

use crate::application::error::{CopyError, Direction};
use crate::domain::{SessionInfo, SessionKey};

const COPY_BUFFER_SIZE: usize = 16 * 1024;

/// Upper bound on flushing a writer's end-of-stream during teardown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// What the registry needs from a live session, independent of its
/// transport types.
pub trait SessionHandle: Send + Sync {
    /// Snapshot of the session's identity and endpoints.
    fn info(&self) -> SessionInfo;

    /// Closes both legs; returns `true` only for the call that closed them.
    fn close(&self) -> bool;
}

/// A client transport `C` bridged to a backend transport `B`.
pub struct PeerSession<C, B> {
    key: SessionKey,
    client_label: String,
    backend_label: String,
    backend_tls: bool,
    created_at: Instant,

    client_read: Mutex<Option<ReadHalf<C>>>,
    client_write: Mutex<Option<WriteHalf<C>>>,
    backend_read: Mutex<Option<ReadHalf<B>>>,
    backend_write: Mutex<Option<WriteHalf<B>>>,

    closed: AtomicBool,
    close_signal: Notify,
}

/// Locks a half slot, recovering the data if another thread panicked while
/// holding the lock.
fn slot<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<C, B> PeerSession<C, B>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Pairs `client` with `backend`.
    ///
    /// The labels are used in logs and in [`CopyError`] messages.
    pub fn new(
        key: SessionKey,
        client: C,
        client_label: impl Into<String>,
        backend: B,
        backend_label: impl Into<String>,
        backend_tls: bool,
    ) -> Self {
        let (client_read, client_write) = split(client);
        let (backend_read, backend_write) = split(backend);
        Self {
            key,
            client_label: client_label.into(),
            backend_label: backend_label.into(),
            backend_tls,
            created_at: Instant::now(),
            client_read: Mutex::new(Some(client_read)),
            client_write: Mutex::new(Some(client_write)),
            backend_read: Mutex::new(Some(backend_read)),
            backend_write: Mutex::new(Some(backend_write)),
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
        }
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Copies client → backend until end-of-stream, an error, or [`close`].
    ///
    /// Returns the number of bytes copied.
    ///
    /// # Errors
    ///
    /// Returns a [`CopyError`] labelled [`Direction::ClientToBackend`] when a
    /// read or write fails, or when this direction has already run.
    ///
    /// [`close`]: PeerSession::close
    pub async fn copy_client_to_backend(&self) -> Result<u64, CopyError> {
        let direction = Direction::ClientToBackend;
        let reader = slot(&self.client_read).take();
        let writer = slot(&self.backend_write).take();
        match (reader, writer) {
            (Some(reader), Some(writer)) => {
                self.pump(reader, writer, direction, &self.client_label, &self.backend_label)
                    .await
            }
            _ => Err(self.already_ran(direction, &self.client_label, &self.backend_label)),
        }
    }

    /// Copies backend → client; the mirror of
    /// [`copy_client_to_backend`](PeerSession::copy_client_to_backend).
    pub async fn copy_backend_to_client(&self) -> Result<u64, CopyError> {
        let direction = Direction::BackendToClient;
        let reader = slot(&self.backend_read).take();
        let writer = slot(&self.client_write).take();
        match (reader, writer) {
            (Some(reader), Some(writer)) => {
                self.pump(reader, writer, direction, &self.backend_label, &self.client_label)
                    .await
            }
            _ => Err(self.already_ran(direction, &self.backend_label, &self.client_label)),
        }
    }

    /// Closes both transports.  Safe to call any number of times; only the
    /// first call returns `true`.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.close_signal.notify_waiters();

        // Halves that no copy loop has taken yet are dropped here.
        drop(slot(&self.client_read).take());
        drop(slot(&self.client_write).take());
        drop(slot(&self.backend_read).take());
        drop(slot(&self.backend_write).take());

        debug!(session = %self.key, "peer session closed");
        true
    }

    async fn pump<R, W>(
        &self,
        mut reader: R,
        mut writer: W,
        direction: Direction,
        from: &str,
        to: &str,
    ) -> Result<u64, CopyError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let closed = self.close_signal.notified();
        tokio::pin!(closed);
        // Register interest before checking the flag so a concurrent close()
        // cannot slip between the two.
        closed.as_mut().enable();

        let fail = |cause: io::Error, transferred: u64| CopyError {
            direction,
            from: from.to_string(),
            to: to.to_string(),
            transferred,
            cause,
        };

        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut total: u64 = 0;
        let result = loop {
            if self.is_closed() {
                break Ok(total);
            }

            let n = tokio::select! {
                read = reader.read(&mut buf) => match read {
                    Ok(n) => n,
                    Err(e) => break Err(fail(e, total)),
                },
                _ = &mut closed => break Ok(total),
            };
            if n == 0 {
                break Ok(total);
            }

            let written = tokio::select! {
                w = async {
                    writer.write_all(&buf[..n]).await?;
                    writer.flush().await
                } => w,
                _ = &mut closed => break Ok(total),
            };
            if let Err(e) = written {
                break Err(fail(e, total));
            }
            total += n as u64;
        };

        // Propagates end-of-stream to the far side (FIN or WebSocket Close).
        // A peer that stopped reading must not hold teardown open.
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, writer.shutdown())
            .await
            .is_err()
        {
            debug!(session = %self.key, %direction, "writer shutdown timed out");
        }
        debug!(session = %self.key, %direction, bytes = total, "copy loop finished");
        result
    }

    fn already_ran(&self, direction: Direction, from: &str, to: &str) -> CopyError {
        CopyError {
            direction,
            from: from.to_string(),
            to: to.to_string(),
            transferred: 0,
            cause: io::Error::new(
                io::ErrorKind::NotConnected,
                "trying to work with closed connection: direction already ran or session closed",
            ),
        }
    }
}

impl<C, B> SessionHandle for PeerSession<C, B>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    fn info(&self) -> SessionInfo {
        SessionInfo {
            key: self.key,
            client: self.client_label.clone(),
            backend: self.backend_label.clone(),
            backend_tls: self.backend_tls,
            registered_at: self.created_at,
        }
    }

    fn close(&self) -> bool {
        PeerSession::close(self)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
