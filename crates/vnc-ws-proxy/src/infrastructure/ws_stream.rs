//! Byte-stream view of a WebSocket connection.
//!
//! noVNC and similar browser clients carry the raw RFB byte stream inside
//! WebSocket frames.  [`WsByteStream`] turns a message-based
//! `WebSocketStream` into `AsyncRead + AsyncWrite` so the handshake code and
//! the copy loops can treat the browser exactly like a TCP socket.
//!
//! | Direction | Frame                | Becomes                       |
//! |-----------|----------------------|-------------------------------|
//! | inbound   | Binary / Text        | payload bytes                 |
//! | inbound   | Ping / Pong / Frame  | nothing (skipped)             |
//! | inbound   | Close, or stream end | end-of-stream (`Ok(0)` read)  |
//! | outbound  | every `write` call   | one Binary frame              |
//!
//! Pong replies to inbound pings are queued by tungstenite itself and go out
//! with the next write or flush.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

/// Adapts a [`WebSocketStream`] to `AsyncRead + AsyncWrite`.
pub struct WsByteStream<S> {
    inner: WebSocketStream<S>,
    /// Unread tail of the last inbound frame.
    pending: Vec<u8>,
    /// Read offset into `pending`.
    offset: usize,
    eof: bool,
}

impl<S> WsByteStream<S> {
    pub fn new(inner: WebSocketStream<S>) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            offset: 0,
            eof: false,
        }
    }

    fn drain_pending(&mut self, buf: &mut ReadBuf<'_>) {
        let available = &self.pending[self.offset..];
        let n = available.len().min(buf.remaining());
        buf.put_slice(&available[..n]);
        self.offset += n;
        if self.offset == self.pending.len() {
            self.pending.clear();
            self.offset = 0;
        }
    }
}

/// Converts a tungstenite error into an I/O error, keeping closed-connection
/// errors recognisable as such.
fn ws_to_io(err: WsError) -> io::Error {
    match err {
        WsError::Io(e) => e,
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            io::Error::new(io::ErrorKind::BrokenPipe, "websocket connection closed")
        }
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}

impl<S> AsyncRead for WsByteStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if this.offset < this.pending.len() {
                this.drain_pending(buf);
                return Poll::Ready(Ok(()));
            }
            if this.eof {
                return Poll::Ready(Ok(()));
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(Message::Binary(data)))) => this.pending = data,
                Poll::Ready(Some(Ok(Message::Text(text)))) => this.pending = text.into_bytes(),
                Poll::Ready(Some(Ok(Message::Close(_)))) | Poll::Ready(None) => this.eof = true,
                Poll::Ready(Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)))) => {}
                Poll::Ready(Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed))) => {
                    this.eof = true;
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(ws_to_io(e))),
                Poll::Pending => return Poll::Pending,
            }
            this.offset = 0;
        }
    }
}

impl<S> AsyncWrite for WsByteStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let this = self.get_mut();

        match Pin::new(&mut this.inner).poll_ready(cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(e)) => return Poll::Ready(Err(ws_to_io(e))),
            Poll::Pending => return Poll::Pending,
        }
        Pin::new(&mut this.inner)
            .start_send(Message::Binary(buf.to_vec()))
            .map_err(ws_to_io)?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner)
            .poll_flush(cx)
            .map_err(ws_to_io)
    }

    /// Sends a Close frame and flushes it.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match Pin::new(&mut self.get_mut().inner).poll_close(cx) {
            Poll::Ready(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                Poll::Ready(Ok(()))
            }
            other => other.map_err(ws_to_io),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio_tungstenite::tungstenite::protocol::Role;

    /// Returns (proxy-side adapter, browser-side raw WebSocket).
    async fn ws_pair() -> (WsByteStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (server_io, client_io) = duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        (WsByteStream::new(server), client)
    }

    #[tokio::test]
    async fn test_binary_frame_payload_is_readable() {
        // Arrange
        let (mut stream, mut browser) = ws_pair().await;
        browser.send(Message::Binary(b"RFB 003.008\n".to_vec())).await.unwrap();

        // Act
        let mut banner = [0u8; 12];
        stream.read_exact(&mut banner).await.unwrap();

        // Assert
        assert_eq!(&banner, b"RFB 003.008\n");
    }

    #[tokio::test]
    async fn test_text_frame_payload_is_read_as_bytes() {
        let (mut stream, mut browser) = ws_pair().await;
        browser.send(Message::Text("hello".into())).await.unwrap();

        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();

        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_small_reads_consume_one_frame_in_order() {
        // Arrange: one 4-byte frame read one byte at a time
        let (mut stream, mut browser) = ws_pair().await;
        browser.send(Message::Binary(vec![1, 2, 3, 4])).await.unwrap();
        browser.send(Message::Binary(vec![5])).await.unwrap();

        // Act
        let mut got = Vec::new();
        for _ in 0..5 {
            got.push(stream.read_u8().await.unwrap());
        }

        // Assert
        assert_eq!(got, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_ping_frames_are_transparent() {
        let (mut stream, mut browser) = ws_pair().await;
        browser.send(Message::Ping(vec![9, 9])).await.unwrap();
        browser.send(Message::Binary(vec![42])).await.unwrap();

        assert_eq!(stream.read_u8().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_close_frame_is_end_of_stream() {
        // Arrange
        let (mut stream, mut browser) = ws_pair().await;
        browser.send(Message::Binary(vec![7])).await.unwrap();
        browser.close(None).await.unwrap();

        // Act
        let mut all = Vec::new();
        stream.read_to_end(&mut all).await.unwrap();

        // Assert
        assert_eq!(all, vec![7]);
    }

    #[tokio::test]
    async fn test_each_write_becomes_one_binary_frame() {
        // Arrange
        let (mut stream, mut browser) = ws_pair().await;

        // Act
        stream.write_all(&[1, 1]).await.unwrap();
        stream.flush().await.unwrap();

        // Assert
        let frame = browser.next().await.unwrap().unwrap();
        assert_eq!(frame, Message::Binary(vec![1, 1]));
    }

    #[tokio::test]
    async fn test_shutdown_sends_close_frame() {
        let (mut stream, mut browser) = ws_pair().await;

        stream.shutdown().await.unwrap();

        let frame = browser.next().await.unwrap().unwrap();
        assert!(matches!(frame, Message::Close(_)));
    }

    #[test]
    fn test_closed_errors_map_to_broken_pipe() {
        let err = ws_to_io(WsError::ConnectionClosed);
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(err.to_string().contains("connection closed"));
    }
}
