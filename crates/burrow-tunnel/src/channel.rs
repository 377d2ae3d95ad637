//! Duplex channel adapter.
//!
//! Combines an independently-owned readable handle and writable handle
//! into one bidirectional stream. Pure delegation: no buffering, byte
//! semantics and error values of the underlying handles pass through
//! unchanged.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

/// A bidirectional stream assembled from two one-directional handles.
///
/// Reads delegate to the readable handle, writes (including shutdown) to
/// the writable handle. Neither handle is shared elsewhere; dropping the
/// channel releases both.
#[derive(Debug)]
pub struct DuplexChannel<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> DuplexChannel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Assemble a channel from a readable and a writable handle.
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Close both handles.
    ///
    /// The writable handle is shut down first and its error, if any, is
    /// surfaced; the readable handle is still released afterwards either
    /// way. Each handle is closed exactly once.
    pub async fn close(mut self) -> io::Result<()> {
        let result = self.writer.shutdown().await;
        // self drops here, releasing the reader even if shutdown failed.
        result
    }
}

impl<R, W> AsyncRead for DuplexChannel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

impl<R, W> AsyncWrite for DuplexChannel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().writer).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_shutdown(cx)
    }
}
