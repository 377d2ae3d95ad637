//! Multiplexer client endpoint.
//!
//! Owns the yamux session over the tunnel's channel. The session is driven
//! by a dedicated task; callers open logical streams through a cloneable
//! handle and never touch the channel or the multiplexer state directly.

use crate::error::{Result, TunnelError};
use futures::future::poll_fn;
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt};
use yamux::{Connection, ConnectionError, Mode};

/// Open requests queued ahead of the session task.
const OPEN_REQUEST_BUFFER: usize = 16;

type OpenReply = oneshot::Sender<std::result::Result<LogicalStream, ConnectionError>>;

/// Client side of the multiplexed session.
///
/// Created over any duplexed byte transport. [`MuxEndpoint::close`] tears
/// the session down immediately: the transport is dropped and every logical
/// stream still open unblocks. Dropping the endpoint and all of its handles
/// instead lets the session task wind the connection down gracefully.
pub struct MuxEndpoint {
    opens: mpsc::Sender<OpenReply>,
    shutdown: oneshot::Sender<()>,
    driver: JoinHandle<Option<ConnectionError>>,
}

impl MuxEndpoint {
    /// Start a client session over `io`.
    ///
    /// The session task runs until the peer closes, the transport fails, or
    /// [`MuxEndpoint::close`] is called.
    pub fn client<T>(io: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let connection = Connection::new(io.compat(), yamux::Config::default(), Mode::Client);
        let (opens, open_rx) = mpsc::channel(OPEN_REQUEST_BUFFER);
        let (shutdown, shutdown_rx) = oneshot::channel();
        let driver = tokio::spawn(drive(connection, open_rx, shutdown_rx));
        Self {
            opens,
            shutdown,
            driver,
        }
    }

    /// A cloneable capability for opening logical streams.
    pub fn handle(&self) -> EndpointHandle {
        EndpointHandle {
            opens: self.opens.clone(),
        }
    }

    /// Open a new logical stream on the session.
    pub async fn open_stream(&self) -> Result<LogicalStream> {
        self.handle().open_stream().await
    }

    /// Whether the session task has already ended on its own.
    ///
    /// True means the peer closed or the transport failed; no further stream
    /// can be opened.
    pub fn is_closed(&self) -> bool {
        self.driver.is_finished()
    }

    /// Tear the session down and wait for the task to finish.
    ///
    /// The connection and its transport are dropped on the spot, so logical
    /// streams and opens still in flight from other handles unblock
    /// immediately instead of waiting out the peer. Returns the connection
    /// error the session ended with, if any.
    pub async fn close(self) -> Option<ConnectionError> {
        let Self {
            opens,
            shutdown,
            driver,
        } = self;
        drop(opens);
        let _ = shutdown.send(());
        match driver.await {
            Ok(terminal) => terminal,
            Err(e) => {
                tracing::error!(error = %e, "endpoint session task panicked");
                None
            }
        }
    }
}

impl std::fmt::Debug for MuxEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxEndpoint")
            .field("closed", &self.driver.is_finished())
            .finish()
    }
}

/// Cloneable stream-opening capability handed to stream drivers.
#[derive(Clone)]
pub struct EndpointHandle {
    opens: mpsc::Sender<OpenReply>,
}

impl EndpointHandle {
    /// Open a new logical stream on the session.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::Endpoint`] if the session is closed or the
    /// open is rejected.
    pub async fn open_stream(&self) -> Result<LogicalStream> {
        let (reply, opened) = oneshot::channel();
        self.opens
            .send(reply)
            .await
            .map_err(|_| TunnelError::Endpoint(ConnectionError::Closed))?;
        match opened.await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(TunnelError::Endpoint(e)),
            Err(_) => Err(TunnelError::Endpoint(ConnectionError::Closed)),
        }
    }
}

impl std::fmt::Debug for EndpointHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointHandle").finish()
    }
}

/// An independent bidirectional byte conduit multiplexed over the channel.
///
/// Shutting down the write side half-closes the stream: the peer observes
/// end-of-request while the read side keeps delivering the response.
#[derive(Debug)]
pub struct LogicalStream {
    inner: Compat<yamux::Stream>,
}

impl LogicalStream {
    fn new(stream: yamux::Stream) -> Self {
        Self {
            inner: stream.compat(),
        }
    }
}

impl AsyncRead for LogicalStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for LogicalStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Drive the session until it ends.
///
/// Returns `Some` if the session terminated with a connection error, `None`
/// on a clean close. Pending opens are failed before the task exits. A
/// `shutdown` signal ends the task on the spot, dropping the connection and
/// its transport; if the signal side is dropped instead, the session stays
/// up until every handle is gone and then closes cleanly.
async fn drive<T>(
    mut connection: Connection<T>,
    mut opens: mpsc::Receiver<OpenReply>,
    mut shutdown: oneshot::Receiver<()>,
) -> Option<ConnectionError>
where
    T: futures::AsyncRead + futures::AsyncWrite + Unpin + Send + 'static,
{
    let mut pending: VecDeque<OpenReply> = VecDeque::new();
    let mut opens_closed = false;
    let mut detached = false;

    let terminal = poll_fn(|cx| {
        if !detached {
            match Pin::new(&mut shutdown).poll(cx) {
                Poll::Ready(Ok(())) => {
                    fail_pending(&mut pending);
                    return Poll::Ready(None);
                }
                // Endpoint dropped without close(); keep the session alive
                // for the remaining handles and wind down once they are gone.
                Poll::Ready(Err(_)) => detached = true,
                Poll::Pending => {}
            }
        }

        while !opens_closed {
            match opens.poll_recv(cx) {
                Poll::Ready(Some(reply)) => pending.push_back(reply),
                Poll::Ready(None) => opens_closed = true,
                Poll::Pending => break,
            }
        }

        // Service queued opens in order.
        while !pending.is_empty() {
            match connection.poll_new_outbound(cx) {
                Poll::Ready(Ok(stream)) => {
                    if let Some(reply) = pending.pop_front() {
                        let _ = reply.send(Ok(LogicalStream::new(stream)));
                    }
                }
                Poll::Ready(Err(e)) => {
                    tracing::debug!(error = %e, "outbound stream open failed");
                    if let Some(reply) = pending.pop_front() {
                        let _ = reply.send(Err(e));
                    }
                }
                Poll::Pending => break,
            }
        }

        // Drive session progress. The client never expects inbound streams;
        // any that arrive are refused by dropping them.
        loop {
            match connection.poll_next_inbound(cx) {
                Poll::Ready(Some(Ok(stream))) => {
                    tracing::debug!("dropping unexpected inbound stream");
                    drop(stream);
                }
                Poll::Ready(Some(Err(e))) => {
                    fail_pending(&mut pending);
                    return Poll::Ready(Some(e));
                }
                Poll::Ready(None) => {
                    fail_pending(&mut pending);
                    return Poll::Ready(None);
                }
                Poll::Pending => break,
            }
        }

        // Every handle is gone and nothing is in flight: wind the session
        // down cleanly.
        if opens_closed && pending.is_empty() {
            return match connection.poll_close(cx) {
                Poll::Ready(Ok(())) => Poll::Ready(None),
                Poll::Ready(Err(e)) => Poll::Ready(Some(e)),
                Poll::Pending => Poll::Pending,
            };
        }

        Poll::Pending
    })
    .await;

    match &terminal {
        Some(e) => tracing::debug!(error = %e, "multiplexer session ended with error"),
        None => tracing::debug!("multiplexer session closed"),
    }
    terminal
}

fn fail_pending(pending: &mut VecDeque<OpenReply>) {
    for reply in pending.drain(..) {
        let _ = reply.send(Err(ConnectionError::Closed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_fails_when_transport_vanishes() {
        let (local, remote) = tokio::io::duplex(1024);
        let endpoint = MuxEndpoint::client(local);
        drop(remote);

        let result = endpoint.open_stream().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_open_after_close_is_rejected() {
        let (local, remote) = tokio::io::duplex(1024);
        let endpoint = MuxEndpoint::client(local);
        let handle = endpoint.handle();
        drop(remote);

        endpoint.close().await;

        let result = handle.open_stream().await;
        assert!(matches!(result, Err(TunnelError::Endpoint(_))));
    }

    #[tokio::test]
    async fn test_close_reports_session_end() {
        let (local, remote) = tokio::io::duplex(1024);
        let endpoint = MuxEndpoint::client(local);
        drop(remote);

        // With the remote gone the session cannot close cleanly; the task
        // still ends and close() returns rather than hanging.
        let _ = endpoint.close().await;
    }

    #[tokio::test]
    async fn test_close_unblocks_stalled_stream_reads() {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let endpoint = MuxEndpoint::client(local);

        // Opens are optimistic, so the stream comes up even though nothing
        // behind `remote` will ever answer on it.
        let mut stream = endpoint.open_stream().await.unwrap();
        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            tokio::io::AsyncReadExt::read(&mut stream, &mut buf).await
        });

        endpoint.close().await;

        let read = tokio::time::timeout(std::time::Duration::from_secs(5), reader)
            .await
            .expect("read should unblock once the session is torn down")
            .expect("reader task should not panic");
        match read {
            Ok(0) | Err(_) => {}
            Ok(n) => panic!("read {n} bytes from a dead session"),
        }
        drop(remote);
    }
}
