//! Stream drivers.
//!
//! A driver owns one logical stream for its whole lifetime: write the
//! request, half-close, then relay the response into the caller's sink as
//! it arrives. Driver failures are local to their stream.

use crate::endpoint::EndpointHandle;
use crate::error::{Result, TunnelError};
use bytes::Bytes;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Response bytes are forwarded to the sink in chunks of this size.
const RESPONSE_CHUNK: usize = 8 * 1024;

/// What a finished exchange moved over its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamReport {
    /// Tunnel-local stream number, assigned in spawn order.
    pub stream: u64,
    /// Request bytes written before the half-close.
    pub bytes_sent: u64,
    /// Response bytes forwarded to the sink.
    pub bytes_received: u64,
}

/// Open a stream and run one request/response exchange over it.
///
/// The handle is held until the exchange finishes so the session stays up
/// for as long as any driver is running. All failures, including the open
/// itself, are reported as [`TunnelError::Stream`] for this stream only.
pub(crate) async fn run_exchange<S>(
    handle: EndpointHandle,
    stream_no: u64,
    request: Bytes,
    mut sink: S,
) -> Result<StreamReport>
where
    S: AsyncWrite + Send + Unpin,
{
    let mut stream = match handle.open_stream().await {
        Ok(stream) => stream,
        Err(TunnelError::Endpoint(e)) => {
            return Err(TunnelError::Stream {
                stream: stream_no,
                source: io::Error::new(io::ErrorKind::NotConnected, e),
            });
        }
        Err(other) => return Err(other),
    };

    exchange(&mut stream, &request, &mut sink)
        .await
        .map(|(bytes_sent, bytes_received)| StreamReport {
            stream: stream_no,
            bytes_sent,
            bytes_received,
        })
        .map_err(|e| TunnelError::Stream {
            stream: stream_no,
            source: e,
        })
}

/// Write the request, half-close, and forward the response incrementally.
///
/// The sink is flushed after every chunk so slow responses surface as they
/// arrive rather than at end-of-stream.
async fn exchange<T, S>(stream: &mut T, request: &[u8], sink: &mut S) -> io::Result<(u64, u64)>
where
    T: AsyncRead + AsyncWrite + Unpin,
    S: AsyncWrite + Unpin,
{
    stream.write_all(request).await?;
    stream.flush().await?;
    stream.shutdown().await?;
    let bytes_sent = request.len() as u64;

    let mut bytes_received = 0u64;
    let mut chunk = vec![0u8; RESPONSE_CHUNK];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        sink.write_all(&chunk[..n]).await?;
        sink.flush().await?;
        bytes_received += n as u64;
    }

    Ok((bytes_sent, bytes_received))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exchange_sends_half_closes_and_collects_response() {
        let (mut local, mut remote) = tokio::io::duplex(1024);

        let peer = tokio::spawn(async move {
            let mut request = Vec::new();
            remote.read_to_end(&mut request).await.unwrap();
            assert_eq!(request, b"list files");
            remote.write_all(b"a.txt\nb.txt\n").await.unwrap();
            remote.shutdown().await.unwrap();
        });

        let mut sink = Vec::new();
        let (sent, received) = exchange(&mut local, b"list files", &mut sink)
            .await
            .unwrap();

        peer.await.unwrap();
        assert_eq!(sent, 10);
        assert_eq!(received, 12);
        assert_eq!(sink, b"a.txt\nb.txt\n");
    }

    #[tokio::test]
    async fn test_exchange_with_empty_response() {
        let (mut local, mut remote) = tokio::io::duplex(64);

        let peer = tokio::spawn(async move {
            let mut request = Vec::new();
            remote.read_to_end(&mut request).await.unwrap();
            remote.shutdown().await.unwrap();
        });

        let mut sink = Vec::new();
        let (sent, received) = exchange(&mut local, b"ping", &mut sink).await.unwrap();

        peer.await.unwrap();
        assert_eq!(sent, 4);
        assert_eq!(received, 0);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_exchange_surfaces_peer_failure() {
        let (mut local, remote) = tokio::io::duplex(16);
        drop(remote);

        let mut sink = Vec::new();
        let result = exchange(&mut local, b"does anyone hear me", &mut sink).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_open_failure_is_reported_for_this_stream_only() {
        let (local, remote) = tokio::io::duplex(64);
        let endpoint = crate::endpoint::MuxEndpoint::client(local);
        let handle = endpoint.handle();
        drop(remote);
        endpoint.close().await;

        let result = run_exchange(handle, 7, Bytes::from_static(b"request"), Vec::new()).await;
        match result {
            Err(TunnelError::Stream { stream, .. }) => assert_eq!(stream, 7),
            other => panic!("expected local stream error, got {other:?}"),
        }
    }
}
