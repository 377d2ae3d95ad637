//! Background output relay.
//!
//! One task per tunnel copies the attach output into the internal protocol
//! pipe, splitting diagnostic-lane bytes off to their own sink. This
//! decouples the raw attach handle from the logical reader used by the
//! barrier and the endpoint.

use burrow_runtime::demultiplex;
use std::io;
use tokio::io::{AsyncWrite, ReadHalf, SimplexStream, WriteHalf};
use tokio::task::JoinHandle;

/// Spawn the relay task.
///
/// Runs until the attach output reaches end-of-stream or a sink goes away.
/// The protocol pipe writer is dropped when the task ends, so the channel's
/// read side observes end-of-stream and every logical stream unblocks.
pub(crate) fn spawn<D>(
    mut source: ReadHalf<SimplexStream>,
    mut protocol: WriteHalf<SimplexStream>,
    mut diagnostics: D,
) -> JoinHandle<()>
where
    D: AsyncWrite + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        match demultiplex(&mut source, &mut protocol, &mut diagnostics).await {
            Ok((protocol_bytes, diagnostic_bytes)) => {
                tracing::debug!(protocol_bytes, diagnostic_bytes, "output relay finished");
            }
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                tracing::debug!(error = %e, "output relay stopped: protocol pipe closed");
            }
            Err(e) => {
                tracing::warn!(error = %e, "output relay failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_runtime::{write_record, Lane};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_relay_splits_lanes_into_pipe_and_sink() {
        let (source_rd, mut source_wr) = tokio::io::simplex(1024);
        let (mut protocol_rd, protocol_wr) = tokio::io::simplex(1024);
        let (mut diag_rd, diag_wr) = tokio::io::simplex(1024);

        let relay = spawn(source_rd, protocol_wr, diag_wr);

        write_record(&mut source_wr, Lane::Diagnostic, b"booting\n")
            .await
            .unwrap();
        write_record(&mut source_wr, Lane::Output, b"STARTED:")
            .await
            .unwrap();
        source_wr.shutdown().await.unwrap();

        relay.await.unwrap();

        let mut protocol = Vec::new();
        protocol_rd.read_to_end(&mut protocol).await.unwrap();
        assert_eq!(protocol, b"STARTED:");

        let mut diagnostics = Vec::new();
        diag_rd.read_to_end(&mut diagnostics).await.unwrap();
        assert_eq!(diagnostics, b"booting\n");
    }

    #[tokio::test]
    async fn test_relay_survives_dropped_protocol_reader() {
        let (source_rd, mut source_wr) = tokio::io::simplex(1024);
        let (protocol_rd, protocol_wr) = tokio::io::simplex(1024);
        let (_diag_rd, diag_wr) = tokio::io::simplex(1024);

        let relay = spawn(source_rd, protocol_wr, diag_wr);
        drop(protocol_rd);

        write_record(&mut source_wr, Lane::Output, b"nobody is listening")
            .await
            .unwrap();

        // The task ends without panicking once the write fails.
        relay.await.unwrap();
    }
}
