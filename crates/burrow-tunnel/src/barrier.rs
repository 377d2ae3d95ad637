//! Startup synchronization barrier.
//!
//! The sandboxed process owns the channel's output side from the moment it
//! starts, and its protocol listener comes up some time after that. The
//! barrier consumes a fixed-length ready marker before the multiplexer
//! endpoint is allowed to parse the stream, so startup noise is never
//! mistaken for a protocol frame.

use crate::error::{Result, TunnelError};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Read exactly `marker_len` bytes from `reader`.
///
/// Short reads are retried until the marker buffer is full; not a single
/// byte past the marker is consumed. The marker content is not validated
/// (the sandboxed process is trusted); the consumed bytes are returned for
/// logging.
///
/// # Errors
///
/// `TunnelError::Synchronization` if the stream ends before the marker is
/// complete, `TunnelError::Channel` on read failure. Both are fatal: the
/// endpoint must not be constructed afterwards.
pub async fn await_ready<R>(reader: &mut R, marker_len: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut marker = vec![0u8; marker_len];
    let mut filled = 0;
    while filled < marker_len {
        let n = reader
            .read(&mut marker[filled..])
            .await
            .map_err(TunnelError::Channel)?;
        if n == 0 {
            return Err(TunnelError::Synchronization {
                read: filled,
                expected: marker_len,
            });
        }
        filled += n;
    }
    tracing::debug!(
        marker = %String::from_utf8_lossy(&marker),
        "Ready marker consumed"
    );
    Ok(marker)
}
