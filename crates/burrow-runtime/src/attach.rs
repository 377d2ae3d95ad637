//! Attach conventions - handle pair and lane-multiplexed record framing.
//!
//! A sandbox's attach output carries its stdout and stderr interleaved on a
//! single readable handle. Each chunk is framed as a record: an 8-byte
//! header (lane byte, three reserved bytes, payload length as big-endian
//! u32) followed by the payload. Runtime implementations produce records
//! with [`write_record`]; consumers split them back into per-lane sinks
//! with [`demultiplex`].

use std::io;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, SimplexStream, WriteHalf,
};

/// Length of a record header in bytes.
pub const RECORD_HEADER_LEN: usize = 8;

/// Upper bound on a single record's payload, guards against corrupt streams.
pub const MAX_RECORD_PAYLOAD: usize = 1 << 20;

/// Raw I/O handles of an attached sandbox.
///
/// `input` feeds the sandboxed process's stdin verbatim. `output` carries
/// lane-multiplexed records (see module docs).
#[derive(Debug)]
pub struct AttachHandles {
    /// Writable half connected to the sandboxed process's stdin.
    pub input: WriteHalf<SimplexStream>,
    /// Readable half carrying the record-framed output.
    pub output: ReadHalf<SimplexStream>,
}

/// Which output descriptor of the sandboxed process a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// The process's stdout: multiplexer protocol bytes.
    Output,
    /// The process's stderr: startup noise and diagnostics.
    Diagnostic,
}

impl Lane {
    fn from_byte(byte: u8) -> io::Result<Self> {
        match byte {
            1 => Ok(Lane::Output),
            2 => Ok(Lane::Diagnostic),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown lane byte: {}", other),
            )),
        }
    }

    fn as_byte(self) -> u8 {
        match self {
            Lane::Output => 1,
            Lane::Diagnostic => 2,
        }
    }
}

/// Write one record to `dst`: header followed by the full payload.
pub async fn write_record<W>(dst: &mut W, lane: Lane, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut header = [0u8; RECORD_HEADER_LEN];
    header[0] = lane.as_byte();
    header[4..8].copy_from_slice(&(payload.len() as u32).to_be_bytes());
    dst.write_all(&header).await?;
    dst.write_all(payload).await?;
    Ok(())
}

/// Split a record stream into its lanes.
///
/// Copies `Output` payloads to `protocol` and `Diagnostic` payloads to
/// `diagnostics`, flushing after each record so consumers observe bytes as
/// they arrive. Returns the total (protocol, diagnostic) byte counts once
/// the source reaches end-of-stream.
///
/// End-of-stream is only clean on a record boundary; EOF inside a header
/// or payload is an `UnexpectedEof` error. Unknown lane bytes and payload
/// lengths above [`MAX_RECORD_PAYLOAD`] are `InvalidData` errors.
pub async fn demultiplex<R, P, D>(
    src: &mut R,
    protocol: &mut P,
    diagnostics: &mut D,
) -> io::Result<(u64, u64)>
where
    R: AsyncRead + Unpin,
    P: AsyncWrite + Unpin,
    D: AsyncWrite + Unpin,
{
    let mut payload = vec![0u8; 8192];
    let mut protocol_bytes = 0u64;
    let mut diagnostic_bytes = 0u64;

    loop {
        let header = match read_header(src).await? {
            Some(header) => header,
            None => return Ok((protocol_bytes, diagnostic_bytes)),
        };

        let lane = Lane::from_byte(header[0])?;
        let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if len > MAX_RECORD_PAYLOAD {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("record payload of {} bytes exceeds cap", len),
            ));
        }
        if len > payload.len() {
            payload.resize(len, 0);
        }
        src.read_exact(&mut payload[..len]).await?;

        match lane {
            Lane::Output => {
                protocol.write_all(&payload[..len]).await?;
                protocol.flush().await?;
                protocol_bytes += len as u64;
            }
            Lane::Diagnostic => {
                diagnostics.write_all(&payload[..len]).await?;
                diagnostics.flush().await?;
                diagnostic_bytes += len as u64;
            }
        }
    }
}

/// Read one record header, tolerating short reads.
///
/// Returns `Ok(None)` on end-of-stream before the first header byte.
async fn read_header<R>(src: &mut R) -> io::Result<Option<[u8; RECORD_HEADER_LEN]>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; RECORD_HEADER_LEN];
    let mut filled = 0;
    while filled < RECORD_HEADER_LEN {
        let n = src.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "end of stream inside record header",
            ));
        }
        filled += n;
    }
    Ok(Some(header))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn encode(records: &[(Lane, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        for (lane, payload) in records {
            write_record(&mut buf, *lane, payload).await.unwrap();
        }
        buf
    }

    #[tokio::test]
    async fn test_demultiplex_splits_lanes() {
        let encoded = encode(&[
            (Lane::Diagnostic, b"booting\n"),
            (Lane::Output, b"STARTED:"),
            (Lane::Output, b"frame-bytes"),
            (Lane::Diagnostic, b"ready\n"),
        ])
        .await;

        let mut src = encoded.as_slice();
        let mut protocol = Vec::new();
        let mut diagnostics = Vec::new();
        let (proto_n, diag_n) = demultiplex(&mut src, &mut protocol, &mut diagnostics)
            .await
            .unwrap();

        assert_eq!(protocol, b"STARTED:frame-bytes");
        assert_eq!(diagnostics, b"booting\nready\n");
        assert_eq!(proto_n, protocol.len() as u64);
        assert_eq!(diag_n, diagnostics.len() as u64);
    }

    #[tokio::test]
    async fn test_demultiplex_empty_stream() {
        let mut src: &[u8] = &[];
        let mut protocol = Vec::new();
        let mut diagnostics = Vec::new();
        let totals = demultiplex(&mut src, &mut protocol, &mut diagnostics)
            .await
            .unwrap();
        assert_eq!(totals, (0, 0));
    }

    #[tokio::test]
    async fn test_demultiplex_split_header_reads() {
        let encoded = encode(&[(Lane::Output, b"payload")]).await;
        // Force the header to arrive in two reads.
        let (front, rest) = encoded.split_at(3);
        let mut src = front.chain(rest);

        let mut protocol = Vec::new();
        let mut diagnostics = Vec::new();
        demultiplex(&mut src, &mut protocol, &mut diagnostics)
            .await
            .unwrap();
        assert_eq!(protocol, b"payload");
    }

    #[tokio::test]
    async fn test_demultiplex_eof_inside_header() {
        let encoded = encode(&[(Lane::Output, b"payload")]).await;
        let mut src = &encoded[..5];
        let mut protocol = Vec::new();
        let mut diagnostics = Vec::new();
        let err = demultiplex(&mut src, &mut protocol, &mut diagnostics)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_demultiplex_eof_inside_payload() {
        let encoded = encode(&[(Lane::Output, b"payload")]).await;
        let mut src = &encoded[..RECORD_HEADER_LEN + 3];
        let mut protocol = Vec::new();
        let mut diagnostics = Vec::new();
        let err = demultiplex(&mut src, &mut protocol, &mut diagnostics)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_demultiplex_unknown_lane() {
        let mut encoded = encode(&[(Lane::Output, b"x")]).await;
        encoded[0] = 9;
        let mut src = encoded.as_slice();
        let mut protocol = Vec::new();
        let mut diagnostics = Vec::new();
        let err = demultiplex(&mut src, &mut protocol, &mut diagnostics)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_demultiplex_rejects_oversized_record() {
        let mut header = [0u8; RECORD_HEADER_LEN];
        header[0] = 1;
        header[4..8].copy_from_slice(&(MAX_RECORD_PAYLOAD as u32 + 1).to_be_bytes());
        let mut src = header.as_slice();
        let mut protocol = Vec::new();
        let mut diagnostics = Vec::new();
        let err = demultiplex(&mut src, &mut protocol, &mut diagnostics)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_empty_payload_record() {
        let encoded = encode(&[(Lane::Output, b""), (Lane::Output, b"tail")]).await;
        let mut src = encoded.as_slice();
        let mut protocol = Vec::new();
        let mut diagnostics = Vec::new();
        demultiplex(&mut src, &mut protocol, &mut diagnostics)
            .await
            .unwrap();
        assert_eq!(protocol, b"tail");
    }
}
