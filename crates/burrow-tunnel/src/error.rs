//! Error types for burrow-tunnel.

use burrow_runtime::ExitStatus;
use thiserror::Error;

/// Result type alias for burrow-tunnel operations.
pub type Result<T> = std::result::Result<T, TunnelError>;

/// Errors that can occur while establishing or running a tunnel.
///
/// Channel, synchronization, endpoint and runtime errors are fatal to the
/// whole tunnel. Stream errors are local to one logical stream and only
/// reach the caller awaiting that stream's ticket.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// I/O failure on the duplex channel
    #[error("channel I/O error: {0}")]
    Channel(#[source] std::io::Error),

    /// Ready marker not fully read before end-of-stream
    #[error("startup marker incomplete: read {read} of {expected} bytes")]
    Synchronization {
        /// Bytes consumed before the stream ended
        read: usize,
        /// Configured marker length
        expected: usize,
    },

    /// Multiplexer endpoint failure
    #[error("multiplexer endpoint error: {0}")]
    Endpoint(#[from] yamux::ConnectionError),

    /// Per-stream failure; never aborts siblings or the tunnel
    #[error("logical stream {stream}: {source}")]
    Stream {
        /// Locally assigned stream number
        stream: u64,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },

    /// Sandbox exited abnormally while the tunnel was running
    #[error("sandbox exited abnormally: {status}")]
    SandboxExit {
        /// Recorded exit status
        status: ExitStatus,
    },

    /// Invalid tunnel configuration
    #[error("invalid config: {0}")]
    Config(String),

    /// Error from the sandbox runtime
    #[error("runtime error: {0}")]
    Runtime(#[from] burrow_runtime::RuntimeError),
}
