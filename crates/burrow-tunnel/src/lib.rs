//! # Burrow Tunnel
//!
//! Multiplexed request/response tunnel into a sandboxed process over its
//! single attached byte channel.
//!
//! This crate provides:
//! - Startup synchronization on a fixed-length ready marker
//! - Many concurrent logical streams over one duplexed channel
//! - Stream drivers with per-stream failure isolation
//! - Lifecycle resolution racing sandbox exit against workload drain,
//!   with guaranteed sandbox teardown
//!
//! ## Architecture
//!
//! ```text
//!        Tunnel (lifecycle coordinator)
//!           │  spawn_exchange / open_stream
//!           ▼
//!        MuxEndpoint ──── LogicalStream × N
//!           │
//!           ▼
//!        DuplexChannel
//!        │           ▲
//!        │ writes    │ reads
//!        ▼           │
//!   attach input   protocol pipe ◀── output relay ◀── attach output
//!        │                                │
//!        │                                └──▶ diagnostics sink
//!        ▼
//!   sandbox process (emits ready marker, then serves the multiplexer)
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use burrow_runtime::{ProcessRuntime, SandboxSpec};
//! use burrow_tunnel::{Tunnel, TunnelConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = Arc::new(ProcessRuntime::new());
//!     let spec = SandboxSpec::builder().program("sandbox-agent").build()?;
//!
//!     let mut tunnel = Tunnel::establish(runtime, spec, TunnelConfig::default()).await?;
//!
//!     let ticket = tunnel.spawn_exchange(b"status".to_vec(), tokio::io::stdout());
//!     let outcome = tunnel.wait().await;
//!     println!("{outcome}");
//!
//!     let report = ticket.report().await?;
//!     println!("received {} bytes", report.bytes_received);
//!     Ok(())
//! }
//! ```

mod barrier;
mod channel;
mod config;
mod driver;
mod endpoint;
mod error;
mod relay;
mod tunnel;

pub use channel::DuplexChannel;
pub use config::{TunnelConfig, TunnelConfigBuilder, DEFAULT_MARKER_LEN};
pub use driver::StreamReport;
pub use endpoint::{EndpointHandle, LogicalStream, MuxEndpoint};
pub use error::{Result, TunnelError};
pub use tunnel::{StreamTicket, Tunnel, TunnelOutcome};
