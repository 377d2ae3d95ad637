//! # burrow-runtime
//!
//! Sandbox lifecycle management for burrow tunnels.
//!
//! Defines the [`SandboxRuntime`] trait (create, start, attach, wait,
//! kill) and [`ProcessRuntime`], an implementation that runs sandboxes as
//! local child processes. Every implementation shares the same attach
//! conventions: a raw writable handle into the sandboxed process's stdin,
//! and a readable handle carrying its stdout/stderr as lane-multiplexed
//! records.
//!
//! ## Quick Start
//!
//! ```no_run
//! use burrow_runtime::{ProcessRuntime, SandboxRuntime, SandboxSpec};
//!
//! # async fn example() -> burrow_runtime::Result<()> {
//! let runtime = ProcessRuntime::new();
//!
//! let spec = SandboxSpec::builder()
//!     .program("/usr/local/bin/burrow-agent")
//!     .env("RUST_LOG", "info")
//!     .build()?;
//!
//! let id = runtime.create(spec).await?;
//! let handles = runtime.attach(&id).await?;
//! runtime.start(&id).await?;
//!
//! // ... exchange bytes over handles.input / handles.output ...
//!
//! runtime.kill(&id).await?;
//! let status = runtime.wait(&id).await?;
//! println!("sandbox finished: {}", status);
//! # Ok(())
//! # }
//! ```

mod attach;
mod error;
mod process;
mod runtime;
mod spec;
mod types;

pub use attach::{
    demultiplex, write_record, AttachHandles, Lane, MAX_RECORD_PAYLOAD, RECORD_HEADER_LEN,
};
pub use error::{Result, RuntimeError};
pub use process::ProcessRuntime;
pub use runtime::SandboxRuntime;
pub use spec::{SandboxSpec, SandboxSpecBuilder};
pub use types::{ExitStatus, SandboxId, SandboxState};
