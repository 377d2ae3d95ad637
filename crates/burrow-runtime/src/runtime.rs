//! Sandbox runtime trait.

use crate::attach::AttachHandles;
use crate::error::Result;
use crate::spec::SandboxSpec;
use crate::types::{ExitStatus, SandboxId};
use async_trait::async_trait;

/// Trait for managing sandbox lifecycle operations.
///
/// This abstraction allows different isolation backends (local processes,
/// containers, microVMs) to be swapped without changing tunnel logic.
/// Callers use the operations in the order create → attach → start → wait,
/// with kill as the best-effort terminator at any point after create.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Register a new sandbox for the given spec.
    ///
    /// No process exists yet after this call; attach handles are already
    /// reserved so I/O can be wired up before the process starts.
    ///
    /// # Errors
    /// Returns an error if the spec is invalid or registration fails.
    async fn create(&self, spec: SandboxSpec) -> Result<SandboxId>;

    /// Start the sandboxed process.
    ///
    /// # Errors
    /// Returns an error if the sandbox doesn't exist, is not in the
    /// `Created` state, or the process fails to spawn.
    async fn start(&self, id: &SandboxId) -> Result<()>;

    /// Take the sandbox's attach handles.
    ///
    /// The handles are handed out exactly once per sandbox. The output
    /// half carries lane-multiplexed records per the attach convention.
    ///
    /// # Errors
    /// Returns an error if the sandbox doesn't exist or was already
    /// attached.
    async fn attach(&self, id: &SandboxId) -> Result<AttachHandles>;

    /// Wait for the sandboxed process to exit.
    ///
    /// Returns the recorded status even if the exit happened before this
    /// call. Multiple concurrent waiters all observe the same status.
    ///
    /// # Errors
    /// Returns an error if the sandbox doesn't exist or the exit monitor
    /// failed.
    async fn wait(&self, id: &SandboxId) -> Result<ExitStatus>;

    /// Terminate the sandboxed process, best effort.
    ///
    /// Killing an already-exited sandbox is not an error. A sandbox that
    /// was never started is marked exited.
    ///
    /// # Errors
    /// Returns an error if the sandbox doesn't exist.
    async fn kill(&self, id: &SandboxId) -> Result<()>;
}
