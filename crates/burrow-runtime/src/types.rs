//! Core sandbox types - identifiers, states, exit statuses.

use std::fmt;
use uuid::Uuid;

/// Unique identifier for a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SandboxId(Uuid);

impl SandboxId {
    /// Create a new random sandbox ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SandboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SandboxId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Current state of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    /// Sandbox is registered but its process has not been started.
    Created,
    /// Sandboxed process is running.
    Running,
    /// Sandboxed process has exited (or was never started and got killed).
    Exited,
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::Exited => write!(f, "Exited"),
        }
    }
}

/// How a sandboxed process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Process exit code; `None` if the process was terminated by a signal.
    pub code: Option<i32>,
}

impl ExitStatus {
    /// An exit status representing signal termination.
    pub fn killed() -> Self {
        Self { code: None }
    }

    /// Check if the process exited cleanly (exit code 0).
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => write!(f, "terminated by signal"),
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_id_display() {
        let id = SandboxId::new();
        let s = format!("{}", id);
        // UUID format: xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx
        assert_eq!(s.len(), 36);
        assert!(s.contains('-'));
    }

    #[test]
    fn test_sandbox_id_from_uuid() {
        let uuid = Uuid::new_v4();
        let id: SandboxId = uuid.into();
        assert_eq!(format!("{}", id), format!("{}", uuid));
    }

    #[test]
    fn test_sandbox_state_display() {
        assert_eq!(format!("{}", SandboxState::Created), "Created");
        assert_eq!(format!("{}", SandboxState::Running), "Running");
        assert_eq!(format!("{}", SandboxState::Exited), "Exited");
    }

    #[test]
    fn test_exit_status_success() {
        assert!(ExitStatus { code: Some(0) }.success());
        assert!(!ExitStatus { code: Some(1) }.success());
        assert!(!ExitStatus::killed().success());
    }

    #[test]
    fn test_exit_status_display() {
        assert_eq!(format!("{}", ExitStatus { code: Some(7) }), "exit code 7");
        assert_eq!(format!("{}", ExitStatus::killed()), "terminated by signal");
    }
}
