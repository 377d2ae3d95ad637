//! Process-backed sandbox runtime.
//!
//! Runs each sandbox as a local child process with fully piped stdio. The
//! attach handles are in-memory pipes staged at `create` time, so a caller
//! may wire up its I/O before the process exists; `start` connects them to
//! the real child and spawns the pumps and the exit monitor.

use crate::attach::{self, AttachHandles, Lane};
use crate::error::{Result, RuntimeError};
use crate::runtime::SandboxRuntime;
use crate::spec::SandboxSpec;
use crate::types::{ExitStatus, SandboxId, SandboxState};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, ReadHalf, SimplexStream, WriteHalf};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch, Mutex};

/// Buffer size of the staged pipes between attach handles and the process.
const STAGED_PIPE_CAPACITY: usize = 64 * 1024;

/// Read chunk size of the output pump; also the largest record it emits.
const PUMP_CHUNK: usize = 8192;

/// Sandbox runtime backed by local child processes.
///
/// Slots stay in the table after exit so `wait` and `kill` remain callable
/// on finished sandboxes.
pub struct ProcessRuntime {
    slots: Mutex<HashMap<SandboxId, Slot>>,
}

struct Slot {
    spec: SandboxSpec,
    state: SandboxState,
    /// Attach handles, handed out once by `attach`.
    handles: Option<AttachHandles>,
    /// Process-facing ends of the staged pipes, consumed by `start`.
    staged: Option<StagedIo>,
    exit_rx: watch::Receiver<Option<ExitStatus>>,
    /// Exit publisher; moved into the monitor on `start`.
    exit_tx: Option<watch::Sender<Option<ExitStatus>>>,
    kill_tx: Option<oneshot::Sender<()>>,
}

struct StagedIo {
    /// Read side of the input pipe, pumped into the child's stdin.
    input: ReadHalf<SimplexStream>,
    /// Write side of the output pipe, carries encoded records.
    records: WriteHalf<SimplexStream>,
}

impl Slot {
    /// Current state, folding in an exit the monitor may have recorded.
    fn state(&self) -> SandboxState {
        if self.exit_rx.borrow().is_some() {
            SandboxState::Exited
        } else {
            self.state
        }
    }
}

impl ProcessRuntime {
    /// Create an empty runtime.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Get the current state of a sandbox.
    pub async fn state(&self, id: &SandboxId) -> Result<SandboxState> {
        let slots = self.slots.lock().await;
        let slot = slots.get(id).ok_or(RuntimeError::NotFound(*id))?;
        Ok(slot.state())
    }
}

impl Default for ProcessRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SandboxRuntime for ProcessRuntime {
    async fn create(&self, spec: SandboxSpec) -> Result<SandboxId> {
        spec.validate()?;
        let id = SandboxId::new();
        tracing::info!(sandbox_id = %id, program = %spec.program, "Creating sandbox");

        let (staged_input, attach_input) = tokio::io::simplex(STAGED_PIPE_CAPACITY);
        let (attach_output, staged_records) = tokio::io::simplex(STAGED_PIPE_CAPACITY);
        let (exit_tx, exit_rx) = watch::channel(None);

        let slot = Slot {
            spec,
            state: SandboxState::Created,
            handles: Some(AttachHandles {
                input: attach_input,
                output: attach_output,
            }),
            staged: Some(StagedIo {
                input: staged_input,
                records: staged_records,
            }),
            exit_rx,
            exit_tx: Some(exit_tx),
            kill_tx: None,
        };
        self.slots.lock().await.insert(id, slot);
        Ok(id)
    }

    async fn start(&self, id: &SandboxId) -> Result<()> {
        let mut slots = self.slots.lock().await;
        let slot = slots.get_mut(id).ok_or(RuntimeError::NotFound(*id))?;
        if slot.state() != SandboxState::Created {
            return Err(RuntimeError::InvalidState {
                expected: "Created".into(),
                actual: slot.state().to_string(),
            });
        }
        let (staged, exit_tx) = match (slot.staged.take(), slot.exit_tx.take()) {
            (Some(staged), Some(exit_tx)) => (staged, exit_tx),
            _ => {
                return Err(RuntimeError::InvalidState {
                    expected: "Created".into(),
                    actual: slot.state().to_string(),
                })
            }
        };

        let mut command = Command::new(&slot.spec.program);
        command
            .args(&slot.spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &slot.spec.env {
            command.env(key, value);
        }
        if let Some(dir) = &slot.spec.working_dir {
            command.current_dir(dir);
        }

        tracing::debug!(sandbox_id = %id, program = %slot.spec.program, "Spawning sandboxed process");
        let (child, stdin, stdout, stderr) = match spawn_child(command) {
            Ok(parts) => parts,
            Err(e) => {
                // A failed spawn is terminal: record an exit so waiters
                // observe a status rather than a dead watch.
                slot.state = SandboxState::Exited;
                slot.handles = None;
                let _ = exit_tx.send(Some(ExitStatus::killed()));
                return Err(e);
            }
        };

        let (kill_tx, kill_rx) = oneshot::channel();
        slot.kill_tx = Some(kill_tx);
        slot.state = SandboxState::Running;

        let sandbox_id = *id;
        tokio::spawn(pump_input(staged.input, stdin, sandbox_id));
        tokio::spawn(pump_output(stdout, stderr, staged.records, sandbox_id));
        tokio::spawn(monitor_exit(child, exit_tx, kill_rx, sandbox_id));

        tracing::info!(sandbox_id = %id, "Sandbox started");
        Ok(())
    }

    async fn attach(&self, id: &SandboxId) -> Result<AttachHandles> {
        let mut slots = self.slots.lock().await;
        let slot = slots.get_mut(id).ok_or(RuntimeError::NotFound(*id))?;
        if slot.state() == SandboxState::Exited {
            return Err(RuntimeError::InvalidState {
                expected: "Created or Running".into(),
                actual: slot.state().to_string(),
            });
        }
        let handles = slot
            .handles
            .take()
            .ok_or(RuntimeError::AlreadyAttached(*id))?;
        tracing::debug!(sandbox_id = %id, "Attach handles taken");
        Ok(handles)
    }

    async fn wait(&self, id: &SandboxId) -> Result<ExitStatus> {
        let mut exit_rx = {
            let slots = self.slots.lock().await;
            let slot = slots.get(id).ok_or(RuntimeError::NotFound(*id))?;
            slot.exit_rx.clone()
        };
        loop {
            if let Some(status) = *exit_rx.borrow_and_update() {
                return Ok(status);
            }
            exit_rx
                .changed()
                .await
                .map_err(|_| RuntimeError::ExitWatch("exit monitor dropped".into()))?;
        }
    }

    async fn kill(&self, id: &SandboxId) -> Result<()> {
        let mut slots = self.slots.lock().await;
        let slot = slots.get_mut(id).ok_or(RuntimeError::NotFound(*id))?;
        match slot.state() {
            SandboxState::Exited => Ok(()),
            SandboxState::Created => {
                // Never started: nothing to signal, mark it exited so
                // waiters unblock.
                slot.state = SandboxState::Exited;
                slot.staged = None;
                slot.handles = None;
                if let Some(exit_tx) = slot.exit_tx.take() {
                    let _ = exit_tx.send(Some(ExitStatus::killed()));
                }
                tracing::info!(sandbox_id = %id, "Sandbox killed before start");
                Ok(())
            }
            SandboxState::Running => {
                if let Some(kill_tx) = slot.kill_tx.take() {
                    // The monitor may have finished in the same instant;
                    // a lost signal means the process is already gone.
                    let _ = kill_tx.send(());
                    tracing::debug!(sandbox_id = %id, "Kill signal sent");
                }
                Ok(())
            }
        }
    }
}

fn spawn_child(mut command: Command) -> Result<(Child, ChildStdin, ChildStdout, ChildStderr)> {
    let mut child = command.spawn().map_err(RuntimeError::Spawn)?;
    let stdin = take_pipe(child.stdin.take(), "stdin")?;
    let stdout = take_pipe(child.stdout.take(), "stdout")?;
    let stderr = take_pipe(child.stderr.take(), "stderr")?;
    Ok((child, stdin, stdout, stderr))
}

fn take_pipe<T>(pipe: Option<T>, name: &str) -> Result<T> {
    pipe.ok_or_else(|| {
        RuntimeError::Spawn(io::Error::new(
            io::ErrorKind::Other,
            format!("child {} was not piped", name),
        ))
    })
}

/// Copy staged input into the child's stdin, then close it.
async fn pump_input(mut staged: ReadHalf<SimplexStream>, mut stdin: ChildStdin, id: SandboxId) {
    match tokio::io::copy(&mut staged, &mut stdin).await {
        Ok(bytes) => tracing::trace!(sandbox_id = %id, bytes, "input pump finished"),
        Err(e) => tracing::debug!(sandbox_id = %id, error = %e, "input pump stopped"),
    }
    // Dropping stdin closes the child's input exactly once.
}

/// Encode child stdout/stderr into lane records on the staged output pipe.
///
/// Ends when both lanes reach end-of-stream, dropping the pipe writer so
/// the attach output observes end-of-stream in turn.
async fn pump_output(
    mut stdout: ChildStdout,
    mut stderr: ChildStderr,
    mut records: WriteHalf<SimplexStream>,
    id: SandboxId,
) {
    let mut out_buf = vec![0u8; PUMP_CHUNK];
    let mut err_buf = vec![0u8; PUMP_CHUNK];
    let mut out_open = true;
    let mut err_open = true;
    let mut protocol_bytes = 0u64;
    let mut diagnostic_bytes = 0u64;

    while out_open || err_open {
        let written = tokio::select! {
            read = stdout.read(&mut out_buf), if out_open => match read {
                Ok(0) => {
                    out_open = false;
                    Ok(())
                }
                Ok(n) => {
                    protocol_bytes += n as u64;
                    attach::write_record(&mut records, Lane::Output, &out_buf[..n]).await
                }
                Err(e) => {
                    tracing::debug!(sandbox_id = %id, error = %e, "stdout read failed");
                    out_open = false;
                    Ok(())
                }
            },
            read = stderr.read(&mut err_buf), if err_open => match read {
                Ok(0) => {
                    err_open = false;
                    Ok(())
                }
                Ok(n) => {
                    diagnostic_bytes += n as u64;
                    attach::write_record(&mut records, Lane::Diagnostic, &err_buf[..n]).await
                }
                Err(e) => {
                    tracing::debug!(sandbox_id = %id, error = %e, "stderr read failed");
                    err_open = false;
                    Ok(())
                }
            },
        };
        if let Err(e) = written {
            // Attach output reader is gone; the process dies by kill, not
            // by our draining.
            tracing::debug!(sandbox_id = %id, error = %e, "attach output abandoned");
            return;
        }
    }
    tracing::trace!(
        sandbox_id = %id,
        protocol_bytes,
        diagnostic_bytes,
        "output pump finished"
    );
}

/// Own the child, race its exit against the kill signal, publish the status.
async fn monitor_exit(
    mut child: Child,
    exit_tx: watch::Sender<Option<ExitStatus>>,
    kill_rx: oneshot::Receiver<()>,
    id: SandboxId,
) {
    let waited = tokio::select! {
        biased;

        // Fires on an explicit kill, and also if the runtime itself is
        // dropped while the sandbox runs.
        _ = kill_rx => {
            tracing::debug!(sandbox_id = %id, "Terminating sandboxed process");
            if let Err(e) = child.start_kill() {
                tracing::warn!(sandbox_id = %id, error = %e, "failed to deliver kill");
            }
            child.wait().await
        }

        waited = child.wait() => waited,
    };
    let status = match waited {
        Ok(status) => ExitStatus::from(status),
        Err(e) => {
            tracing::error!(sandbox_id = %id, error = %e, "exit wait failed");
            ExitStatus::killed()
        }
    };
    tracing::info!(sandbox_id = %id, status = %status, "Sandbox exited");
    let _ = exit_tx.send(Some(status));
}
