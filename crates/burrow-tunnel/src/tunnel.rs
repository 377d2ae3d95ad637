//! Tunnel lifecycle coordinator.
//!
//! Owns the full arc of one sandbox run: create and start the sandbox,
//! synchronize on its ready marker, bring up the multiplexed endpoint,
//! hand out streams, and resolve the race between sandbox exit and
//! stream-workload completion. Whatever happens, the sandbox is torn
//! down before the tunnel reports its outcome.

use crate::barrier;
use crate::channel::DuplexChannel;
use crate::config::TunnelConfig;
use crate::driver::{self, StreamReport};
use crate::endpoint::{LogicalStream, MuxEndpoint};
use crate::error::{Result, TunnelError};
use crate::relay;
use burrow_runtime::{ExitStatus, RuntimeError, SandboxId, SandboxRuntime, SandboxSpec};
use bytes::Bytes;
use futures::future::join_all;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWrite;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use yamux::ConnectionError;

/// How long teardown waits for the output relay to drain after the kill.
const TEARDOWN_GRACE: Duration = Duration::from_secs(5);

/// How a tunnel run ended.
#[derive(Debug)]
pub enum TunnelOutcome {
    /// The sandbox exited cleanly before the stream workload finished.
    SandboxExited(ExitStatus),
    /// The sandbox exited abnormally, or the run hit a fatal error.
    SandboxFailed(TunnelError),
    /// Every spawned exchange finished; the sandbox was then terminated.
    StreamsCompleted,
}

impl std::fmt::Display for TunnelOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TunnelOutcome::SandboxExited(status) => write!(f, "sandbox exited ({status})"),
            TunnelOutcome::SandboxFailed(e) => write!(f, "sandbox run failed: {e}"),
            TunnelOutcome::StreamsCompleted => write!(f, "all streams completed"),
        }
    }
}

/// Receipt for a spawned exchange.
///
/// Resolves once the driver finishes, successfully or not. Dropping the
/// ticket does not cancel the exchange.
#[derive(Debug)]
pub struct StreamTicket {
    stream: u64,
    result: oneshot::Receiver<Result<StreamReport>>,
}

impl StreamTicket {
    /// Tunnel-local stream number this ticket tracks.
    pub fn stream(&self) -> u64 {
        self.stream
    }

    /// Wait for the exchange to finish.
    pub async fn report(self) -> Result<StreamReport> {
        match self.result.await {
            Ok(result) => result,
            Err(_) => Err(TunnelError::Stream {
                stream: self.stream,
                source: io::Error::new(io::ErrorKind::Interrupted, "stream driver abandoned"),
            }),
        }
    }
}

/// A live multiplexed tunnel into one running sandbox.
pub struct Tunnel {
    id: SandboxId,
    runtime: Arc<dyn SandboxRuntime>,
    endpoint: MuxEndpoint,
    relay: JoinHandle<()>,
    exit_watch: JoinHandle<burrow_runtime::Result<ExitStatus>>,
    drivers: Vec<JoinHandle<()>>,
    next_stream: u64,
}

impl Tunnel {
    /// Create a sandbox and bring a tunnel up into it.
    ///
    /// Diagnostic-lane output goes to this process's stderr. The sandbox is
    /// created, attached, and started, then the ready marker is awaited
    /// before the multiplexer comes up. If any of that fails the sandbox is
    /// terminated before the error is returned.
    pub async fn establish(
        runtime: Arc<dyn SandboxRuntime>,
        spec: SandboxSpec,
        config: TunnelConfig,
    ) -> Result<Self> {
        Self::establish_with_diagnostics(runtime, spec, config, tokio::io::stderr()).await
    }

    /// Like [`Tunnel::establish`] with a caller-provided diagnostics sink.
    pub async fn establish_with_diagnostics<D>(
        runtime: Arc<dyn SandboxRuntime>,
        spec: SandboxSpec,
        config: TunnelConfig,
        diagnostics: D,
    ) -> Result<Self>
    where
        D: AsyncWrite + Send + Unpin + 'static,
    {
        config.validate()?;
        let started = Instant::now();
        let id = runtime.create(spec).await?;

        match Self::bring_up(Arc::clone(&runtime), id, &config, diagnostics).await {
            Ok(tunnel) => {
                tracing::info!(
                    sandbox_id = %id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Tunnel established"
                );
                Ok(tunnel)
            }
            Err(e) => {
                tracing::warn!(sandbox_id = %id, error = %e, "Tunnel bring-up failed");
                if let Err(kill_err) = runtime.kill(&id).await {
                    tracing::warn!(sandbox_id = %id, error = %kill_err, "Teardown kill failed");
                }
                Err(e)
            }
        }
    }

    async fn bring_up<D>(
        runtime: Arc<dyn SandboxRuntime>,
        id: SandboxId,
        config: &TunnelConfig,
        diagnostics: D,
    ) -> Result<Self>
    where
        D: AsyncWrite + Send + Unpin + 'static,
    {
        // Attach before start so no output is lost.
        let attach = runtime.attach(&id).await?;
        runtime.start(&id).await?;

        let exit_watch = tokio::spawn({
            let runtime = Arc::clone(&runtime);
            async move { runtime.wait(&id).await }
        });

        let (mut protocol, protocol_writer) = tokio::io::simplex(config.pipe_capacity);
        let relay = relay::spawn(attach.output, protocol_writer, diagnostics);

        barrier::await_ready(&mut protocol, config.marker_len).await?;
        tracing::debug!(sandbox_id = %id, "Ready marker received");

        let channel = DuplexChannel::new(protocol, attach.input);
        let endpoint = MuxEndpoint::client(channel);

        Ok(Self {
            id,
            runtime,
            endpoint,
            relay,
            exit_watch,
            drivers: Vec::new(),
            next_stream: 1,
        })
    }

    /// Identifier of the sandbox this tunnel is attached to.
    pub fn sandbox_id(&self) -> SandboxId {
        self.id
    }

    /// Open a logical stream managed by the caller.
    ///
    /// Streams opened this way do not count toward the drain tracked by
    /// [`Tunnel::wait`]; use [`Tunnel::spawn_exchange`] for that.
    pub async fn open_stream(&self) -> Result<LogicalStream> {
        self.endpoint.open_stream().await
    }

    /// Spawn a driver that runs one request/response exchange.
    ///
    /// The driver opens its own stream, writes the request, half-closes,
    /// and forwards the response into `sink` as it arrives. Its failure is
    /// local: other exchanges and the tunnel itself keep going.
    pub fn spawn_exchange<S>(&mut self, request: impl Into<Bytes>, sink: S) -> StreamTicket
    where
        S: AsyncWrite + Send + Unpin + 'static,
    {
        let stream = self.next_stream;
        self.next_stream += 1;

        let id = self.id;
        let handle = self.endpoint.handle();
        let request = request.into();
        let (reply, result) = oneshot::channel();

        let driver = tokio::spawn(async move {
            let result = driver::run_exchange(handle, stream, request, sink).await;
            match &result {
                Ok(report) => tracing::debug!(
                    sandbox_id = %id,
                    stream,
                    bytes_sent = report.bytes_sent,
                    bytes_received = report.bytes_received,
                    "Exchange completed"
                ),
                Err(e) => tracing::debug!(sandbox_id = %id, stream, error = %e, "Exchange failed"),
            }
            let _ = reply.send(result);
        });
        self.drivers.push(driver);

        StreamTicket { stream, result }
    }

    /// Run the tunnel to resolution.
    ///
    /// Races sandbox exit against completion of every spawned exchange.
    /// If the sandbox exits first, in-flight exchanges are abandoned and
    /// their tickets resolve accordingly. If the workload drains first,
    /// the sandbox is terminated. Teardown always runs exactly once before
    /// the outcome is returned; teardown failures are logged, never raised.
    pub async fn wait(self) -> TunnelOutcome {
        let Tunnel {
            id,
            runtime,
            endpoint,
            relay,
            mut exit_watch,
            drivers,
            ..
        } = self;
        tracing::debug!(sandbox_id = %id, streams = drivers.len(), "Waiting for tunnel resolution");

        tokio::select! {
            biased;

            waited = &mut exit_watch => {
                let outcome = exit_outcome(waited);
                tracing::info!(sandbox_id = %id, outcome = %outcome, "Sandbox exited before streams drained");
                let endpoint_err = Self::teardown(runtime.as_ref(), &id, endpoint, relay).await;
                if let Some(e) = endpoint_err {
                    tracing::debug!(sandbox_id = %id, error = %e, "Endpoint closed with error");
                }
                outcome
            }

            results = join_all(drivers) => {
                for result in &results {
                    if let Err(e) = result {
                        tracing::error!(sandbox_id = %id, error = %e, "Stream driver panicked");
                    }
                }

                // An exit in the same instant still wins over the drain.
                let outcome = if exit_watch.is_finished() {
                    exit_outcome((&mut exit_watch).await)
                } else {
                    exit_watch.abort();
                    TunnelOutcome::StreamsCompleted
                };

                let endpoint_failed = endpoint.is_closed();
                let endpoint_err = Self::teardown(runtime.as_ref(), &id, endpoint, relay).await;
                let outcome = match (outcome, endpoint_failed, endpoint_err) {
                    // The session died under the streams without a sandbox
                    // exit: that is the run's fatal error.
                    (TunnelOutcome::StreamsCompleted, true, Some(e)) => {
                        TunnelOutcome::SandboxFailed(TunnelError::Endpoint(e))
                    }
                    (outcome, _, Some(e)) => {
                        tracing::debug!(sandbox_id = %id, error = %e, "Endpoint closed with error");
                        outcome
                    }
                    (outcome, _, None) => outcome,
                };

                tracing::info!(sandbox_id = %id, outcome = %outcome, "Streams drained");
                outcome
            }
        }
    }

    /// Best-effort teardown: close the endpoint, terminate the sandbox,
    /// give the relay a bounded window to drain.
    async fn teardown(
        runtime: &dyn SandboxRuntime,
        id: &SandboxId,
        endpoint: MuxEndpoint,
        mut relay: JoinHandle<()>,
    ) -> Option<ConnectionError> {
        tracing::debug!(sandbox_id = %id, "Tearing down tunnel");
        let endpoint_err = endpoint.close().await;

        if let Err(e) = runtime.kill(id).await {
            tracing::warn!(sandbox_id = %id, error = %e, "Sandbox kill failed");
        }

        match tokio::time::timeout(TEARDOWN_GRACE, &mut relay).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(sandbox_id = %id, error = %e, "Output relay panicked"),
            Err(_) => {
                tracing::debug!(sandbox_id = %id, "Output relay still draining, aborting");
                relay.abort();
            }
        }

        endpoint_err
    }
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("id", &self.id)
            .field("streams", &self.drivers.len())
            .finish()
    }
}

fn exit_outcome(
    waited: std::result::Result<burrow_runtime::Result<ExitStatus>, JoinError>,
) -> TunnelOutcome {
    match waited {
        Ok(Ok(status)) if status.success() => TunnelOutcome::SandboxExited(status),
        Ok(Ok(status)) => TunnelOutcome::SandboxFailed(TunnelError::SandboxExit { status }),
        Ok(Err(e)) => TunnelOutcome::SandboxFailed(TunnelError::Runtime(e)),
        Err(e) => TunnelOutcome::SandboxFailed(TunnelError::Runtime(RuntimeError::ExitWatch(
            e.to_string(),
        ))),
    }
}
