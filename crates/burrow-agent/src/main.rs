//! burrow-agent: In-sandbox agent for burrow tunnels.
//!
//! Emits the ready marker on stdout, then serves the multiplexer over
//! stdin/stdout. Every inbound logical stream carries one request; the
//! agent echoes it back as the response. Diagnostics go to stderr so
//! stdout stays clean for the protocol.

use futures::future::poll_fn;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::compat::{FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt};
use tracing::{debug, info, warn};
use yamux::{Config, Connection, Mode};

/// Fixed marker emitted once the agent is ready to serve streams.
const READY_MARKER: &[u8] = b"STARTED:";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing; stderr only, stdout belongs to the protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("burrow_agent=debug".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("burrow-agent starting...");

    let mut stdout = tokio::io::stdout();
    stdout.write_all(READY_MARKER).await?;
    stdout.flush().await?;
    info!("ready marker emitted, serving streams");

    let transport = tokio::io::join(tokio::io::stdin(), stdout);
    let mut connection = Connection::new(transport.compat(), Config::default(), Mode::Server);

    loop {
        match poll_fn(|cx| connection.poll_next_inbound(cx)).await {
            Some(Ok(stream)) => {
                debug!("accepted new stream");
                tokio::spawn(handle_stream(stream));
            }
            Some(Err(e)) => {
                warn!(error = %e, "session failed");
                break;
            }
            None => {
                info!("session closed by host");
                break;
            }
        }
    }

    Ok(())
}

/// Handle a single exchange.
///
/// Reads the request until the host half-closes, then echoes it back and
/// closes the stream.
async fn handle_stream(stream: yamux::Stream) {
    let mut stream = stream.compat();

    let mut request = Vec::new();
    if let Err(e) = stream.read_to_end(&mut request).await {
        warn!(error = %e, "failed to read request");
        return;
    }
    debug!(bytes = request.len(), "received request");

    if let Err(e) = stream.write_all(&request).await {
        warn!(error = %e, "failed to write response");
        return;
    }
    if let Err(e) = stream.shutdown().await {
        warn!(error = %e, "failed to close stream");
    }
}
