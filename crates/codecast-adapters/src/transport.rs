//! JSON-lines transport for the execution server.
//!
//! Each line is one JSON message tagged by `type`:
//!
//! ```text
//! → {"type":"record","id":"s1"}
//! ← {"type":"record"}
//! → {"type":"compile","id":"s1","source":"print('hi')"}
//! ← {"type":"out","chunk":"hi\n"}
//! ```
//!
//! End of input, or server shutdown, is a disconnect.

use crate::executor::{Sandbox, SessionExecutor};
use codecast_proto::{ClientMessage, ExecutionRequest, ServerMessage};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Serves one client over a pair of byte streams until the reader hits EOF
/// or `shutdown` is cancelled.
///
/// Requests are dispatched as they arrive; compiles run concurrently with
/// reading further messages. On EOF the executor disconnects, and the call
/// returns once every queued message has been written.
pub async fn serve_connection<R, W>(
    reader: R,
    writer: W,
    sandbox: Arc<Sandbox>,
    shutdown: CancellationToken,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_messages(writer, rx));

    let mut executor = sandbox.executor(tx.clone());
    let mut lines = BufReader::new(reader).lines();
    loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => {
                debug!("Server shutting down; closing connection");
                break;
            }
            next = lines.next_line() => next,
        };
        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Connection read failed; treating as disconnect");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        dispatch(&mut executor, &tx, &line).await;
    }

    executor.disconnect().await;
    drop(executor);
    drop(tx);

    match writer_task.await {
        Ok(result) => result,
        Err(e) => Err(io::Error::other(e)),
    }
}

async fn dispatch(
    executor: &mut SessionExecutor,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    line: &str,
) {
    let message = match serde_json::from_str::<ClientMessage>(line) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Malformed client message");
            let _ = tx.send(ServerMessage::Err {
                chunk: format!("malformed message: {e}\n"),
            });
            return;
        }
    };

    debug!(?message, "Client message");
    let result = match message {
        ClientMessage::Record { id } => executor.record(&id).await,
        ClientMessage::Replay { id } => executor.replay(&id).await,
        ClientMessage::Compile { id, source } => {
            // The handle is dropped; the compile keeps running detached.
            executor.compile(ExecutionRequest {
                session_id: id,
                source_code: source,
            });
            Ok(())
        }
    };
    if let Err(e) = result {
        warn!(error = %e, "Request failed");
        let _ = tx.send(ServerMessage::Err {
            chunk: format!("{e}\n"),
        });
    }
}

async fn write_messages<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<ServerMessage>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut line = serde_json::to_string(&message)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    writer.shutdown().await
}

/// Accepts TCP connections and serves each one on its own task until
/// `shutdown` is cancelled.
///
/// On shutdown every open connection is disconnected, killing its running
/// programs, before this returns.
pub async fn serve(listener: TcpListener, sandbox: Arc<Sandbox>, shutdown: CancellationToken) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, "Execution server listening");
    let connections = TaskTracker::new();
    loop {
        let accepted = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
                continue;
            }
        };

        info!(%peer, "Client connected");
        let sandbox = Arc::clone(&sandbox);
        let shutdown = shutdown.child_token();
        connections.spawn(async move {
            let (reader, writer) = stream.into_split();
            if let Err(e) = serve_connection(reader, writer, sandbox, shutdown).await {
                warn!(%peer, error = %e, "Connection ended with error");
            }
            info!(%peer, "Client disconnected");
        });
    }
    connections.close();
    info!(open = connections.len(), "Closing client connections");
    connections.wait().await;
    info!("Execution server stopped");
    Ok(())
}
