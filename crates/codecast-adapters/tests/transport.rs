//! JSON-lines transport tests over an in-memory duplex pipe.

#![cfg(unix)]

use codecast_adapters::{ExecutorSettings, Interpreter, Sandbox, Workspace, serve_connection};
use codecast_proto::ServerMessage;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Client {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
    server: JoinHandle<std::io::Result<()>>,
}

impl Client {
    fn connect(temp: &TempDir) -> Self {
        Self::connect_until(temp, CancellationToken::new())
    }

    fn connect_until(temp: &TempDir, shutdown: CancellationToken) -> Self {
        let sandbox = Arc::new(Sandbox::new(
            Workspace::new(temp.path()),
            ExecutorSettings::new(Interpreter::shell()).with_kill_grace(Duration::from_millis(100)),
        ));
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let server = tokio::spawn(serve_connection(server_read, server_write, sandbox, shutdown));
        let (client_read, writer) = tokio::io::split(client);
        Self {
            lines: BufReader::new(client_read).lines(),
            writer,
            server,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn next(&mut self) -> Option<ServerMessage> {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("no reply from server")
            .unwrap()?;
        Some(serde_json::from_str(&line).unwrap())
    }

    /// Closes the client side and waits for the server to finish.
    async fn close(mut self) -> Vec<ServerMessage> {
        self.writer.shutdown().await.unwrap();
        let mut rest = Vec::new();
        while let Some(message) = self.next().await {
            rest.push(message);
        }
        self.server.await.unwrap().unwrap();
        rest
    }
}

#[tokio::test]
async fn test_record_then_compile_streams_output() {
    let temp = TempDir::new().unwrap();
    let mut client = Client::connect(&temp);

    client.send(r#"{"type":"record","id":"s1"}"#).await;
    assert_eq!(client.next().await, Some(ServerMessage::Record));

    client
        .send(r#"{"type":"compile","id":"s1","source":"echo hi"}"#)
        .await;
    assert_eq!(
        client.next().await,
        Some(ServerMessage::Out {
            chunk: "hi\n".to_string()
        })
    );

    assert!(client.close().await.is_empty());
    assert!(temp.path().join("s1").is_dir());
}

#[tokio::test]
async fn test_malformed_line_reports_error_and_keeps_connection() {
    let temp = TempDir::new().unwrap();
    let mut client = Client::connect(&temp);

    client.send("{not json").await;
    match client.next().await {
        Some(ServerMessage::Err { chunk }) => assert!(chunk.starts_with("malformed message")),
        other => panic!("expected err chunk, got {other:?}"),
    }

    client.send(r#"{"type":"record","id":"../escape"}"#).await;
    assert!(matches!(client.next().await, Some(ServerMessage::Err { .. })));

    client.send(r#"{"type":"record","id":"ok"}"#).await;
    assert_eq!(client.next().await, Some(ServerMessage::Record));
    client.close().await;
}

#[tokio::test]
async fn test_eof_removes_replay_directory() {
    let temp = TempDir::new().unwrap();
    let mut client = Client::connect(&temp);

    client.send(r#"{"type":"replay","id":"s2"}"#).await;
    client
        .send(r#"{"type":"compile","id":"s2","source":"echo again"}"#)
        .await;
    assert_eq!(
        client.next().await,
        Some(ServerMessage::Out {
            chunk: "again\n".to_string()
        })
    );

    client.close().await;
    assert!(!temp.path().join("s2").exists());
}

#[tokio::test]
async fn test_shutdown_disconnects_and_kills_programs() {
    let temp = TempDir::new().unwrap();
    let shutdown = CancellationToken::new();
    let mut client = Client::connect_until(&temp, shutdown.clone());

    client.send(r#"{"type":"replay","id":"s3"}"#).await;
    client
        .send(r#"{"type":"compile","id":"s3","source":"echo up; sleep 30"}"#)
        .await;
    assert_eq!(
        client.next().await,
        Some(ServerMessage::Out {
            chunk: "up\n".to_string()
        })
    );

    shutdown.cancel();
    let finished = tokio::time::timeout(Duration::from_secs(5), client.server)
        .await
        .expect("connection outlived shutdown");
    finished.unwrap().unwrap();
    assert!(!temp.path().join("s3").exists());
}
