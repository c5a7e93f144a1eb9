//! Executor tests against real interpreters.
//!
//! Most tests run `sh`; the Python scenarios are skipped when `python3` is
//! not on PATH.

#![cfg(unix)]

use codecast_adapters::{ExecutorSettings, Interpreter, Sandbox, SessionExecutor, Workspace};
use codecast_proto::{ExecutionRequest, ServerMessage, SessionId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::mpsc;

fn sid(s: &str) -> SessionId {
    SessionId::parse(s).unwrap()
}

fn request(id: &str, source: &str) -> ExecutionRequest {
    ExecutionRequest {
        session_id: sid(id),
        source_code: source.to_string(),
    }
}

fn sandbox(temp: &TempDir, settings: ExecutorSettings) -> Arc<Sandbox> {
    Arc::new(Sandbox::new(Workspace::new(temp.path()), settings))
}

fn shell_settings() -> ExecutorSettings {
    ExecutorSettings::new(Interpreter::shell()).with_kill_grace(Duration::from_millis(100))
}

fn executor(sandbox: &Arc<Sandbox>) -> (SessionExecutor, mpsc::UnboundedReceiver<ServerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (sandbox.executor(tx), rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

fn out(chunk: &str) -> ServerMessage {
    ServerMessage::Out {
        chunk: chunk.to_string(),
    }
}

fn stdout_text(messages: &[ServerMessage]) -> String {
    messages
        .iter()
        .filter_map(|m| match m {
            ServerMessage::Out { chunk } => Some(chunk.as_str()),
            _ => None,
        })
        .collect()
}

fn stderr_text(messages: &[ServerMessage]) -> String {
    messages
        .iter()
        .filter_map(|m| match m {
            ServerMessage::Err { chunk } => Some(chunk.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_record_acks_and_keeps_directory() {
    let temp = TempDir::new().unwrap();
    let sandbox = sandbox(&temp, shell_settings());
    let (mut executor, mut rx) = executor(&sandbox);

    executor.record(&sid("s1")).await.unwrap();
    assert_eq!(drain(&mut rx), vec![ServerMessage::Record]);

    executor.compile(request("s1", "echo hi")).wait().await;
    assert_eq!(drain(&mut rx), vec![out("hi\n")]);
    assert_eq!(
        std::fs::read_to_string(temp.path().join("s1/main.sh")).unwrap(),
        "echo hi"
    );

    executor.disconnect().await;
    assert!(temp.path().join("s1").is_dir());
}

#[tokio::test]
async fn test_replay_directory_removed_on_disconnect() {
    let temp = TempDir::new().unwrap();
    let sandbox = sandbox(&temp, shell_settings());
    let (mut executor, mut rx) = executor(&sandbox);

    executor.replay(&sid("s2")).await.unwrap();
    assert!(drain(&mut rx).is_empty(), "replay sends no ack");
    executor.compile(request("s2", "echo replayed")).wait().await;
    assert_eq!(stdout_text(&drain(&mut rx)), "replayed\n");

    executor.disconnect().await;
    assert!(!temp.path().join("s2").exists());
}

#[tokio::test]
async fn test_record_after_replay_keeps_directory() {
    let temp = TempDir::new().unwrap();
    let sandbox = sandbox(&temp, shell_settings());
    let (mut executor, _rx) = executor(&sandbox);

    executor.replay(&sid("s3")).await.unwrap();
    executor.record(&sid("s3")).await.unwrap();
    executor.disconnect().await;
    assert!(temp.path().join("s3").is_dir());
}

#[tokio::test]
async fn test_stderr_is_streamed_on_err_channel() {
    let temp = TempDir::new().unwrap();
    let sandbox = sandbox(&temp, shell_settings());
    let (mut executor, mut rx) = executor(&sandbox);

    executor.record(&sid("s4")).await.unwrap();
    drain(&mut rx);
    executor
        .compile(request("s4", "echo fine; echo oops 1>&2; exit 3"))
        .wait()
        .await;

    let messages = drain(&mut rx);
    assert_eq!(stdout_text(&messages), "fine\n");
    assert_eq!(stderr_text(&messages), "oops\n");
}

#[tokio::test]
async fn test_compile_for_unattached_session_reports_error() {
    let temp = TempDir::new().unwrap();
    let sandbox = sandbox(&temp, shell_settings());
    let (mut executor, mut rx) = executor(&sandbox);

    let handle = executor.compile(request("ghost", "echo nope"));
    assert!(handle.is_finished());
    let messages = drain(&mut rx);
    assert_eq!(messages.len(), 1);
    assert!(stderr_text(&messages).contains("not attached"));
    assert!(!temp.path().join("ghost").exists());
}

#[tokio::test]
async fn test_compiles_for_one_session_run_in_order_across_executors() {
    let temp = TempDir::new().unwrap();
    let sandbox = sandbox(&temp, shell_settings());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut first = sandbox.executor(tx.clone());
    let mut second = sandbox.executor(tx);

    first.record(&sid("shared")).await.unwrap();
    second.replay(&sid("shared")).await.unwrap();
    drain(&mut rx);

    let slow = first.compile(request("shared", "sleep 0.3; echo first"));
    let fast = second.compile(request("shared", "echo second"));
    fast.wait().await;
    slow.wait().await;

    assert_eq!(drain(&mut rx), vec![out("first\n"), out("second\n")]);
    first.disconnect().await;
    second.disconnect().await;
}

#[tokio::test]
async fn test_background_child_does_not_block_next_compile() {
    let temp = TempDir::new().unwrap();
    let sandbox = sandbox(&temp, shell_settings());
    let (mut executor, mut rx) = executor(&sandbox);

    executor.record(&sid("bg")).await.unwrap();
    drain(&mut rx);
    let first = executor.compile(request("bg", "sleep 5 & echo a"));
    let second = executor.compile(request("bg", "echo b"));

    let started = Instant::now();
    tokio::time::timeout(Duration::from_secs(3), second.wait())
        .await
        .expect("second compile waited for the first program's background child");
    first.wait().await;
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(drain(&mut rx), vec![out("a\n"), out("b\n")]);
}

#[tokio::test]
async fn test_program_environment_is_explicit() {
    let temp = TempDir::new().unwrap();
    let mut interpreter = Interpreter::shell();
    interpreter
        .env
        .insert("GREETING".to_string(), "hello".to_string());
    let settings = ExecutorSettings::new(interpreter).with_host_env(
        std::env::vars().chain([("PYTHONUNBUFFERED".to_string(), "1".to_string())]),
    );
    let sandbox = sandbox(&temp, settings);
    let (mut executor, mut rx) = executor(&sandbox);

    executor.record(&sid("env")).await.unwrap();
    drain(&mut rx);
    executor
        .compile(request(
            "env",
            "echo \"${PYTHONUNBUFFERED:-unset} $GREETING\"",
        ))
        .wait()
        .await;
    assert_eq!(drain(&mut rx), vec![out("unset hello\n")]);
}

#[tokio::test]
async fn test_disconnect_kills_running_program_group() {
    let temp = TempDir::new().unwrap();
    let sandbox = sandbox(&temp, shell_settings());
    let (mut executor, mut rx) = executor(&sandbox);

    executor.replay(&sid("long")).await.unwrap();
    let _handle = executor.compile(request(
        "long",
        "sleep 30 & echo $! > child.pid; echo started; wait",
    ));

    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("program never started");
    assert_eq!(first, Some(out("started\n")));
    let child_pid: i32 = std::fs::read_to_string(temp.path().join("long/child.pid"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();

    let started = Instant::now();
    executor.disconnect().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!temp.path().join("long").exists());
    assert!(drain(&mut rx).is_empty());

    // The background child was in the program's group and must be gone.
    let pid = nix::unistd::Pid::from_raw(child_pid);
    let deadline = Instant::now() + Duration::from_secs(2);
    while nix::sys::signal::kill(pid, None).is_ok() {
        assert!(Instant::now() < deadline, "background child survived");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_timeout_kills_program_and_reports() {
    let temp = TempDir::new().unwrap();
    let settings = shell_settings().with_timeout(Duration::from_millis(200));
    let sandbox = sandbox(&temp, settings);
    let (mut executor, mut rx) = executor(&sandbox);

    executor.record(&sid("slow")).await.unwrap();
    drain(&mut rx);
    let started = Instant::now();
    executor.compile(request("slow", "sleep 10")).wait().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(stderr_text(&drain(&mut rx)).contains("timed out"));
}

#[tokio::test]
async fn test_missing_interpreter_reports_spawn_failure() {
    let temp = TempDir::new().unwrap();
    let interpreter = Interpreter {
        command: "codecast-no-such-interpreter".to_string(),
        ..Interpreter::shell()
    };
    let sandbox = sandbox(&temp, ExecutorSettings::new(interpreter));
    let (mut executor, mut rx) = executor(&sandbox);

    executor.record(&sid("s5")).await.unwrap();
    drain(&mut rx);
    executor.compile(request("s5", "echo x")).wait().await;
    assert!(stderr_text(&drain(&mut rx)).contains("failed to start"));
}

#[tokio::test]
async fn test_python_print_yields_single_out_chunk() {
    if !Interpreter::python().is_available() {
        eprintln!("python3 not available; skipping");
        return;
    }
    let temp = TempDir::new().unwrap();
    // An unbuffered server environment must not split print output.
    let settings = ExecutorSettings::new(Interpreter::python()).with_host_env(
        std::env::vars().chain([("PYTHONUNBUFFERED".to_string(), "1".to_string())]),
    );
    let sandbox = sandbox(&temp, settings);
    let (mut executor, mut rx) = executor(&sandbox);

    executor.record(&sid("py")).await.unwrap();
    drain(&mut rx);

    executor.compile(request("py", "print(1+1)")).wait().await;
    assert_eq!(drain(&mut rx), vec![out("2\n")]);

    executor.compile(request("py", "print('hi')")).wait().await;
    assert_eq!(drain(&mut rx), vec![out("hi\n")]);

    executor.disconnect().await;
    assert!(temp.path().join("py").is_dir());
}
