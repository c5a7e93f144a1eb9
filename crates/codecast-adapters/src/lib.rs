//! # codecast-adapters
//!
//! Execution sandbox for codecast sessions.
//!
//! This crate provides:
//! - Per-session working directories under a shared root
//! - Interpreter definitions and the `SessionExecutor` that runs submitted
//!   source, streaming stdout and stderr chunks as they arrive
//! - A JSON-lines transport that serves one executor per connection
//!
//! ## Process Groups
//!
//! Every interpreter runs as the leader of its own process group, so
//! cancelling a compile (or disconnecting) kills anything the program spawned
//! before its working directory is removed.

mod executor;
mod interpreter;
mod output;
mod transport;
mod workspace;

pub use executor::{
    CompileHandle, ExecutorError, ExecutorSettings, Sandbox, SessionExecutor, SessionLocks,
    SessionRole, Turn,
};
pub use interpreter::Interpreter;
pub use output::Utf8Chunker;
pub use transport::{serve, serve_connection};
pub use workspace::{Workspace, WorkspaceError};
