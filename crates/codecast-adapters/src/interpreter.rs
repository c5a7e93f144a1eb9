//! Interpreter definitions for running submitted source.

use codecast_core::InterpreterConfig;
use std::collections::BTreeMap;
use std::process::Command;
use tracing::debug;

/// An interpreter invocation: `command args... entrypoint`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    /// The command to execute.
    pub command: String,
    /// Arguments placed before the entrypoint file.
    pub args: Vec<String>,
    /// File the submitted source is written to.
    pub entrypoint: String,
    /// Variables set for the program on top of the inherited allowlist.
    pub env: BTreeMap<String, String>,
}

impl Interpreter {
    /// Creates an interpreter from configuration.
    pub fn from_config(config: &InterpreterConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            entrypoint: config.entrypoint.clone(),
            env: config.env.clone(),
        }
    }

    /// Python 3 running `main.py`.
    pub fn python() -> Self {
        Self::from_config(&InterpreterConfig::default())
    }

    /// POSIX shell running `main.sh`.
    pub fn shell() -> Self {
        Self {
            command: "sh".to_string(),
            args: Vec::new(),
            entrypoint: "main.sh".to_string(),
            env: BTreeMap::new(),
        }
    }

    /// Builds the command and its arguments.
    ///
    /// The entrypoint is passed relative to the working directory.
    pub fn build_command(&self) -> (String, Vec<String>) {
        let mut args = self.args.clone();
        args.push(self.entrypoint.clone());
        (self.command.clone(), args)
    }

    /// Checks if the interpreter can be started by running `--version`.
    pub fn is_available(&self) -> bool {
        let available = Command::new(&self.command)
            .arg("--version")
            .output()
            .is_ok_and(|output| output.status.success());
        debug!(command = %self.command, available, "Interpreter availability check");
        available
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::python()
    }
}
