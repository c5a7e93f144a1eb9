//! Recording scripts for `codecast record`.
//!
//! A script is a JSONL file with one step per line:
//!
//! ```text
//! {"step":"rename","name":"Hello"}
//! {"step":"record"}
//! {"step":"edit","code":"print('hi')"}
//! {"step":"cursor","line":0,"ch":11}
//! {"step":"wait","ms":250}
//! {"step":"stop"}
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.

use anyhow::{Context, Result};
use codecast_proto::{Position, Selection};
use serde::Deserialize;
use std::path::Path;

/// One scripted editor action.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "step", rename_all = "lowercase")]
pub enum Step {
    Rename {
        name: String,
    },
    Record,
    Edit {
        code: String,
        #[serde(default)]
        history: String,
    },
    Cursor {
        line: u32,
        ch: u32,
    },
    Select {
        anchor: Position,
        head: Position,
    },
    Wait {
        ms: u64,
    },
    Stop,
}

impl Step {
    /// Selection carried by cursor and select steps.
    pub fn selection(&self) -> Option<Selection> {
        match self {
            Step::Cursor { line, ch } => Some(Selection::cursor(Position::new(*line, *ch))),
            Step::Select { anchor, head } => Some(Selection::new(*anchor, *head)),
            _ => None,
        }
    }
}

/// Parses script text. Errors name the offending line.
pub fn parse(content: &str) -> Result<Vec<Step>> {
    let mut steps = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let step = serde_json::from_str(line)
            .with_context(|| format!("Invalid script step on line {}", index + 1))?;
        steps.push(step);
    }
    Ok(steps)
}

pub fn load(path: &Path) -> Result<Vec<Step>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script {}", path.display()))?;
    parse(&content)
}
