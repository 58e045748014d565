//! PTY spawning utilities for external processes.

// Rust guideline compliant 2026-02

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use portable_pty::{native_pty_system, CommandBuilder, PtyPair, PtySize};

/// Parameters for starting an OS command on a pseudo-terminal.
#[derive(Debug, Clone)]
pub struct ExternalSpawnConfig {
    /// Command line, split on whitespace (e.g. `"sh -i"`).
    pub command: String,
    /// Working directory. Inherits the host's when `None`.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
    /// PTY rows.
    pub rows: u16,
    /// PTY columns.
    pub cols: u16,
}

impl ExternalSpawnConfig {
    /// Config for `command` with default PTY size and inherited cwd.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cwd: None,
            env: HashMap::new(),
            rows: 24,
            cols: 80,
        }
    }

    /// Set the PTY size.
    #[must_use]
    pub fn with_size(mut self, rows: u16, cols: u16) -> Self {
        self.rows = rows.max(1);
        self.cols = cols.max(1);
        self
    }
}

/// Open a new PTY pair with the given dimensions.
pub fn open_pty(rows: u16, cols: u16) -> Result<PtyPair> {
    let pty_system = native_pty_system();
    let size = PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    };
    pty_system.openpty(size).context("Failed to open PTY")
}

/// Build a command from the config's command string.
pub fn build_command(config: &ExternalSpawnConfig) -> Result<CommandBuilder> {
    let mut parts = config.command.split_whitespace();
    let Some(program) = parts.next() else {
        bail!("Empty command");
    };
    let mut cmd = CommandBuilder::new(program);
    for arg in parts {
        cmd.arg(arg);
    }
    if let Some(cwd) = &config.cwd {
        cmd.cwd(cwd);
    }
    for (key, value) in &config.env {
        cmd.env(key, value);
    }
    Ok(cmd)
}
