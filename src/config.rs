//! Configuration loading and persistence.
//!
//! Settings live in `config.json` under the config directory. Missing
//! fields take their defaults, and `VISCRIPT_*` environment variables
//! override whatever the file says.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::geometry::Vec2F;
use crate::input::DEFAULT_NEAR_THRESHOLD;
use crate::mailbox::{MailboxConfig, DEFAULT_CAPACITY, DEFAULT_SEND_TIMEOUT};

/// Config file name inside the config directory.
pub const CONFIG_FILE: &str = "config.json";

/// Configuration for the hypervisor.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Milliseconds between hypervisor ticks.
    pub tick_interval_ms: u64,
    /// Capacity of every mailbox.
    pub mailbox_capacity: usize,
    /// How long a send into a full mailbox waits before giving up.
    pub mailbox_send_timeout_ms: u64,
    /// Command run by `start` when no command is given.
    pub default_shell: String,
    /// Canvas half-width.
    pub canvas_extent_x: f32,
    /// Canvas half-height.
    pub canvas_extent_y: f32,
    /// Distance within which the pointer counts as on an edge.
    pub near_threshold: f32,
    /// Address for the monitor listener; disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_addr: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_interval_ms: 16,
            mailbox_capacity: DEFAULT_CAPACITY,
            mailbox_send_timeout_ms: DEFAULT_SEND_TIMEOUT.as_millis() as u64,
            default_shell: "/bin/sh".to_string(),
            canvas_extent_x: 1.777,
            canvas_extent_y: 1.0,
            near_threshold: DEFAULT_NEAR_THRESHOLD,
            listen_addr: None,
        }
    }
}

impl Config {
    /// Returns the configuration directory, creating it if necessary.
    ///
    /// Priority:
    /// 1. `VISCRIPT_CONFIG_DIR`
    /// 2. `VISCRIPT_ENV=test`: `<temp dir>/viscript-test`
    /// 3. platform config dir (`~/.config/viscript` on Linux)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("VISCRIPT_CONFIG_DIR") {
            PathBuf::from(dir)
        } else if crate::env::is_test_mode() {
            std::env::temp_dir().join("viscript-test")
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("viscript")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config dir {}", dir.display()))?;
        Ok(dir)
    }

    /// Load from the config directory, then apply environment overrides.
    ///
    /// A missing file yields the defaults; an unreadable or malformed one
    /// is an error.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_path(&Self::config_dir()?.join(CONFIG_FILE))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from `path` without environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Malformed config file {}", path.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    /// Persist to the config directory.
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Persist to `path`.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `VISCRIPT_*` overrides read through `var`. Unparseable values
    /// are ignored with a warning.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(key: &str, value: Option<String>) -> Option<T> {
            let value = value?;
            let parsed = value.trim().parse().ok();
            if parsed.is_none() {
                log::warn!("Ignoring {key}={value}: not a valid value");
            }
            parsed
        }

        if let Some(ms) = parsed("VISCRIPT_TICK_INTERVAL_MS", var("VISCRIPT_TICK_INTERVAL_MS")) {
            self.tick_interval_ms = ms;
        }
        if let Some(capacity) = parsed("VISCRIPT_MAILBOX_CAPACITY", var("VISCRIPT_MAILBOX_CAPACITY")) {
            self.mailbox_capacity = capacity;
        }
        if let Some(ms) = parsed(
            "VISCRIPT_MAILBOX_SEND_TIMEOUT_MS",
            var("VISCRIPT_MAILBOX_SEND_TIMEOUT_MS"),
        ) {
            self.mailbox_send_timeout_ms = ms;
        }
        if let Some(shell) = var("VISCRIPT_SHELL").filter(|s| !s.trim().is_empty()) {
            self.default_shell = shell;
        }
        if let Some(addr) = var("VISCRIPT_LISTEN_ADDR") {
            self.listen_addr = Some(addr).filter(|a| !a.trim().is_empty());
        }
    }

    /// Mailbox settings for every mailbox the hypervisor creates.
    pub fn mailbox_config(&self) -> MailboxConfig {
        MailboxConfig {
            capacity: self.mailbox_capacity.max(1),
            send_timeout: Duration::from_millis(self.mailbox_send_timeout_ms),
        }
    }

    /// Canvas half-extents.
    pub fn canvas_extents(&self) -> Vec2F {
        Vec2F::new(self.canvas_extent_x, self.canvas_extent_y)
    }

    /// Time between ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mailbox_capacity, 4096);
        assert_eq!(config.mailbox_send_timeout_ms, 250);
        assert_eq!(config.near_threshold, 0.05);
        assert_eq!(config.listen_addr, None);
        assert_eq!(config.canvas_extents(), Vec2F::new(1.777, 1.0));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, r#"{"default_shell": "bash", "mailbox_capacity": 8}"#).unwrap();
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.default_shell, "bash");
        assert_eq!(config.mailbox_capacity, 8);
        assert_eq!(config.tick_interval_ms, Config::default().tick_interval_ms);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "{ not json").unwrap();
        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let config = Config {
            listen_addr: Some("127.0.0.1:7999".to_string()),
            near_threshold: 0.1,
            ..Config::default()
        };
        config.save_to_path(&path).unwrap();
        assert_eq!(Config::load_from_path(&path).unwrap(), config);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("VISCRIPT_TICK_INTERVAL_MS", "5"),
            ("VISCRIPT_MAILBOX_CAPACITY", "nope"),
            ("VISCRIPT_MAILBOX_SEND_TIMEOUT_MS", " 40 "),
            ("VISCRIPT_SHELL", "zsh -i"),
            ("VISCRIPT_LISTEN_ADDR", "0.0.0.0:7000"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| vars.get(k).map(|v| (*v).to_string()));
        assert_eq!(config.tick_interval_ms, 5);
        assert_eq!(config.mailbox_capacity, 4096);
        assert_eq!(config.mailbox_send_timeout_ms, 40);
        assert_eq!(config.default_shell, "zsh -i");
        assert_eq!(config.listen_addr.as_deref(), Some("0.0.0.0:7000"));
        assert_eq!(config.mailbox_config().send_timeout, Duration::from_millis(40));
    }
}
