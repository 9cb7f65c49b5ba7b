//! Configuration management for Dialer CLI

use anyhow::{Context, Result};
use dialer_core::{NativeErrorTable, DEFAULT_PHASE_DELAY};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

fn default_phase_delay_ms() -> u64 {
    DEFAULT_PHASE_DELAY.as_millis() as u64
}

/// Dialer CLI configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Time between two simulated progress reports
    #[serde(default = "default_phase_delay_ms")]
    pub phase_delay_ms: u64,

    /// Entry dialed when none is given on the command line
    #[serde(default)]
    pub default_entry: Option<String>,

    /// Custom messages for native error codes
    #[serde(default)]
    pub error_messages: BTreeMap<u32, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            phase_delay_ms: default_phase_delay_ms(),
            default_entry: None,
            error_messages: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "dialer", "dialer")
            .context("Could not determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.json"))
    }

    /// Load config from the default location, or return default if not exists
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path()?)
    }

    /// Load config for a command that can run without one. A broken config
    /// file is reported and replaced by the defaults.
    pub fn load_or_default() -> Self {
        match Self::path() {
            Ok(path) => Self::load_or_default_from(&path),
            Err(e) => {
                warn!("Using default configuration: {:#}", e);
                Self::default()
            }
        }
    }

    pub fn load_or_default_from(path: &Path) -> Self {
        Self::load_from(path).unwrap_or_else(|e| {
            warn!("Using default configuration: {:#}", e);
            Self::default()
        })
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        debug!("Loading config from {}", path.display());
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Config = serde_json::from_str(&content)
            .with_context(|| "Failed to parse config file")?;

        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        Ok(())
    }

    /// Set a custom message for a code. Returns false if it was unchanged.
    pub fn set_message(&mut self, code: u32, message: &str) -> bool {
        let message = message.to_string();
        if self.error_messages.get(&code) == Some(&message) {
            return false;
        }
        self.error_messages.insert(code, message);
        true
    }

    /// Remove a custom message
    pub fn clear_message(&mut self, code: u32) -> bool {
        self.error_messages.remove(&code).is_some()
    }

    /// Error table with the configured overrides applied
    pub fn error_table(&self) -> NativeErrorTable {
        self.error_messages
            .iter()
            .fold(NativeErrorTable::new(), |table, (code, message)| {
                table.with_override(*code, message.as_str())
            })
    }
}
