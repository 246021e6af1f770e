//! Configuration management for projterm.
//!
//! Handles persistence and loading of daemon preferences.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Terminal behavior configuration
    #[serde(default)]
    pub terminal: TerminalConfig,
}

/// Terminal behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Shell binary to spawn; defaults to the user's login shell.
    #[serde(default)]
    pub shell: Option<String>,

    /// Whether to respawn persisted sessions at daemon startup.
    #[serde(default = "default_prewarm")]
    pub prewarm: bool,
}

fn default_prewarm() -> bool {
    true
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell: None,
            prewarm: true,
        }
    }
}

impl Config {
    /// Load configuration from disk, or return default if not found
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Get the path to the config file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Could not find config directory")?;

        Ok(config_dir.join("projterm").join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.terminal.shell.is_none());
        assert!(config.terminal.prewarm);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config {
            terminal: TerminalConfig {
                shell: Some("/bin/zsh".to_string()),
                prewarm: false,
            },
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.terminal.shell.as_deref(), Some("/bin/zsh"));
        assert!(!parsed.terminal.prewarm);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let parsed: Config = serde_json::from_str("{}").unwrap();
        assert!(parsed.terminal.shell.is_none());
        assert!(parsed.terminal.prewarm);
    }
}
