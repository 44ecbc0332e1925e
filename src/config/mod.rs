//! Configuration management for keymidi
//!
//! Handles loading, validating and hot-reloading of the YAML configuration
//! file. Every section is optional; a missing file means all defaults.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use crate::keymap::KeyMap;
use crate::session::NoteSettings;

pub use watcher::ConfigWatcher;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub midi: MidiConfig,
    #[serde(default)]
    pub keyboard: KeyboardConfig,
    #[serde(default)]
    pub hotplug: HotplugConfig,
}

/// MIDI output configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MidiConfig {
    /// Client name announced to the platform MIDI service
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Preferred output: index or case-insensitive name substring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// MIDI channel, 1-16
    #[serde(default = "default_channel")]
    pub channel: u8,
    /// Note On velocity, 1-127
    #[serde(default = "default_velocity")]
    pub velocity: u8,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
            output: None,
            channel: default_channel(),
            velocity: default_velocity(),
        }
    }
}

/// Key layout configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct KeyboardConfig {
    /// Replaces the built-in layout when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<Vec<KeyBinding>>,
}

/// One key of a custom layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct KeyBinding {
    pub key: char,
    pub note: u8,
}

/// Output port rescan configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HotplugConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for HotplugConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl AppConfig {
    /// Load and validate configuration from file
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Load from file if it exists, otherwise use defaults
    pub async fn load_or_default(path: &Path) -> Result<Self> {
        if fs::try_exists(path).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate value ranges and the custom layout
    pub fn validate(&self) -> Result<()> {
        if self.midi.client_name.trim().is_empty() {
            anyhow::bail!("midi.client_name cannot be empty");
        }
        if !(1..=16).contains(&self.midi.channel) {
            anyhow::bail!(
                "midi.channel {} is invalid (must be 1-16)",
                self.midi.channel
            );
        }
        if !(1..=127).contains(&self.midi.velocity) {
            anyhow::bail!(
                "midi.velocity {} is invalid (must be 1-127)",
                self.midi.velocity
            );
        }
        if self.hotplug.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            anyhow::bail!(
                "hotplug.poll_interval_ms {} is too short (minimum {})",
                self.hotplug.poll_interval_ms,
                MIN_POLL_INTERVAL_MS
            );
        }

        self.keymap().context("Invalid keyboard.layout")?;
        Ok(())
    }

    /// Key map described by this configuration
    pub fn keymap(&self) -> Result<KeyMap> {
        match &self.keyboard.layout {
            Some(layout) => Ok(KeyMap::from_bindings(
                layout.iter().map(|b| (b.key, b.note)),
            )?),
            None => Ok(KeyMap::default()),
        }
    }

    /// Channel and velocity for outgoing notes
    pub fn note_settings(&self) -> NoteSettings {
        NoteSettings {
            channel: self.midi.channel.saturating_sub(1),
            velocity: self.midi.velocity,
        }
    }
}

/// Rescanning faster than this only burns CPU
pub const MIN_POLL_INTERVAL_MS: u64 = 50;

// Default value functions
fn default_client_name() -> String {
    "keymidi".to_string()
}
fn default_channel() -> u8 {
    1
}
fn default_velocity() -> u8 {
    127
}
fn default_poll_interval() -> u64 {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.midi.client_name, "keymidi");
        assert_eq!(config.note_settings(), NoteSettings::default());
        assert_eq!(config.hotplug.poll_interval_ms, 1000);
        assert_eq!(config.keymap().unwrap(), KeyMap::default());
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
midi:
  client_name: "my-keys"
  output: "fluid"
  channel: 10
  velocity: 90
keyboard:
  layout:
    - { key: "a", note: 36 }
    - { key: ";", note: 38 }
hotplug:
  poll_interval_ms: 250
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.midi.output.as_deref(), Some("fluid"));
        assert_eq!(
            config.note_settings(),
            NoteSettings {
                channel: 9,
                velocity: 90
            }
        );

        let keymap = config.keymap().unwrap();
        assert_eq!(keymap.note_for('A'), Some(36));
        assert_eq!(keymap.note_for(';'), Some(38));
        assert_eq!(keymap.len(), 2);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(AppConfig::from_yaml("midi: { channel: 0 }").is_err());
        assert!(AppConfig::from_yaml("midi: { channel: 17 }").is_err());
        assert!(AppConfig::from_yaml("midi: { velocity: 0 }").is_err());
        assert!(AppConfig::from_yaml("midi: { client_name: '' }").is_err());
        assert!(AppConfig::from_yaml("hotplug: { poll_interval_ms: 10 }").is_err());
    }

    #[test]
    fn test_invalid_layout_rejected() {
        let duplicate = r#"
keyboard:
  layout:
    - { key: "z", note: 60 }
    - { key: "Z", note: 61 }
"#;
        let err = AppConfig::from_yaml(duplicate).unwrap_err();
        assert!(format!("{:#}", err).contains("more than once"));

        assert!(AppConfig::from_yaml("keyboard: { layout: [] }").is_err());
        assert!(AppConfig::from_yaml("keyboard: { layout: [ { key: 'z', note: 200 } ] }").is_err());
    }

    #[test]
    fn test_example_config_parses() {
        let config = AppConfig::from_yaml(include_str!("../../keymidi.example.yaml")).unwrap();
        assert_eq!(config.midi.output.as_deref(), Some("fluid"));
        assert_eq!(config.keymap().unwrap().note_for('s'), Some(38));
    }

    #[tokio::test]
    async fn test_load_or_default_missing_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config = AppConfig::load_or_default(&temp_dir.path().join("absent.yaml")).await?;
        assert_eq!(config, AppConfig::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_save_then_load() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("keymidi.yaml");

        let mut config = AppConfig::default();
        config.midi.output = Some("Synth".to_string());
        config.keyboard.layout = Some(vec![KeyBinding { key: 'Z', note: 48 }]);
        config.save(&path).await?;

        let loaded = AppConfig::load(&path).await?;
        assert_eq!(loaded, config);
        Ok(())
    }
}
