//! Configuration management for the remapper
//!
//! Handles loading and validating the YAML configuration file. Command-line
//! flags are merged on top before a [`SessionConfig`] is built.

pub mod watcher;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

use crate::lifecycle::SessionConfig;
use crate::mapping::MappingTable;
use crate::midi::Channel;

pub use watcher::MappingWatcher;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub midi: MidiConfig,
    #[serde(default)]
    pub mapping: MappingConfig,
}

/// MIDI port configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MidiConfig {
    pub input_port: Option<String>,
    /// Defaults to the input port name (one device used both ways)
    pub output_port: Option<String>,
    /// Output channel as shown to users (1-16)
    pub channel: Option<i64>,
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

/// Mapping source configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct MappingConfig {
    pub path: Option<PathBuf>,
    /// Restart the session when the mapping file changes
    #[serde(default)]
    pub watch: bool,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            input_port: None,
            output_port: None,
            channel: None,
            client_name: default_client_name(),
        }
    }
}

/// Values given on the command line; `Some` wins over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub input_port: Option<String>,
    pub output_port: Option<String>,
    pub channel: Option<i64>,
    pub mapping: Option<PathBuf>,
    pub watch: bool,
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load if the file exists, otherwise start from defaults
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if fs::try_exists(path).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that do not depend on devices being present
    pub fn validate(&self) -> Result<()> {
        if let Some(channel) = self.midi.channel {
            Channel::from_user(channel)?;
        }
        if matches!(self.midi.input_port.as_deref(), Some(name) if name.trim().is_empty()) {
            bail!("midi.input_port must not be empty");
        }
        if self.mapping.watch && self.mapping.path.is_none() {
            bail!("mapping.watch requires mapping.path");
        }
        Ok(())
    }

    pub fn merge(&mut self, overrides: Overrides) {
        if let Some(input) = overrides.input_port {
            self.midi.input_port = Some(input);
        }
        if let Some(output) = overrides.output_port {
            self.midi.output_port = Some(output);
        }
        if let Some(channel) = overrides.channel {
            self.midi.channel = Some(channel);
        }
        if let Some(path) = overrides.mapping {
            self.mapping.path = Some(path);
        }
        self.mapping.watch |= overrides.watch;
    }

    /// Resolve into a ready-to-start session config.
    ///
    /// Channel is validated before the mapping file is read, so a bad
    /// channel never costs a file open.
    pub fn session_config(&self) -> Result<SessionConfig> {
        let input = self
            .midi
            .input_port
            .clone()
            .context("No input port configured (use --input or midi.input_port)")?;
        let output = self
            .midi
            .output_port
            .clone()
            .unwrap_or_else(|| input.clone());
        let channel = self
            .midi
            .channel
            .context("No output channel configured (use --channel or midi.channel)")?;
        let channel = Channel::from_user(channel)?;

        let table = match &self.mapping.path {
            Some(path) => MappingTable::load(path)
                .with_context(|| format!("Failed to load mapping: {}", path.display()))?,
            None => {
                warn!("No mapping file configured; only the channel will be rewritten");
                MappingTable::empty()
            }
        };

        Ok(SessionConfig::new(input, output, channel, table))
    }
}

fn default_client_name() -> String {
    "cc-remap".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_full_config() {
        let config = AppConfig::parse(
            r#"
midi:
  input_port: "nanoKONTROL2"
  output_port: "Synth"
  channel: 4
mapping:
  path: "maps/nano.csv"
  watch: true
"#,
        )
        .unwrap();

        assert_eq!(config.midi.input_port.as_deref(), Some("nanoKONTROL2"));
        assert_eq!(config.midi.output_port.as_deref(), Some("Synth"));
        assert_eq!(config.midi.channel, Some(4));
        assert_eq!(config.midi.client_name, "cc-remap");
        assert_eq!(config.mapping.path, Some(PathBuf::from("maps/nano.csv")));
        assert!(config.mapping.watch);
    }

    #[test]
    fn test_invalid_channel_rejected() {
        let err = AppConfig::parse("midi:\n  channel: 17\n").unwrap_err();
        assert!(err.to_string().contains("17"));
    }

    #[test]
    fn test_watch_requires_path() {
        assert!(AppConfig::parse("mapping:\n  watch: true\n").is_err());
    }

    #[test]
    fn test_merge_overrides() {
        let mut config = AppConfig::parse("midi:\n  input_port: a\n  channel: 2\n").unwrap();
        config.merge(Overrides {
            channel: Some(10),
            output_port: Some("b".to_string()),
            ..Default::default()
        });

        assert_eq!(config.midi.input_port.as_deref(), Some("a"));
        assert_eq!(config.midi.output_port.as_deref(), Some("b"));
        assert_eq!(config.midi.channel, Some(10));
    }

    #[test]
    fn test_session_config_defaults_output_to_input() {
        let mut map = tempfile::NamedTempFile::new().unwrap();
        writeln!(map, "1,74").unwrap();

        let mut config = AppConfig::default();
        config.merge(Overrides {
            input_port: Some("pads".to_string()),
            channel: Some(1),
            mapping: Some(map.path().to_path_buf()),
            ..Default::default()
        });

        let session = config.session_config().unwrap();
        assert_eq!(session.input_port, "pads");
        assert_eq!(session.output_port, "pads");
        assert_eq!(session.channel.index(), 0);
        assert_eq!(session.table.lookup(1), Some(74));
    }

    #[test]
    fn test_session_config_requires_input_and_channel() {
        assert!(AppConfig::default().session_config().is_err());

        let mut config = AppConfig::default();
        config.midi.input_port = Some("pads".to_string());
        assert!(config.session_config().is_err());
    }

    #[test]
    fn test_session_config_rejects_bad_mapping() {
        let mut map = tempfile::NamedTempFile::new().unwrap();
        writeln!(map, "1,300").unwrap();

        let mut config = AppConfig::default();
        config.midi.input_port = Some("pads".to_string());
        config.midi.channel = Some(1);
        config.mapping.path = Some(map.path().to_path_buf());

        let err = config.session_config().unwrap_err();
        assert!(err
            .chain()
            .any(|e| matches!(
                e.downcast_ref::<crate::error::Error>(),
                Some(crate::error::Error::MalformedMapping { .. })
            )));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cc-remap.yaml");
        std::fs::write(&path, "midi:\n  input_port: pads\n  channel: 16\n").unwrap();

        let loaded = AppConfig::load(&path).await.unwrap();
        assert_eq!(loaded.midi.input_port.as_deref(), Some("pads"));
        assert_eq!(loaded.midi.channel, Some(16));
        assert_eq!(loaded.midi.client_name, "cc-remap");
    }

    #[tokio::test]
    async fn test_load_reports_bad_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cc-remap.yaml");
        std::fs::write(&path, "midi: [unclosed\n").unwrap();

        assert!(AppConfig::load(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let config = AppConfig::load_or_default("/nonexistent/cc-remap.yaml")
            .await
            .unwrap();
        assert_eq!(config, AppConfig::default());
    }
}
