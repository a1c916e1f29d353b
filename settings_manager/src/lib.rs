//! Configuration management for earshot
//!
//! This crate handles loading, saving and accessing
//! the engine's settings file.

use analysis::ActivityConfig;
use log::{debug, info};
use room_core::{AudioProperties, Error};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Distance attenuation and transition time
    pub audio: AudioProperties,

    /// Voice activity analysis window and band
    pub analysis: ActivityConfig,

    /// Preferred audio output device (empty string means system default)
    pub audio_output_device: String,

    /// Update ticks per second
    pub frame_rate: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            audio: AudioProperties::default(),
            analysis: ActivityConfig::default(),
            audio_output_device: "".to_string(),
            frame_rate: 60,
        }
    }
}

impl Settings {
    /// Check every value before the engine uses it
    pub fn validate(&self) -> Result<(), Error> {
        self.audio.validate()?;
        self.analysis.validate()?;
        if !(1..=1000).contains(&self.frame_rate) {
            return Err(Error::Config(format!(
                "frame rate must be between 1 and 1000, got {}",
                self.frame_rate
            )));
        }
        Ok(())
    }

    /// The configured output device, if one was chosen
    pub fn output_device(&self) -> Option<&str> {
        Some(self.audio_output_device.as_str()).filter(|id| !id.is_empty())
    }
}

/// Configuration manager
pub struct ConfigManager {
    settings: Settings,
    config_file: PathBuf,
}

impl ConfigManager {
    /// Load `<config dir>/earshot/config.toml`, or defaults when it does not exist
    pub fn new() -> Result<Self, Error> {
        let mut config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Failed to determine config directory".to_string()))?;
        config_dir.push("earshot");

        Self::with_file(config_dir.join("config.toml"))
    }

    /// Create a new ConfigManager with a custom file path
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let config_file = path.as_ref().to_path_buf();
        let settings = if config_file.exists() {
            Self::load_from_file(&config_file)?
        } else {
            debug!("Config file {:?} not found, using defaults", config_file);
            Settings::default()
        };

        Ok(Self {
            settings,
            config_file,
        })
    }

    /// Load settings from a TOML file
    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Settings, Error> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Save settings to the config file
    pub fn save(&self) -> Result<(), Error> {
        let toml = toml::to_string_pretty(&self.settings)
            .map_err(|e| Error::Config(format!("Failed to serialize settings: {}", e)))?;

        if let Some(parent) = self.config_file.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        fs::write(&self.config_file, toml)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        info!("Saved config to {:?}", self.config_file);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config_file
    }

    /// Get the current settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Get a mutable reference to settings
    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.settings.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use test_log::test;

    #[test]
    fn default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.audio, AudioProperties::default());
        assert_eq!(settings.analysis.buffer_size, 1024);
        assert_eq!(settings.output_device(), None);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn save_and_load() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut config = ConfigManager::with_file(&config_path).unwrap();
        config.settings_mut().audio = AudioProperties::new(2.0, 30.0, 0.5, 0.25);
        config.settings_mut().audio_output_device = "Headphones".to_string();
        config.settings_mut().analysis.buffer_size = 2048;
        config.save().unwrap();
        assert!(config_path.exists());

        let loaded = ConfigManager::with_file(&config_path).unwrap();
        assert_eq!(loaded.settings(), config.settings());
        assert_eq!(loaded.settings().output_device(), Some("Headphones"));
    }

    #[test]
    fn file_not_found_uses_defaults() {
        let temp_dir = tempdir().unwrap();
        let config = ConfigManager::with_file(temp_dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.settings(), &Settings::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "frame_rate = 30\n").unwrap();

        let config = ConfigManager::with_file(&config_path).unwrap();
        assert_eq!(config.settings().frame_rate, 30);
        assert_eq!(config.settings().audio, AudioProperties::default());
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "frame_rate = \"fast\"\n").unwrap();

        assert!(matches!(
            ConfigManager::with_file(&config_path),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.audio.min_distance = 20.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.analysis.buffer_size = 1000;
        assert!(settings.validate().is_err());

        // Band 85..255 has no bins in a 128-sample window
        let mut settings = Settings::default();
        settings.analysis.buffer_size = 128;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.frame_rate = 0;
        assert!(settings.validate().is_err());
    }
}
