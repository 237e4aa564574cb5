//! Application configuration
//!
//! Loaded from TOML. Every field has a default, so an empty or missing file
//! yields a working listener on the system default devices.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::backend::DeviceSelector;
use crate::constants::*;
use crate::error::{Error, Result};

const CONFIG_FILE_NAME: &str = "config.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub modem: ModemConfig,
    pub scheduler: SchedulerConfig,
}

/// Device selection and rates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Playback device index, system default when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_device: Option<usize>,

    /// Capture device index, system default when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_device: Option<usize>,

    /// Device name to use in place of the system default capture device
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_capture_name: Option<String>,

    pub base_sample_rate: u32,

    /// Added to `base_sample_rate` when opening devices
    pub sample_rate_offset: i32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            playback_device: None,
            capture_device: None,
            default_capture_name: None,
            base_sample_rate: DEFAULT_SAMPLE_RATE,
            sample_rate_offset: 0,
        }
    }
}

impl AudioConfig {
    /// Playback device choice, default when unset
    pub fn playback_selector(&self) -> DeviceSelector {
        self.playback_device.into()
    }

    /// Capture device choice, default when unset
    pub fn capture_selector(&self) -> DeviceSelector {
        self.capture_device.into()
    }
}

/// Modem engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    /// Fixed payload length in bytes
    pub payload_length: usize,

    /// Enable direct-sequence spread
    pub use_dss: bool,

    pub marker_threshold: f32,

    /// Transmit volume, 1..=100
    pub volume: u8,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            payload_length: DEFAULT_PAYLOAD_LENGTH,
            use_dss: true,
            marker_threshold: DEFAULT_MARKER_THRESHOLD,
            volume: DEFAULT_VOLUME,
        }
    }
}

/// Scheduler pacing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_hz: u32,
    pub debounce_ms: u64,
    /// Capture backlog, in frames, above which queued audio is dropped
    pub backlog_frames: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_hz: DEFAULT_TICK_HZ,
            debounce_ms: DEBOUNCE_WINDOW.as_millis() as u64,
            backlog_frames: BACKLOG_FRAMES,
        }
    }
}

impl SchedulerConfig {
    /// Get debounce window
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Period between ticks
    pub fn tick_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.tick_hz.max(1)))
    }
}

impl AppConfig {
    /// Platform config file location
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "audio-transceiver")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from a file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load `path`, or the platform default file. A missing default file
    /// yields the default configuration; a missing explicit file is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading configuration from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Write to a file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        let modem = &self.modem;
        if modem.payload_length == 0 || modem.payload_length > MAX_PAYLOAD_LENGTH {
            return Err(Error::Config(format!(
                "payload_length must be in [1, {}], got {}",
                MAX_PAYLOAD_LENGTH, modem.payload_length
            )));
        }
        if modem.volume == 0 || modem.volume > 100 {
            return Err(Error::Config(format!("volume must be in (0, 100], got {}", modem.volume)));
        }
        if modem.marker_threshold.is_nan() || modem.marker_threshold <= 0.0 {
            return Err(Error::Config("marker_threshold must be positive".into()));
        }

        let rate = self.audio.base_sample_rate as i64 + self.audio.sample_rate_offset as i64;
        if rate <= 0 {
            return Err(Error::Config(format!("effective sample rate {} is not positive", rate)));
        }

        if self.scheduler.tick_hz == 0 {
            return Err(Error::Config("tick_hz must be positive".into()));
        }
        // one frame decoded per tick has to keep up with capture
        let decodable = self.scheduler.tick_hz as i64 * SAMPLES_PER_FRAME as i64;
        if decodable < rate {
            return Err(Error::Config(format!(
                "tick_hz {} decodes {} samples/s, below the {} Hz capture rate",
                self.scheduler.tick_hz, decodable, rate
            )));
        }
        if self.scheduler.backlog_frames == 0 {
            return Err(Error::Config("backlog_frames must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.audio.base_sample_rate, 48000);
        assert_eq!(config.audio.playback_selector(), DeviceSelector::Default);
        assert_eq!(config.modem.payload_length, 16);
        assert_eq!(config.scheduler.debounce(), Duration::from_millis(500));
        assert_eq!(config.scheduler.backlog_frames, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = AppConfig::from_toml(
            r#"
            [audio]
            capture_device = 2
            sample_rate_offset = -100

            [modem]
            payload_length = 8
            use_dss = false
            "#,
        )
        .unwrap();

        assert_eq!(config.audio.capture_selector(), DeviceSelector::Index(2));
        assert_eq!(config.audio.playback_selector(), DeviceSelector::Default);
        assert_eq!(config.audio.sample_rate_offset, -100);
        assert_eq!(config.modem.payload_length, 8);
        assert!(!config.modem.use_dss);
        assert_eq!(config.scheduler.tick_hz, 1000);
        assert_eq!(config.scheduler.tick_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(AppConfig::from_toml("[modem]\npayload_length = 0").is_err());
        assert!(AppConfig::from_toml("[modem]\npayload_length = 141").is_err());
        assert!(AppConfig::from_toml("[modem]\nvolume = 0").is_err());
        assert!(AppConfig::from_toml("[scheduler]\ntick_hz = 0").is_err());
        assert!(AppConfig::from_toml("[audio]\nsample_rate_offset = -48000").is_err());
    }

    #[test]
    fn test_tick_rate_must_keep_up_with_capture() {
        // 48000 / 512 = 93.75 frames per second
        assert!(AppConfig::from_toml("[scheduler]\ntick_hz = 60").is_err());
        assert!(AppConfig::from_toml("[scheduler]\ntick_hz = 93").is_err());
        assert!(AppConfig::from_toml("[scheduler]\ntick_hz = 94").is_ok());

        let slower = "[audio]\nbase_sample_rate = 8000\n[scheduler]\ntick_hz = 16";
        assert!(AppConfig::from_toml(slower).is_ok());
    }

    #[test]
    fn test_toml_output_parses_back() {
        let mut config = AppConfig::default();
        config.audio.capture_device = Some(1);
        config.audio.default_capture_name = Some("USB Mic".into());

        let text = config.to_toml().unwrap();
        assert_eq!(AppConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let mut config = AppConfig::default();
        config.modem.volume = 80;
        config.save(&path).unwrap();

        assert_eq!(AppConfig::load_or_default(Some(&path)).unwrap(), config);
        assert!(AppConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
