//! Configuration file (serial-echo.toml) loading
//!
//! Every field is optional; missing values fall back to the defaults the
//! tool was built around (`/dev/ttyUSB0` at 500000 baud, 5 s heartbeat).
//! Command-line flags override whatever the file sets.

use crate::heartbeat::{DEFAULT_FORMAT, DEFAULT_INTERVAL};
use crate::peer::DEFAULT_TOGGLE_INTERVAL;
use crate::serial::port::{DEFAULT_PORT, DEFAULT_TIMEOUT};
use crate::serial::settings::{get_preset, preset_names, LineSettings};
use crate::serial::Backend;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// `[port]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PortSection {
    pub path: String,
    /// Overrides the preset's baud rate
    pub baud: Option<u32>,
    pub preset: String,
    /// Explicit line settings, used instead of the preset
    pub line: Option<LineSettings>,
    pub backend: Backend,
    pub timeout_ms: u64,
}

impl Default for PortSection {
    fn default() -> Self {
        Self {
            path: DEFAULT_PORT.to_string(),
            baud: None,
            preset: "full".to_string(),
            line: None,
            backend: Backend::Native,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl PortSection {
    /// Resolve the line settings from `line`, or from the preset plus `baud`
    pub fn line_settings(&self) -> Result<LineSettings> {
        let settings = match self.line {
            Some(ref line) => line.clone(),
            None => {
                let preset = get_preset(&self.preset).ok_or_else(|| {
                    anyhow!(
                        "Unknown preset: {}. Available presets: {}",
                        self.preset,
                        preset_names().join(", ")
                    )
                })?;
                preset.settings.clone()
            }
        };
        Ok(match self.baud {
            Some(baud) => settings.with_baud_rate(baud),
            None => settings,
        })
    }
}

/// `[heartbeat]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeartbeatSection {
    pub interval_secs: u64,
    pub format: String,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL.as_secs(),
            format: DEFAULT_FORMAT.to_string(),
        }
    }
}

/// `[roundtrip]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoundTripSection {
    pub input: PathBuf,
    pub output: PathBuf,
    pub deadline_secs: Option<f64>,
    pub verify: bool,
}

impl Default for RoundTripSection {
    fn default() -> Self {
        Self {
            input: PathBuf::from("smiley.jpg"),
            output: PathBuf::from("got.jpg"),
            deadline_secs: None,
            verify: true,
        }
    }
}

/// `[peer]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PeerSection {
    pub toggle_interval_ms: u64,
}

impl Default for PeerSection {
    fn default() -> Self {
        Self {
            toggle_interval_ms: DEFAULT_TOGGLE_INTERVAL.as_millis() as u64,
        }
    }
}

/// Whole configuration file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub port: PortSection,
    pub heartbeat: HeartbeatSection,
    pub roundtrip: RoundTripSection,
    pub peer: PeerSection,
}

impl AppConfig {
    /// Parse configuration text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Invalid configuration")
    }

    /// Load the file at `path`, or the defaults when no file is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                Self::parse(&content).with_context(|| format!("In config file: {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::settings::{CharSize, StopBitCount, DEFAULT_BAUD};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.port.path, "/dev/ttyUSB0");
        assert_eq!(config.port.line_settings().unwrap(), LineSettings::full(DEFAULT_BAUD));
        assert_eq!(config.heartbeat.interval_secs, 5);
        assert_eq!(config.heartbeat.format, "%H:%M:%S");
        assert_eq!(config.peer.toggle_interval_ms, 1000);
        assert!(config.roundtrip.verify);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::parse(
            r#"
            [port]
            path = "/dev/ttyACM1"
            preset = "minimal"
            backend = "stty"

            [heartbeat]
            interval_secs = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.port.path, "/dev/ttyACM1");
        assert_eq!(config.port.backend, Backend::Stty);
        assert_eq!(config.port.line_settings().unwrap(), LineSettings::minimal(500_000));
        assert_eq!(config.heartbeat.interval_secs, 2);
        assert_eq!(config.heartbeat.format, "%H:%M:%S");
        assert_eq!(config.roundtrip.output, PathBuf::from("got.jpg"));
    }

    #[test]
    fn test_explicit_line_settings_and_baud() {
        let config = AppConfig::parse(
            r#"
            [port]
            baud = 9600

            [port.line]
            baud_rate = 115200
            char_size = 7
            stop_bits = 2
            "#,
        )
        .unwrap();

        let settings = config.port.line_settings().unwrap();
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.char_size, Some(CharSize::Seven));
        assert_eq!(settings.stop_bits, Some(StopBitCount::Two));
        assert!(settings.raw);
    }

    #[test]
    fn test_unknown_preset_and_fields_rejected() {
        let config = AppConfig::parse("[port]\npreset = \"mark-parity\"").unwrap();
        assert!(config.port.line_settings().is_err());

        assert!(AppConfig::parse("[port]\nbaud_rate = 9600").is_err());
        assert!(AppConfig::parse("[port]\nbackend = \"termios\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[roundtrip]\ninput = \"cat.png\"\ndeadline_secs = 1.5").unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.roundtrip.input, PathBuf::from("cat.png"));
        assert_eq!(config.roundtrip.deadline_secs, Some(1.5));

        assert!(AppConfig::load(Some(Path::new("/nonexistent/serial-echo.toml"))).is_err());
        assert_eq!(AppConfig::load(None).unwrap().port.preset, "full");
    }
}
