//! Line discipline settings and named presets
//!
//! A preset bundles the baud rate, character size, stop bits and raw mode
//! that get applied to the device before it is opened.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Baud rate used by both the image test and the heartbeat loop
pub const DEFAULT_BAUD: u32 = 500_000;

/// Character size in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CharSize {
    Seven,
    Eight,
}

impl TryFrom<u8> for CharSize {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            7 => Ok(CharSize::Seven),
            8 => Ok(CharSize::Eight),
            other => Err(format!("unsupported character size: {} (expected 7 or 8)", other)),
        }
    }
}

impl From<CharSize> for u8 {
    fn from(size: CharSize) -> u8 {
        match size {
            CharSize::Seven => 7,
            CharSize::Eight => 8,
        }
    }
}

impl From<CharSize> for serialport::DataBits {
    fn from(size: CharSize) -> Self {
        match size {
            CharSize::Seven => serialport::DataBits::Seven,
            CharSize::Eight => serialport::DataBits::Eight,
        }
    }
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBitCount {
    One,
    Two,
}

impl TryFrom<u8> for StopBitCount {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            1 => Ok(StopBitCount::One),
            2 => Ok(StopBitCount::Two),
            other => Err(format!("unsupported stop bit count: {} (expected 1 or 2)", other)),
        }
    }
}

impl From<StopBitCount> for u8 {
    fn from(count: StopBitCount) -> u8 {
        match count {
            StopBitCount::One => 1,
            StopBitCount::Two => 2,
        }
    }
}

impl From<StopBitCount> for serialport::StopBits {
    fn from(count: StopBitCount) -> Self {
        match count {
            StopBitCount::One => serialport::StopBits::One,
            StopBitCount::Two => serialport::StopBits::Two,
        }
    }
}

/// Line discipline applied to a serial device
///
/// `None` for the character size or stop bits leaves whatever the OS
/// currently has configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSettings {
    pub baud_rate: u32,
    #[serde(default)]
    pub char_size: Option<CharSize>,
    #[serde(default)]
    pub stop_bits: Option<StopBitCount>,
    #[serde(default = "default_raw")]
    pub raw: bool,
}

fn default_raw() -> bool {
    true
}

impl LineSettings {
    /// 8 data bits, 1 stop bit, raw
    pub fn full(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            char_size: Some(CharSize::Eight),
            stop_bits: Some(StopBitCount::One),
            raw: true,
        }
    }

    /// Raw mode and baud rate only
    pub fn minimal(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            char_size: None,
            stop_bits: None,
            raw: true,
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Arguments for `stty`, in the order `stty` documents them
    pub fn stty_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        match self.char_size {
            Some(CharSize::Seven) => args.push("cs7".to_string()),
            Some(CharSize::Eight) => args.push("cs8".to_string()),
            None => {}
        }
        match self.stop_bits {
            Some(StopBitCount::One) => args.push("-cstopb".to_string()),
            Some(StopBitCount::Two) => args.push("cstopb".to_string()),
            None => {}
        }
        args.push(if self.raw { "raw" } else { "-raw" }.to_string());
        args.push(self.baud_rate.to_string());
        args
    }
}

impl fmt::Display for LineSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stty_args().join(" "))
    }
}

/// A named line setting
#[derive(Debug, Clone)]
pub struct Preset {
    pub name: &'static str,
    pub description: &'static str,
    pub settings: LineSettings,
}

static FULL_PRESET: Lazy<Preset> = Lazy::new(|| Preset {
    name: "full",
    description: "8 data bits, 1 stop bit, raw mode (image transfer)",
    settings: LineSettings::full(DEFAULT_BAUD),
});

static MINIMAL_PRESET: Lazy<Preset> = Lazy::new(|| Preset {
    name: "minimal",
    description: "raw mode only, character size and stop bits left to the OS",
    settings: LineSettings::minimal(DEFAULT_BAUD),
});

/// Registry of built-in presets
pub static PRESETS: Lazy<HashMap<&'static str, &'static Preset>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("full", &*FULL_PRESET);
    m.insert("cs8", &*FULL_PRESET);
    m.insert("image", &*FULL_PRESET);
    m.insert("minimal", &*MINIMAL_PRESET);
    m.insert("raw", &*MINIMAL_PRESET);
    m.insert("heartbeat", &*MINIMAL_PRESET);
    m
});

/// Get a preset by name
pub fn get_preset(name: &str) -> Option<&'static Preset> {
    PRESETS.get(name.to_lowercase().as_str()).copied()
}

/// Canonical preset names (aliases excluded)
pub fn preset_names() -> Vec<&'static str> {
    vec!["full", "minimal"]
}
