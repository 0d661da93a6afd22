//! Applying a line discipline to a serial device
//!
//! Configuration always happens before the device is opened for I/O. Two
//! backends exist: shelling out to `stty`, and applying the settings through
//! the `serialport` crate's per-OS implementation.

use crate::error::LinkError;
use crate::serial::settings::LineSettings;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Command;
use std::str::FromStr;
use std::time::Duration;

/// Capability to apply line settings to a device path
pub trait PortConfigurator {
    fn configure(&self, device: &str, settings: &LineSettings) -> Result<(), LinkError>;
}

/// Which configuration (and matching open) strategy to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// `serialport` termios/DCB backend, reads honour a timeout
    #[default]
    Native,
    /// External `stty`, device opened as a plain file
    Stty,
}

impl Backend {
    pub fn configurator(self) -> Box<dyn PortConfigurator> {
        match self {
            Backend::Native => Box::new(NativeConfigurator),
            Backend::Stty => Box::new(SttyConfigurator::default()),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Native => write!(f, "native"),
            Backend::Stty => write!(f, "stty"),
        }
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "native" => Ok(Backend::Native),
            "stty" => Ok(Backend::Stty),
            other => Err(format!("unknown backend: {} (expected native or stty)", other)),
        }
    }
}

/// Framing fields left unset, which `serialport` fills with 8 data bits and 1 stop bit
pub fn defaulted_fields(settings: &LineSettings) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if settings.char_size.is_none() {
        fields.push("char size");
    }
    if settings.stop_bits.is_none() {
        fields.push("stop bits");
    }
    fields
}

/// `serialport` builder carrying the baud rate and whichever framing fields are set
pub(crate) fn native_builder(device: &str, settings: &LineSettings, timeout: Duration) -> serialport::SerialPortBuilder {
    let mut builder = serialport::new(device, settings.baud_rate).timeout(timeout);
    if let Some(size) = settings.char_size {
        builder = builder.data_bits(size.into());
    }
    if let Some(stop) = settings.stop_bits {
        builder = builder.stop_bits(stop.into());
    }
    builder
}

fn check_baud(device: &str, settings: &LineSettings) -> Result<(), LinkError> {
    if settings.baud_rate == 0 {
        return Err(LinkError::configuration(device, "baud rate must be non-zero"));
    }
    Ok(())
}

/// Runs `stty` against the device
#[derive(Debug, Clone)]
pub struct SttyConfigurator {
    program: String,
}

impl Default for SttyConfigurator {
    fn default() -> Self {
        Self::with_program("stty")
    }
}

impl SttyConfigurator {
    pub fn with_program(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    /// Flag selecting the device: GNU takes `-F`, BSD and macOS take `-f`
    fn device_flag() -> &'static str {
        if cfg!(any(
            target_os = "macos",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd"
        )) {
            "-f"
        } else {
            "-F"
        }
    }
}

impl PortConfigurator for SttyConfigurator {
    fn configure(&self, device: &str, settings: &LineSettings) -> Result<(), LinkError> {
        check_baud(device, settings)?;

        let args = settings.stty_args();
        debug!("{} {} {} {}", self.program, Self::device_flag(), device, args.join(" "));

        let output = Command::new(&self.program)
            .arg(Self::device_flag())
            .arg(device)
            .args(&args)
            .output()
            .map_err(|e| LinkError::configuration(device, format!("cannot run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = match stderr.trim() {
                "" => format!("{} exited with {}", self.program, output.status),
                msg => format!("{} exited with {}: {}", self.program, output.status, msg),
            };
            return Err(LinkError::configuration(device, reason));
        }

        info!("Configured {} via {} ({})", device, self.program, settings);
        Ok(())
    }
}

/// Applies the settings through `serialport` and releases the port
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeConfigurator;

impl PortConfigurator for NativeConfigurator {
    fn configure(&self, device: &str, settings: &LineSettings) -> Result<(), LinkError> {
        check_baud(device, settings)?;
        if !settings.raw {
            return Err(LinkError::configuration(
                device,
                "the native backend only supports raw mode; use the stty backend for cooked mode",
            ));
        }

        let defaulted = defaulted_fields(settings);
        if !defaulted.is_empty() {
            warn!(
                "{}: {} unset, the native backend applies 8 data bits and 1 stop bit (use --backend stty to keep the OS default)",
                device,
                defaulted.join(" and ")
            );
        }

        let port = native_builder(device, settings, Duration::from_millis(10))
            .open()
            .map_err(|e| LinkError::configuration(device, e.to_string()))?;
        drop(port);

        info!("Configured {} natively ({})", device, settings);
        Ok(())
    }
}
