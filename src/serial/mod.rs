//! Serial port communication module
//!
//! This module provides functionality for:
//! - Line discipline presets (baud rate, character size, stop bits, raw mode)
//! - Configuring a device through `stty` or the native `serialport` backend
//! - Opening the configured device as a duplex byte stream
//! - Listing available serial ports

pub mod configure;
#[cfg(test)]
pub mod loopback;
pub mod port;
pub mod settings;

pub use configure::Backend;
pub use port::{PortConfig, SerialConnection};
pub use settings::{get_preset, preset_names};
