//! Serial port configuration and connection management
//!
//! Opens the configured device as a duplex byte stream and lists the serial
//! ports the OS knows about.

use crate::error::LinkError;
use crate::serial::configure::{native_builder, Backend};
use crate::serial::settings::{LineSettings, DEFAULT_BAUD};
use anyhow::{Context, Result};
use colored::Colorize;
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::time::Duration;

/// Default device node of a USB-serial adapter
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// Default read timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// Anything that behaves like a serial link
pub trait Link: Read + Write + Send {}

impl<T: Read + Write + Send> Link for T {}

/// Configuration for serial port connection
#[derive(Debug, Clone)]
pub struct PortConfig {
    /// Serial port path (e.g., /dev/ttyUSB0, /dev/ttyACM0)
    pub port_path: String,
    /// Line discipline
    pub settings: LineSettings,
    /// How the device is configured and opened
    pub backend: Backend,
    /// Longest a single read waits for data
    pub timeout: Duration,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            port_path: String::from(DEFAULT_PORT),
            settings: LineSettings::full(DEFAULT_BAUD),
            backend: Backend::Native,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl PortConfig {
    pub fn new(port_path: &str) -> Self {
        Self {
            port_path: port_path.to_string(),
            ..Default::default()
        }
    }

    pub fn with_settings(mut self, settings: LineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// An open serial device, closed on drop
pub struct SerialConnection {
    inner: Box<dyn Link>,
    config: PortConfig,
}

impl SerialConnection {
    /// Apply the line discipline with the backend's configurator, then open
    pub fn configure_and_open(config: PortConfig) -> Result<Self, LinkError> {
        config
            .backend
            .configurator()
            .configure(&config.port_path, &config.settings)?;
        Self::open(config)
    }

    /// Open an already configured device for reading and writing
    pub fn open(config: PortConfig) -> Result<Self, LinkError> {
        let unavailable = |source: io::Error| LinkError::DeviceUnavailable {
            path: config.port_path.clone(),
            source,
        };

        let inner: Box<dyn Link> = match config.backend {
            Backend::Native => Box::new(
                native_builder(&config.port_path, &config.settings, config.timeout)
                    .open()
                    .map_err(|e| unavailable(e.into()))?,
            ),
            Backend::Stty => Box::new(PlainLink {
                file: open_plain(&config.port_path).map_err(unavailable)?,
                timeout: config.timeout,
            }),
        };

        debug!("Opened {} ({} backend)", config.port_path, config.backend);
        Ok(Self { inner, config })
    }

    /// Get the port configuration
    pub fn config(&self) -> &PortConfig {
        &self.config
    }
}

impl Read for SerialConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for SerialConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Drop for SerialConnection {
    fn drop(&mut self) {
        debug!("Closing {}", self.config.port_path);
    }
}

/// Open the device node without touching its line discipline
fn open_plain(path: &str) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(libc::O_NOCTTY);
    }
    options.open(path)
}

/// Device node opened as a plain file
///
/// Reads wait at most `timeout` for data and then fail with `TimedOut`, the
/// same way a `serialport` handle does.
struct PlainLink {
    file: File,
    timeout: Duration,
}

impl Read for PlainLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        #[cfg(unix)]
        wait_readable(&self.file, self.timeout)?;
        self.file.read(buf)
    }
}

impl Write for PlainLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Block in `poll(2)` until the file is readable, hung up, or `timeout` passes
#[cfg(unix)]
fn wait_readable(file: &File, timeout: Duration) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let mut fds = libc::pollfd {
        fd: file.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    // SAFETY: `fds` is a single valid pollfd borrowed for the duration of the call
    match unsafe { libc::poll(&mut fds, 1, millis) } {
        -1 => Err(io::Error::last_os_error()),
        0 => Err(io::Error::from(io::ErrorKind::TimedOut)),
        _ => Ok(()),
    }
}

/// Information about a detected serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub path: String,
    pub port_type: PortType,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PortType {
    UsbSerial,
    PciSerial,
    Bluetooth,
    Unknown,
}

impl std::fmt::Display for PortType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortType::UsbSerial => write!(f, "USB Serial"),
            PortType::PciSerial => write!(f, "PCI Serial"),
            PortType::Bluetooth => write!(f, "Bluetooth"),
            PortType::Unknown => write!(f, "Unknown"),
        }
    }
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(p: serialport::SerialPortInfo) -> Self {
        let (port_type, manufacturer, product, vid, pid) = match p.port_type {
            serialport::SerialPortType::UsbPort(info) => (
                PortType::UsbSerial,
                info.manufacturer,
                info.product,
                Some(info.vid),
                Some(info.pid),
            ),
            serialport::SerialPortType::PciPort => (PortType::PciSerial, None, None, None, None),
            serialport::SerialPortType::BluetoothPort => (PortType::Bluetooth, None, None, None, None),
            serialport::SerialPortType::Unknown => (PortType::Unknown, None, None, None, None),
        };

        PortInfo {
            path: p.port_name,
            port_type,
            manufacturer,
            product,
            vid,
            pid,
        }
    }
}

/// List all available serial ports
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().with_context(|| "Failed to enumerate serial ports")?;
    Ok(ports.into_iter().map(PortInfo::from).collect())
}

/// Print formatted list of available serial ports
pub fn print_ports() -> Result<()> {
    let ports = list_ports()?;

    if ports.is_empty() {
        println!("{}", "No serial ports found".yellow());
        println!("\n{}", "Troubleshooting tips:".cyan().bold());
        println!("  1. Connect a USB-to-serial adapter");
        println!("  2. Check if the device is recognized: ls -la /dev/ttyUSB* /dev/ttyACM*");
        println!("  3. Add your user to the 'dialout' group: sudo usermod -aG dialout $USER");
        return Ok(());
    }

    println!("{}", "Available Serial Ports:".green().bold());
    println!("{}", "=".repeat(60));

    for port in ports {
        println!("\n{}: {}", "Port".cyan(), port.path.white().bold());
        println!("  Type: {}", port.port_type);

        if let Some(ref mfg) = port.manufacturer {
            println!("  Manufacturer: {}", mfg);
        }
        if let Some(ref prod) = port.product {
            println!("  Product: {}", prod);
        }
        if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            println!("  VID:PID: {:04x}:{:04x}", vid, pid);
        }
    }

    println!("\n{}", "=".repeat(60));
    println!(
        "{}",
        "Use: serial-echo heartbeat -p <PORT> to start the echo loop".yellow()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MISSING_DEVICE: &str = "/nonexistent/ttyUSB-serial-echo-test";

    #[test]
    fn test_default_config() {
        let config = PortConfig::default();
        assert_eq!(config.port_path, "/dev/ttyUSB0");
        assert_eq!(config.settings.baud_rate, 500_000);
        assert_eq!(config.backend, Backend::Native);
    }

    #[test]
    fn test_config_builder() {
        let config = PortConfig::new("/dev/ttyACM0")
            .with_settings(LineSettings::minimal(9600))
            .with_backend(Backend::Stty)
            .with_timeout(Duration::from_secs(1));

        assert_eq!(config.port_path, "/dev/ttyACM0");
        assert_eq!(config.settings, LineSettings::minimal(9600));
        assert_eq!(config.backend, Backend::Stty);
        assert_eq!(config.timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_open_missing_device_unavailable() {
        for backend in [Backend::Native, Backend::Stty] {
            let config = PortConfig::new(MISSING_DEVICE).with_backend(backend);
            match SerialConnection::open(config) {
                Err(LinkError::DeviceUnavailable { path, .. }) => assert_eq!(path, MISSING_DEVICE),
                Err(other) => panic!("expected DeviceUnavailable, got {:?}", other),
                Ok(_) => panic!("opening {} should fail", MISSING_DEVICE),
            }
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_plain_read_times_out_on_silent_device() {
        let pty = crate::serial::loopback::Pty::open();
        let config = PortConfig::new(&pty.slave_path)
            .with_backend(Backend::Stty)
            .with_timeout(Duration::from_millis(50));
        let mut connection = SerialConnection::open(config).unwrap();

        let started = std::time::Instant::now();
        let mut buf = [0u8; 4];
        let err = connection.read(&mut buf).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[test]
    fn test_plain_read_returns_available_data() {
        let mut pty = crate::serial::loopback::Pty::open();
        let config = PortConfig::new(&pty.slave_path)
            .with_backend(Backend::Stty)
            .with_timeout(Duration::from_secs(2));
        let mut connection = SerialConnection::open(config).unwrap();

        pty.master.write_all(b"ping\n").unwrap();
        let mut buf = [0u8; 16];
        let n = connection.read(&mut buf).unwrap();

        assert_eq!(&buf[..n], b"ping\n");
    }

    #[test]
    fn test_configure_and_open_never_silently_succeeds() {
        for backend in [Backend::Native, Backend::Stty] {
            let config = PortConfig::new(MISSING_DEVICE).with_backend(backend);
            match SerialConnection::configure_and_open(config) {
                Err(LinkError::ConfigurationFailure { .. }) | Err(LinkError::DeviceUnavailable { .. }) => {}
                Err(other) => panic!("unexpected error: {:?}", other),
                Ok(_) => panic!("configuring {} should fail", MISSING_DEVICE),
            }
        }
    }
}
