//! Serial Echo
//!
//! Link tests for USB-serial adapters and the boards behind them.
//!
//! # Features
//!
//! - **Round trip**: send a binary file through a device that echoes it back
//!   and store the echo for comparison
//! - **Heartbeat**: print everything the device sends and answer with the
//!   local time (`HH:MM:SS`) at most once every 5 seconds
//! - **Peer**: play the device side (echo responder or `1`/`0` toggler)
//! - **Presets**: named line settings applied through `stty` or natively
//!
//! # Usage
//!
//! ```bash
//! # Send smiley.jpg and store the echo in got.jpg
//! serial-echo roundtrip -p /dev/ttyUSB0 -i smiley.jpg -o got.jpg
//!
//! # Echo loop with heartbeat, line set by stty in raw mode only
//! serial-echo heartbeat -p /dev/ttyUSB0 --preset minimal --backend stty
//!
//! # Act as the echoing device on a second adapter
//! serial-echo peer echo -p /dev/ttyUSB1
//!
//! # List serial ports and line presets
//! serial-echo ports
//! serial-echo presets
//! ```

mod cancel;
mod config;
mod error;
mod heartbeat;
mod peer;
mod roundtrip;
mod serial;

use anyhow::{anyhow, bail, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use cancel::{cancel_on_interrupt, CancelToken};
use config::AppConfig;
use error::LinkError;
use heartbeat::{EchoLoop, HeartbeatConfig, SystemClock};
use roundtrip::RoundTripConfig;
use serial::{configure, get_preset, preset_names, Backend, PortConfig, SerialConnection};

/// Serial Echo
///
/// Round-trip and heartbeat tests for serial links
#[derive(Parser)]
#[command(name = "serial-echo")]
#[command(author = "Prasanna Gautam")]
#[command(version = "0.1.0")]
#[command(about = "Round-trip and heartbeat tests for serial links")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file through an echoing device and save what comes back
    Roundtrip {
        #[command(flatten)]
        port: PortArgs,

        /// File to send
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// File receiving the echo
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Read-back deadline in seconds (default: derived from size and baud)
        #[arg(long)]
        deadline: Option<f64>,

        /// Do not compare the echo with the input
        #[arg(long)]
        no_verify: bool,
    },

    /// Print received bytes and send the local time periodically
    Heartbeat {
        #[command(flatten)]
        port: PortArgs,

        /// Seconds between heartbeats
        #[arg(long)]
        interval: Option<u64>,

        /// strftime format of the heartbeat
        #[arg(long)]
        format: Option<String>,
    },

    /// Simulate the device side of the link
    #[command(subcommand)]
    Peer(PeerCommands),

    /// List available serial ports
    Ports,

    /// List line setting presets
    Presets,
}

#[derive(Subcommand)]
enum PeerCommands {
    /// Write every received byte back
    Echo {
        #[command(flatten)]
        port: PortArgs,
    },

    /// Send alternating "1\n" / "0\n" frames
    Toggle {
        #[command(flatten)]
        port: PortArgs,

        /// Milliseconds between frames
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct PortArgs {
    /// Serial port path (e.g., /dev/ttyUSB0)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate (overrides the preset)
    #[arg(short, long)]
    baud: Option<u32>,

    /// Line settings preset (full, minimal)
    #[arg(long)]
    preset: Option<String>,

    /// Configuration backend: native or stty
    #[arg(long)]
    backend: Option<Backend>,

    /// Read timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

impl PortArgs {
    /// Merge over the `[port]` section of the config file
    fn resolve(&self, config: &AppConfig) -> Result<PortConfig> {
        let mut section = config.port.clone();
        if let Some(ref path) = self.port {
            section.path = path.clone();
        }
        if let Some(ref preset) = self.preset {
            section.preset = preset.clone();
            section.line = None;
        }
        if self.baud.is_some() {
            section.baud = self.baud;
        }
        if let Some(backend) = self.backend {
            section.backend = backend;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            section.timeout_ms = timeout_ms;
        }

        Ok(PortConfig::new(&section.path)
            .with_settings(section.line_settings()?)
            .with_backend(section.backend)
            .with_timeout(Duration::from_millis(section.timeout_ms)))
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize logger
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    if let Err(e) = run(cli) {
        match e.downcast_ref::<LinkError>() {
            Some(LinkError::DeviceUnavailable { .. }) => {
                eprintln!("{} {:#}", "[ERROR]".red().bold(), e);
                eprintln!("Check the port path and permissions (dialout group), or run: serial-echo ports");
            }
            _ => eprintln!("{} {:#}", "[ERROR]".red().bold(), e),
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Roundtrip {
            port,
            input,
            output,
            deadline,
            no_verify,
        } => {
            let port_config = port.resolve(&config)?;
            let settings = &config.roundtrip;
            let roundtrip_config = RoundTripConfig {
                input: input.unwrap_or_else(|| settings.input.clone()),
                output: output.unwrap_or_else(|| settings.output.clone()),
                deadline: deadline
                    .or(settings.deadline_secs)
                    .map(|secs| {
                        Duration::try_from_secs_f64(secs).map_err(|_| anyhow!("Invalid deadline: {} seconds", secs))
                    })
                    .transpose()?,
                verify: settings.verify && !no_verify,
            };
            handle_roundtrip(port_config, roundtrip_config)
        }

        Commands::Heartbeat { port, interval, format } => {
            let port_config = port.resolve(&config)?;
            let heartbeat_config = HeartbeatConfig {
                interval: Duration::from_secs(interval.unwrap_or(config.heartbeat.interval_secs)),
                format: format.unwrap_or_else(|| config.heartbeat.format.clone()),
            };
            heartbeat_config.validate()?;
            handle_heartbeat(port_config, heartbeat_config)
        }

        Commands::Peer(cmd) => handle_peer(cmd, &config),

        Commands::Ports => serial::port::print_ports(),

        Commands::Presets => {
            handle_presets();
            Ok(())
        }
    }
}

fn connect(port_config: PortConfig) -> Result<SerialConnection> {
    let connection = SerialConnection::configure_and_open(port_config)?;
    let config = connection.config();
    eprintln!(
        "{} Connected to {} ({}, {} backend)",
        "[OK]".green().bold(),
        config.port_path.white().bold(),
        config.settings,
        config.backend
    );
    Ok(connection)
}

fn handle_roundtrip(port_config: PortConfig, roundtrip_config: RoundTripConfig) -> Result<()> {
    let baud_rate = port_config.settings.baud_rate;
    let mut connection = connect(port_config)?;

    println!(
        "{} Sending {} and capturing the echo in {}",
        "[TX]".cyan().bold(),
        roundtrip_config.input.display(),
        roundtrip_config.output.display()
    );

    let report = roundtrip::run(&mut connection, &roundtrip_config, baud_rate)?;
    drop(connection);
    report.print_report();

    if report.verified && !report.is_identical() {
        bail!("Echo does not match {}", report.input.display());
    }
    Ok(())
}

fn handle_heartbeat(port_config: PortConfig, heartbeat_config: HeartbeatConfig) -> Result<()> {
    let cancel = CancelToken::new();
    cancel_on_interrupt(cancel.clone())?;

    let mut connection = connect(port_config)?;
    eprintln!("{}", "Press Ctrl+C to stop".yellow());

    let stdout = io::stdout();
    let mut sink = stdout.lock();
    let stats = EchoLoop::new(&mut connection, &mut sink, SystemClock::new(), heartbeat_config, cancel).run()?;

    eprintln!(
        "\n{} {} bytes echoed, {} heartbeats sent",
        "[OK]".green().bold(),
        stats.bytes_echoed,
        stats.heartbeats_sent
    );
    Ok(())
}

fn handle_peer(cmd: PeerCommands, config: &AppConfig) -> Result<()> {
    let cancel = CancelToken::new();
    cancel_on_interrupt(cancel.clone())?;

    match cmd {
        PeerCommands::Echo { port } => {
            let mut connection = connect(port.resolve(config)?)?;
            let echoed = peer::run_echo(&mut connection, &cancel)?;
            eprintln!("{} {} bytes echoed", "[OK]".green().bold(), echoed);
        }

        PeerCommands::Toggle { port, interval_ms } => {
            let mut connection = connect(port.resolve(config)?)?;
            let interval = Duration::from_millis(interval_ms.unwrap_or(config.peer.toggle_interval_ms));
            let frames = peer::run_toggle(&mut connection, interval, &cancel)?;
            eprintln!("{} {} frames sent", "[OK]".green().bold(), frames);
        }
    }

    Ok(())
}

fn handle_presets() {
    println!("{}", "=".repeat(60));
    println!("{}", "Line Setting Presets".cyan().bold());
    println!("{}", "=".repeat(60));

    for name in preset_names() {
        if let Some(preset) = get_preset(name) {
            println!("\n  {}: {}", preset.name.white().bold(), preset.description);
            println!("    stty: {}", preset.settings.to_string().dimmed());
            let defaulted = configure::defaulted_fields(&preset.settings);
            if !defaulted.is_empty() {
                println!(
                    "    native: {} unset, applied as 8 data bits / 1 stop bit",
                    defaulted.join(" and ")
                );
            }
        }
    }

    println!("\n{}", "=".repeat(60));
    println!(
        "Use {} to select one",
        "--preset <name>".cyan()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::settings::LineSettings;

    #[test]
    fn test_cli_parses_roundtrip() {
        let cli = Cli::try_parse_from([
            "serial-echo",
            "roundtrip",
            "-p",
            "/dev/ttyACM0",
            "-b",
            "115200",
            "--backend",
            "stty",
            "-i",
            "cat.png",
            "--no-verify",
        ])
        .unwrap();

        match cli.command {
            Commands::Roundtrip {
                port,
                input,
                no_verify,
                ..
            } => {
                assert_eq!(port.port.as_deref(), Some("/dev/ttyACM0"));
                assert_eq!(port.baud, Some(115_200));
                assert_eq!(port.backend, Some(Backend::Stty));
                assert_eq!(input, Some(PathBuf::from("cat.png")));
                assert!(no_verify);
            }
            _ => panic!("expected roundtrip command"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_backend() {
        assert!(Cli::try_parse_from(["serial-echo", "heartbeat", "--backend", "termios"]).is_err());
    }

    #[test]
    fn test_port_args_override_config() {
        let config = AppConfig::parse("[port]\npath = \"/dev/ttyS3\"\nbaud = 9600\npreset = \"minimal\"").unwrap();

        let from_file = PortArgs::default().resolve(&config).unwrap();
        assert_eq!(from_file.port_path, "/dev/ttyS3");
        assert_eq!(from_file.settings, LineSettings::minimal(9600));

        let args = PortArgs {
            port: Some("/dev/ttyUSB1".to_string()),
            preset: Some("full".to_string()),
            timeout_ms: Some(250),
            ..Default::default()
        };
        let resolved = args.resolve(&config).unwrap();
        assert_eq!(resolved.port_path, "/dev/ttyUSB1");
        // baud from the file still applies on top of the CLI preset
        assert_eq!(resolved.settings, LineSettings::full(9600));
        assert_eq!(resolved.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_unknown_preset_is_an_error() {
        let args = PortArgs {
            preset: Some("space-parity".to_string()),
            ..Default::default()
        };
        assert!(args.resolve(&AppConfig::default()).is_err());
    }
}
