//! Binary round-trip over a serial link
//!
//! Sends a file unframed, reads the same number of bytes back from the
//! device and stores them in a second file. An echoing device must return
//! the payload unchanged.

use crate::error::{is_transient, LinkError};
use anyhow::{Context, Result};
use colored::Colorize;
use crc::{Crc, CRC_32_ISO_HDLC};
use log::{debug, info, warn};
use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Start, 8 data bits and stop bit on the wire
const BITS_PER_BYTE: u64 = 10;

/// Added to every read-back deadline
const DEADLINE_SLACK: Duration = Duration::from_secs(2);

/// Bytes shown either side of a mismatch
const DUMP_WINDOW: usize = 16;

/// Configuration for one round trip
#[derive(Debug, Clone)]
pub struct RoundTripConfig {
    /// File to send
    pub input: PathBuf,
    /// File receiving the echoed bytes
    pub output: PathBuf,
    /// Read-back deadline; derived from the payload size when unset
    pub deadline: Option<Duration>,
    /// Compare the echoed bytes with the payload
    pub verify: bool,
}

impl Default for RoundTripConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("smiley.jpg"),
            output: PathBuf::from("got.jpg"),
            deadline: None,
            verify: true,
        }
    }
}

/// First differing byte between payload and echo
#[derive(Debug, Clone)]
pub struct Mismatch {
    pub offset: usize,
    pub expected_dump: Vec<String>,
    pub received_dump: Vec<String>,
}

/// Result of a completed round trip
#[derive(Debug, Clone)]
pub struct RoundTripReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub sent: usize,
    pub received: usize,
    pub input_crc: u32,
    pub output_crc: u32,
    pub elapsed: Duration,
    pub verified: bool,
    pub mismatch: Option<Mismatch>,
}

impl RoundTripReport {
    /// True when every sent byte came back unchanged
    pub fn is_identical(&self) -> bool {
        self.sent == self.received && self.input_crc == self.output_crc && self.mismatch.is_none()
    }

    /// Throughput in bytes per second, both directions counted once
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.sent as f64 / secs
        } else {
            0.0
        }
    }

    pub fn print_report(&self) {
        println!("{}", "=".repeat(60).dimmed());
        println!("{}", "--- Round Trip Summary ---".cyan().bold());
        println!("Input:    {} ({} bytes, crc32 {:08x})", self.input.display(), self.sent, self.input_crc);
        println!(
            "Output:   {} ({} bytes, crc32 {:08x})",
            self.output.display(),
            self.received,
            self.output_crc
        );
        println!("Elapsed:  {:.3}s ({:.0} B/s)", self.elapsed.as_secs_f64(), self.throughput());

        if !self.verified {
            println!("Verify:   {}", "skipped".dimmed());
        } else if self.is_identical() {
            println!("Verify:   {}", "identical".green().bold());
        } else if let Some(ref mismatch) = self.mismatch {
            println!(
                "Verify:   {} at offset {:#x}",
                "MISMATCH".red().bold(),
                mismatch.offset
            );
            println!("  {}", "expected:".yellow());
            for line in &mismatch.expected_dump {
                println!("    {}", line);
            }
            println!("  {}", "received:".yellow());
            for line in &mismatch.received_dump {
                println!("    {}", line);
            }
        }
        println!("{}", "=".repeat(60).dimmed());
    }
}

/// Read-back deadline for `len` bytes at `baud_rate`: twice the wire time plus slack
pub fn transfer_budget(len: usize, baud_rate: u32) -> Duration {
    let bits = len as u64 * BITS_PER_BYTE;
    let wire = Duration::from_secs_f64(bits as f64 / baud_rate.max(1) as f64);
    wire * 2 + DEADLINE_SLACK
}

/// Fill `buf` from `link` until it is full, the device closes or `deadline` passes
///
/// Returns the number of bytes received. Only non-transient errors fail.
pub fn read_back<R: Read>(link: &mut R, buf: &mut [u8], deadline: Duration) -> Result<usize, LinkError> {
    let started = Instant::now();
    let mut filled = 0;

    while filled < buf.len() {
        match link.read(&mut buf[filled..]) {
            Ok(0) => {
                warn!("Device closed after {} of {} bytes", filled, buf.len());
                break;
            }
            Ok(n) => {
                filled += n;
                debug!("Received {}/{} bytes", filled, buf.len());
            }
            Err(e) if is_transient(&e) => {
                if started.elapsed() >= deadline {
                    warn!(
                        "Read-back deadline of {:?} reached after {} of {} bytes",
                        deadline,
                        filled,
                        buf.len()
                    );
                    break;
                }
            }
            Err(e) => return Err(LinkError::io("read", e)),
        }
    }

    Ok(filled)
}

fn find_mismatch(expected: &[u8], received: &[u8]) -> Option<Mismatch> {
    let offset = expected
        .iter()
        .zip(received.iter())
        .position(|(a, b)| a != b)
        .or_else(|| (expected.len() != received.len()).then(|| expected.len().min(received.len())))?;

    let start = offset.saturating_sub(DUMP_WINDOW) & !0xf;
    let window = |bytes: &[u8]| -> Vec<String> {
        let end = (offset + DUMP_WINDOW).min(bytes.len());
        let slice = bytes.get(start..end).unwrap_or(&[]);
        hexdump::hexdump_iter(slice).map(|line| line.to_string()).collect()
    };

    Some(Mismatch {
        offset,
        expected_dump: window(expected),
        received_dump: window(received),
    })
}

/// Send the input file over `link` and capture the echo in the output file
pub fn run<L: Read + Write>(link: &mut L, config: &RoundTripConfig, baud_rate: u32) -> Result<RoundTripReport> {
    let payload = fs::read(&config.input)
        .with_context(|| format!("Failed to read input file: {}", config.input.display()))?;
    let input_crc = CRC32.checksum(&payload);

    info!(
        "Sending {} ({} bytes, crc32 {:08x})",
        config.input.display(),
        payload.len(),
        input_crc
    );

    let started = Instant::now();
    link.write_all(&payload).map_err(|e| LinkError::io("write", e))?;
    link.flush().map_err(|e| LinkError::io("flush", e))?;

    let mut received = vec![0u8; payload.len()];
    let count = if payload.is_empty() {
        0
    } else {
        let deadline = config
            .deadline
            .unwrap_or_else(|| transfer_budget(payload.len(), baud_rate));
        read_back(link, &mut received, deadline)?
    };
    received.truncate(count);
    let elapsed = started.elapsed();

    fs::write(&config.output, &received)
        .with_context(|| format!("Failed to write output file: {}", config.output.display()))?;
    info!("Wrote {} bytes to {}", count, config.output.display());

    if count < payload.len() {
        return Err(LinkError::ShortRead {
            expected: payload.len(),
            received: count,
        }
        .into());
    }

    Ok(RoundTripReport {
        input: config.input.clone(),
        output: config.output.clone(),
        sent: payload.len(),
        received: count,
        input_crc,
        output_crc: CRC32.checksum(&received),
        elapsed,
        verified: config.verify,
        mismatch: if config.verify {
            find_mismatch(&payload, &received)
        } else {
            None
        },
    })
}
