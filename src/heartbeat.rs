//! Heartbeat echo loop
//!
//! Relays every byte received from the device to a sink (standard output)
//! and sends the local time to the device at a bounded rate.

use crate::cancel::CancelToken;
use crate::error::{is_transient, LinkError};
use anyhow::bail;
use chrono::format::{Item, StrftimeItems};
use chrono::{Local, NaiveTime};
use log::{debug, info, warn};
use std::fmt::Write as _;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

/// Minimum spacing between two heartbeats
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// `HH:MM:SS`, zero padded, 24-hour
pub const DEFAULT_FORMAT: &str = "%H:%M:%S";

/// Time source for the loop
pub trait Clock {
    /// Monotonic time since the loop's reference point
    fn elapsed(&self) -> Duration;
    /// Local wall-clock time of day
    fn local_time(&self) -> NaiveTime;
}

/// Clock backed by `Instant` and the local timezone
#[derive(Debug, Clone)]
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn local_time(&self) -> NaiveTime {
        Local::now().time()
    }
}

/// Rate limiter deciding when the next heartbeat is due
#[derive(Debug, Clone)]
pub struct Heartbeat {
    interval: Duration,
    last_sent: Duration,
}

impl Heartbeat {
    /// The first heartbeat becomes due one interval after `started`
    pub fn new(interval: Duration, started: Duration) -> Self {
        Self {
            interval,
            last_sent: started,
        }
    }

    /// True when at least one interval has passed since the last heartbeat
    pub fn is_due(&self, now: Duration) -> bool {
        now.saturating_sub(self.last_sent) >= self.interval
    }

    /// Restart the interval at `now`; only called once a heartbeat went out
    pub fn mark_sent(&mut self, now: Duration) {
        self.last_sent = now;
    }
}

/// Render `time` with a strftime `format`
///
/// Fails for specifiers a bare time of day cannot fill, such as `%Y` or `%d`.
pub fn render_time(time: NaiveTime, format: &str) -> Result<String, std::fmt::Error> {
    let mut text = String::new();
    write!(text, "{}", time.format(format))?;
    Ok(text)
}

/// Settings of the echo loop
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    /// strftime format of the transmitted timestamp
    pub format: String,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            format: DEFAULT_FORMAT.to_string(),
        }
    }
}

impl HeartbeatConfig {
    /// Reject a zero interval and formats chrono cannot render
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval.is_zero() {
            bail!("Heartbeat interval must be at least one second");
        }
        if StrftimeItems::new(&self.format).any(|item| matches!(item, Item::Error)) {
            bail!("Invalid heartbeat format: {}", self.format);
        }
        if render_time(NaiveTime::MIN, &self.format).is_err() {
            bail!(
                "Heartbeat format {} needs a date; only time-of-day fields are available",
                self.format
            );
        }
        Ok(())
    }
}

/// Counters reported when the loop ends
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatStats {
    pub bytes_echoed: u64,
    pub heartbeats_sent: u64,
}

/// The echo loop over a link, a sink and a clock
pub struct EchoLoop<'a, L, W, C> {
    link: &'a mut L,
    sink: &'a mut W,
    clock: C,
    config: HeartbeatConfig,
    cancel: CancelToken,
}

impl<'a, L: Read + Write, W: Write, C: Clock> EchoLoop<'a, L, W, C> {
    pub fn new(link: &'a mut L, sink: &'a mut W, clock: C, config: HeartbeatConfig, cancel: CancelToken) -> Self {
        Self {
            link,
            sink,
            clock,
            config,
            cancel,
        }
    }

    /// Run until cancelled, the device disconnects or an I/O error occurs
    pub fn run(&mut self) -> Result<HeartbeatStats, LinkError> {
        let mut stats = HeartbeatStats::default();
        let mut heartbeat = Heartbeat::new(self.config.interval, self.clock.elapsed());
        let mut byte = [0u8; 1];

        info!(
            "Echo loop started (heartbeat every {}s)",
            self.config.interval.as_secs_f64()
        );

        while !self.cancel.is_cancelled() {
            match self.link.read(&mut byte) {
                Ok(0) => {
                    info!("Device closed the link");
                    return Err(LinkError::Disconnected);
                }
                Ok(_) => {
                    self.sink
                        .write_all(&byte)
                        .and_then(|_| self.sink.flush())
                        .map_err(|e| LinkError::io("echo", e))?;
                    stats.bytes_echoed += 1;
                }
                Err(e) if is_transient(&e) => {}
                Err(e) => return Err(LinkError::io("read", e)),
            }

            let now = self.clock.elapsed();
            if heartbeat.is_due(now) && self.send_heartbeat()? {
                heartbeat.mark_sent(now);
                stats.heartbeats_sent += 1;
            }
        }

        info!(
            "Echo loop stopped: {} bytes echoed, {} heartbeats sent",
            stats.bytes_echoed, stats.heartbeats_sent
        );
        Ok(stats)
    }

    /// Returns false when the write timed out; the caller retries next iteration
    fn send_heartbeat(&mut self) -> Result<bool, LinkError> {
        let stamp = render_time(self.clock.local_time(), &self.config.format).map_err(|_| {
            LinkError::io(
                "format",
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("cannot render heartbeat format {}", self.config.format),
                ),
            )
        })?;
        match self.link.write_all(stamp.as_bytes()).and_then(|_| self.link.flush()) {
            Ok(()) => {
                debug!("Heartbeat sent: {}", stamp);
                Ok(true)
            }
            Err(e) if is_transient(&e) => {
                warn!("Heartbeat {} not sent: {}", stamp, e);
                Ok(false)
            }
            Err(e) => Err(LinkError::io("write", e)),
        }
    }
}
