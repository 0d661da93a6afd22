//! Device-side simulators
//!
//! Stand-ins for the microcontroller at the other end of the cable: an echo
//! responder for the round-trip test and a toggler that emits `1\n`/`0\n`
//! once per interval.

use crate::cancel::CancelToken;
use crate::error::{is_transient, LinkError};
use log::{debug, info};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// Default toggle period
pub const DEFAULT_TOGGLE_INTERVAL: Duration = Duration::from_millis(1000);

/// Longest uninterrupted sleep, bounds how late cancellation is noticed
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Write every received byte straight back until cancelled or disconnected
///
/// Returns the number of bytes echoed.
pub fn run_echo<L: Read + Write>(link: &mut L, cancel: &CancelToken) -> Result<u64, LinkError> {
    let mut buf = [0u8; 256];
    let mut echoed = 0u64;

    info!("Echo peer running");
    while !cancel.is_cancelled() {
        let n = match link.read(&mut buf) {
            Ok(0) => return Err(LinkError::Disconnected),
            Ok(n) => n,
            Err(e) if is_transient(&e) => continue,
            Err(e) => return Err(LinkError::io("read", e)),
        };
        link.write_all(&buf[..n])
            .and_then(|_| link.flush())
            .map_err(|e| LinkError::io("write", e))?;
        echoed += n as u64;
        debug!("Echoed {} bytes ({} total)", n, echoed);
    }

    info!("Echo peer stopped after {} bytes", echoed);
    Ok(echoed)
}

/// Alternates between `'0'` and `'1'`, starting low so the first frame is `1`
#[derive(Debug, Clone, Default)]
pub struct Toggler {
    high: bool,
}

impl Toggler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the level and return it followed by a newline
    pub fn next_frame(&mut self) -> [u8; 2] {
        self.high = !self.high;
        [if self.high { b'1' } else { b'0' }, b'\n']
    }
}

fn sleep_unless_cancelled(duration: Duration, cancel: &CancelToken) {
    let deadline = Instant::now() + duration;
    while !cancel.is_cancelled() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

/// Send a toggle frame every `interval` until cancelled
///
/// Returns the number of frames sent.
pub fn run_toggle<W: Write>(link: &mut W, interval: Duration, cancel: &CancelToken) -> Result<u64, LinkError> {
    let mut toggler = Toggler::new();
    let mut frames = 0u64;

    info!("Toggle peer running (every {}ms)", interval.as_millis());
    loop {
        sleep_unless_cancelled(interval, cancel);
        if cancel.is_cancelled() {
            break;
        }

        let frame = toggler.next_frame();
        match link.write_all(&frame).and_then(|_| link.flush()) {
            Ok(()) => frames += 1,
            Err(e) if is_transient(&e) => debug!("Toggle frame dropped: {}", e),
            Err(e) => return Err(LinkError::io("write", e)),
        }
    }

    info!("Toggle peer stopped after {} frames", frames);
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    #[test]
    fn test_toggler_sequence() {
        let mut toggler = Toggler::new();
        assert_eq!(&toggler.next_frame(), b"1\n");
        assert_eq!(&toggler.next_frame(), b"0\n");
        assert_eq!(&toggler.next_frame(), b"1\n");
    }

    /// Cancels the token once enough bytes were written
    struct CancellingWriter {
        out: Vec<u8>,
        cancel_at: usize,
        cancel: CancelToken,
    }

    impl Write for CancellingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.out.extend_from_slice(buf);
            if self.out.len() >= self.cancel_at {
                self.cancel.cancel();
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_toggle_peer_emits_alternating_frames() {
        let cancel = CancelToken::new();
        let mut writer = CancellingWriter {
            out: Vec::new(),
            cancel_at: 8,
            cancel: cancel.clone(),
        };

        let frames = run_toggle(&mut writer, Duration::ZERO, &cancel).unwrap();

        assert_eq!(frames, 4);
        assert_eq!(writer.out, b"1\n0\n1\n0\n");
    }

    #[test]
    fn test_toggle_cancel_interrupts_sleep() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut out = Vec::new();
        let started = Instant::now();

        let frames = run_toggle(&mut out, Duration::from_secs(3600), &cancel).unwrap();

        assert_eq!(frames, 0);
        assert!(out.is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    /// Feeds fixed chunks, then closes
    struct ChunkLink {
        inbound: VecDeque<Vec<u8>>,
        outbound: Vec<u8>,
    }

    impl Read for ChunkLink {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.inbound.pop_front() {
                Some(chunk) if chunk.is_empty() => Err(io::Error::from(io::ErrorKind::TimedOut)),
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => Ok(0),
            }
        }
    }

    impl Write for ChunkLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.outbound.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_echo_peer_returns_everything_until_disconnect() {
        let mut link = ChunkLink {
            inbound: vec![b"abc".to_vec(), Vec::new(), vec![0x00, 0xff, 0x0a]].into(),
            outbound: Vec::new(),
        };

        let result = run_echo(&mut link, &CancelToken::new());

        assert!(matches!(result, Err(LinkError::Disconnected)));
        assert_eq!(link.outbound, b"abc\x00\xff\x0a");
    }
}
