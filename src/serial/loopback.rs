//! Stand-in devices for exercising the flows without hardware

use std::collections::VecDeque;
use std::io::{self, Read, Write};

/// Echoes every written byte back to the reader
///
/// An empty buffer reads as a timeout, the way a `serialport` handle does.
#[derive(Debug, Default)]
pub struct LoopbackLink {
    pending: VecDeque<u8>,
    /// Stop echoing after this many bytes
    echo_limit: Option<usize>,
    echoed: usize,
    /// Largest chunk handed out by a single read
    max_chunk: Option<usize>,
    pub written: Vec<u8>,
    pub flushes: usize,
}

impl LoopbackLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device that loses everything after `limit` bytes
    pub fn with_echo_limit(limit: usize) -> Self {
        Self {
            echo_limit: Some(limit),
            ..Self::default()
        }
    }

    /// Deliver reads in chunks of at most `max` bytes
    pub fn with_max_chunk(max: usize) -> Self {
        Self {
            max_chunk: Some(max),
            ..Self::default()
        }
    }
}

impl Read for LoopbackLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        let limit = self.max_chunk.unwrap_or(usize::MAX).min(buf.len());
        let mut n = 0;
        while n < limit {
            match self.pending.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }
}

impl Write for LoopbackLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buf);
        for &byte in buf {
            if self.echo_limit.map_or(true, |limit| self.echoed < limit) {
                self.pending.push_back(byte);
                self.echoed += 1;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

/// Pseudo-terminal pair; the slave behaves like a device node nobody answers on
#[cfg(unix)]
pub struct Pty {
    pub master: std::fs::File,
    pub slave_path: String,
}

#[cfg(unix)]
impl Pty {
    pub fn open() -> Self {
        use std::ffi::CStr;
        use std::os::unix::io::FromRawFd;

        // SAFETY: the master fd is checked before use and owned by the returned File
        unsafe {
            let fd = libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY);
            assert!(fd >= 0, "posix_openpt: {}", io::Error::last_os_error());
            let master = std::fs::File::from_raw_fd(fd);
            assert_eq!(libc::grantpt(fd), 0, "grantpt: {}", io::Error::last_os_error());
            assert_eq!(libc::unlockpt(fd), 0, "unlockpt: {}", io::Error::last_os_error());
            let name = libc::ptsname(fd);
            assert!(!name.is_null(), "ptsname: {}", io::Error::last_os_error());
            Self {
                master,
                slave_path: CStr::from_ptr(name).to_string_lossy().into_owned(),
            }
        }
    }
}
