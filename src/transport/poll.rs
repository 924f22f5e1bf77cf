//! Readiness multiplexing over the live link set.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// One-shot wait set, rebuilt on every iteration of a collective loop.
///
/// Enroll interest with the `watch_*` methods, block (or poll with a zero
/// timeout, for cooperative mode) in [`wait`](Self::wait), then query per-fd
/// readiness. Exception readiness (out-of-band data, `POLLPRI`) on a watched
/// socket is the peer-failure signal.
pub(crate) struct PollSet {
    fds: Vec<libc::pollfd>,
}

impl PollSet {
    pub fn new() -> Self {
        Self { fds: Vec::new() }
    }

    fn entry(&mut self, fd: RawFd) -> &mut libc::pollfd {
        let pos = match self.fds.iter().position(|p| p.fd == fd) {
            Some(pos) => pos,
            None => {
                self.fds.push(libc::pollfd {
                    fd,
                    events: 0,
                    revents: 0,
                });
                self.fds.len() - 1
            }
        };
        &mut self.fds[pos]
    }

    pub fn watch_read(&mut self, fd: RawFd) {
        self.entry(fd).events |= libc::POLLIN;
    }

    pub fn watch_write(&mut self, fd: RawFd) {
        self.entry(fd).events |= libc::POLLOUT;
    }

    pub fn watch_except(&mut self, fd: RawFd) {
        self.entry(fd).events |= libc::POLLPRI;
    }

    /// Wait until at least one enrolled condition is ready. `None` blocks
    /// indefinitely; `Some(Duration::ZERO)` returns immediately with
    /// whatever is ready right now.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        let timeout_ms: libc::c_int = match timeout {
            None => -1,
            Some(d) => d.as_millis().min(i32::MAX as u128) as libc::c_int,
        };
        loop {
            let rc = unsafe {
                libc::poll(
                    self.fds.as_mut_ptr(),
                    self.fds.len() as libc::nfds_t,
                    timeout_ms,
                )
            };
            if rc >= 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    fn revents(&self, fd: RawFd) -> libc::c_short {
        self.fds
            .iter()
            .find(|p| p.fd == fd)
            .map_or(0, |p| p.revents)
    }

    /// Readable, or carrying a pending error/hangup that the read path
    /// will classify.
    pub fn check_read(&self, fd: RawFd) -> bool {
        self.revents(fd) & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0
    }

    pub fn check_write(&self, fd: RawFd) -> bool {
        self.revents(fd) & libc::POLLOUT != 0
    }

    pub fn check_except(&self, fd: RawFd) -> bool {
        self.revents(fd) & libc::POLLPRI != 0
    }
}
