//! One peer connection and its per-collective transfer state.

use crate::transport::socket::is_transient;
use crate::types::Rank;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};

/// Non-success classification of one non-blocking transfer attempt.
/// Would-block is not represented: it advances nothing and is retried on
/// the next selector wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkIoError {
    /// Orderly peer shutdown: zero-length recv on a stream socket.
    RecvZeroLen,
    /// Fatal socket condition reported by the OS.
    SockError,
}

/// A connection to a single peer worker.
///
/// Carries the monotonic `size_read` / `size_write` cursors for the
/// collective in flight and, when the link is a tree child during an
/// Allreduce, a ring buffer that stages the child's payload between
/// arrival and reduction.
pub(crate) struct Link {
    pub rank: Rank,
    pub sock: TcpStream,
    /// Bytes received on this link since the collective started.
    pub size_read: usize,
    /// Bytes sent on this link since the collective started.
    pub size_write: usize,
    buffer: Vec<u8>,
}

impl Link {
    pub fn new(rank: Rank, sock: TcpStream) -> Self {
        Self {
            rank,
            sock,
            size_read: 0,
            size_write: 0,
            buffer: Vec::new(),
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.sock.as_raw_fd()
    }

    /// Size the ring buffer for payloads of `elem_bytes * count`: the
    /// largest whole-payload multiple that fits `target_bytes`, and never
    /// less than one payload. Idempotent when the size is unchanged.
    pub fn init_buffer(&mut self, elem_bytes: usize, count: usize, target_bytes: usize) {
        let payload = elem_bytes * count;
        let n = (target_bytes / payload).max(1) * payload;
        if self.buffer.len() != n {
            self.buffer = vec![0u8; n];
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    /// The staged segment `[start, start + len)` of the ring buffer.
    pub fn ring_slice(&self, start: usize, len: usize) -> &[u8] {
        &self.buffer[start..start + len]
    }

    /// Zero both cursors at the start of a collective.
    pub fn reset_size(&mut self) {
        self.size_read = 0;
        self.size_write = 0;
    }

    /// One non-blocking recv into the circular region past `size_read`.
    ///
    /// `min_consumed` is the backpressure cursor: bytes below it have been
    /// consumed downstream and may be overwritten, so the unconsumed span
    /// `size_read - min_consumed` is kept within the ring capacity.
    pub fn read_to_ring_buffer(&mut self, min_consumed: usize) -> Result<(), LinkIoError> {
        let cap = self.buffer.len();
        debug_assert!(min_consumed <= self.size_read);
        let gap = self.size_read - min_consumed;
        let offset = self.size_read % cap;
        let nmax = (cap - gap).min(cap - offset);
        if nmax == 0 {
            return Ok(());
        }
        match self.sock.read(&mut self.buffer[offset..offset + nmax]) {
            Ok(0) => Err(LinkIoError::RecvZeroLen),
            Ok(n) => {
                self.size_read += n;
                Ok(())
            }
            Err(e) if is_transient(e.kind()) => Ok(()),
            Err(_) => Err(LinkIoError::SockError),
        }
    }

    /// One non-blocking recv into `dst[size_read..total]`.
    pub fn read_to_array(&mut self, dst: &mut [u8], total: usize) -> Result<(), LinkIoError> {
        if self.size_read == total {
            return Ok(());
        }
        match self.sock.read(&mut dst[self.size_read..total]) {
            Ok(0) => Err(LinkIoError::RecvZeroLen),
            Ok(n) => {
                self.size_read += n;
                Ok(())
            }
            Err(e) if is_transient(e.kind()) => Ok(()),
            Err(_) => Err(LinkIoError::SockError),
        }
    }

    /// One non-blocking send of `src[size_write..upto]`.
    pub fn write_from_array(&mut self, src: &[u8], upto: usize) -> Result<(), LinkIoError> {
        if self.size_write == upto {
            return Ok(());
        }
        match self.sock.write(&src[self.size_write..upto]) {
            Ok(n) => {
                self.size_write += n;
                Ok(())
            }
            Err(e) if is_transient(e.kind()) => Ok(()),
            Err(_) => Err(LinkIoError::SockError),
        }
    }

    /// One non-blocking send of `src`, returning the bytes accepted.
    /// Used for the parent-bound stream, which is cursored by the caller.
    pub fn send(&mut self, src: &[u8]) -> Result<usize, LinkIoError> {
        match self.sock.write(src) {
            Ok(n) => Ok(n),
            Err(e) if is_transient(e.kind()) => Ok(0),
            Err(_) => Err(LinkIoError::SockError),
        }
    }

    /// One non-blocking recv into `dst`, returning the bytes delivered.
    /// A zero-length recv on a non-empty `dst` is an orderly peer shutdown.
    pub fn recv(&mut self, dst: &mut [u8]) -> Result<usize, LinkIoError> {
        match self.sock.read(dst) {
            Ok(0) if !dst.is_empty() => Err(LinkIoError::RecvZeroLen),
            Ok(n) => Ok(n),
            Err(e) if is_transient(e.kind()) => Ok(0),
            Err(_) => Err(LinkIoError::SockError),
        }
    }
}
