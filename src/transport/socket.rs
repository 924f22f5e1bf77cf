//! Socket plumbing shared by the bootstrap handshake and the link layer.

use crate::types::Rank;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// Put a freshly handshaken peer socket into collective mode:
/// non-blocking, with TCP keep-alive probing for silent peer death.
pub(crate) fn prepare_peer(stream: &TcpStream) -> io::Result<()> {
    stream.set_nonblocking(true)?;
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(60))
        .with_interval(Duration::from_secs(10));
    socket2::SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    Ok(())
}

/// Would-block and signal interruptions are retried via the selector,
/// everything else is a fatal socket condition.
pub(crate) fn is_transient(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}

/// Blocking rank exchange run on every freshly dialed or accepted peer
/// socket: send our rank, receive the peer's.
pub(crate) fn exchange_ranks(stream: &mut TcpStream, ours: Rank) -> io::Result<Rank> {
    stream.write_all(&(ours as i32).to_le_bytes())?;
    let mut raw = [0u8; 4];
    stream.read_exact(&mut raw)?;
    Ok(i32::from_le_bytes(raw) as Rank)
}
