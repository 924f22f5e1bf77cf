//! Wire client for the coordinator ("tracker") rendezvous service.
//!
//! Every interaction opens a fresh blocking TCP connection and runs the
//! magic + identity preamble before the command byte stream. Integers are
//! 4-byte little-endian; strings are a u32-LE length followed by the bytes.

use crate::error::{ArborError, Result};
use crate::types::Rank;
use bytes::{BufMut, BytesMut};
use std::io::{Read, Write};
use std::net::TcpStream;

/// Token exchanged on connect so a worker never talks to a stranger.
pub(crate) const MAGIC: i32 = 0xff99;

/// Rank sentinel on the wire: `-1` encodes "unassigned" / "none".
pub(crate) fn encode_rank(rank: Option<Rank>) -> i32 {
    rank.map_or(-1, |r| r as i32)
}

pub(crate) fn decode_rank(raw: i32) -> Option<Rank> {
    (raw >= 0).then_some(raw as Rank)
}

#[derive(Debug)]
pub(crate) struct TrackerConn {
    stream: TcpStream,
}

impl TrackerConn {
    /// Open a coordinator connection and run the preamble: send magic,
    /// verify the echoed magic, then announce `(rank, world_size, task_id)`.
    pub fn connect(
        uri: &str,
        port: u16,
        rank: Option<Rank>,
        world_size: Option<u32>,
        task_id: &str,
    ) -> Result<Self> {
        let stream = TcpStream::connect((uri, port))?;
        let mut conn = Self { stream };
        conn.send_i32(MAGIC)?;
        let echoed = conn.recv_i32()?;
        if echoed != MAGIC {
            return Err(ArborError::MagicMismatch {
                expected: MAGIC,
                got: echoed,
            });
        }
        let mut msg = BytesMut::with_capacity(12 + task_id.len());
        msg.put_i32_le(encode_rank(rank));
        msg.put_i32_le(world_size.map_or(-1, |w| w as i32));
        msg.put_u32_le(task_id.len() as u32);
        msg.put_slice(task_id.as_bytes());
        conn.stream.write_all(&msg)?;
        Ok(conn)
    }

    pub fn send_i32(&mut self, v: i32) -> Result<()> {
        self.stream.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    pub fn recv_i32(&mut self) -> Result<i32> {
        let mut raw = [0u8; 4];
        self.stream.read_exact(&mut raw)?;
        Ok(i32::from_le_bytes(raw))
    }

    pub fn send_str(&mut self, s: &str) -> Result<()> {
        let mut msg = BytesMut::with_capacity(4 + s.len());
        msg.put_u32_le(s.len() as u32);
        msg.put_slice(s.as_bytes());
        self.stream.write_all(&msg)?;
        Ok(())
    }

    pub fn recv_str(&mut self) -> Result<String> {
        let mut raw = [0u8; 4];
        self.stream.read_exact(&mut raw)?;
        let len = u32::from_le_bytes(raw) as usize;
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|e| ArborError::Handshake(format!("non-utf8 string: {e}")))
    }
}
