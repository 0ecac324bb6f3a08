use crate::protocol::mysql::packet::{packet, Packet};

use std::io;
use std::io::prelude::*;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;

const PACKET_BUFFER_SIZE: usize = 4096;
const PACKET_LARGE_BUFFER_SIZE: usize = 1048576;

/// Incremental reader turning a byte stream into MySQL [`Packet`]s.
///
/// Bytes are accumulated in an internal buffer until a whole logical packet
/// (including any 16M continuation frames) can be parsed. A clean EOF on a
/// frame boundary yields `None`; an EOF inside a frame is an error.
pub struct PacketReader<R> {
    bytes: Vec<u8>,
    start: usize,
    remaining: usize,
    pub r: R,
}

impl<R> PacketReader<R> {
    pub fn new(r: R) -> Self {
        PacketReader {
            bytes: Vec::new(),
            start: 0,
            remaining: 0,
            r,
        }
    }

    /// Attempts to parse one packet from the buffered bytes. `Ok(None)`
    /// means more input is needed.
    fn parse_buffered(&mut self) -> io::Result<Option<(u8, Packet)>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let window = &self.bytes[self.start..self.start + self.remaining];
        match packet(window) {
            Ok((rest, p)) => {
                let consumed = window.len() - rest.len();
                self.start += consumed;
                self.remaining -= consumed;
                Ok(Some(p))
            }
            Err(nom::Err::Incomplete(_)) | Err(nom::Err::Error(_)) => Ok(None),
            Err(nom::Err::Failure(ctx)) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{:?}", ctx),
            )),
        }
    }

    /// Compacts the buffer and makes room for at least `buffer_size` more
    /// bytes, returning the offset where new data should land.
    fn make_room(&mut self, buffer_size: usize) -> usize {
        self.bytes.drain(0..self.start);
        self.start = 0;
        let end = self.remaining;
        if self.bytes.len() - end < buffer_size {
            let new_len = std::cmp::max(buffer_size, end * 2);
            self.bytes.resize(new_len, 0);
        }
        end
    }

    fn eof_result(&mut self) -> io::Result<Option<(u8, Packet)>> {
        self.bytes.truncate(self.remaining);
        if self.bytes.is_empty() {
            Ok(None)
        } else {
            Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} unhandled bytes", self.bytes.len()),
            ))
        }
    }
}

impl<R: Read> PacketReader<R> {
    /// Blocking variant of [`next_async`](Self::next_async); used by codec
    /// tests running over in-memory cursors.
    pub fn next_read(&mut self) -> io::Result<Option<(u8, Packet)>> {
        loop {
            if let Some(pkt) = self.parse_buffered()? {
                return Ok(Some(pkt));
            }
            let end = self.make_room(PACKET_BUFFER_SIZE);
            let read = self.r.read(&mut self.bytes[end..])?;
            self.remaining = end + read;
            if read == 0 {
                return self.eof_result();
            }
        }
    }
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub async fn next_async(&mut self) -> io::Result<Option<(u8, Packet)>> {
        let mut buffer_size = PACKET_BUFFER_SIZE;
        loop {
            if let Some(pkt) = self.parse_buffered()? {
                return Ok(Some(pkt));
            }
            let end = self.make_room(buffer_size);
            let read = self.r.read(&mut self.bytes[end..]).await?;
            self.remaining = end + read;
            // once a packet spills over one read, grow in bigger steps.
            buffer_size = PACKET_LARGE_BUFFER_SIZE;
            if read == 0 {
                return self.eof_result();
            }
        }
    }
}
