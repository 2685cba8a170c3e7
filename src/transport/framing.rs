//! Wire framing for the master↔shadow TCP stream (spec §4.5): 4-byte type,
//! 4-byte big-endian length, then `length` bytes of payload.
//!
//! Grounded on big-endian readers built with
//! `byteorder::{BigEndian, ReadBytesExt}` and an incremental buffer shape
//! (accumulate into a growable buffer, consume complete frames, compact
//! what's left) rather than assuming a whole frame arrives in one `read()`.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Status;

const HEADER_LEN: usize = 8;

/// Maximum control-packet payload (spec §4.5 "≈1.5 MB for control").
pub const MAX_CONTROL_PACKET: usize = 1_500_000;

/// Maximum payload accepted on a chunk-server-facing connection (spec §4.5
/// "up to ~500 MB accepted on chunk-server side"). The master↔shadow
/// stream this module frames never needs this much, but `decode` is shared
/// so the cap is parameterized rather than hardcoded to the control limit.
pub const MAX_CHUNKSERVER_PACKET: usize = 500_000_000;

/// One complete framed message: a 4-byte type tag plus its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(msg_type: u32, payload: Vec<u8>) -> Self {
        Self { msg_type, payload }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.write_u32::<BigEndian>(self.msg_type).expect("writing to a Vec never fails");
        out.write_u32::<BigEndian>(self.payload.len() as u32).expect("writing to a Vec never fails");
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Single-byte NOP sent when the outgoing side has been idle for
/// `timeout/3` (spec §4.5).
pub const NOP_BYTE: u8 = 0;

/// Accumulates bytes read off the socket and yields complete [`Frame`]s,
/// separating "bytes arrived" from "a full message is ready to parse".
#[derive(Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_payload: usize,
}

impl FrameDecoder {
    pub fn new(max_payload: usize) -> Self {
        Self { buf: Vec::new(), max_payload }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pops the next complete frame, if the buffer holds one, leaving any
    /// trailing partial frame in place.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, Status> {
        if self.buf.len() == 1 && self.buf[0] == NOP_BYTE {
            self.buf.clear();
            return Ok(None);
        }
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let mut header = &self.buf[..HEADER_LEN];
        let msg_type = header.read_u32::<BigEndian>().map_err(|_| Status::Invalid)?;
        let len = header.read_u32::<BigEndian>().map_err(|_| Status::Invalid)? as usize;
        if len > self.max_payload {
            return Err(Status::RangeTooLarge);
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        let payload = self.buf[HEADER_LEN..HEADER_LEN + len].to_vec();
        self.buf.drain(..HEADER_LEN + len);
        Ok(Some(Frame::new(msg_type, payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_frame() {
        let frame = Frame::new(7, b"hello".to_vec());
        let mut dec = FrameDecoder::new(MAX_CONTROL_PACKET);
        dec.feed(&frame.encode());
        assert_eq!(dec.next_frame().unwrap(), Some(frame));
        assert_eq!(dec.next_frame().unwrap(), None);
    }

    #[test]
    fn reassembles_a_frame_split_across_two_reads() {
        let frame = Frame::new(1, vec![9; 100]);
        let encoded = frame.encode();
        let mut dec = FrameDecoder::new(MAX_CONTROL_PACKET);
        dec.feed(&encoded[..5]);
        assert_eq!(dec.next_frame().unwrap(), None);
        dec.feed(&encoded[5..]);
        assert_eq!(dec.next_frame().unwrap(), Some(frame));
    }

    #[test]
    fn a_lone_nop_byte_yields_no_frame() {
        let mut dec = FrameDecoder::new(MAX_CONTROL_PACKET);
        dec.feed(&[NOP_BYTE]);
        assert_eq!(dec.next_frame().unwrap(), None);
    }

    #[test]
    fn oversized_payload_is_rejected_before_buffering_it_all() {
        let mut dec = FrameDecoder::new(10);
        let mut header = Vec::new();
        header.write_u32::<BigEndian>(1).unwrap();
        header.write_u32::<BigEndian>(11).unwrap();
        dec.feed(&header);
        assert_eq!(dec.next_frame().unwrap_err(), Status::RangeTooLarge);
    }
}
