// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PDU wire encoding and decoding.
//!
//! # Wire Format
//!
//! All integers big-endian.
//!
//! ```text
//! Data PDU
//! +-------+--------+-------------+-----------+---------------------------+
//! | flags | sn     | payload_len | seg_count | [first_sn | last_sn]      |
//! | (u8)  | (u32)  | (u16)       | (u8)      | (u32, u32) if FRAG_DESC   |
//! +-------+--------+-------------+-----------+---------------------------+
//! then per segment
//! +--------+---------+--------+-------+-------+
//! | sdu_sn | sdu_len | offset | len   | bytes |
//! | (u32)  | (u32)   | (u32)  | (u16) |       |
//! +--------+---------+--------+-------+-------+
//!
//! Control PDU: flags = 0x80 | type
//!   STATUS  next_delivered:u32 | next_expected:u32 | window:u16 | bitmap
//!   MRW     seq:u32 | new_first_sn:u32
//!   MRW_ACK seq:u32 | first_sn:u32
//!
//! Sentinel: the single byte 0x20.
//! ```
//!
//! The status bitmap is `ceil(window / 8)` bytes, LSB-first, `1` = received.
//! [`decode`] never panics; every malformed input maps to a [`WireError`].

use thiserror::Error;

use crate::pdu::{ControlPdu, DataPdu, FragmentDescriptor, FramingInfo, Pdu, Segment, StatusReport};

/// Wire flags.
pub mod flags {
    /// Framing info bits.
    pub const FI_MASK: u8 = 0x03;
    /// Sentinel marker.
    pub const SENTINEL: u8 = 0x20;
    /// Fragment descriptor follows the data header.
    pub const FRAG_DESC: u8 = 0x40;
    /// Control PDU; low bits carry the type.
    pub const CONTROL: u8 = 0x80;
}

const CTRL_STATUS: u8 = 0x01;
const CTRL_MRW: u8 = 0x02;
const CTRL_MRW_ACK: u8 = 0x03;

/// Data header size without fragment descriptor.
pub const DATA_HEADER_LEN: usize = 8;
/// Fragment descriptor size.
pub const FRAG_DESC_LEN: usize = 8;
/// Per-segment header size.
pub const SEGMENT_HEADER_LEN: usize = 14;
/// Most segments one PDU can carry.
pub const MAX_SEGMENTS: usize = u8::MAX as usize;
/// Longest single segment.
pub const MAX_SEGMENT_LEN: usize = u16::MAX as usize;
/// Largest payload one data PDU can carry, all segments included.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Wire encode/decode error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// Input ends before a complete field.
    #[error("truncated PDU: needed {needed} more bytes")]
    Truncated { needed: usize },
    /// Empty input.
    #[error("empty buffer")]
    Empty,
    /// Unknown first byte.
    #[error("unknown PDU flags {0:#04x}")]
    UnknownFlags(u8),
    /// Unknown control type.
    #[error("unknown control PDU type {0:#04x}")]
    UnknownControlType(u8),
    /// Sum of segment lengths differs from the header.
    #[error("payload length mismatch: header says {declared}, segments carry {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    /// Segment extends past its SDU.
    #[error("segment exceeds declared SDU length")]
    SegmentOverflow,
    /// Fragment descriptor violates `first <= sn <= last`.
    #[error("invalid fragment descriptor")]
    InvalidFragment,
    /// Bytes left over after a complete PDU.
    #[error("{0} trailing bytes after PDU")]
    TrailingBytes(usize),
    /// PDU cannot be represented on the wire.
    #[error("PDU too large to encode: {0}")]
    TooLarge(&'static str),
}

/// Encoded size of `pdu`.
pub fn encoded_len(pdu: &Pdu) -> usize {
    match pdu {
        Pdu::Sentinel => 1,
        Pdu::Control(ControlPdu::Status(r)) => 1 + 10 + r.bitmap.len().div_ceil(8),
        Pdu::Control(_) => 1 + 8,
        Pdu::Data(d) => {
            DATA_HEADER_LEN
                + if d.fragment.is_some() { FRAG_DESC_LEN } else { 0 }
                + d
                    .segments
                    .iter()
                    .map(|s| SEGMENT_HEADER_LEN + s.len())
                    .sum::<usize>()
        }
    }
}

/// Encode `pdu` into a fresh buffer.
pub fn encode(pdu: &Pdu) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::with_capacity(encoded_len(pdu));
    encode_into(pdu, &mut buf)?;
    Ok(buf)
}

/// Append the encoding of `pdu` to `buf`.
///
/// On error `buf` may hold a partial encoding.
pub fn encode_into(pdu: &Pdu, buf: &mut Vec<u8>) -> Result<(), WireError> {
    match pdu {
        Pdu::Sentinel => buf.push(flags::SENTINEL),
        Pdu::Control(c) => encode_control(c, buf)?,
        Pdu::Data(d) => encode_data(d, buf)?,
    }
    Ok(())
}

fn encode_data(pdu: &DataPdu, buf: &mut Vec<u8>) -> Result<(), WireError> {
    if pdu.segments.len() > MAX_SEGMENTS {
        return Err(WireError::TooLarge("segment count"));
    }
    let payload_len =
        u16::try_from(pdu.payload_len()).map_err(|_| WireError::TooLarge("payload length"))?;

    let mut first = pdu.framing.bits() & flags::FI_MASK;
    if pdu.fragment.is_some() {
        first |= flags::FRAG_DESC;
    }
    buf.push(first);
    buf.extend_from_slice(&pdu.sn.to_be_bytes());
    buf.extend_from_slice(&payload_len.to_be_bytes());
    buf.push(pdu.segments.len() as u8);
    if let Some(frag) = pdu.fragment {
        buf.extend_from_slice(&frag.first_sn.to_be_bytes());
        buf.extend_from_slice(&frag.last_sn.to_be_bytes());
    }
    for seg in &pdu.segments {
        let len = u16::try_from(seg.len()).map_err(|_| WireError::TooLarge("segment length"))?;
        buf.extend_from_slice(&seg.sdu_sn.to_be_bytes());
        buf.extend_from_slice(&seg.sdu_len.to_be_bytes());
        buf.extend_from_slice(&seg.offset.to_be_bytes());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&seg.data);
    }
    Ok(())
}

fn encode_control(pdu: &ControlPdu, buf: &mut Vec<u8>) -> Result<(), WireError> {
    match pdu {
        ControlPdu::Status(r) => {
            let window =
                u16::try_from(r.bitmap.len()).map_err(|_| WireError::TooLarge("bitmap"))?;
            buf.push(flags::CONTROL | CTRL_STATUS);
            buf.extend_from_slice(&r.next_delivered.to_be_bytes());
            buf.extend_from_slice(&r.next_expected.to_be_bytes());
            buf.extend_from_slice(&window.to_be_bytes());
            for chunk in r.bitmap.chunks(8) {
                let byte = chunk
                    .iter()
                    .enumerate()
                    .fold(0u8, |acc, (i, &bit)| acc | (u8::from(bit) << i));
                buf.push(byte);
            }
        }
        ControlPdu::MoveWindow { seq, new_first_sn } => {
            buf.push(flags::CONTROL | CTRL_MRW);
            buf.extend_from_slice(&seq.to_be_bytes());
            buf.extend_from_slice(&new_first_sn.to_be_bytes());
        }
        ControlPdu::MoveWindowAck { seq, first_sn } => {
            buf.push(flags::CONTROL | CTRL_MRW_ACK);
            buf.extend_from_slice(&seq.to_be_bytes());
            buf.extend_from_slice(&first_sn.to_be_bytes());
        }
    }
    Ok(())
}

/// Bounds-checked big-endian reader.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let remaining = self.buf.len() - self.pos;
        if remaining < n {
            return Err(WireError::Truncated {
                needed: n - remaining,
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

/// Decode exactly one PDU occupying all of `buf`.
pub fn decode(buf: &[u8]) -> Result<Pdu, WireError> {
    let mut r = Reader::new(buf);
    let first = r.take(1).map_err(|_| WireError::Empty)?[0];

    let pdu = if first == flags::SENTINEL {
        Pdu::Sentinel
    } else if first & flags::CONTROL != 0 {
        Pdu::Control(decode_control(first & !flags::CONTROL, &mut r)?)
    } else if first & !(flags::FI_MASK | flags::FRAG_DESC) == 0 {
        Pdu::Data(decode_data(first, &mut r)?)
    } else {
        return Err(WireError::UnknownFlags(first));
    };

    match r.remaining() {
        0 => Ok(pdu),
        n => Err(WireError::TrailingBytes(n)),
    }
}

fn decode_data(first: u8, r: &mut Reader<'_>) -> Result<DataPdu, WireError> {
    let sn = r.u32()?;
    let payload_len = usize::from(r.u16()?);
    let seg_count = r.u8()?;

    let fragment = if first & flags::FRAG_DESC != 0 {
        let first_sn = r.u32()?;
        let last_sn = r.u32()?;
        Some(FragmentDescriptor::new(first_sn, last_sn, sn).ok_or(WireError::InvalidFragment)?)
    } else {
        None
    };

    let mut segments = Vec::with_capacity(usize::from(seg_count));
    let mut actual = 0usize;
    for _ in 0..seg_count {
        let sdu_sn = r.u32()?;
        let sdu_len = r.u32()?;
        let offset = r.u32()?;
        let len = r.u16()?;
        if u64::from(offset) + u64::from(len) > u64::from(sdu_len) {
            return Err(WireError::SegmentOverflow);
        }
        let data = r.take(usize::from(len))?.to_vec();
        actual += data.len();
        segments.push(Segment {
            sdu_sn,
            sdu_len,
            offset,
            data,
        });
    }
    if actual != payload_len {
        return Err(WireError::LengthMismatch {
            declared: payload_len,
            actual,
        });
    }

    Ok(DataPdu {
        sn,
        framing: FramingInfo::from_bits(first & flags::FI_MASK),
        segments,
        fragment,
        context: None,
    })
}

fn decode_control(kind: u8, r: &mut Reader<'_>) -> Result<ControlPdu, WireError> {
    match kind {
        CTRL_STATUS => {
            let next_delivered = r.u32()?;
            let next_expected = r.u32()?;
            let window = usize::from(r.u16()?);
            let bytes = r.take(window.div_ceil(8))?;
            let bitmap = (0..window)
                .map(|i| bytes[i / 8] & (1 << (i % 8)) != 0)
                .collect();
            Ok(ControlPdu::Status(StatusReport {
                next_delivered,
                next_expected,
                bitmap,
            }))
        }
        CTRL_MRW => Ok(ControlPdu::MoveWindow {
            seq: r.u32()?,
            new_first_sn: r.u32()?,
        }),
        CTRL_MRW_ACK => Ok(ControlPdu::MoveWindowAck {
            seq: r.u32()?,
            first_sn: r.u32()?,
        }),
        other => Err(WireError::UnknownControlType(other)),
    }
}
