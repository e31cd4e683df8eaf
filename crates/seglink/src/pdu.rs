// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SDU and PDU data model.
//!
//! A data PDU carries one or more [`Segment`]s, each a byte range of one SDU.
//! Only the first segment may continue an SDU begun in an earlier PDU and only
//! the last may be cut short; everything in between is a whole SDU.
//!
//! # Framing bits
//!
//! ```text
//!   bits  meaning
//!   00    PDU starts and ends on SDU boundaries
//!   10    last segment is cut (SDU continues in a later PDU)
//!   01    first segment continues an SDU from an earlier PDU
//!   11    both (middle fragment, or tail + cut head)
//! ```

use std::fmt;
use std::sync::Arc;

use crate::flow::FlowContext;

/// Sequence number (SDU main sequence or PDU sequence).
pub type SeqNum = u32;

/// Upper-layer data unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sdu {
    /// Main sequence number, assigned at enqueue.
    pub sn: SeqNum,
    pub data: Vec<u8>,
    pub context: Arc<FlowContext>,
}

impl Sdu {
    pub fn new(sn: SeqNum, data: Vec<u8>, context: Arc<FlowContext>) -> Self {
        Self { sn, data, context }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Byte range of one SDU carried inside a PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub sdu_sn: SeqNum,
    /// Total length of the SDU this segment belongs to.
    pub sdu_len: u32,
    /// Offset of `data` within the SDU.
    pub offset: u32,
    pub data: Vec<u8>,
}

impl Segment {
    /// Segment holding a complete SDU.
    pub fn whole(sdu_sn: SeqNum, data: Vec<u8>) -> Self {
        Self {
            sdu_sn,
            sdu_len: data.len() as u32,
            offset: 0,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Offset one past the last byte.
    pub fn end(&self) -> u64 {
        u64::from(self.offset) + self.data.len() as u64
    }

    /// Segment starts at the SDU's first byte.
    pub fn is_head(&self) -> bool {
        self.offset == 0
    }

    /// Segment reaches the SDU's last byte.
    pub fn is_tail(&self) -> bool {
        self.end() == u64::from(self.sdu_len)
    }

    pub fn is_whole(&self) -> bool {
        self.is_head() && self.is_tail()
    }

    /// Same SDU range, ignoring payload bytes.
    pub fn same_range(&self, other: &Segment) -> bool {
        self.sdu_sn == other.sdu_sn
            && self.sdu_len == other.sdu_len
            && self.offset == other.offset
            && self.data.len() == other.data.len()
    }
}

/// Two-bit framing descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FramingInfo {
    /// Last segment is cut; its SDU continues later.
    pub start_fragment: bool,
    /// First segment continues an earlier SDU.
    pub end_fragment: bool,
}

impl FramingInfo {
    pub const WHOLE: Self = Self {
        start_fragment: false,
        end_fragment: false,
    };

    pub fn from_bits(bits: u8) -> Self {
        Self {
            start_fragment: bits & 0b10 != 0,
            end_fragment: bits & 0b01 != 0,
        }
    }

    pub fn bits(self) -> u8 {
        (u8::from(self.start_fragment) << 1) | u8::from(self.end_fragment)
    }

    /// Derive framing from the carried segments.
    pub fn for_segments(segments: &[Segment]) -> Self {
        Self {
            start_fragment: segments.last().is_some_and(|s| !s.is_tail()),
            end_fragment: segments.first().is_some_and(|s| !s.is_head()),
        }
    }
}

impl fmt::Display for FramingInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02b}", self.bits())
    }
}

/// Position of a PDU within its SDU's run of PDUs.
///
/// Invariant: `first_sn <= fragment_sn <= last_sn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentDescriptor {
    pub first_sn: SeqNum,
    pub last_sn: SeqNum,
    pub fragment_sn: SeqNum,
}

impl FragmentDescriptor {
    /// Returns `None` when the ordering invariant does not hold.
    pub fn new(first_sn: SeqNum, last_sn: SeqNum, fragment_sn: SeqNum) -> Option<Self> {
        (first_sn <= fragment_sn && fragment_sn <= last_sn).then_some(Self {
            first_sn,
            last_sn,
            fragment_sn,
        })
    }

    pub fn whole(sn: SeqNum) -> Self {
        Self {
            first_sn: sn,
            last_sn: sn,
            fragment_sn: sn,
        }
    }

    pub fn is_whole(&self) -> bool {
        self.first_sn == self.last_sn
    }

    pub fn is_first(&self) -> bool {
        self.fragment_sn == self.first_sn
    }

    pub fn is_last(&self) -> bool {
        self.fragment_sn == self.last_sn
    }

    /// Number of PDUs the SDU spans.
    pub fn count(&self) -> u32 {
        self.last_sn - self.first_sn + 1
    }
}

/// Data PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPdu {
    pub sn: SeqNum,
    pub framing: FramingInfo,
    pub segments: Vec<Segment>,
    /// Explicit fragment position (acknowledged mode only).
    pub fragment: Option<FragmentDescriptor>,
    /// Flow context; `None` for PDUs freshly decoded off the wire.
    pub context: Option<Arc<FlowContext>>,
}

impl DataPdu {
    /// Build a PDU, deriving the framing bits from `segments`.
    pub fn new(sn: SeqNum, segments: Vec<Segment>) -> Self {
        Self {
            sn,
            framing: FramingInfo::for_segments(&segments),
            segments,
            fragment: None,
            context: None,
        }
    }

    pub fn with_fragment(mut self, fragment: FragmentDescriptor) -> Self {
        self.fragment = Some(fragment);
        self
    }

    pub fn with_context(mut self, context: Arc<FlowContext>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn payload_len(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }

    /// Grant cost: fixed header plus payload.
    pub fn nominal_len(&self, header_overhead: usize) -> usize {
        header_overhead + self.payload_len()
    }

    /// Same sequence number and same SDU ranges.
    pub fn same_content(&self, other: &DataPdu) -> bool {
        self.sn == other.sn
            && self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| a.same_range(b))
    }
}

/// Receiver feedback for selective repeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    /// Everything below is delivered.
    pub next_delivered: SeqNum,
    /// One past the highest PDU received.
    pub next_expected: SeqNum,
    /// Bit `i` set iff `next_delivered + i` is buffered.
    pub bitmap: Vec<bool>,
}

impl StatusReport {
    /// Whether the report acknowledges `sn`.
    pub fn acknowledges(&self, sn: SeqNum) -> bool {
        if sn < self.next_delivered {
            return true;
        }
        let idx = (sn - self.next_delivered) as usize;
        self.bitmap.get(idx).copied().unwrap_or(false)
    }

    /// Sequence numbers the receiver is missing (NACKs). Only the span the
    /// bitmap covers is reported.
    pub fn missing(&self) -> impl Iterator<Item = SeqNum> + '_ {
        let covered = u32::try_from(self.bitmap.len()).unwrap_or(u32::MAX);
        let end = self
            .next_expected
            .min(self.next_delivered.saturating_add(covered));
        (self.next_delivered..end).filter(move |&sn| !self.acknowledges(sn))
    }
}

/// Control PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPdu {
    Status(StatusReport),
    /// Transmitter gave up on everything below `new_first_sn`.
    MoveWindow { seq: u32, new_first_sn: SeqNum },
    /// Receiver moved its window; `first_sn` is its new `next_delivered`.
    MoveWindowAck { seq: u32, first_sn: SeqNum },
}

/// Anything a transmit side can hand to the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    Data(DataPdu),
    Control(ControlPdu),
    /// Zero-payload PDU: the grant was too small.
    Sentinel,
}

impl Pdu {
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Pdu::Sentinel)
    }

    pub fn as_data(&self) -> Option<&DataPdu> {
        match self {
            Pdu::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn into_data(self) -> Option<DataPdu> {
        match self {
            Pdu::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_control(&self) -> Option<&ControlPdu> {
        match self {
            Pdu::Control(c) => Some(c),
            _ => None,
        }
    }
}
