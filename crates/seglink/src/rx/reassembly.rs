// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-order SDU reassembly for unacknowledged mode.
//!
//! PDUs are fed strictly in sequence order (the window guarantees it). At most
//! one SDU is partially assembled at a time: a continuation segment must carry
//! the same SDU, start exactly where the partial ends, and come from the PDU
//! right after the previous contribution. Anything else means bytes were lost,
//! so the partial and the orphan segment are dropped.

use std::sync::Arc;

use super::{discard, RxStats};
use crate::error::{DiscardReason, EngineError};
use crate::event::Outbox;
use crate::flow::FlowContext;
use crate::pdu::{DataPdu, Sdu, SeqNum};

#[derive(Debug)]
struct Partial {
    sdu_sn: SeqNum,
    sdu_len: u32,
    data: Vec<u8>,
    last_pdu: SeqNum,
}

/// UM reassembler.
#[derive(Debug, Default)]
pub struct Reassembler {
    partial: Option<Partial>,
    /// Last SDU counted as dropped; a lost SDU is counted once even when
    /// several of its fragments are thrown away.
    last_dropped: Option<SeqNum>,
    /// Highest SDU delivered; enforces at-most-once.
    last_delivered: Option<SeqNum>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_partial(&self) -> bool {
        self.partial.is_some()
    }

    pub fn last_delivered(&self) -> Option<SeqNum> {
        self.last_delivered
    }

    /// Feed the next in-sequence PDU.
    pub fn consume(
        &mut self,
        pdu: DataPdu,
        context: &Arc<FlowContext>,
        stats: &mut RxStats,
        out: &mut Outbox,
    ) -> Result<(), EngineError> {
        let sn = pdu.sn;
        let count = pdu.segments.len();
        for (i, seg) in pdu.segments.into_iter().enumerate() {
            if seg.end() > u64::from(seg.sdu_len) {
                return Err(EngineError::inconsistency(
                    sn,
                    format!("segment of SDU {} overruns its declared length", seg.sdu_sn),
                ));
            }
            if i > 0 && !seg.is_head() {
                return Err(EngineError::inconsistency(
                    sn,
                    "continuation segment after the first position",
                ));
            }
            if i + 1 < count && !seg.is_tail() {
                return Err(EngineError::inconsistency(
                    sn,
                    "cut segment before the last position",
                ));
            }

            if seg.is_head() {
                self.drop_partial(context, stats, out);
                if seg.is_tail() {
                    self.deliver(seg.sdu_sn, seg.data, context, stats, out);
                } else {
                    self.partial = Some(Partial {
                        sdu_sn: seg.sdu_sn,
                        sdu_len: seg.sdu_len,
                        data: seg.data,
                        last_pdu: sn,
                    });
                }
                continue;
            }

            match self.partial.take() {
                Some(mut p)
                    if p.sdu_sn == seg.sdu_sn
                        && p.sdu_len == seg.sdu_len
                        && p.data.len() as u64 == u64::from(seg.offset)
                        && p.last_pdu.checked_add(1) == Some(sn) =>
                {
                    if p.data.len() + seg.len() > p.sdu_len as usize {
                        return Err(EngineError::inconsistency(
                            sn,
                            format!("SDU {} reassembled past its declared length", p.sdu_sn),
                        ));
                    }
                    p.data.extend_from_slice(&seg.data);
                    if p.data.len() == p.sdu_len as usize {
                        self.deliver(p.sdu_sn, p.data, context, stats, out);
                    } else {
                        p.last_pdu = sn;
                        self.partial = Some(p);
                    }
                }
                other => {
                    if let Some(p) = other {
                        self.drop_sdu(p.sdu_sn, context, stats, out);
                    }
                    self.drop_sdu(seg.sdu_sn, context, stats, out);
                }
            }
        }
        Ok(())
    }

    /// A PDU will never arrive: the partial SDU can no longer complete.
    pub fn gap(&mut self, context: &Arc<FlowContext>, stats: &mut RxStats, out: &mut Outbox) {
        self.drop_partial(context, stats, out);
    }

    fn drop_partial(&mut self, context: &Arc<FlowContext>, stats: &mut RxStats, out: &mut Outbox) {
        if let Some(p) = self.partial.take() {
            self.drop_sdu(p.sdu_sn, context, stats, out);
        }
    }

    fn drop_sdu(
        &mut self,
        sdu_sn: SeqNum,
        context: &Arc<FlowContext>,
        stats: &mut RxStats,
        out: &mut Outbox,
    ) {
        if self.last_dropped == Some(sdu_sn) {
            return;
        }
        self.last_dropped = Some(sdu_sn);
        discard(stats, out, context, DiscardReason::ReassemblyImpossible, sdu_sn);
    }

    fn deliver(
        &mut self,
        sdu_sn: SeqNum,
        data: Vec<u8>,
        context: &Arc<FlowContext>,
        stats: &mut RxStats,
        out: &mut Outbox,
    ) {
        if self.last_delivered.is_some_and(|last| sdu_sn <= last) {
            discard(stats, out, context, DiscardReason::LateDuplicate, sdu_sn);
            return;
        }
        self.last_delivered = Some(sdu_sn);
        stats.sdus_delivered += 1;
        stats.bytes_delivered += data.len() as u64;
        out.delivered.push(Sdu::new(sdu_sn, data, Arc::clone(context)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::Segment;

    fn ctx() -> Arc<FlowContext> {
        Arc::new(FlowContext::new(1, 0, 0))
    }

    fn seg(sdu_sn: SeqNum, sdu_len: u32, offset: u32, len: usize) -> Segment {
        Segment {
            sdu_sn,
            sdu_len,
            offset,
            data: (0..len).map(|i| (offset as usize + i) as u8).collect(),
        }
    }

    fn feed(r: &mut Reassembler, pdu: DataPdu, stats: &mut RxStats, out: &mut Outbox) {
        r.consume(pdu, &ctx(), stats, out).expect("consistent");
    }

    #[test]
    fn test_whole_and_packed() {
        let mut r = Reassembler::new();
        let (mut stats, mut out) = (RxStats::default(), Outbox::new());
        feed(&mut r, DataPdu::new(0, vec![seg(0, 5, 0, 5), seg(1, 3, 0, 3)]), &mut stats, &mut out);
        assert_eq!(out.delivered.len(), 2);
        assert_eq!(out.delivered[1].sn, 1);
        assert!(!r.has_partial());
    }

    #[test]
    fn test_three_fragments() {
        let mut r = Reassembler::new();
        let (mut stats, mut out) = (RxStats::default(), Outbox::new());
        feed(&mut r, DataPdu::new(0, vec![seg(0, 30, 0, 10)]), &mut stats, &mut out);
        feed(&mut r, DataPdu::new(1, vec![seg(0, 30, 10, 10)]), &mut stats, &mut out);
        assert!(out.delivered.is_empty());
        feed(&mut r, DataPdu::new(2, vec![seg(0, 30, 20, 10)]), &mut stats, &mut out);
        assert_eq!(out.delivered.len(), 1);
        let expected: Vec<u8> = (0..30).collect();
        assert_eq!(out.delivered[0].data, expected);
    }

    #[test]
    fn test_gap_drops_partial_once() {
        let mut r = Reassembler::new();
        let (mut stats, mut out) = (RxStats::default(), Outbox::new());
        feed(&mut r, DataPdu::new(0, vec![seg(0, 30, 0, 10)]), &mut stats, &mut out);
        r.gap(&ctx(), &mut stats, &mut out);
        // tail of SDU 0 arrives after the gap, then a fresh SDU
        feed(&mut r, DataPdu::new(2, vec![seg(0, 30, 20, 10), seg(1, 4, 0, 4)]), &mut stats, &mut out);
        assert_eq!(stats.reassembly_impossible, 1);
        assert_eq!(out.delivered.len(), 1);
        assert_eq!(out.delivered[0].sn, 1);
    }

    #[test]
    fn test_pdu_number_discontinuity_drops() {
        let mut r = Reassembler::new();
        let (mut stats, mut out) = (RxStats::default(), Outbox::new());
        feed(&mut r, DataPdu::new(0, vec![seg(0, 20, 0, 10)]), &mut stats, &mut out);
        // right offset, but PDU 1 was skipped
        feed(&mut r, DataPdu::new(2, vec![seg(0, 20, 10, 10)]), &mut stats, &mut out);
        assert!(out.delivered.is_empty());
        assert_eq!(stats.reassembly_impossible, 1);
    }

    #[test]
    fn test_new_head_replaces_partial() {
        let mut r = Reassembler::new();
        let (mut stats, mut out) = (RxStats::default(), Outbox::new());
        feed(&mut r, DataPdu::new(0, vec![seg(0, 20, 0, 10)]), &mut stats, &mut out);
        feed(&mut r, DataPdu::new(1, vec![seg(1, 5, 0, 5)]), &mut stats, &mut out);
        assert_eq!(stats.reassembly_impossible, 1);
        assert_eq!(out.delivered.len(), 1);
    }

    #[test]
    fn test_overrun_is_fatal() {
        let mut r = Reassembler::new();
        let (mut stats, mut out) = (RxStats::default(), Outbox::new());
        let bad = DataPdu::new(
            0,
            vec![Segment {
                sdu_sn: 0,
                sdu_len: 4,
                offset: 2,
                data: vec![0; 4],
            }],
        );
        assert!(matches!(
            r.consume(bad, &ctx(), &mut stats, &mut out),
            Err(EngineError::FragmentationInconsistency { sn: 0, .. })
        ));
    }

    #[test]
    fn test_cut_segment_in_middle_is_fatal() {
        let mut r = Reassembler::new();
        let (mut stats, mut out) = (RxStats::default(), Outbox::new());
        let bad = DataPdu::new(0, vec![seg(0, 20, 0, 10), seg(1, 5, 0, 5)]);
        assert!(r.consume(bad, &ctx(), &mut stats, &mut out).is_err());
    }

    #[test]
    fn test_at_most_once() {
        let mut r = Reassembler::new();
        let (mut stats, mut out) = (RxStats::default(), Outbox::new());
        feed(&mut r, DataPdu::new(0, vec![seg(4, 5, 0, 5)]), &mut stats, &mut out);
        feed(&mut r, DataPdu::new(1, vec![seg(4, 5, 0, 5)]), &mut stats, &mut out);
        assert_eq!(out.delivered.len(), 1);
        assert_eq!(stats.late_duplicates, 1);
    }
}
