// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Unacknowledged-mode segmentation.
//!
//! Each grant is filled greedily from the SDU queue: whole SDUs are packed
//! while they fit, and the first one that does not is cut at exactly the
//! remaining room. The cut point is kept so the next grant resumes mid-SDU.
//!
//! ```text
//!   queue: [ SDU0: 150 B ][ SDU1: 30 B ]
//!   produce(102) -> PDU0 fi=10  [SDU0 0..100]
//!   produce(102) -> PDU1 fi=01  [SDU0 100..150][SDU1 0..30]
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use super::{check_capacity, BurstState, Produced, TxStats};
use crate::config::TxConfig;
use crate::error::EngineError;
use crate::flow::FlowContext;
use crate::pdu::{DataPdu, Pdu, Segment, SeqNum, Sdu};
use crate::wire::{MAX_PAYLOAD_LEN, MAX_SEGMENTS, MAX_SEGMENT_LEN};

/// UM transmit entity.
#[derive(Debug)]
pub struct UmTransmitEntity {
    config: TxConfig,
    context: Arc<FlowContext>,
    queue: VecDeque<Sdu>,
    /// Bytes of the head SDU already sent.
    head_offset: usize,
    /// Unsent bytes across the queue.
    buffered: usize,
    next_sn: SeqNum,
    burst: BurstState,
    stats: TxStats,
}

impl UmTransmitEntity {
    pub fn new(config: TxConfig, context: Arc<FlowContext>) -> Self {
        Self {
            config,
            context,
            queue: VecDeque::new(),
            head_offset: 0,
            buffered: 0,
            next_sn: 0,
            burst: BurstState::default(),
            stats: TxStats::default(),
        }
    }

    /// Queue an SDU, subject to the byte capacity.
    pub fn enqueue(&mut self, sdu: Sdu) -> Result<(), EngineError> {
        if let Err(e) = check_capacity(
            &self.context,
            self.config.capacity_bytes,
            self.buffered,
            sdu.len(),
        ) {
            self.stats.sdus_rejected += 1;
            log::debug!("[UmTransmitEntity::enqueue] rejected SDU {}: {}", sdu.sn, e);
            return Err(e);
        }
        self.buffered += sdu.len();
        self.queue.push_back(sdu);
        self.stats.sdus_enqueued += 1;
        Ok(())
    }

    /// Produce one PDU from a `budget`-byte grant.
    ///
    /// Returns `None` with nothing queued, and the sentinel when the budget
    /// leaves no room for payload.
    pub fn produce(&mut self, budget: usize) -> Option<Produced> {
        if self.queue.is_empty() {
            return None;
        }
        if budget <= self.config.header_overhead {
            self.stats.sentinels += 1;
            log::trace!(
                "[UmTransmitEntity::produce] grant of {} B too small, sentinel",
                budget
            );
            return Some(Produced::bare(Pdu::Sentinel));
        }

        let mut room = (budget - self.config.header_overhead).min(MAX_PAYLOAD_LEN);
        let mut segments = Vec::new();
        while room > 0 && segments.len() < MAX_SEGMENTS {
            let Some(head) = self.queue.front() else {
                break;
            };
            let remaining = head.len() - self.head_offset;
            let take = remaining.min(room).min(MAX_SEGMENT_LEN);
            segments.push(Segment {
                sdu_sn: head.sn,
                sdu_len: head.len() as u32,
                offset: self.head_offset as u32,
                data: head.data[self.head_offset..self.head_offset + take].to_vec(),
            });
            room -= take;
            self.buffered -= take;
            if take == remaining {
                self.queue.pop_front();
                self.head_offset = 0;
            } else {
                // a cut segment must end the PDU
                self.head_offset += take;
                break;
            }
        }

        let pdu = DataPdu::new(self.next_sn, segments).with_context(Arc::clone(&self.context));
        self.next_sn += 1;

        let transition = self.burst.after_pdu(!self.queue.is_empty());
        if transition == super::BurstTransition::Start {
            self.stats.bursts += 1;
        }
        self.stats.pdus_produced += 1;
        self.stats.bytes_produced += pdu.payload_len() as u64;
        log::trace!(
            "[UmTransmitEntity::produce] PDU {} fi={} segs={} payload={} B",
            pdu.sn,
            pdu.framing,
            pdu.segments.len(),
            pdu.payload_len()
        );
        Some(Produced::data(Pdu::Data(pdu), transition))
    }

    /// Drop every queued SDU and the pending cut point. Keeps the sequence
    /// counter.
    pub fn clear(&mut self) {
        let dropped = self.queue.len();
        self.queue.clear();
        self.head_offset = 0;
        self.buffered = 0;
        self.burst.reset();
        self.stats.sdus_cleared += dropped as u64;
        if dropped > 0 {
            log::debug!("[UmTransmitEntity::clear] dropped {} SDUs", dropped);
        }
    }

    /// Drop the most recently queued SDU unless transmission of it began.
    pub fn remove_last(&mut self) -> Option<Sdu> {
        if self.queue.len() == 1 && self.head_offset > 0 {
            return None;
        }
        let sdu = self.queue.pop_back()?;
        self.buffered -= sdu.len();
        self.stats.sdus_cleared += 1;
        Some(sdu)
    }

    pub fn reset_numbering(&mut self) {
        self.next_sn = 0;
    }

    pub fn next_sn(&self) -> SeqNum {
        self.next_sn
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn queued_sdus(&self) -> usize {
        self.queue.len()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered
    }

    pub fn burst(&self) -> BurstState {
        self.burst
    }

    pub fn set_context(&mut self, context: Arc<FlowContext>) {
        self.context = context;
    }

    pub fn stats(&self) -> &TxStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = TxStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::BurstTransition;

    fn ctx() -> Arc<FlowContext> {
        Arc::new(FlowContext::new(1, 10, 20))
    }

    fn entity() -> UmTransmitEntity {
        UmTransmitEntity::new(TxConfig::default(), ctx())
    }

    fn sdu(sn: SeqNum, len: usize) -> Sdu {
        Sdu::new(sn, (0..len).map(|i| (i % 251) as u8).collect(), ctx())
    }

    fn data(p: Produced) -> DataPdu {
        p.pdu.into_data().expect("data PDU")
    }

    #[test]
    fn test_whole_sdu() {
        let mut tx = entity();
        tx.enqueue(sdu(0, 100)).expect("enqueue");
        let pdu = data(tx.produce(200).expect("pdu"));
        assert_eq!(pdu.sn, 0);
        assert_eq!(pdu.framing.bits(), 0b00);
        assert_eq!(pdu.payload_len(), 100);
        assert!(tx.is_empty());
        assert!(tx.produce(200).is_none());
    }

    #[test]
    fn test_cut_at_grant_boundary() {
        let mut tx = entity();
        tx.enqueue(sdu(0, 150)).expect("enqueue");
        let p1 = data(tx.produce(102).expect("pdu1"));
        let p2 = data(tx.produce(102).expect("pdu2"));
        assert_eq!((p1.framing.bits(), p1.payload_len()), (0b10, 100));
        assert_eq!((p2.framing.bits(), p2.payload_len()), (0b01, 50));
        assert_eq!(p2.segments[0].offset, 100);
        assert_eq!((p1.sn, p2.sn), (0, 1));
    }

    #[test]
    fn test_packs_tail_and_next_head() {
        let mut tx = entity();
        tx.enqueue(sdu(0, 150)).expect("enqueue");
        tx.enqueue(sdu(1, 80)).expect("enqueue");
        tx.produce(102).expect("pdu1");
        let p2 = data(tx.produce(102).expect("pdu2"));
        // 50 B tail of SDU0 + 50 B head of SDU1
        assert_eq!(p2.segments.len(), 2);
        assert_eq!(p2.framing.bits(), 0b11);
        assert_eq!(p2.segments[1].sdu_sn, 1);
        assert_eq!(p2.segments[1].len(), 50);
        assert_eq!(tx.buffered_bytes(), 30);
    }

    #[test]
    fn test_middle_fragment() {
        let mut tx = entity();
        tx.enqueue(sdu(0, 300)).expect("enqueue");
        tx.produce(102).expect("head");
        let mid = data(tx.produce(102).expect("middle"));
        assert_eq!(mid.framing.bits(), 0b11);
        assert_eq!(mid.segments.len(), 1);
    }

    #[test]
    fn test_sentinel_consumes_no_sn() {
        let mut tx = entity();
        tx.enqueue(sdu(0, 10)).expect("enqueue");
        let p = tx.produce(2).expect("sentinel");
        assert!(p.pdu.is_sentinel());
        assert!(p.burst.is_none());
        assert_eq!(tx.next_sn(), 0);
        assert_eq!(data(tx.produce(12).expect("pdu")).sn, 0);
        assert_eq!(tx.stats().sentinels, 1);
    }

    #[test]
    fn test_capacity() {
        let mut tx = UmTransmitEntity::new(
            TxConfig {
                capacity_bytes: 100,
                ..TxConfig::default()
            },
            ctx(),
        );
        tx.enqueue(sdu(0, 60)).expect("fits");
        assert!(matches!(
            tx.enqueue(sdu(1, 41)),
            Err(EngineError::BufferFull { available: 40, .. })
        ));
        tx.enqueue(sdu(1, 40)).expect("exact fit");
        assert_eq!(tx.stats().sdus_rejected, 1);
    }

    #[test]
    fn test_burst_sequence() {
        let mut tx = entity();
        tx.enqueue(sdu(0, 250)).expect("enqueue");
        let bursts: Vec<_> = std::iter::from_fn(|| tx.produce(102))
            .map(|p| p.burst.expect("data"))
            .collect();
        assert_eq!(
            bursts,
            vec![
                BurstTransition::Start,
                BurstTransition::Continue,
                BurstTransition::Stop
            ]
        );
        assert_eq!(tx.stats().bursts, 1);

        // one-shot on an idle entity
        tx.enqueue(sdu(1, 5)).expect("enqueue");
        assert_eq!(tx.produce(102).and_then(|p| p.burst), Some(BurstTransition::Continue));
    }

    #[test]
    fn test_clear_keeps_sn() {
        let mut tx = entity();
        tx.enqueue(sdu(0, 150)).expect("enqueue");
        tx.produce(102).expect("pdu");
        tx.clear();
        assert!(tx.is_empty());
        assert_eq!(tx.buffered_bytes(), 0);
        tx.enqueue(sdu(1, 10)).expect("enqueue");
        let p = data(tx.produce(102).expect("pdu"));
        assert_eq!(p.sn, 1);
        assert_eq!(p.framing.bits(), 0b00);
    }

    #[test]
    fn test_remove_last_spares_partial_head() {
        let mut tx = entity();
        tx.enqueue(sdu(0, 150)).expect("enqueue");
        tx.produce(102).expect("pdu");
        assert!(tx.remove_last().is_none());
        tx.enqueue(sdu(1, 10)).expect("enqueue");
        assert_eq!(tx.remove_last().map(|s| s.sn), Some(1));
        assert_eq!(tx.buffered_bytes(), 50);
    }

    #[test]
    fn test_oversized_grant_yields_encodable_pdus() {
        let mut tx = UmTransmitEntity::new(
            TxConfig {
                capacity_bytes: 0,
                ..TxConfig::default()
            },
            ctx(),
        );
        tx.enqueue(sdu(0, 65_536)).expect("enqueue");
        tx.enqueue(sdu(1, 100)).expect("enqueue");

        let mut pdus = Vec::new();
        while let Some(p) = tx.produce(70_000) {
            pdus.push(data(p));
        }
        let mut delivered = 0;
        for pdu in &pdus {
            assert!(pdu.payload_len() <= MAX_PAYLOAD_LEN);
            let last = pdu.segments.len() - 1;
            for (i, seg) in pdu.segments.iter().enumerate() {
                let ends_sdu = seg.offset as usize + seg.len() == seg.sdu_len as usize;
                assert!(ends_sdu || i == last, "cut segment before the last position");
            }
            crate::wire::encode(&Pdu::Data(pdu.clone())).expect("encodable");
            delivered += pdu.payload_len();
        }
        assert_eq!(delivered, 65_636);
        // the first PDU stops at the payload cap instead of packing SDU1
        assert_eq!(pdus[0].segments.len(), 1);
        assert_eq!(pdus[0].payload_len(), MAX_PAYLOAD_LEN);
    }

    #[test]
    fn test_fuzz_lite_bytes_preserved() {
        let mut rng = fastrand::Rng::with_seed(42);
        for _ in 0..200 {
            let mut tx = UmTransmitEntity::new(
                TxConfig {
                    capacity_bytes: 0,
                    ..TxConfig::default()
                },
                ctx(),
            );
            let sdus: Vec<Sdu> = (0..rng.u32(1..8)).map(|sn| sdu(sn, rng.usize(0..300))).collect();
            let total: usize = sdus.iter().map(Sdu::len).sum();
            for s in sdus {
                tx.enqueue(s).expect("unbounded");
            }
            let mut produced = 0;
            let mut expected_sn = 0;
            while let Some(p) = tx.produce(rng.usize(0..200)) {
                if let Pdu::Data(d) = p.pdu {
                    assert_eq!(d.sn, expected_sn);
                    expected_sn += 1;
                    produced += d.payload_len();
                }
            }
            assert_eq!(produced, total);
        }
    }
}
