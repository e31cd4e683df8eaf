// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Acknowledged-mode transmitter (selective repeat).
//!
//! SDUs are cut into `fragment_size` PDUs when they enter the transmit window.
//! Each PDU carries a [`FragmentDescriptor`] so the receiver knows the full
//! extent of its SDU. Status reports acknowledge or NACK PDUs individually;
//! a PDU NACKed past `max_retransmissions` takes its whole SDU down with it,
//! and once the abandoned PDUs reach the window front the receiver is told to
//! move its window (MRW) past them.
//!
//! `produce` priority: MRW, then retransmissions (oldest first), then new PDUs.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use super::{check_capacity, BurstState, BurstTransition, Produced, TxStats};
use crate::config::AmTxConfig;
use crate::error::EngineError;
use crate::event::Outbox;
use crate::flow::FlowContext;
use crate::pdu::{ControlPdu, DataPdu, FragmentDescriptor, Pdu, Segment, SeqNum, Sdu, StatusReport};
use crate::timer::EntityTimer;
use crate::wire;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    /// Never sent.
    Fresh,
    /// Sent, awaiting acknowledgement.
    Outstanding,
    /// Queued for retransmission.
    Nacked,
    Acked,
    /// Given up; covered by MRW.
    Abandoned,
}

#[derive(Debug)]
struct TxPdu {
    pdu: DataPdu,
    state: TxState,
    last_sent: Duration,
    retransmissions: u32,
}

#[derive(Debug, Clone, Copy)]
struct PendingMrw {
    seq: u32,
    new_first_sn: SeqNum,
    /// `None` until first sent or after a timeout asks for a resend.
    last_sent: Option<Duration>,
}

/// AM transmit entity.
#[derive(Debug)]
pub struct AmTransmitEntity {
    config: AmTxConfig,
    context: Arc<FlowContext>,
    queue: VecDeque<Sdu>,
    queued_bytes: usize,
    /// Slot `i` holds PDU `first_unacked + i`.
    window: VecDeque<TxPdu>,
    first_unacked: SeqNum,
    next_sn: SeqNum,
    retransmit_queue: VecDeque<SeqNum>,
    mrw: Option<PendingMrw>,
    mrw_seq: u32,
    timer: EntityTimer,
    burst: BurstState,
    stats: TxStats,
}

impl AmTransmitEntity {
    pub fn new(config: AmTxConfig, context: Arc<FlowContext>) -> Self {
        Self {
            config,
            context,
            queue: VecDeque::new(),
            queued_bytes: 0,
            window: VecDeque::new(),
            first_unacked: 0,
            next_sn: 0,
            retransmit_queue: VecDeque::new(),
            mrw: None,
            mrw_seq: 0,
            timer: EntityTimer::new(),
            burst: BurstState::default(),
            stats: TxStats::default(),
        }
    }

    /// Queue an SDU. Rejects SDUs larger than a full transmit window.
    pub fn enqueue(&mut self, sdu: Sdu) -> Result<(), EngineError> {
        let max = self.config.max_sdu_len();
        if sdu.len() > max {
            self.stats.sdus_rejected += 1;
            return Err(EngineError::SduTooLarge {
                flow: self.context.flow_id,
                len: sdu.len(),
                max,
            });
        }
        if let Err(e) = check_capacity(
            &self.context,
            self.config.capacity_bytes,
            self.queued_bytes,
            sdu.len(),
        ) {
            self.stats.sdus_rejected += 1;
            log::debug!("[AmTransmitEntity::enqueue] rejected SDU {}: {}", sdu.sn, e);
            return Err(e);
        }
        self.queued_bytes += sdu.len();
        self.queue.push_back(sdu);
        self.stats.sdus_enqueued += 1;
        Ok(())
    }

    fn fragments_for(&self, len: usize) -> u32 {
        len.div_ceil(self.config.fragment_size).max(1) as u32
    }

    /// Move queued SDUs into the transmit window while they fit.
    fn admit(&mut self) {
        while let Some(sdu) = self.queue.front() {
            let count = self.fragments_for(sdu.len());
            let limit = u64::from(self.window_base()) + u64::from(self.config.window_size);
            if u64::from(self.next_sn) + u64::from(count) > limit {
                break;
            }
            let Some(sdu) = self.queue.pop_front() else {
                break;
            };
            self.queued_bytes -= sdu.len();

            let first_sn = self.next_sn;
            let last_sn = first_sn + count - 1;
            let sdu_len = sdu.len() as u32;
            for i in 0..count {
                let start = i as usize * self.config.fragment_size;
                let end = (start + self.config.fragment_size).min(sdu.len());
                let fragment = FragmentDescriptor {
                    first_sn,
                    last_sn,
                    fragment_sn: first_sn + i,
                };
                let segment = Segment {
                    sdu_sn: sdu.sn,
                    sdu_len,
                    offset: start as u32,
                    data: sdu.data[start..end].to_vec(),
                };
                let pdu = DataPdu::new(first_sn + i, vec![segment])
                    .with_fragment(fragment)
                    .with_context(Arc::clone(&self.context));
                self.window.push_back(TxPdu {
                    pdu,
                    state: TxState::Fresh,
                    last_sent: Duration::ZERO,
                    retransmissions: 0,
                });
            }
            self.next_sn = last_sn + 1;
        }
    }

    /// First PDU of the SDU at the window front. The receiver cannot have
    /// delivered past it, so new PDUs are bounded from here.
    fn window_base(&self) -> SeqNum {
        self.window
            .front()
            .and_then(|p| p.pdu.fragment)
            .map_or(self.first_unacked, |f| f.first_sn)
    }

    fn slot(&self, sn: SeqNum) -> Option<usize> {
        let idx = sn.checked_sub(self.first_unacked)? as usize;
        (idx < self.window.len()).then_some(idx)
    }

    fn has_fresh(&self) -> bool {
        self.window.iter().any(|p| p.state == TxState::Fresh)
    }

    fn has_outstanding(&self) -> bool {
        self.window
            .iter()
            .any(|p| matches!(p.state, TxState::Outstanding | TxState::Nacked))
    }

    fn arm_timer(&mut self, out: &mut Outbox) {
        if let Some(req) = self.timer.arm(self.config.retransmit_timeout()) {
            out.timers.push(req);
        }
    }

    /// Produce one PDU from a `budget`-byte grant.
    pub fn produce(&mut self, budget: usize, now: Duration, out: &mut Outbox) -> Option<Produced> {
        self.admit();

        if let Some(mrw) = self.mrw.filter(|m| m.last_sent.is_none()) {
            let pdu = Pdu::Control(ControlPdu::MoveWindow {
                seq: mrw.seq,
                new_first_sn: mrw.new_first_sn,
            });
            if wire::encoded_len(&pdu) > budget {
                self.stats.sentinels += 1;
                return Some(Produced::bare(Pdu::Sentinel));
            }
            self.mrw = Some(PendingMrw {
                last_sent: Some(now),
                ..mrw
            });
            self.stats.move_window_sent += 1;
            self.arm_timer(out);
            log::debug!(
                "[AmTransmitEntity::produce] MRW seq={} new_first_sn={}",
                mrw.seq,
                mrw.new_first_sn
            );
            return Some(Produced::bare(pdu));
        }

        while let Some(&sn) = self.retransmit_queue.front() {
            let Some(idx) = self.slot(sn).filter(|&i| self.window[i].state == TxState::Nacked)
            else {
                self.retransmit_queue.pop_front();
                continue;
            };
            if self.window[idx].pdu.nominal_len(self.config.header_overhead) > budget {
                self.stats.sentinels += 1;
                return Some(Produced::bare(Pdu::Sentinel));
            }
            self.retransmit_queue.pop_front();
            let entry = &mut self.window[idx];
            entry.state = TxState::Outstanding;
            entry.last_sent = now;
            entry.retransmissions += 1;
            let pdu = entry.pdu.clone();
            self.stats.retransmissions += 1;
            self.arm_timer(out);
            log::trace!(
                "[AmTransmitEntity::produce] retransmit PDU {} (#{})",
                sn,
                self.window[idx].retransmissions
            );
            return Some(Produced::bare(Pdu::Data(pdu)));
        }

        let idx = self.window.iter().position(|p| p.state == TxState::Fresh)?;
        if self.window[idx].pdu.nominal_len(self.config.header_overhead) > budget {
            self.stats.sentinels += 1;
            return Some(Produced::bare(Pdu::Sentinel));
        }
        let entry = &mut self.window[idx];
        entry.state = TxState::Outstanding;
        entry.last_sent = now;
        let pdu = entry.pdu.clone();
        self.stats.pdus_produced += 1;
        self.stats.bytes_produced += pdu.payload_len() as u64;
        self.arm_timer(out);

        self.admit();
        let backlogged = !self.queue.is_empty() || self.has_fresh();
        let transition = self.burst.after_pdu(backlogged);
        if transition == BurstTransition::Start {
            self.stats.bursts += 1;
        }
        log::trace!(
            "[AmTransmitEntity::produce] PDU {} fragment {}..={}",
            pdu.sn,
            pdu.fragment.map_or(pdu.sn, |f| f.first_sn),
            pdu.fragment.map_or(pdu.sn, |f| f.last_sn)
        );
        Some(Produced::data(Pdu::Data(pdu), transition))
    }

    /// NACK handling: queue for retransmission, or abandon the SDU once the
    /// retransmission budget is spent.
    fn nack(&mut self, sn: SeqNum) {
        let Some(idx) = self.slot(sn) else {
            return;
        };
        if self.window[idx].state != TxState::Outstanding {
            return;
        }
        if self.window[idx].retransmissions >= self.config.max_retransmissions {
            self.abandon_sdu(idx);
        } else {
            self.window[idx].state = TxState::Nacked;
            self.retransmit_queue.push_back(sn);
        }
    }

    fn abandon_sdu(&mut self, idx: usize) {
        let Some(frag) = self.window[idx].pdu.fragment else {
            return;
        };
        let sdu_sn = self.window[idx].pdu.segments.first().map_or(0, |s| s.sdu_sn);
        for sn in frag.first_sn..=frag.last_sn {
            if let Some(i) = self.slot(sn) {
                let entry = &mut self.window[i];
                if entry.state != TxState::Acked {
                    entry.state = TxState::Abandoned;
                }
            }
        }
        self.stats.sdus_abandoned += 1;
        log::debug!(
            "[AmTransmitEntity::abandon_sdu] SDU {} (PDUs {}..={}) exceeded {} retransmissions",
            sdu_sn,
            frag.first_sn,
            frag.last_sn,
            self.config.max_retransmissions
        );
    }

    /// Slide acknowledged/abandoned PDUs out of the window front; queue an
    /// MRW when abandoned ones were among them.
    fn slide(&mut self) {
        let mut abandoned_any = false;
        while let Some(front) = self.window.front() {
            match front.state {
                TxState::Acked => {}
                TxState::Abandoned => abandoned_any = true,
                _ => break,
            }
            self.window.pop_front();
            self.first_unacked += 1;
        }
        if abandoned_any {
            self.mrw_seq = self.mrw_seq.wrapping_add(1);
            self.mrw = Some(PendingMrw {
                seq: self.mrw_seq,
                new_first_sn: self.first_unacked,
                last_sent: None,
            });
        }
    }

    /// Apply a status report from the peer receiver.
    ///
    /// A NACK only counts when the same report acknowledges a PDU sent no
    /// earlier than the NACKed one, so a report that crossed a
    /// retransmission on the way back cannot trigger another one.
    pub fn on_status_report(&mut self, report: &StatusReport, out: &mut Outbox) {
        let newest_received = self
            .window
            .iter()
            .filter(|p| p.state != TxState::Fresh && report.acknowledges(p.pdu.sn))
            .map(|p| p.last_sent)
            .max();
        let acked_upto = report.next_delivered.min(self.next_sn);
        for sn in self.first_unacked..acked_upto {
            if let Some(i) = self.slot(sn) {
                if self.window[i].state != TxState::Abandoned {
                    self.window[i].state = TxState::Acked;
                }
            }
        }
        for (i, &received) in report.bitmap.iter().enumerate() {
            let sn = report.next_delivered.saturating_add(i as u32);
            if received {
                if let Some(idx) = self.slot(sn) {
                    if self.window[idx].state != TxState::Abandoned {
                        self.window[idx].state = TxState::Acked;
                    }
                }
            }
        }
        let next_sn = self.next_sn;
        for sn in report.missing().take_while(|&sn| sn < next_sn) {
            let Some(idx) = self.slot(sn) else {
                continue;
            };
            if newest_received.is_some_and(|t| t >= self.window[idx].last_sent) {
                self.nack(sn);
            } else if self.window[idx].state == TxState::Outstanding {
                self.stats.stale_nacks += 1;
            }
        }
        self.slide();
        self.admit();

        if !self.has_outstanding() && self.mrw.is_none() {
            self.timer.cancel();
        } else if self.has_outstanding() {
            self.arm_timer(out);
        }
    }

    /// Receiver confirmed an MRW.
    pub fn on_move_window_ack(&mut self, seq: u32, first_sn: SeqNum) {
        if let Some(mrw) = self.mrw {
            if mrw.seq == seq || first_sn >= mrw.new_first_sn {
                log::debug!(
                    "[AmTransmitEntity::on_move_window_ack] MRW seq={} confirmed at {}",
                    seq,
                    first_sn
                );
                self.mrw = None;
            }
        }
    }

    /// Retransmission timer fired.
    pub fn on_timer(&mut self, generation: u64, now: Duration, out: &mut Outbox) {
        if !self.timer.fire(generation) {
            return;
        }
        let timeout = self.config.retransmit_timeout();
        let stale: Vec<SeqNum> = self
            .window
            .iter()
            .filter(|p| p.state == TxState::Outstanding && now.saturating_sub(p.last_sent) >= timeout)
            .map(|p| p.pdu.sn)
            .collect();
        if !stale.is_empty() {
            log::debug!(
                "[AmTransmitEntity::on_timer] {} PDUs timed out, first {}",
                stale.len(),
                stale[0]
            );
        }
        for sn in stale {
            self.nack(sn);
        }
        if let Some(mrw) = self.mrw.as_mut() {
            if mrw.last_sent.is_some_and(|t| now.saturating_sub(t) >= timeout) {
                mrw.last_sent = None;
            }
        }
        self.slide();
        if self.has_outstanding() || self.mrw.is_some() {
            self.arm_timer(out);
        }
    }

    /// Queued, in flight, or MRW not yet confirmed.
    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty() || !self.window.is_empty() || self.mrw.is_some()
    }

    /// Drop everything: queue, window, retransmissions and pending MRW.
    pub fn clear(&mut self) {
        let dropped = self.queue.len();
        self.queue.clear();
        self.queued_bytes = 0;
        self.window.clear();
        self.retransmit_queue.clear();
        self.mrw = None;
        self.first_unacked = self.next_sn;
        self.timer.cancel();
        self.burst.reset();
        self.stats.sdus_cleared += dropped as u64;
    }

    pub fn reset_numbering(&mut self) {
        self.window.clear();
        self.retransmit_queue.clear();
        self.mrw = None;
        self.next_sn = 0;
        self.first_unacked = 0;
        self.timer.cancel();
    }

    /// Drop the most recently queued SDU that has not entered the window.
    pub fn remove_last(&mut self) -> Option<Sdu> {
        let sdu = self.queue.pop_back()?;
        self.queued_bytes -= sdu.len();
        self.stats.sdus_cleared += 1;
        Some(sdu)
    }

    pub fn next_sn(&self) -> SeqNum {
        self.next_sn
    }

    pub fn first_unacked(&self) -> SeqNum {
        self.first_unacked
    }

    /// PDUs inside the transmit window.
    pub fn in_flight(&self) -> usize {
        self.window.len()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.queued_bytes
    }

    pub fn timer(&self) -> &EntityTimer {
        &self.timer
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

    const NOW: Duration = Duration::ZERO;

    fn ctx() -> Arc<FlowContext> {
        Arc::new(FlowContext::new(1, 10, 20))
    }

    fn config() -> AmTxConfig {
        AmTxConfig {
            window_size: 8,
            fragment_size: 10,
            max_retransmissions: 2,
            retransmit_timeout_ms: 100,
            ..AmTxConfig::default()
        }
    }

    fn sdu(sn: SeqNum, len: usize) -> Sdu {
        Sdu::new(sn, vec![sn as u8; len], ctx())
    }

    fn send_all(tx: &mut AmTransmitEntity, out: &mut Outbox) -> Vec<DataPdu> {
        std::iter::from_fn(|| tx.produce(100, NOW, out))
            .filter_map(|p| p.pdu.into_data())
            .collect()
    }

    fn report(nd: SeqNum, ne: SeqNum, bits: &[bool]) -> StatusReport {
        StatusReport {
            next_delivered: nd,
            next_expected: ne,
            bitmap: bits.to_vec(),
        }
    }

    #[test]
    fn test_fragments_carry_descriptor() {
        let mut tx = AmTransmitEntity::new(config(), ctx());
        let mut out = Outbox::new();
        tx.enqueue(sdu(0, 25)).expect("enqueue");
        let pdus = send_all(&mut tx, &mut out);
        assert_eq!(pdus.len(), 3);
        for (i, p) in pdus.iter().enumerate() {
            let f = p.fragment.expect("descriptor");
            assert_eq!((f.first_sn, f.last_sn, f.fragment_sn), (0, 2, i as u32));
        }
        assert_eq!(pdus[2].payload_len(), 5);
        assert_eq!(out.timers.len(), 1, "timer armed once");
    }

    #[test]
    fn test_window_limits_admission() {
        let mut tx = AmTransmitEntity::new(config(), ctx());
        let mut out = Outbox::new();
        tx.enqueue(sdu(0, 50)).expect("5 fragments");
        tx.enqueue(sdu(1, 50)).expect("5 fragments");
        assert_eq!(send_all(&mut tx, &mut out).len(), 5);
        assert!(tx.has_pending());

        tx.on_status_report(&report(5, 5, &[]), &mut out);
        assert_eq!(tx.first_unacked(), 5);
        assert_eq!(send_all(&mut tx, &mut out).len(), 5);
    }

    #[test]
    fn test_sdu_too_large() {
        let mut tx = AmTransmitEntity::new(config(), ctx());
        assert!(matches!(
            tx.enqueue(sdu(0, 81)),
            Err(EngineError::SduTooLarge { max: 80, .. })
        ));
    }

    #[test]
    fn test_nack_retransmits_before_new_data() {
        let mut tx = AmTransmitEntity::new(config(), ctx());
        let mut out = Outbox::new();
        tx.enqueue(sdu(0, 10)).expect("enqueue");
        tx.enqueue(sdu(1, 10)).expect("enqueue");
        tx.enqueue(sdu(2, 10)).expect("enqueue");
        tx.produce(100, NOW, &mut out);
        tx.produce(100, NOW, &mut out);
        // receiver has 1, missing 0
        tx.on_status_report(&report(0, 2, &[false, true]), &mut out);
        let next = tx.produce(100, NOW, &mut out).expect("pdu");
        assert_eq!(next.pdu.as_data().map(|d| d.sn), Some(0));
        assert_eq!(tx.stats().retransmissions, 1);
        let fresh = tx.produce(100, NOW, &mut out).expect("pdu");
        assert_eq!(fresh.pdu.as_data().map(|d| d.sn), Some(2));
    }

    #[test]
    fn test_duplicate_nacks_collapse() {
        let mut tx = AmTransmitEntity::new(config(), ctx());
        let mut out = Outbox::new();
        tx.enqueue(sdu(0, 10)).expect("enqueue");
        tx.enqueue(sdu(1, 10)).expect("enqueue");
        send_all(&mut tx, &mut out);
        tx.on_status_report(&report(0, 2, &[false, true]), &mut out);
        tx.on_status_report(&report(0, 2, &[false, true]), &mut out);
        assert!(tx.produce(100, NOW, &mut out).is_some());
        assert!(tx.produce(100, NOW, &mut out).is_none());
    }

    #[test]
    fn test_report_older_than_retransmission_is_ignored() {
        let ms = Duration::from_millis;
        let mut tx = AmTransmitEntity::new(config(), ctx());
        let mut out = Outbox::new();
        for sn in 0..3 {
            tx.enqueue(sdu(sn, 10)).expect("enqueue");
        }
        tx.produce(100, ms(0), &mut out);
        tx.produce(100, ms(1), &mut out);

        // PDU1 (sent at 1 ms) proves PDU0 (sent at 0 ms) was lost
        tx.on_status_report(&report(0, 2, &[false, true]), &mut out);
        let rtx = tx.produce(100, ms(20), &mut out).expect("rtx");
        assert_eq!(rtx.pdu.as_data().map(|d| d.sn), Some(0));

        // generated before the retransmission could arrive
        tx.on_status_report(&report(0, 2, &[false, true]), &mut out);
        let next = tx.produce(100, ms(25), &mut out).expect("pdu");
        assert_eq!(next.pdu.as_data().map(|d| d.sn), Some(2), "fresh data, no second rtx");
        assert_eq!(tx.stats().retransmissions, 1);
        assert_eq!(tx.stats().stale_nacks, 1);

        // PDU2 went out after the retransmission, so this NACK is real
        tx.on_status_report(&report(0, 3, &[false, true, true]), &mut out);
        let again = tx.produce(100, ms(40), &mut out).expect("rtx");
        assert_eq!(again.pdu.as_data().map(|d| d.sn), Some(0));
        assert_eq!(tx.stats().retransmissions, 2);
    }

    #[test]
    fn test_oversized_status_span_is_bounded() {
        let mut tx = AmTransmitEntity::new(config(), ctx());
        let mut out = Outbox::new();
        tx.enqueue(sdu(0, 10)).expect("enqueue");
        tx.produce(100, NOW, &mut out);
        let started = std::time::Instant::now();
        tx.on_status_report(&report(0, 400_000_000, &[]), &mut out);
        tx.on_status_report(&report(0, u32::MAX, &[false; 16]), &mut out);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(tx.stats().retransmissions, 0);
        assert_eq!(tx.first_unacked(), 0);
    }

    #[test]
    fn test_abandon_queues_mrw() {
        let mut tx = AmTransmitEntity::new(config(), ctx());
        let mut out = Outbox::new();
        tx.enqueue(sdu(0, 20)).expect("2 fragments");
        tx.enqueue(sdu(1, 10)).expect("1 fragment");
        send_all(&mut tx, &mut out);

        // PDU 1 received, PDU 0 keeps getting lost
        for _ in 0..2 {
            tx.on_status_report(&report(0, 2, &[false, true]), &mut out);
            let p = tx.produce(100, NOW, &mut out).expect("rtx");
            assert_eq!(p.pdu.as_data().map(|d| d.sn), Some(0));
        }
        tx.on_status_report(&report(0, 3, &[false, true, true]), &mut out);
        assert_eq!(tx.stats().sdus_abandoned, 1);
        assert_eq!(tx.first_unacked(), 3);

        let mrw = tx.produce(100, NOW, &mut out).expect("mrw");
        assert_eq!(
            mrw.pdu,
            Pdu::Control(ControlPdu::MoveWindow {
                seq: 1,
                new_first_sn: 3
            })
        );
        assert!(tx.has_pending());
        tx.on_move_window_ack(1, 3);
        assert!(!tx.has_pending());
    }

    #[test]
    fn test_timer_requeues_stale_pdus() {
        let mut tx = AmTransmitEntity::new(config(), ctx());
        let mut out = Outbox::new();
        tx.enqueue(sdu(0, 10)).expect("enqueue");
        tx.produce(100, NOW, &mut out);
        let req = out.timers[0];

        tx.on_timer(req.generation, Duration::from_millis(100), &mut out);
        let p = tx
            .produce(100, Duration::from_millis(100), &mut out)
            .expect("rtx");
        assert_eq!(p.pdu.as_data().map(|d| d.sn), Some(0));
        assert_eq!(tx.stats().retransmissions, 1);
        assert!(tx.timer().is_armed());
    }

    #[test]
    fn test_stale_timer_generation_ignored() {
        let mut tx = AmTransmitEntity::new(config(), ctx());
        let mut out = Outbox::new();
        tx.enqueue(sdu(0, 10)).expect("enqueue");
        tx.produce(100, NOW, &mut out);
        let req = out.timers[0];
        tx.on_status_report(&report(1, 1, &[]), &mut out);
        assert!(!tx.timer().is_armed());
        tx.on_timer(req.generation, Duration::from_secs(1), &mut out);
        assert!(tx.produce(100, Duration::from_secs(1), &mut out).is_none());
    }

    #[test]
    fn test_small_grant_returns_sentinel() {
        let mut tx = AmTransmitEntity::new(config(), ctx());
        let mut out = Outbox::new();
        tx.enqueue(sdu(0, 10)).expect("enqueue");
        let p = tx.produce(11, NOW, &mut out).expect("sentinel");
        assert!(p.pdu.is_sentinel());
        assert!(tx.produce(12, NOW, &mut out).is_some_and(|p| p.pdu.as_data().is_some()));
    }
}
