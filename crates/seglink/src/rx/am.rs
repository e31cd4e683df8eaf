// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Acknowledged-mode receive window.
//!
//! Unlike UM there is no local force-advance: the head waits until every
//! fragment of its SDU is present, and only a move-window command from the
//! peer transmitter can skip it. Gaps are reported back in status bitmaps.
//!
//! # Status reports
//!
//! A report is requested on the status timer, on out-of-sequence arrivals,
//! on late duplicates (the peer missed an earlier report), and after every
//! delivery. Requests closer than `min_report_gap` to the previous report are
//! held back and picked up by the timer.

use std::sync::Arc;
use std::time::Duration;

use super::{discard, FailureLatch, RxStats};
use crate::config::AmRxConfig;
use crate::error::{DiscardReason, EngineError};
use crate::event::Outbox;
use crate::flow::FlowContext;
use crate::pdu::{ControlPdu, DataPdu, Sdu, SeqNum, StatusReport};
use crate::timer::EntityTimer;
use crate::window::{SlotBuffer, WindowDescriptor, WindowPosition};

/// AM receive entity.
#[derive(Debug)]
pub struct AmReceiveEntity {
    config: AmRxConfig,
    context: Arc<FlowContext>,
    window: WindowDescriptor,
    slots: SlotBuffer<DataPdu>,
    timer: EntityTimer,
    last_report: Option<Duration>,
    /// A report was suppressed by the rate limit.
    report_pending: bool,
    last_delivered: Option<SeqNum>,
    last_dropped: Option<SeqNum>,
    latch: FailureLatch,
    stats: RxStats,
}

impl AmReceiveEntity {
    pub fn new(config: AmRxConfig, context: Arc<FlowContext>) -> Self {
        Self {
            window: WindowDescriptor::new(config.window_size),
            slots: SlotBuffer::new(config.window_size),
            config,
            context,
            timer: EntityTimer::new(),
            last_report: None,
            report_pending: false,
            last_delivered: None,
            last_dropped: None,
            latch: FailureLatch::default(),
            stats: RxStats::default(),
        }
    }

    /// Handle a data PDU.
    pub fn on_pdu(&mut self, pdu: DataPdu, now: Duration, out: &mut Outbox) -> Result<(), EngineError> {
        self.latch.check(&self.context)?;
        let result = self.accept(pdu, now, out);
        let result = self.latch.observe(&self.context, result);
        if self.latch.is_failed() {
            self.timer.cancel();
        }
        debug_assert!(self.window.is_consistent());
        result
    }

    fn accept(&mut self, mut pdu: DataPdu, now: Duration, out: &mut Outbox) -> Result<(), EngineError> {
        let sn = pdu.sn;
        let Some(frag) = pdu.fragment else {
            return Err(EngineError::inconsistency(sn, "PDU has no fragment descriptor"));
        };
        if frag.fragment_sn != sn || frag.first_sn > sn || sn > frag.last_sn {
            return Err(EngineError::inconsistency(
                sn,
                format!(
                    "fragment descriptor {}..={} @{} does not match PDU",
                    frag.first_sn, frag.last_sn, frag.fragment_sn
                ),
            ));
        }
        if pdu.segments.len() != 1 {
            return Err(EngineError::inconsistency(
                sn,
                format!("expected one segment, got {}", pdu.segments.len()),
            ));
        }

        self.arm_status_timer(out);

        let idx = match self.window.classify(sn) {
            WindowPosition::Duplicate => {
                self.discard(out, DiscardReason::LateDuplicate, sn);
                self.request_report(now, out);
                return Ok(());
            }
            WindowPosition::Beyond(_) => {
                self.discard(out, DiscardReason::OutOfWindow, sn);
                return Ok(());
            }
            WindowPosition::InWindow(idx) => idx,
        };

        if let Some(existing) = self.slots.get(idx) {
            if existing.same_content(&pdu) {
                self.discard(out, DiscardReason::LateDuplicate, sn);
                self.request_report(now, out);
                return Ok(());
            }
            return Err(EngineError::inconsistency(
                sn,
                "slot already holds a PDU for a different SDU",
            ));
        }

        let out_of_sequence = sn != self.window.next_expected;
        pdu.context = Some(Arc::clone(&self.context));
        if self.slots.insert(idx, pdu).is_err() {
            return Err(EngineError::inconsistency(sn, "slot index outside the window"));
        }
        self.window.note_received(sn);
        self.stats.pdus_received += 1;

        let delivered = self.drain(out)?;
        if out_of_sequence || delivered > 0 {
            self.request_report(now, out);
        }
        Ok(())
    }

    /// Deliver complete SDUs at the window head. Returns how many.
    fn drain(&mut self, out: &mut Outbox) -> Result<usize, EngineError> {
        let mut delivered = 0;
        while let Some(head) = self.slots.front() {
            let Some(frag) = head.fragment else {
                break;
            };
            let head_sdu = head.segments.first().map_or(0, |s| s.sdu_sn);

            if frag.first_sn < self.window.next_delivered {
                // head fragment skipped by a window move
                self.slots.pop_front();
                self.window.advance(1);
                self.drop_sdu(head_sdu, out);
                continue;
            }

            let count = frag.count();
            if count > self.window.window_size {
                return Err(EngineError::inconsistency(
                    frag.first_sn,
                    format!("SDU spans {} PDUs, window is {}", count, self.window.window_size),
                ));
            }
            if !(0..count as usize).all(|i| self.slots.is_filled(i)) {
                break;
            }

            let mut data = Vec::new();
            let mut sdu_len = 0;
            for i in 0..count {
                let sn = frag.first_sn + i;
                let Some(pdu) = self.slots.pop_front() else {
                    return Err(EngineError::inconsistency(sn, "fragment vanished from window"));
                };
                let same_sdu = pdu
                    .fragment
                    .is_some_and(|f| f.first_sn == frag.first_sn && f.last_sn == frag.last_sn);
                let Some(seg) = pdu.segments.into_iter().next().filter(|_| same_sdu) else {
                    return Err(EngineError::inconsistency(
                        sn,
                        format!("fragment does not belong to SDU {}", head_sdu),
                    ));
                };
                if seg.sdu_sn != head_sdu || seg.offset as usize != data.len() {
                    return Err(EngineError::inconsistency(
                        sn,
                        format!("fragment of SDU {} out of place", seg.sdu_sn),
                    ));
                }
                sdu_len = seg.sdu_len as usize;
                data.extend_from_slice(&seg.data);
            }
            self.window.advance(count);
            if data.len() != sdu_len {
                return Err(EngineError::inconsistency(
                    frag.last_sn,
                    format!("SDU {} reassembled to {} of {} bytes", head_sdu, data.len(), sdu_len),
                ));
            }
            self.deliver(head_sdu, data, out);
            delivered += 1;
        }
        Ok(delivered)
    }

    fn deliver(&mut self, sdu_sn: SeqNum, data: Vec<u8>, out: &mut Outbox) {
        if self.last_delivered.is_some_and(|last| sdu_sn <= last) {
            self.discard(out, DiscardReason::LateDuplicate, sdu_sn);
            return;
        }
        self.last_delivered = Some(sdu_sn);
        self.stats.sdus_delivered += 1;
        self.stats.bytes_delivered += data.len() as u64;
        out.delivered
            .push(Sdu::new(sdu_sn, data, Arc::clone(&self.context)));
    }

    fn drop_sdu(&mut self, sdu_sn: SeqNum, out: &mut Outbox) {
        if self.last_dropped != Some(sdu_sn) {
            self.last_dropped = Some(sdu_sn);
            self.discard(out, DiscardReason::ReassemblyImpossible, sdu_sn);
        }
    }

    /// Peer abandoned everything below `new_first_sn`.
    pub fn on_move_window(
        &mut self,
        seq: u32,
        new_first_sn: SeqNum,
        now: Duration,
        out: &mut Outbox,
    ) -> Result<(), EngineError> {
        self.latch.check(&self.context)?;
        if new_first_sn > self.window.next_delivered {
            log::debug!(
                "[AmReceiveEntity::on_move_window] seq={} moving window {} -> {}",
                seq,
                self.window.next_delivered,
                new_first_sn
            );
            self.stats.window_moves += 1;
            let result = self.skip_to(new_first_sn, out);
            self.latch.observe(&self.context, result)?;
        }
        out.control.push(ControlPdu::MoveWindowAck {
            seq,
            first_sn: self.window.next_delivered,
        });
        self.request_report(now, out);
        Ok(())
    }

    /// Advance to `target`. SDUs already complete on the way are still
    /// delivered; the rest are dropped.
    fn skip_to(&mut self, target: SeqNum, out: &mut Outbox) -> Result<(), EngineError> {
        loop {
            self.drain(out)?;
            let next = self.window.next_delivered;
            if next >= target {
                return Ok(());
            }
            if self.slots.is_empty() {
                self.window.advance(target - next);
                return Ok(());
            }
            if let Some(pdu) = self.slots.pop_front() {
                let sdu_sn = pdu.segments.first().map_or(0, |s| s.sdu_sn);
                self.drop_sdu(sdu_sn, out);
            }
            self.window.advance(1);
        }
    }

    /// Status timer expiry.
    pub fn on_timer(&mut self, generation: u64, now: Duration, out: &mut Outbox) -> Result<(), EngineError> {
        self.latch.check(&self.context)?;
        if !self.timer.fire(generation) {
            return Ok(());
        }
        self.stats.timer_expiries += 1;
        self.request_report(now, out);
        if !self.slots.is_empty() || self.report_pending {
            self.arm_status_timer(out);
        }
        Ok(())
    }

    /// Current receiver state as a status report.
    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            next_delivered: self.window.next_delivered,
            next_expected: self.window.next_expected,
            bitmap: self.slots.bitmap(),
        }
    }

    fn request_report(&mut self, now: Duration, out: &mut Outbox) {
        if let Some(last) = self.last_report {
            if now.saturating_sub(last) < self.config.min_report_gap() {
                self.report_pending = true;
                self.stats.reports_suppressed += 1;
                self.arm_status_timer(out);
                return;
            }
        }
        out.control.push(ControlPdu::Status(self.status_report()));
        self.last_report = Some(now);
        self.report_pending = false;
        self.stats.status_reports += 1;
    }

    fn arm_status_timer(&mut self, out: &mut Outbox) {
        if let Some(req) = self.timer.arm(self.config.status_interval()) {
            out.timers.push(req);
        }
    }

    /// Deliver what is complete, drop everything else, stop the timer.
    ///
    /// The entity always ends up empty. A failed entity delivers nothing;
    /// an error is the fatal inconsistency hit while flushing, if any.
    pub fn flush(&mut self, out: &mut Outbox) -> Result<(), EngineError> {
        let result = if self.latch.is_failed() {
            Ok(())
        } else {
            self.drain(out).map(|_| ())
        };
        let k = self.window.next_expected - self.window.next_delivered;
        for _ in 0..k.min(self.window.window_size) {
            if let Some(pdu) = self.slots.pop_front() {
                let sdu_sn = pdu.segments.first().map_or(0, |s| s.sdu_sn);
                self.drop_sdu(sdu_sn, out);
            }
        }
        self.window.advance(k);
        self.slots.clear();
        self.timer.cancel();
        self.report_pending = false;
        self.latch.observe(&self.context, result)
    }

    /// Flush, then restart the window at 0 for a new leg. Clears a previous
    /// failure.
    pub fn reset(&mut self, out: &mut Outbox) -> Result<(), EngineError> {
        let result = self.flush(out);
        self.window.reset(0);
        self.last_report = None;
        self.latch = FailureLatch::default();
        result
    }

    fn discard(&mut self, out: &mut Outbox, reason: DiscardReason, sn: SeqNum) {
        discard(&mut self.stats, out, &self.context, reason, sn);
    }

    pub fn window(&self) -> &WindowDescriptor {
        &self.window
    }

    pub fn buffered(&self) -> usize {
        self.slots.occupied()
    }

    pub fn timer(&self) -> &EntityTimer {
        &self.timer
    }

    pub fn is_failed(&self) -> bool {
        self.latch.is_failed()
    }

    pub fn set_context(&mut self, context: Arc<FlowContext>) {
        self.context = context;
    }

    pub fn stats(&self) -> &RxStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = RxStats::default();
    }
}
