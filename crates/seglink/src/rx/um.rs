// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Unacknowledged-mode receiver.
//!
//! Out-of-order PDUs wait in the window until the gap before them fills. If
//! it does not fill within the reordering timeout the window is forced past
//! it: whatever was buffered is reassembled, and any SDU that needed a missing
//! PDU is dropped.
//!
//! # Timer rules
//!
//! - armed and `reorder_trigger <= next_delivered`: stop
//! - idle and `next_delivered < next_expected`: start, with
//!   `reorder_trigger = next_expected`
//! - on expiry: force `next_delivered` up to `reorder_trigger`, drain, and
//!   apply the rules again

use std::sync::Arc;

use super::reassembly::Reassembler;
use super::{discard, FailureLatch, RxStats};
use crate::config::{UmOutOfWindowPolicy, UmRxConfig};
use crate::error::{DiscardReason, EngineError};
use crate::event::Outbox;
use crate::flow::FlowContext;
use crate::pdu::DataPdu;
use crate::timer::EntityTimer;
use crate::window::{SlotBuffer, WindowDescriptor, WindowPosition};

/// UM receive entity.
#[derive(Debug)]
pub struct UmReceiveEntity {
    config: UmRxConfig,
    context: Arc<FlowContext>,
    window: WindowDescriptor,
    slots: SlotBuffer<DataPdu>,
    reassembler: Reassembler,
    timer: EntityTimer,
    /// Next PDU re-seeds the window at its own sequence number.
    resync: bool,
    latch: FailureLatch,
    stats: RxStats,
}

impl UmReceiveEntity {
    pub fn new(config: UmRxConfig, context: Arc<FlowContext>) -> Self {
        let size = config.effective_window();
        Self {
            resync: config.multicast,
            config,
            context,
            window: WindowDescriptor::new(size),
            slots: SlotBuffer::new(size),
            reassembler: Reassembler::new(),
            timer: EntityTimer::new(),
            latch: FailureLatch::default(),
            stats: RxStats::default(),
        }
    }

    /// Handle a data PDU.
    pub fn on_pdu(&mut self, pdu: DataPdu, out: &mut Outbox) -> Result<(), EngineError> {
        self.latch.check(&self.context)?;
        let result = self.accept(pdu, out);
        let result = self.latch.observe(&self.context, result);
        if self.latch.is_failed() {
            self.timer.cancel();
        }
        debug_assert!(self.window.is_consistent());
        result
    }

    fn accept(&mut self, mut pdu: DataPdu, out: &mut Outbox) -> Result<(), EngineError> {
        let sn = pdu.sn;
        if self.resync {
            self.resync = false;
            self.window.reset(sn);
            log::debug!(
                "[UmReceiveEntity::accept] flow {} {}: window seeded at {}",
                self.context.flow_id,
                self.context.leg,
                sn
            );
        }

        let idx = match self.window.classify(sn) {
            WindowPosition::Duplicate => {
                self.discard(out, DiscardReason::LateDuplicate, sn);
                return Ok(());
            }
            WindowPosition::InWindow(idx) => idx,
            WindowPosition::Beyond(excess) => match self.config.effective_policy() {
                UmOutOfWindowPolicy::Slide { max_slide } if excess <= max_slide => {
                    log::debug!(
                        "[UmReceiveEntity::accept] PDU {} beyond window, sliding by {}",
                        sn,
                        excess
                    );
                    self.force_advance(excess, out)?;
                    self.stats.window_moves += 1;
                    (sn - self.window.next_delivered) as usize
                }
                _ => {
                    self.discard(out, DiscardReason::OutOfWindow, sn);
                    return Ok(());
                }
            },
        };

        if let Some(existing) = self.slots.get(idx) {
            if existing.same_content(&pdu) {
                self.discard(out, DiscardReason::LateDuplicate, sn);
                return Ok(());
            }
            return Err(EngineError::inconsistency(
                sn,
                "slot already holds a PDU for a different SDU",
            ));
        }

        pdu.context = Some(Arc::clone(&self.context));
        if self.slots.insert(idx, pdu).is_err() {
            return Err(EngineError::inconsistency(sn, "slot index outside the window"));
        }
        self.window.note_received(sn);
        self.stats.pdus_received += 1;

        self.drain(out)?;
        self.update_timer(out);
        Ok(())
    }

    /// Move `next_delivered` forward by `k`, reassembling buffered PDUs and
    /// treating empty slots as permanent gaps.
    fn force_advance(&mut self, k: u32, out: &mut Outbox) -> Result<(), EngineError> {
        let steps = k.min(self.window.window_size);
        for _ in 0..steps {
            let slot = self.slots.pop_front();
            self.window.advance(1);
            match slot {
                Some(pdu) => {
                    self.reassembler
                        .consume(pdu, &self.context, &mut self.stats, out)?;
                }
                None => {
                    self.stats.pdus_lost += 1;
                    self.reassembler.gap(&self.context, &mut self.stats, out);
                }
            }
        }
        // past a full window every slot is already empty
        let rest = k - steps;
        if rest > 0 {
            self.stats.pdus_lost += u64::from(rest);
            self.reassembler.gap(&self.context, &mut self.stats, out);
            self.window.advance(rest);
        }
        Ok(())
    }

    /// Deliver the contiguous run at the window head.
    fn drain(&mut self, out: &mut Outbox) -> Result<(), EngineError> {
        while self.slots.front().is_some() {
            let Some(pdu) = self.slots.pop_front() else {
                break;
            };
            self.window.advance(1);
            self.reassembler
                .consume(pdu, &self.context, &mut self.stats, out)?;
        }
        Ok(())
    }

    fn update_timer(&mut self, out: &mut Outbox) {
        if self.timer.is_armed() && self.window.reorder_trigger <= self.window.next_delivered {
            self.timer.cancel();
            log::debug!(
                "[UmReceiveEntity::update_timer] gap below {} filled, timer stopped",
                self.window.reorder_trigger
            );
        }
        if !self.timer.is_armed() && self.window.has_gap() {
            self.window.reorder_trigger = self.window.next_expected;
            if let Some(req) = self.timer.arm(self.config.reordering_timeout()) {
                out.timers.push(req);
                log::debug!(
                    "[UmReceiveEntity::update_timer] gap at {}, reordering timer armed (trigger {})",
                    self.window.next_delivered,
                    self.window.reorder_trigger
                );
            }
        }
    }

    /// Reordering timer expiry.
    pub fn on_timer(&mut self, generation: u64, out: &mut Outbox) -> Result<(), EngineError> {
        self.latch.check(&self.context)?;
        if !self.timer.fire(generation) {
            return Ok(());
        }
        self.stats.timer_expiries += 1;
        let result = self.expire(out);
        debug_assert!(self.window.is_consistent());
        self.latch.observe(&self.context, result)
    }

    fn expire(&mut self, out: &mut Outbox) -> Result<(), EngineError> {
        let k = self
            .window
            .reorder_trigger
            .saturating_sub(self.window.next_delivered);
        log::debug!(
            "[UmReceiveEntity::expire] skipping {} PDUs up to {}",
            k,
            self.window.reorder_trigger
        );
        self.force_advance(k, out)?;
        self.drain(out)?;
        self.update_timer(out);
        Ok(())
    }

    /// Force-process everything buffered, drop partials, stop the timer.
    ///
    /// The entity always ends up empty. A failed entity skips reassembly;
    /// an error is the fatal inconsistency hit while flushing, if any.
    pub fn flush(&mut self, out: &mut Outbox) -> Result<(), EngineError> {
        let k = self.window.next_expected - self.window.next_delivered;
        let result = if self.latch.is_failed() {
            Ok(())
        } else {
            self.force_advance(k, out)
        };
        self.window.advance(self.window.next_expected - self.window.next_delivered);
        self.reassembler.gap(&self.context, &mut self.stats, out);
        self.slots.clear();
        self.timer.cancel();
        self.latch.observe(&self.context, result)
    }

    /// Flush, then wait for the next PDU to re-seed the window. Clears a
    /// previous failure.
    pub fn reset(&mut self, out: &mut Outbox) -> Result<(), EngineError> {
        let result = self.flush(out);
        self.window.reset(0);
        self.resync = true;
        self.latch = FailureLatch::default();
        result
    }

    fn discard(&mut self, out: &mut Outbox, reason: DiscardReason, sn: u32) {
        discard(&mut self.stats, out, &self.context, reason, sn);
    }

    pub fn window(&self) -> &WindowDescriptor {
        &self.window
    }

    /// PDUs waiting in the window.
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
