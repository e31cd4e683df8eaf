// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receive entities.
//!
//! Both variants share [`WindowDescriptor`](crate::window::WindowDescriptor)
//! and differ only in how the window is forced forward:
//!
//! - [`um`]: a reordering timer skips gaps that never fill
//! - [`am`]: only in-order delivery or a peer MRW moves the window; gaps are
//!   reported in status bitmaps instead

pub mod am;
pub mod reassembly;
pub mod um;

use std::sync::Arc;
use std::time::Duration;

use crate::error::{DiscardReason, EngineError};
use crate::event::Outbox;
use crate::flow::FlowContext;
use crate::pdu::{ControlPdu, DataPdu, SeqNum};
use crate::timer::{EntityId, EntityRole};
use crate::window::WindowDescriptor;

pub use am::AmReceiveEntity;
pub use um::UmReceiveEntity;

/// Receive statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RxStats {
    /// Data PDUs accepted into the window.
    pub pdus_received: u64,
    /// SDUs handed to the upper layer.
    pub sdus_delivered: u64,
    /// Bytes handed to the upper layer.
    pub bytes_delivered: u64,
    /// Discards: already delivered or already buffered.
    pub late_duplicates: u64,
    /// Discards: beyond the window.
    pub out_of_window: u64,
    /// Discards: SDUs that lost a fragment for good.
    pub reassembly_impossible: u64,
    /// PDU sequence numbers skipped without ever arriving.
    pub pdus_lost: u64,
    /// Forced window moves (UM slide or AM move-window).
    pub window_moves: u64,
    /// Reordering/status timer expiries.
    pub timer_expiries: u64,
    /// Status reports emitted.
    pub status_reports: u64,
    /// Status reports held back by the rate limit.
    pub reports_suppressed: u64,
}

impl RxStats {
    /// Total discards.
    pub fn discarded(&self) -> u64 {
        self.late_duplicates + self.out_of_window + self.reassembly_impossible
    }

    /// `discarded / (delivered + discarded)`, 0.0 when both are zero.
    pub fn discard_ratio(&self) -> f64 {
        discard_ratio(self.sdus_delivered, self.discarded())
    }

    pub(crate) fn record(&mut self, reason: DiscardReason) {
        match reason {
            DiscardReason::LateDuplicate => self.late_duplicates += 1,
            DiscardReason::OutOfWindow => self.out_of_window += 1,
            DiscardReason::ReassemblyImpossible => self.reassembly_impossible += 1,
        }
    }
}

/// Discard ratio with 0/0 defined as 0.
pub fn discard_ratio(delivered: u64, discarded: u64) -> f64 {
    let total = delivered + discarded;
    if total == 0 {
        0.0
    } else {
        discarded as f64 / total as f64
    }
}

/// Count a discard and hand it to the outbox.
pub(crate) fn discard(
    stats: &mut RxStats,
    out: &mut Outbox,
    context: &FlowContext,
    reason: DiscardReason,
    sn: SeqNum,
) {
    stats.record(reason);
    out.discard(reason, sn);
    log::debug!(
        "[rx] flow {} {}: discard {} ({})",
        context.flow_id,
        context.leg,
        sn,
        reason
    );
}

/// Failure latch shared by both receive entities.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FailureLatch {
    failed: bool,
}

impl FailureLatch {
    pub(crate) fn check(&self, context: &FlowContext) -> Result<(), EngineError> {
        if self.failed {
            return Err(EngineError::EntityFailed {
                entity: EntityId::new(context.flow_id, context.leg, EntityRole::Receive),
            });
        }
        Ok(())
    }

    /// Latch fatal errors; pass every result through.
    pub(crate) fn observe<T>(
        &mut self,
        context: &FlowContext,
        result: Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        if let Err(e) = &result {
            if e.is_fatal() && !self.failed {
                self.failed = true;
                log::warn!(
                    "[rx] flow {} {}: entity failed: {}",
                    context.flow_id,
                    context.leg,
                    e
                );
            }
        }
        result
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.failed
    }
}

/// Receive side of one leg.
#[derive(Debug)]
pub enum ReceiveEntity {
    Unacknowledged(UmReceiveEntity),
    Acknowledged(AmReceiveEntity),
}

impl ReceiveEntity {
    /// Data PDU from the wire.
    pub fn on_pdu(&mut self, pdu: DataPdu, now: Duration, out: &mut Outbox) -> Result<(), EngineError> {
        match self {
            Self::Unacknowledged(rx) => rx.on_pdu(pdu, out),
            Self::Acknowledged(rx) => rx.on_pdu(pdu, now, out),
        }
    }

    /// Control PDU addressed to the receiver (MRW). Ignored in UM.
    pub fn on_control(
        &mut self,
        pdu: &ControlPdu,
        now: Duration,
        out: &mut Outbox,
    ) -> Result<(), EngineError> {
        match (self, pdu) {
            (Self::Acknowledged(rx), ControlPdu::MoveWindow { seq, new_first_sn }) => {
                rx.on_move_window(*seq, *new_first_sn, now, out)
            }
            _ => {
                log::debug!("[ReceiveEntity::on_control] control PDU not for this receiver");
                Ok(())
            }
        }
    }

    pub fn on_timer(&mut self, generation: u64, now: Duration, out: &mut Outbox) -> Result<(), EngineError> {
        match self {
            Self::Unacknowledged(rx) => rx.on_timer(generation, out),
            Self::Acknowledged(rx) => rx.on_timer(generation, now, out),
        }
    }

    /// Hard clear: deliver what is complete, drop the rest, stop the timer.
    pub fn flush(&mut self, out: &mut Outbox) -> Result<(), EngineError> {
        match self {
            Self::Unacknowledged(rx) => rx.flush(out),
            Self::Acknowledged(rx) => rx.flush(out),
        }
    }

    /// New-leg reset: flush, then restart the window at 0.
    pub fn reset(&mut self, out: &mut Outbox) -> Result<(), EngineError> {
        match self {
            Self::Unacknowledged(rx) => rx.reset(out),
            Self::Acknowledged(rx) => rx.reset(out),
        }
    }

    pub fn window(&self) -> &WindowDescriptor {
        match self {
            Self::Unacknowledged(rx) => rx.window(),
            Self::Acknowledged(rx) => rx.window(),
        }
    }

    pub fn stats(&self) -> &RxStats {
        match self {
            Self::Unacknowledged(rx) => rx.stats(),
            Self::Acknowledged(rx) => rx.stats(),
        }
    }

    pub fn is_failed(&self) -> bool {
        match self {
            Self::Unacknowledged(rx) => rx.is_failed(),
            Self::Acknowledged(rx) => rx.is_failed(),
        }
    }

    pub fn set_context(&mut self, context: Arc<FlowContext>) {
        match self {
            Self::Unacknowledged(rx) => rx.set_context(context),
            Self::Acknowledged(rx) => rx.set_context(context),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discard_ratio_zero_over_zero() {
        assert_eq!(discard_ratio(0, 0), 0.0);
        assert_eq!(RxStats::default().discard_ratio(), 0.0);
    }

    #[test]
    fn test_discard_ratio() {
        let stats = RxStats {
            sdus_delivered: 3,
            late_duplicates: 1,
            ..RxStats::default()
        };
        assert!((stats.discard_ratio() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failure_latch() {
        let ctx = FlowContext::new(1, 0, 0);
        let mut latch = FailureLatch::default();
        assert!(latch.check(&ctx).is_ok());
        let r: Result<(), _> = latch.observe(&ctx, Err(EngineError::UnknownFlow(1)));
        assert!(r.is_err());
        assert!(!latch.is_failed());
        let _ = latch.observe::<()>(&ctx, Err(EngineError::inconsistency(4, "x")));
        assert!(matches!(latch.check(&ctx), Err(EngineError::EntityFailed { .. })));
    }
}
