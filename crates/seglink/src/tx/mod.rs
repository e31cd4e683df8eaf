// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transmit entities.
//!
//! - [`um`]: greedy segmentation into grant-sized PDUs, no retransmission
//! - [`am`]: fixed-size fragmentation with selective-repeat retransmission

pub mod am;
pub mod um;

use std::sync::Arc;
use std::time::Duration;

use crate::error::EngineError;
use crate::event::Outbox;
use crate::flow::FlowContext;
use crate::pdu::{ControlPdu, Pdu, SeqNum, Sdu};

pub use am::AmTransmitEntity;
pub use um::UmTransmitEntity;

/// Burst status change reported with every produced data PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstTransition {
    /// Queue went from idle to backlogged.
    Start,
    /// No status change.
    Continue,
    /// Backlog just emptied.
    Stop,
}

/// Tracks whether the entity is inside a burst.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BurstState {
    active: bool,
}

impl BurstState {
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Update after producing a data PDU; `backlogged` is whether data remains.
    pub fn after_pdu(&mut self, backlogged: bool) -> BurstTransition {
        match (self.active, backlogged) {
            (false, true) => {
                self.active = true;
                BurstTransition::Start
            }
            (true, false) => {
                self.active = false;
                BurstTransition::Stop
            }
            _ => BurstTransition::Continue,
        }
    }

    pub fn reset(&mut self) {
        self.active = false;
    }
}

/// Output of one `produce` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Produced {
    pub pdu: Pdu,
    /// Set for data PDUs only.
    pub burst: Option<BurstTransition>,
}

impl Produced {
    pub(crate) fn data(pdu: Pdu, burst: BurstTransition) -> Self {
        Self {
            pdu,
            burst: Some(burst),
        }
    }

    pub(crate) fn bare(pdu: Pdu) -> Self {
        Self { pdu, burst: None }
    }
}

/// Transmit statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TxStats {
    /// SDUs accepted.
    pub sdus_enqueued: u64,
    /// SDUs rejected at enqueue.
    pub sdus_rejected: u64,
    /// SDUs dropped by `clear`/`remove_last`.
    pub sdus_cleared: u64,
    /// Data PDUs produced (first transmissions).
    pub pdus_produced: u64,
    /// Payload bytes produced.
    pub bytes_produced: u64,
    /// Sentinel PDUs (insufficient grant).
    pub sentinels: u64,
    /// Bursts started.
    pub bursts: u64,
    /// Retransmitted PDUs.
    pub retransmissions: u64,
    /// NACKs ignored because the report predates the PDU's last send.
    pub stale_nacks: u64,
    /// SDUs given up after exhausting retransmissions.
    pub sdus_abandoned: u64,
    /// Move-window commands sent (including resends).
    pub move_window_sent: u64,
}

/// Transmit side of one leg.
#[derive(Debug)]
pub enum TransmitEntity {
    Unacknowledged(UmTransmitEntity),
    Acknowledged(AmTransmitEntity),
}

impl TransmitEntity {
    /// Queue an SDU.
    pub fn enqueue(&mut self, sdu: Sdu) -> Result<(), EngineError> {
        match self {
            Self::Unacknowledged(tx) => tx.enqueue(sdu),
            Self::Acknowledged(tx) => tx.enqueue(sdu),
        }
    }

    /// Produce at most one PDU of nominal size `<= budget`.
    pub fn produce(&mut self, budget: usize, now: Duration, out: &mut Outbox) -> Option<Produced> {
        match self {
            Self::Unacknowledged(tx) => tx.produce(budget),
            Self::Acknowledged(tx) => tx.produce(budget, now, out),
        }
    }

    /// Feedback from the peer receiver. Ignored in unacknowledged mode.
    pub fn on_control(&mut self, pdu: &ControlPdu, out: &mut Outbox) {
        match self {
            Self::Unacknowledged(_) => {
                log::debug!("[TransmitEntity::on_control] ignoring control PDU on UM leg");
            }
            Self::Acknowledged(tx) => match pdu {
                ControlPdu::Status(report) => tx.on_status_report(report, out),
                ControlPdu::MoveWindowAck { seq, first_sn } => {
                    tx.on_move_window_ack(*seq, *first_sn);
                }
                ControlPdu::MoveWindow { .. } => {
                    log::debug!("[TransmitEntity::on_control] MRW is for the receiver, ignored");
                }
            },
        }
    }

    pub fn on_timer(&mut self, generation: u64, now: Duration, out: &mut Outbox) {
        if let Self::Acknowledged(tx) = self {
            tx.on_timer(generation, now, out);
        }
    }

    /// Anything left to send or awaiting acknowledgement.
    pub fn has_pending(&self) -> bool {
        match self {
            Self::Unacknowledged(tx) => !tx.is_empty(),
            Self::Acknowledged(tx) => tx.has_pending(),
        }
    }

    pub fn buffered_bytes(&self) -> usize {
        match self {
            Self::Unacknowledged(tx) => tx.buffered_bytes(),
            Self::Acknowledged(tx) => tx.buffered_bytes(),
        }
    }

    /// Hard clear: drop everything queued, keep the sequence counter.
    pub fn clear(&mut self) {
        match self {
            Self::Unacknowledged(tx) => tx.clear(),
            Self::Acknowledged(tx) => tx.clear(),
        }
    }

    /// Restart PDU numbering at 0 (new leg).
    pub fn reset_numbering(&mut self) {
        match self {
            Self::Unacknowledged(tx) => tx.reset_numbering(),
            Self::Acknowledged(tx) => tx.reset_numbering(),
        }
    }

    pub fn remove_last(&mut self) -> Option<Sdu> {
        match self {
            Self::Unacknowledged(tx) => tx.remove_last(),
            Self::Acknowledged(tx) => tx.remove_last(),
        }
    }

    pub fn next_sn(&self) -> SeqNum {
        match self {
            Self::Unacknowledged(tx) => tx.next_sn(),
            Self::Acknowledged(tx) => tx.next_sn(),
        }
    }

    pub fn set_context(&mut self, context: Arc<FlowContext>) {
        match self {
            Self::Unacknowledged(tx) => tx.set_context(context),
            Self::Acknowledged(tx) => tx.set_context(context),
        }
    }

    pub fn stats(&self) -> &TxStats {
        match self {
            Self::Unacknowledged(tx) => tx.stats(),
            Self::Acknowledged(tx) => tx.stats(),
        }
    }
}

/// Capacity check shared by both transmit entities (`capacity == 0` is unbounded).
pub(crate) fn check_capacity(
    context: &FlowContext,
    capacity: usize,
    buffered: usize,
    requested: usize,
) -> Result<(), EngineError> {
    if capacity == 0 || buffered + requested <= capacity {
        return Ok(());
    }
    Err(EngineError::BufferFull {
        flow: context.flow_id,
        requested,
        available: capacity.saturating_sub(buffered),
    })
}
