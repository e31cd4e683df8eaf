// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Deterministic event queue and per-call entity output.
//!
//! Events are ordered by `(due time, insertion order)`, so two events due at
//! the same instant run in the order they were scheduled.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use crate::error::DiscardReason;
use crate::flow::{FlowId, LegId};
use crate::pdu::{ControlPdu, Pdu, SeqNum, Sdu};
use crate::timer::{EntityId, TimerRequest};

/// Work item for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// PDU arriving from the wire on `leg`.
    PduArrival { flow: FlowId, leg: LegId, pdu: Pdu },
    /// Scheduler grant of `bytes` for `flow`.
    Grant { flow: FlowId, bytes: usize },
    /// Timer of `entity` coming due.
    TimerFire { entity: EntityId, generation: u64 },
}

#[derive(Debug)]
struct Scheduled {
    at: Duration,
    seq: u64,
    event: Event,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed: BinaryHeap is a max-heap, we pop the earliest.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-heap of timed events.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Scheduled>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, at: Duration, event: Event) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Scheduled { at, seq, event });
    }

    /// Due time of the earliest event.
    pub fn peek_time(&self) -> Option<Duration> {
        self.heap.peek().map(|s| s.at)
    }

    /// Pop the earliest event if it is due at or before `now`.
    pub fn pop_due(&mut self, now: Duration) -> Option<(Duration, Event)> {
        if self.heap.peek()?.at > now {
            return None;
        }
        self.heap.pop().map(|s| (s.at, s.event))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Keep only the events `keep` accepts.
    pub fn retain(&mut self, mut keep: impl FnMut(&Event) -> bool) {
        self.heap.retain(|s| keep(&s.event));
    }
}

/// A dropped PDU or SDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discard {
    pub reason: DiscardReason,
    /// PDU sequence number, or SDU main sequence number for
    /// [`DiscardReason::ReassemblyImpossible`].
    pub sn: SeqNum,
}

/// Everything an entity produced during one call.
#[derive(Debug, Default)]
pub struct Outbox {
    pub delivered: Vec<Sdu>,
    pub discards: Vec<Discard>,
    pub timers: Vec<TimerRequest>,
    /// Control PDUs to send back to the peer.
    pub control: Vec<ControlPdu>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn discard(&mut self, reason: DiscardReason, sn: SeqNum) {
        self.discards.push(Discard { reason, sn });
    }

    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty()
            && self.discards.is_empty()
            && self.timers.is_empty()
            && self.control.is_empty()
    }
}
