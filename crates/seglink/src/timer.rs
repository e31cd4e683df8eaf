// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Entity timers.
//!
//! Timers do not call back. Arming yields a [`TimerRequest`] which the engine
//! turns into a `TimerFire` event; cancelling bumps the generation so that
//! event is ignored when it comes due.
//!
//! Arming an armed timer and cancelling an idle one are no-ops.

use std::fmt;
use std::time::Duration;

use crate::flow::{FlowId, LegId};

/// Which entity of a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityRole {
    Transmit,
    Receive,
}

/// Address of one entity inside an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    pub flow: FlowId,
    pub leg: LegId,
    pub role: EntityRole,
}

impl EntityId {
    pub fn new(flow: FlowId, leg: LegId, role: EntityRole) -> Self {
        Self { flow, leg, role }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self.role {
            EntityRole::Transmit => "tx",
            EntityRole::Receive => "rx",
        };
        write!(f, "flow{}/{}/{}", self.flow, self.leg, role)
    }
}

/// Request to schedule a fire `delay` from now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerRequest {
    pub delay: Duration,
    pub generation: u64,
}

/// One-shot timer with generation-checked fires.
#[derive(Debug, Clone, Default)]
pub struct EntityTimer {
    armed: bool,
    generation: u64,
}

impl EntityTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Arm if idle. Returns the fire to schedule, or `None` if already armed.
    pub fn arm(&mut self, delay: Duration) -> Option<TimerRequest> {
        if self.armed {
            return None;
        }
        self.armed = true;
        Some(TimerRequest {
            delay,
            generation: self.generation,
        })
    }

    /// Cancel if armed. Returns whether anything was cancelled.
    pub fn cancel(&mut self) -> bool {
        if !self.armed {
            return false;
        }
        self.armed = false;
        self.generation += 1;
        true
    }

    /// Accept a fire. Stale generations and fires on an idle timer are
    /// rejected; an accepted fire disarms the timer.
    pub fn fire(&mut self, generation: u64) -> bool {
        if !self.armed || generation != self.generation {
            return false;
        }
        self.armed = false;
        self.generation += 1;
        true
    }
}
