// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Leg management and mode switching for one flow.
//!
//! A flow always has exactly one *active* leg. Switching to another leg
//! retires the active one, either by hard clear or by letting it drain:
//!
//! ```text
//!              switch(B, Drain)            A empty
//!   A active ------------------> A draining --------> A retired
//!                                B active,            staged SDUs
//!                                new SDUs staged      spliced into B
//! ```
//!
//! While a leg drains, SDUs for the flow wait in a staging buffer that no
//! grant can reach, so the new leg never overtakes the old one.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::config::{DeliveryMode, FlowConfig};
use crate::error::EngineError;
use crate::event::Outbox;
use crate::flow::{FlowContext, FlowId, LegId};
use crate::pdu::{ControlPdu, Sdu};
use crate::rx::{AmReceiveEntity, ReceiveEntity, UmReceiveEntity};
use crate::tx::{check_capacity, AmTransmitEntity, TransmitEntity, UmTransmitEntity};

/// What happens to the retiring leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchPolicy {
    /// Drop queued SDUs now; flush the receiver.
    HardClear,
    /// Keep serving grants until the queue is empty.
    Drain,
}

/// Lifecycle of a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegState {
    Active,
    Draining,
    Retired,
}

/// One delivery leg: a transmit/receive entity pair plus queued control PDUs.
#[derive(Debug)]
pub struct Leg {
    pub id: LegId,
    pub state: LegState,
    pub context: Arc<FlowContext>,
    pub tx: TransmitEntity,
    pub rx: ReceiveEntity,
    /// Control PDUs waiting for a grant.
    pub control: VecDeque<ControlPdu>,
}

impl Leg {
    /// Build the entity pair matching `config.mode`.
    pub fn new(context: Arc<FlowContext>, config: &FlowConfig) -> Self {
        let (tx, rx) = match config.mode {
            DeliveryMode::Unacknowledged => (
                TransmitEntity::Unacknowledged(UmTransmitEntity::new(
                    config.tx.clone(),
                    Arc::clone(&context),
                )),
                ReceiveEntity::Unacknowledged(UmReceiveEntity::new(
                    config.um_rx.clone(),
                    Arc::clone(&context),
                )),
            ),
            DeliveryMode::Acknowledged => (
                TransmitEntity::Acknowledged(AmTransmitEntity::new(
                    config.am_tx.clone(),
                    Arc::clone(&context),
                )),
                ReceiveEntity::Acknowledged(AmReceiveEntity::new(
                    config.am_rx.clone(),
                    Arc::clone(&context),
                )),
            ),
        };
        Self {
            id: context.leg,
            state: LegState::Active,
            context,
            tx,
            rx,
            control: VecDeque::new(),
        }
    }

    fn adopt_context(&mut self, context: Arc<FlowContext>) {
        self.tx.set_context(Arc::clone(&context));
        self.rx.set_context(Arc::clone(&context));
        self.context = context;
    }

    /// Drop queued data, flush the receiver, retire.
    fn hard_clear(&mut self) -> LegOutput {
        self.tx.clear();
        self.control.clear();
        self.state = LegState::Retired;
        LegOutput::collect(self.id, |out| self.rx.flush(out))
    }
}

/// Receiver output one leg produced during a switch.
#[derive(Debug)]
pub struct LegOutput {
    pub leg: LegId,
    pub out: Outbox,
    /// Fatal inconsistency hit while flushing. The receiver is cleared
    /// regardless.
    pub failure: Option<EngineError>,
}

impl LegOutput {
    fn collect(leg: LegId, f: impl FnOnce(&mut Outbox) -> Result<(), EngineError>) -> Self {
        let mut out = Outbox::new();
        let failure = f(&mut out).err();
        Self { leg, out, failure }
    }
}

/// Mode-switch counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SwitchStats {
    pub switches: u64,
    pub hard_clears: u64,
    pub drains_completed: u64,
    /// SDUs that went through the staging buffer.
    pub sdus_staged: u64,
    /// Staged SDUs the new leg refused at splice time.
    pub staged_dropped: u64,
}

/// Legs of one flow and the switching state between them.
#[derive(Debug)]
pub struct ModeSwitchCoordinator {
    flow: FlowId,
    legs: BTreeMap<LegId, Leg>,
    active: LegId,
    draining: Option<LegId>,
    staging: VecDeque<Sdu>,
    staged_bytes: usize,
    /// Bound on staged bytes (0 = unbounded).
    staging_capacity: usize,
    stats: SwitchStats,
}

impl ModeSwitchCoordinator {
    pub fn new(first: Leg, staging_capacity: usize) -> Self {
        let active = first.id;
        let flow = first.context.flow_id;
        let mut legs = BTreeMap::new();
        legs.insert(active, first);
        Self {
            flow,
            legs,
            active,
            draining: None,
            staging: VecDeque::new(),
            staged_bytes: 0,
            staging_capacity,
            stats: SwitchStats::default(),
        }
    }

    pub fn active(&self) -> LegId {
        self.active
    }

    pub fn draining(&self) -> Option<LegId> {
        self.draining
    }

    /// Leg whose transmitter serves grants.
    pub fn grant_target(&self) -> LegId {
        self.draining.unwrap_or(self.active)
    }

    /// SDUs are being held for the new leg.
    pub fn is_holding(&self) -> bool {
        self.draining.is_some()
    }

    pub fn staged(&self) -> usize {
        self.staging.len()
    }

    pub fn leg(&self, id: LegId) -> Option<&Leg> {
        self.legs.get(&id)
    }

    pub fn leg_mut(&mut self, id: LegId) -> Option<&mut Leg> {
        self.legs.get_mut(&id)
    }

    pub fn legs(&self) -> impl Iterator<Item = &Leg> {
        self.legs.values()
    }

    pub fn legs_mut(&mut self) -> impl Iterator<Item = &mut Leg> {
        self.legs.values_mut()
    }

    pub fn active_context(&self) -> Option<&Arc<FlowContext>> {
        self.legs.get(&self.active).map(|l| &l.context)
    }

    pub fn stats(&self) -> &SwitchStats {
        &self.stats
    }

    /// Route an SDU to the active leg, or to staging while a drain runs.
    pub fn enqueue(&mut self, sdu: Sdu) -> Result<(), EngineError> {
        let Some(leg) = self.legs.get_mut(&self.active) else {
            return Err(EngineError::UnknownLeg {
                flow: self.flow,
                leg: self.active,
            });
        };
        if self.draining.is_none() {
            return leg.tx.enqueue(sdu);
        }
        check_capacity(
            &leg.context,
            self.staging_capacity,
            self.staged_bytes,
            sdu.len(),
        )?;
        self.staged_bytes += sdu.len();
        self.stats.sdus_staged += 1;
        self.staging.push_back(sdu);
        Ok(())
    }

    /// Make `new_leg` active. Returns `false` when it already was.
    ///
    /// `make_leg` builds the leg if the flow never used it before. Every
    /// receiver flushed or reset on the way appends its output to `out`.
    /// Only an unknown active leg fails the switch, and it does so before
    /// anything changes.
    pub fn switch(
        &mut self,
        new_leg: LegId,
        policy: SwitchPolicy,
        make_leg: impl FnOnce(Arc<FlowContext>) -> Leg,
        out: &mut Vec<LegOutput>,
    ) -> Result<bool, EngineError> {
        if new_leg == self.active {
            return Ok(false);
        }
        let old = self.active;
        let Some(successor) = self
            .legs
            .get(&old)
            .map(|l| Arc::new(l.context.successor(new_leg)))
        else {
            return Err(EngineError::UnknownLeg {
                flow: self.flow,
                leg: old,
            });
        };

        if let Some(still_draining) = self.draining.take() {
            if let Some(leg) = self.legs.get_mut(&still_draining) {
                log::debug!(
                    "[ModeSwitchCoordinator::switch] {} still draining, hard clear",
                    still_draining
                );
                self.stats.hard_clears += 1;
                out.push(leg.hard_clear());
            }
        }

        if let Some(leg) = self.legs.get_mut(&old) {
            match policy {
                SwitchPolicy::HardClear => {
                    self.stats.hard_clears += 1;
                    out.push(leg.hard_clear());
                }
                SwitchPolicy::Drain if leg.tx.has_pending() => {
                    leg.state = LegState::Draining;
                    self.draining = Some(old);
                }
                SwitchPolicy::Drain => leg.state = LegState::Retired,
            }
        }

        match self.legs.get_mut(&new_leg) {
            Some(leg) => {
                leg.adopt_context(successor);
                leg.state = LegState::Active;
            }
            None => {
                self.legs.insert(new_leg, make_leg(successor));
            }
        }
        if let Some(leg) = self.legs.get_mut(&new_leg) {
            leg.tx.clear();
            leg.tx.reset_numbering();
            leg.control.clear();
            out.push(LegOutput::collect(new_leg, |o| leg.rx.reset(o)));
        }

        self.active = new_leg;
        self.stats.switches += 1;
        log::debug!(
            "[ModeSwitchCoordinator::switch] {} -> {} ({:?}), draining={:?}",
            old,
            new_leg,
            policy,
            self.draining
        );

        if self.draining.is_none() {
            self.splice();
        }
        Ok(true)
    }

    /// Finish a drain once the retiring leg has nothing left. Returns the
    /// leg that completed.
    pub fn check_drain(&mut self) -> Option<LegId> {
        let id = self.draining?;
        let leg = self.legs.get_mut(&id)?;
        if leg.tx.has_pending() {
            return None;
        }
        leg.state = LegState::Retired;
        self.draining = None;
        self.stats.drains_completed += 1;
        log::debug!(
            "[ModeSwitchCoordinator::check_drain] {} drained, releasing {} staged SDUs",
            id,
            self.staging.len()
        );
        self.splice();
        Some(id)
    }

    /// Move staged SDUs into the active leg in submission order.
    fn splice(&mut self) {
        let Some(leg) = self.legs.get_mut(&self.active) else {
            return;
        };
        for sdu in self.staging.drain(..) {
            let sn = sdu.sn;
            if let Err(e) = leg.tx.enqueue(sdu) {
                self.stats.staged_dropped += 1;
                log::warn!(
                    "[ModeSwitchCoordinator::splice] dropping staged SDU {}: {}",
                    sn,
                    e
                );
            }
        }
        self.staged_bytes = 0;
    }
}
