// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-endpoint link engine.
//!
//! The engine owns every flow of one endpoint and the single event queue
//! that drives them. Entities never call out directly; they fill an
//! [`Outbox`] which the engine routes:
//!
//! ```text
//!   enqueue --> coordinator --> leg.tx --grant--> Outgoing --> WireSink
//!                                                     |
//!   wire --> on_pdu_arrival --> leg.rx --Outbox--+--> UpperLayer (SDUs)
//!                                                +--> EngineObserver (discards)
//!                                                +--> EventQueue (timers)
//!                                                +--> leg.control (status, MRW-ACK)
//! ```
//!
//! Time is logical. Direct calls run at [`LinkEngine::now`]; queued events
//! run when [`LinkEngine::advance_to`] reaches them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{DeliveryMode, FlowConfig};
use crate::error::{DiscardReason, EngineError};
use crate::event::{Event, EventQueue, Outbox};
use crate::flow::{FlowContextProvider, FlowId, LegId};
use crate::pdu::{ControlPdu, Pdu, SeqNum, Sdu};
use crate::rx::RxStats;
use crate::switch::{Leg, LegOutput, LegState, ModeSwitchCoordinator, SwitchPolicy, SwitchStats};
use crate::timer::{EntityId, EntityRole};
use crate::tx::{BurstTransition, TxStats};
use crate::window::WindowDescriptor;
use crate::wire;

/// Receiver of reassembled SDUs.
pub trait UpperLayer {
    fn deliver(&mut self, flow: FlowId, sdu: Sdu);
}

impl<F: FnMut(FlowId, Sdu)> UpperLayer for F {
    fn deliver(&mut self, flow: FlowId, sdu: Sdu) {
        self(flow, sdu)
    }
}

/// Destination of PDUs produced by queued grant events.
pub trait WireSink {
    fn transmit(&mut self, flow: FlowId, leg: LegId, pdu: Pdu);
}

impl<F: FnMut(FlowId, LegId, Pdu)> WireSink for F {
    fn transmit(&mut self, flow: FlowId, leg: LegId, pdu: Pdu) {
        self(flow, leg, pdu)
    }
}

/// Engine notifications. Every method defaults to a no-op.
pub trait EngineObserver {
    fn on_discard(&mut self, _flow: FlowId, _leg: LegId, _reason: DiscardReason, _sn: SeqNum) {}

    fn on_burst(&mut self, _flow: FlowId, _leg: LegId, _transition: BurstTransition) {}

    fn on_drain_complete(&mut self, _flow: FlowId, _leg: LegId) {}

    fn on_entity_failed(&mut self, _entity: EntityId, _error: &EngineError) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl EngineObserver for NoopObserver {}

/// One PDU handed out for a grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    /// Leg the PDU must travel on.
    pub leg: LegId,
    pub pdu: Pdu,
    /// Burst status change (data PDUs only).
    pub burst: Option<BurstTransition>,
}

/// Snapshot of one leg.
#[derive(Debug, Clone)]
pub struct LegStats {
    pub leg: LegId,
    pub state: LegState,
    pub tx: TxStats,
    pub rx: RxStats,
    pub window: WindowDescriptor,
    pub rx_failed: bool,
}

/// Snapshot of one flow across its legs.
#[derive(Debug, Clone)]
pub struct FlowStats {
    pub flow: FlowId,
    pub active_leg: LegId,
    pub next_sdu_sn: SeqNum,
    pub legs: Vec<LegStats>,
    pub switch: SwitchStats,
}

impl FlowStats {
    pub fn sdus_delivered(&self) -> u64 {
        self.legs.iter().map(|l| l.rx.sdus_delivered).sum()
    }

    pub fn discarded(&self) -> u64 {
        self.legs.iter().map(|l| l.rx.discarded()).sum()
    }

    pub fn bursts(&self) -> u64 {
        self.legs.iter().map(|l| l.tx.bursts).sum()
    }

    pub fn discard_ratio(&self) -> f64 {
        crate::rx::discard_ratio(self.sdus_delivered(), self.discarded())
    }
}

struct FlowState {
    config: FlowConfig,
    coordinator: ModeSwitchCoordinator,
    next_sdu_sn: SeqNum,
}

/// Flows of one endpoint plus their event queue.
pub struct LinkEngine {
    provider: Box<dyn FlowContextProvider>,
    upper: Box<dyn UpperLayer>,
    observer: Box<dyn EngineObserver>,
    wire: Option<Box<dyn WireSink>>,
    flows: HashMap<FlowId, FlowState>,
    events: EventQueue,
    now: Duration,
}

impl fmt::Debug for LinkEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkEngine")
            .field("flows", &self.flows.len())
            .field("pending_events", &self.events.len())
            .field("now", &self.now)
            .finish()
    }
}

impl LinkEngine {
    pub fn new(
        provider: impl FlowContextProvider + 'static,
        upper: impl UpperLayer + 'static,
    ) -> Self {
        Self {
            provider: Box::new(provider),
            upper: Box::new(upper),
            observer: Box::new(NoopObserver),
            wire: None,
            flows: HashMap::new(),
            events: EventQueue::new(),
            now: Duration::ZERO,
        }
    }

    pub fn with_observer(mut self, observer: impl EngineObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    /// Sink for PDUs produced by queued [`Event::Grant`]s.
    pub fn with_wire_sink(mut self, wire: impl WireSink + 'static) -> Self {
        self.wire = Some(Box::new(wire));
        self
    }

    /// Current logical time.
    pub fn now(&self) -> Duration {
        self.now
    }

    // ========================================================================
    // Flows
    // ========================================================================

    /// Open `flow` on the leg named by its resolved context.
    pub fn open_flow(&mut self, flow: FlowId, config: FlowConfig) -> Result<(), EngineError> {
        if self.flows.contains_key(&flow) {
            return Err(EngineError::FlowExists(flow));
        }
        config.validate()?;
        let context = self
            .provider
            .resolve(flow)
            .ok_or(EngineError::NoFlowContext(flow))?;
        let staging_capacity = match config.mode {
            DeliveryMode::Unacknowledged => config.tx.capacity_bytes,
            DeliveryMode::Acknowledged => config.am_tx.capacity_bytes,
        };
        let leg = Leg::new(Arc::new(context), &config);
        log::debug!(
            "[LinkEngine::open_flow] flow {} on {} ({:?})",
            flow,
            leg.id,
            config.mode
        );
        self.flows.insert(
            flow,
            FlowState {
                coordinator: ModeSwitchCoordinator::new(leg, staging_capacity),
                config,
                next_sdu_sn: 0,
            },
        );
        Ok(())
    }

    /// Drop a flow and every queued event that targets it.
    pub fn close_flow(&mut self, flow: FlowId) -> Result<(), EngineError> {
        self.flows
            .remove(&flow)
            .ok_or(EngineError::UnknownFlow(flow))?;
        self.events.retain(|e| event_flow(e) != flow);
        log::debug!("[LinkEngine::close_flow] flow {} closed", flow);
        Ok(())
    }

    pub fn has_flow(&self, flow: FlowId) -> bool {
        self.flows.contains_key(&flow)
    }

    pub fn flow_ids(&self) -> impl Iterator<Item = FlowId> + '_ {
        self.flows.keys().copied()
    }

    // ========================================================================
    // Transmit path
    // ========================================================================

    /// Submit an SDU; returns its main sequence number.
    pub fn enqueue(&mut self, flow: FlowId, data: Vec<u8>) -> Result<SeqNum, EngineError> {
        let state = self
            .flows
            .get_mut(&flow)
            .ok_or(EngineError::UnknownFlow(flow))?;
        let context = state
            .coordinator
            .active_context()
            .cloned()
            .ok_or(EngineError::NoFlowContext(flow))?;
        let sn = state.next_sdu_sn;
        state.coordinator.enqueue(Sdu::new(sn, data, context))?;
        state.next_sdu_sn = sn.wrapping_add(1);
        Ok(sn)
    }

    /// Hand out at most one PDU of nominal size `<= bytes`.
    ///
    /// Pending control PDUs go first. `None` means nothing to send.
    pub fn grant_bytes(&mut self, flow: FlowId, bytes: usize) -> Result<Option<Outgoing>, EngineError> {
        let now = self.now;
        let state = self
            .flows
            .get_mut(&flow)
            .ok_or(EngineError::UnknownFlow(flow))?;

        if let Some(leg) = state.coordinator.legs_mut().find(|l| !l.control.is_empty()) {
            let fits = leg
                .control
                .front()
                .is_some_and(|c| wire::encoded_len(&Pdu::Control(c.clone())) <= bytes);
            let pdu = if fits {
                leg.control.pop_front().map(Pdu::Control)
            } else {
                Some(Pdu::Sentinel)
            };
            return Ok(pdu.map(|pdu| Outgoing {
                leg: leg.id,
                pdu,
                burst: None,
            }));
        }

        let target = state.coordinator.grant_target();
        let Some(leg) = state.coordinator.leg_mut(target) else {
            return Err(EngineError::UnknownLeg { flow, leg: target });
        };
        let mut out = Outbox::new();
        let produced = leg.tx.produce(bytes, now, &mut out);
        let drained = state.coordinator.check_drain();

        self.dispatch(flow, target, EntityRole::Transmit, out);
        let outgoing = produced.map(|p| {
            if let Some(t @ (BurstTransition::Start | BurstTransition::Stop)) = p.burst {
                self.observer.on_burst(flow, target, t);
            }
            Outgoing {
                leg: target,
                pdu: p.pdu,
                burst: p.burst,
            }
        });
        if let Some(leg) = drained {
            self.observer.on_drain_complete(flow, leg);
        }
        Ok(outgoing)
    }

    // ========================================================================
    // Receive path
    // ========================================================================

    /// PDU from the wire on `leg`.
    pub fn on_pdu_arrival(&mut self, flow: FlowId, leg: LegId, pdu: Pdu) -> Result<(), EngineError> {
        let now = self.now;
        let state = self
            .flows
            .get_mut(&flow)
            .ok_or(EngineError::UnknownFlow(flow))?;
        let Some(entry) = state.coordinator.leg_mut(leg) else {
            return Err(EngineError::UnknownLeg { flow, leg });
        };

        let mut out = Outbox::new();
        let (role, result) = match pdu {
            Pdu::Sentinel => return Ok(()),
            Pdu::Data(data) => (EntityRole::Receive, entry.rx.on_pdu(data, now, &mut out)),
            Pdu::Control(control @ ControlPdu::MoveWindow { .. }) => (
                EntityRole::Receive,
                entry.rx.on_control(&control, now, &mut out),
            ),
            Pdu::Control(control) => {
                entry.tx.on_control(&control, &mut out);
                (EntityRole::Transmit, Ok(()))
            }
        };
        let drained = state.coordinator.check_drain();

        self.dispatch(flow, leg, role, out);
        if let Some(drained) = drained {
            self.observer.on_drain_complete(flow, drained);
        }
        self.report_failure(EntityId::new(flow, leg, role), &result);
        result
    }

    /// Decode wire bytes and process them as an arrival.
    pub fn on_wire_bytes(&mut self, flow: FlowId, leg: LegId, bytes: &[u8]) -> Result<(), EngineError> {
        let pdu = wire::decode(bytes)?;
        self.on_pdu_arrival(flow, leg, pdu)
    }

    // ========================================================================
    // Mode switch
    // ========================================================================

    /// Move `flow` onto `leg`. Returns `false` if it was already there.
    pub fn switch_mode(
        &mut self,
        flow: FlowId,
        leg: LegId,
        policy: SwitchPolicy,
    ) -> Result<bool, EngineError> {
        let state = self
            .flows
            .get_mut(&flow)
            .ok_or(EngineError::UnknownFlow(flow))?;
        let FlowState {
            config,
            coordinator,
            ..
        } = state;
        let mut outputs = Vec::new();
        let result = coordinator.switch(leg, policy, |context| Leg::new(context, config), &mut outputs);
        for LegOutput { leg: touched, out, failure } in outputs {
            self.dispatch(flow, touched, EntityRole::Receive, out);
            if let Some(e) = failure {
                self.report_failure(EntityId::new(flow, touched, EntityRole::Receive), &Err(e));
            }
        }
        result
    }

    // ========================================================================
    // Event queue
    // ========================================================================

    pub fn schedule(&mut self, at: Duration, event: Event) {
        self.events.push(at, event);
    }

    pub fn schedule_arrival(&mut self, at: Duration, flow: FlowId, leg: LegId, pdu: Pdu) {
        self.schedule(at, Event::PduArrival { flow, leg, pdu });
    }

    pub fn schedule_grant(&mut self, at: Duration, flow: FlowId, bytes: usize) {
        self.schedule(at, Event::Grant { flow, bytes });
    }

    pub fn next_event_time(&self) -> Option<Duration> {
        self.events.peek_time()
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Run every event due at or before `until`, in order. Returns how many
    /// ran. Time never moves backwards.
    pub fn advance_to(&mut self, until: Duration) -> usize {
        let mut processed = 0;
        while let Some((at, event)) = self.events.pop_due(until) {
            self.now = self.now.max(at);
            self.handle(event);
            processed += 1;
        }
        self.now = self.now.max(until);
        processed
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::PduArrival { flow, leg, pdu } => {
                if let Err(e) = self.on_pdu_arrival(flow, leg, pdu) {
                    log::debug!("[LinkEngine::handle] arrival on flow {} {}: {}", flow, leg, e);
                }
            }
            Event::Grant { flow, bytes } => match self.grant_bytes(flow, bytes) {
                Ok(Some(outgoing)) => match self.wire.as_mut() {
                    Some(wire) => wire.transmit(flow, outgoing.leg, outgoing.pdu),
                    None => log::warn!(
                        "[LinkEngine::handle] no wire sink, dropping PDU for flow {}",
                        flow
                    ),
                },
                Ok(None) => {}
                Err(e) => log::debug!("[LinkEngine::handle] grant on flow {}: {}", flow, e),
            },
            Event::TimerFire { entity, generation } => self.fire_timer(entity, generation),
        }
    }

    fn fire_timer(&mut self, entity: EntityId, generation: u64) {
        let now = self.now;
        let Some(state) = self.flows.get_mut(&entity.flow) else {
            return;
        };
        let Some(leg) = state.coordinator.leg_mut(entity.leg) else {
            return;
        };
        let mut out = Outbox::new();
        let result = match entity.role {
            EntityRole::Transmit => {
                leg.tx.on_timer(generation, now, &mut out);
                Ok(())
            }
            EntityRole::Receive => leg.rx.on_timer(generation, now, &mut out),
        };
        let drained = state.coordinator.check_drain();
        log::debug!("[LinkEngine::fire_timer] {} gen={}", entity, generation);

        self.dispatch(entity.flow, entity.leg, entity.role, out);
        if let Some(drained) = drained {
            self.observer.on_drain_complete(entity.flow, drained);
        }
        self.report_failure(entity, &result);
    }

    /// Route entity output to the collaborators.
    fn dispatch(&mut self, flow: FlowId, leg: LegId, role: EntityRole, out: Outbox) {
        let Outbox {
            delivered,
            discards,
            timers,
            control,
        } = out;
        for sdu in delivered {
            self.upper.deliver(flow, sdu);
        }
        for discard in discards {
            self.observer.on_discard(flow, leg, discard.reason, discard.sn);
        }
        let entity = EntityId::new(flow, leg, role);
        for timer in timers {
            self.events.push(
                self.now + timer.delay,
                Event::TimerFire {
                    entity,
                    generation: timer.generation,
                },
            );
        }
        if !control.is_empty() {
            if let Some(entry) = self
                .flows
                .get_mut(&flow)
                .and_then(|s| s.coordinator.leg_mut(leg))
            {
                entry.control.extend(control);
            }
        }
    }

    fn report_failure(&mut self, entity: EntityId, result: &Result<(), EngineError>) {
        if let Err(e @ EngineError::FragmentationInconsistency { .. }) = result {
            self.observer.on_entity_failed(entity, e);
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn flow_stats(&self, flow: FlowId) -> Option<FlowStats> {
        let state = self.flows.get(&flow)?;
        let legs = state
            .coordinator
            .legs()
            .map(|l| LegStats {
                leg: l.id,
                state: l.state,
                tx: l.tx.stats().clone(),
                rx: l.rx.stats().clone(),
                window: *l.rx.window(),
                rx_failed: l.rx.is_failed(),
            })
            .collect();
        Some(FlowStats {
            flow,
            active_leg: state.coordinator.active(),
            next_sdu_sn: state.next_sdu_sn,
            legs,
            switch: state.coordinator.stats().clone(),
        })
    }

    pub fn receive_window(&self, flow: FlowId, leg: LegId) -> Option<WindowDescriptor> {
        self.flows
            .get(&flow)?
            .coordinator
            .leg(leg)
            .map(|l| *l.rx.window())
    }

    pub fn active_leg(&self, flow: FlowId) -> Option<LegId> {
        self.flows.get(&flow).map(|s| s.coordinator.active())
    }

    /// Bytes queued for transmission on the flow, staged SDUs excluded.
    pub fn buffered_bytes(&self, flow: FlowId) -> usize {
        self.flows
            .get(&flow)
            .map(|s| s.coordinator.legs().map(|l| l.tx.buffered_bytes()).sum())
            .unwrap_or(0)
    }
}

fn event_flow(event: &Event) -> FlowId {
    match event {
        Event::PduArrival { flow, .. } | Event::Grant { flow, .. } => *flow,
        Event::TimerFire { entity, .. } => entity.flow,
    }
}
