// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use seglink::{
    BurstTransition, DiscardReason, EngineError, EngineObserver, EntityId, FlowContext,
    FlowDirectory, FlowId, LegId, LinkEngine, Sdu, SeqNum,
};

pub const FLOW: FlowId = 1;

/// Everything an engine handed to its collaborators.
#[derive(Debug, Default)]
pub struct Record {
    pub delivered: Vec<Sdu>,
    pub discards: Vec<(LegId, DiscardReason, SeqNum)>,
    pub bursts: Vec<BurstTransition>,
    pub drained: Vec<LegId>,
    pub failed: Vec<EntityId>,
}

impl Record {
    pub fn delivered_sns(&self) -> Vec<SeqNum> {
        self.delivered.iter().map(|s| s.sn).collect()
    }

    pub fn discards_of(&self, reason: DiscardReason) -> Vec<SeqNum> {
        self.discards
            .iter()
            .filter(|(_, r, _)| *r == reason)
            .map(|(_, _, sn)| *sn)
            .collect()
    }
}

pub type Shared = Rc<RefCell<Record>>;

struct Observer(Shared);

impl EngineObserver for Observer {
    fn on_discard(&mut self, _flow: FlowId, leg: LegId, reason: DiscardReason, sn: SeqNum) {
        self.0.borrow_mut().discards.push((leg, reason, sn));
    }

    fn on_burst(&mut self, _flow: FlowId, _leg: LegId, transition: BurstTransition) {
        self.0.borrow_mut().bursts.push(transition);
    }

    fn on_drain_complete(&mut self, _flow: FlowId, leg: LegId) {
        self.0.borrow_mut().drained.push(leg);
    }

    fn on_entity_failed(&mut self, entity: EntityId, _error: &EngineError) {
        self.0.borrow_mut().failed.push(entity);
    }
}

/// Engine serving `FLOW`, recording deliveries and notifications.
pub fn engine() -> (LinkEngine, Shared) {
    let record: Shared = Rc::default();
    let sink = Rc::clone(&record);
    let directory = FlowDirectory::new().with(FlowContext::new(FLOW, 100, 200));
    let engine = LinkEngine::new(directory, move |_flow: FlowId, sdu: Sdu| {
        sink.borrow_mut().delivered.push(sdu);
    })
    .with_observer(Observer(Rc::clone(&record)));
    (engine, record)
}

/// Deterministic payload whose bytes identify the SDU.
pub fn payload(tag: u32, len: usize) -> Vec<u8> {
    (0..len).map(|i| (tag as usize * 31 + i) as u8).collect()
}
