// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Flow identity and context lookup.
//!
//! A [`FlowContext`] is shared by reference (`Arc`) between every SDU and PDU
//! of a flow. Resolving a flow id to its context goes through an injected
//! [`FlowContextProvider`]; [`FlowDirectory`] is the map-backed default.

use std::collections::HashMap;
use std::fmt;

/// Flow identifier.
pub type FlowId = u32;

/// Node address.
pub type NodeAddr = u32;

/// Delivery leg of a flow (e.g. infrastructure path vs direct path).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct LegId(pub u8);

impl fmt::Display for LegId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "leg{}", self.0)
    }
}

/// Per-flow routing and QoS metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowContext {
    pub flow_id: FlowId,
    pub source: NodeAddr,
    pub destination: NodeAddr,
    /// Traffic class (0 = best effort).
    pub traffic_class: u8,
    /// Leg currently carrying the flow.
    pub leg: LegId,
}

impl FlowContext {
    pub fn new(flow_id: FlowId, source: NodeAddr, destination: NodeAddr) -> Self {
        Self {
            flow_id,
            source,
            destination,
            traffic_class: 0,
            leg: LegId::default(),
        }
    }

    pub fn with_traffic_class(mut self, traffic_class: u8) -> Self {
        self.traffic_class = traffic_class;
        self
    }

    pub fn on_leg(mut self, leg: LegId) -> Self {
        self.leg = leg;
        self
    }

    /// Successor context after a mode switch.
    pub fn successor(&self, leg: LegId) -> Self {
        Self {
            leg,
            ..self.clone()
        }
    }
}

/// Resolves a flow id to its context.
pub trait FlowContextProvider {
    fn resolve(&self, flow: FlowId) -> Option<FlowContext>;
}

/// Map-backed [`FlowContextProvider`].
#[derive(Debug, Default, Clone)]
pub struct FlowDirectory {
    flows: HashMap<FlowId, FlowContext>,
}

impl FlowDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a context.
    pub fn insert(&mut self, context: FlowContext) {
        self.flows.insert(context.flow_id, context);
    }

    /// Builder-style [`FlowDirectory::insert`].
    pub fn with(mut self, context: FlowContext) -> Self {
        self.insert(context);
        self
    }

    pub fn remove(&mut self, flow: FlowId) -> Option<FlowContext> {
        self.flows.remove(&flow)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

impl FlowContextProvider for FlowDirectory {
    fn resolve(&self, flow: FlowId) -> Option<FlowContext> {
        self.flows.get(&flow).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successor_keeps_identity() {
        let ctx = FlowContext::new(7, 1, 2).with_traffic_class(3);
        let next = ctx.successor(LegId(1));
        assert_eq!(next.flow_id, 7);
        assert_eq!(next.traffic_class, 3);
        assert_eq!(next.leg, LegId(1));
        assert_eq!(ctx.leg, LegId(0));
    }

    #[test]
    fn test_directory_resolve() {
        let mut dir = FlowDirectory::new().with(FlowContext::new(1, 10, 20));
        assert_eq!(dir.resolve(1).map(|c| c.destination), Some(20));
        assert!(dir.resolve(2).is_none());
        dir.remove(1);
        assert!(dir.is_empty());
    }
}
