// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Two engines joined by a pair of simulated channels.
//!
//! ```text
//!   sender                      forward                     receiver
//!  +----------+  grant/slot  +-----------+  arrival event  +----------+
//!  |LinkEngine| ------------> |SimChannel | --------------> |LinkEngine| --> inbox
//!  +----------+              +-----------+                 +----------+
//!        ^                     reverse                          |
//!        +------------------- SimChannel <----------------------+
//!                        (status, move-window ack)
//! ```
//!
//! Every slot the sender is offered its share of SDUs (stopping early when
//! its buffer pushes back), each side gets one grant, and both clocks
//! advance by one slot.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use seglink::{
    wire, DeliveryMode, EngineError, EngineObserver, EntityId, FlowContext, FlowDirectory,
    FlowId, LegId, LinkEngine, Sdu, SeqNum,
};

use crate::channel::{ChannelStats, SimChannel};
use crate::config::ScenarioConfig;

const FLOW: FlowId = 1;
const SENDER_ADDR: u32 = 0x0A00_0001;
const RECEIVER_ADDR: u32 = 0x0A00_0002;

/// Leg both endpoints move to when the scenario switches.
pub const SWITCH_LEG: LegId = LegId(1);

#[derive(Debug, Default)]
struct Tally {
    drains_completed: u64,
    entity_failures: u64,
}

struct TallyObserver(Rc<RefCell<Tally>>);

impl EngineObserver for TallyObserver {
    fn on_drain_complete(&mut self, flow: FlowId, leg: LegId) {
        log::debug!("[TallyObserver::on_drain_complete] flow {} {}", flow, leg);
        self.0.borrow_mut().drains_completed += 1;
    }

    fn on_entity_failed(&mut self, entity: EntityId, error: &EngineError) {
        log::warn!("[TallyObserver::on_entity_failed] {}: {}", entity, error);
        self.0.borrow_mut().entity_failures += 1;
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub mode: DeliveryMode,
    pub sdus_offered: usize,
    /// Distinct SDUs delivered with intact payload.
    pub sdus_delivered: usize,
    pub sdus_lost: usize,
    pub sdus_duplicated: usize,
    pub sdus_corrupted: usize,
    /// Deliveries that went backwards on their leg.
    pub order_violations: usize,
    pub late_duplicates: u64,
    pub out_of_window: u64,
    pub reassembly_impossible: u64,
    pub pdus_lost: u64,
    pub discard_ratio: f64,
    pub bursts: u64,
    pub sentinels: u64,
    pub retransmissions: u64,
    pub stale_nacks: u64,
    pub sdus_abandoned: u64,
    pub backpressure_slots: u64,
    pub switches: u64,
    pub drains_completed: u64,
    pub entity_failures: u64,
    pub forward: ChannelStats,
    pub reverse: ChannelStats,
    pub slots: u64,
    pub elapsed: Duration,
}

impl Report {
    /// No SDU delivered twice and no payload altered.
    pub fn at_most_once_held(&self) -> bool {
        self.sdus_duplicated == 0 && self.sdus_corrupted == 0
    }

    pub fn ordering_held(&self) -> bool {
        self.order_violations == 0
    }

    pub fn is_clean(&self) -> bool {
        self.at_most_once_held() && self.ordering_held() && self.entity_failures == 0
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "mode:                  {:?}", self.mode)?;
        writeln!(
            f,
            "simulated time:        {:.3} s ({} slots)",
            self.elapsed.as_secs_f64(),
            self.slots
        )?;
        writeln!(f)?;
        writeln!(f, "SDUs offered:          {}", self.sdus_offered)?;
        writeln!(f, "SDUs delivered:        {}", self.sdus_delivered)?;
        writeln!(f, "SDUs lost:             {}", self.sdus_lost)?;
        writeln!(f, "SDUs duplicated:       {}", self.sdus_duplicated)?;
        writeln!(f, "SDUs corrupted:        {}", self.sdus_corrupted)?;
        writeln!(f, "order violations:      {}", self.order_violations)?;
        writeln!(f)?;
        writeln!(f, "late duplicates:       {}", self.late_duplicates)?;
        writeln!(f, "out of window:         {}", self.out_of_window)?;
        writeln!(f, "reassembly impossible: {}", self.reassembly_impossible)?;
        writeln!(f, "PDUs skipped:          {}", self.pdus_lost)?;
        writeln!(f, "discard ratio:         {:.4}", self.discard_ratio)?;
        writeln!(f)?;
        writeln!(f, "bursts:                {}", self.bursts)?;
        writeln!(f, "sentinels:             {}", self.sentinels)?;
        writeln!(f, "retransmissions:       {}", self.retransmissions)?;
        writeln!(f, "stale NACKs ignored:   {}", self.stale_nacks)?;
        writeln!(f, "SDUs abandoned:        {}", self.sdus_abandoned)?;
        writeln!(f, "backpressure slots:    {}", self.backpressure_slots)?;
        writeln!(
            f,
            "switches:              {} ({} drains completed)",
            self.switches, self.drains_completed
        )?;
        writeln!(
            f,
            "forward channel:       {} PDUs ({} B), {} dropped",
            self.forward.pdus_sent, self.forward.bytes_sent, self.forward.pdus_dropped
        )?;
        write!(
            f,
            "reverse channel:       {} PDUs ({} B), {} dropped",
            self.reverse.pdus_sent, self.reverse.bytes_sent, self.reverse.pdus_dropped
        )
    }
}

/// One-way bulk transfer between two engines.
pub struct Simulation {
    config: ScenarioConfig,
    sender: LinkEngine,
    receiver: LinkEngine,
    forward: SimChannel,
    reverse: SimChannel,
    inbox: Rc<RefCell<Vec<Sdu>>>,
    sender_tally: Rc<RefCell<Tally>>,
    receiver_tally: Rc<RefCell<Tally>>,
    payloads: Vec<Vec<u8>>,
    offered: usize,
    switched: bool,
    backpressure_slots: u64,
    now: Duration,
    slots: u64,
}

impl Simulation {
    pub fn new(config: ScenarioConfig) -> Result<Self> {
        config.validate().context("invalid scenario")?;

        let directory = || {
            FlowDirectory::new().with(FlowContext::new(FLOW, SENDER_ADDR, RECEIVER_ADDR))
        };
        let sender_tally = Rc::new(RefCell::new(Tally::default()));
        let receiver_tally = Rc::new(RefCell::new(Tally::default()));
        let inbox = Rc::new(RefCell::new(Vec::new()));

        let sink = Rc::clone(&inbox);
        let mut sender = LinkEngine::new(directory(), |_flow: FlowId, sdu: Sdu| {
            log::warn!("[Simulation] sender received SDU {}", sdu.sn);
        })
        .with_observer(TallyObserver(Rc::clone(&sender_tally)));
        let mut receiver = LinkEngine::new(directory(), move |_flow: FlowId, sdu: Sdu| {
            sink.borrow_mut().push(sdu);
        })
        .with_observer(TallyObserver(Rc::clone(&receiver_tally)));

        sender.open_flow(FLOW, config.flow.clone())?;
        receiver.open_flow(FLOW, config.flow.clone())?;

        let traffic = &config.traffic;
        let mut rng = fastrand::Rng::with_seed(traffic.seed);
        let payloads = (0..traffic.sdus)
            .map(|tag| payload(tag, rng.usize(traffic.min_sdu_len..=traffic.max_sdu_len)))
            .collect();

        // distinct streams per direction, both derived from the scenario seed
        let forward = SimChannel::new(config.channel.clone(), traffic.seed.wrapping_mul(31).wrapping_add(1));
        let reverse = SimChannel::new(config.channel.clone(), traffic.seed.wrapping_mul(31).wrapping_add(2));

        Ok(Self {
            config,
            sender,
            receiver,
            forward,
            reverse,
            inbox,
            sender_tally,
            receiver_tally,
            payloads,
            offered: 0,
            switched: false,
            backpressure_slots: 0,
            now: Duration::ZERO,
            slots: 0,
        })
    }

    /// Run until every SDU arrived, or the link stayed idle for the
    /// settle period, or the slot limit was hit.
    pub fn run(mut self) -> Result<Report> {
        let traffic = self.config.traffic.clone();
        let total = self.payloads.len();
        let mut idle = 0;
        let mut last_delivered = 0;

        while self.slots < traffic.max_slots {
            self.step()?;

            let delivered = self.inbox.borrow().len();
            if delivered >= total {
                break;
            }
            let quiet = self.offered == total
                && self.sender.buffered_bytes(FLOW) == 0
                && delivered == last_delivered;
            idle = if quiet { idle + 1 } else { 0 };
            last_delivered = delivered;
            if idle >= traffic.settle_slots {
                break;
            }
        }
        if self.slots >= traffic.max_slots {
            log::warn!(
                "[Simulation::run] slot limit {} reached with {} of {} SDUs delivered",
                traffic.max_slots,
                self.inbox.borrow().len(),
                total
            );
        }
        Ok(self.report())
    }

    fn step(&mut self) -> Result<()> {
        self.offer()?;

        let grant = self.config.traffic.grant_bytes;
        if let Some(out) = self.sender.grant_bytes(FLOW, grant)? {
            if !out.pdu.is_sentinel() {
                if let Some(at) = self.forward.transit(self.now, wire::encoded_len(&out.pdu)) {
                    self.receiver.schedule_arrival(at, FLOW, out.leg, out.pdu);
                }
            }
        }
        if let Some(out) = self.receiver.grant_bytes(FLOW, grant)? {
            if !out.pdu.is_sentinel() {
                if let Some(at) = self.reverse.transit(self.now, wire::encoded_len(&out.pdu)) {
                    self.sender.schedule_arrival(at, FLOW, out.leg, out.pdu);
                }
            }
        }

        self.now += Duration::from_millis(self.config.traffic.slot_ms);
        self.slots += 1;
        self.sender.advance_to(self.now);
        self.receiver.advance_to(self.now);
        Ok(())
    }

    /// Enqueue this slot's SDUs until the sender pushes back.
    fn offer(&mut self) -> Result<()> {
        let limit = match self.config.traffic.sdus_per_slot {
            0 => self.payloads.len(),
            n => (self.offered + n).min(self.payloads.len()),
        };
        while self.offered < limit {
            if let Some(switch) = self.config.switch {
                if !self.switched && self.offered == switch.after_sdus {
                    log::info!(
                        "[Simulation::offer] switching to {} ({:?}) after {} SDUs",
                        SWITCH_LEG,
                        switch.policy,
                        self.offered
                    );
                    self.sender.switch_mode(FLOW, SWITCH_LEG, switch.policy.into())?;
                    self.receiver.switch_mode(FLOW, SWITCH_LEG, switch.policy.into())?;
                    self.switched = true;
                }
            }
            match self.sender.enqueue(FLOW, self.payloads[self.offered].clone()) {
                Ok(_) => self.offered += 1,
                Err(EngineError::BufferFull { .. }) => {
                    self.backpressure_slots += 1;
                    break;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("enqueue of SDU {}", self.offered))
                }
            }
        }
        Ok(())
    }

    fn report(&self) -> Report {
        let mut report = Report {
            mode: self.config.flow.mode,
            sdus_offered: self.payloads.len(),
            backpressure_slots: self.backpressure_slots,
            forward: self.forward.stats(),
            reverse: self.reverse.stats(),
            slots: self.slots,
            elapsed: self.now,
            ..Report::default()
        };

        let mut seen = vec![false; self.payloads.len()];
        let mut last_per_leg: BTreeMap<LegId, SeqNum> = BTreeMap::new();
        for sdu in self.inbox.borrow().iter() {
            let Some(expected) = self.payloads.get(sdu.sn as usize) else {
                report.sdus_corrupted += 1;
                continue;
            };
            let idx = sdu.sn as usize;
            if seen[idx] {
                report.sdus_duplicated += 1;
                continue;
            }
            seen[idx] = true;
            if sdu.data != *expected {
                report.sdus_corrupted += 1;
                continue;
            }
            report.sdus_delivered += 1;

            let leg = sdu.context.leg;
            if let Some(&last) = last_per_leg.get(&leg) {
                if sdu.sn < last {
                    report.order_violations += 1;
                }
            }
            last_per_leg.insert(leg, sdu.sn);
        }
        report.sdus_lost = seen.iter().filter(|s| !**s).count();

        if let Some(rx) = self.receiver.flow_stats(FLOW) {
            for leg in &rx.legs {
                report.late_duplicates += leg.rx.late_duplicates;
                report.out_of_window += leg.rx.out_of_window;
                report.reassembly_impossible += leg.rx.reassembly_impossible;
                report.pdus_lost += leg.rx.pdus_lost;
            }
            report.discard_ratio = rx.discard_ratio();
        }
        if let Some(tx) = self.sender.flow_stats(FLOW) {
            for leg in &tx.legs {
                report.sentinels += leg.tx.sentinels;
                report.retransmissions += leg.tx.retransmissions;
                report.stale_nacks += leg.tx.stale_nacks;
                report.sdus_abandoned += leg.tx.sdus_abandoned;
            }
            report.bursts = tx.bursts();
            report.switches = tx.switch.switches;
        }
        report.drains_completed = self.sender_tally.borrow().drains_completed;
        report.entity_failures = self.sender_tally.borrow().entity_failures
            + self.receiver_tally.borrow().entity_failures;
        report
    }
}

/// Deterministic payload: the tag, then a byte ramp seeded by it.
fn payload(tag: usize, len: usize) -> Vec<u8> {
    let head = (tag as u32).to_le_bytes();
    (0..len)
        .map(|i| match head.get(i) {
            Some(b) => *b,
            None => (tag.wrapping_add(i) & 0xFF) as u8,
        })
        .collect()
}
