// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Acknowledged-mode recovery across a lossy channel.
//!
//! Two engines exchange PDUs through a channel that drops a fraction of
//! them in both directions. Data flows A -> B, status reports flow B -> A.

mod common;

use std::time::Duration;

use common::{engine, payload, Shared, FLOW};
use seglink::{AmTxConfig, DiscardReason, FlowConfig, LinkEngine, Pdu};

const SLOT: Duration = Duration::from_millis(1);
const DELAY: Duration = Duration::from_millis(5);

fn config(max_retransmissions: u32) -> FlowConfig {
    FlowConfig {
        am_tx: AmTxConfig {
            fragment_size: 100,
            max_retransmissions,
            retransmit_timeout_ms: 40,
            ..AmTxConfig::default()
        },
        ..FlowConfig::acknowledged()
    }
}

struct Link {
    a: LinkEngine,
    b: LinkEngine,
    b_record: Shared,
    rng: fastrand::Rng,
    loss: f64,
    now: Duration,
    /// Data PDUs A -> B the channel threw away.
    dropped_data: u64,
}

impl Link {
    fn new(seed: u64, loss: f64, config: FlowConfig) -> Self {
        let (mut a, _) = engine();
        let (mut b, b_record) = engine();
        a.open_flow(FLOW, config.clone()).expect("open A");
        b.open_flow(FLOW, config).expect("open B");
        Self {
            a,
            b,
            b_record,
            rng: fastrand::Rng::with_seed(seed),
            loss,
            now: Duration::ZERO,
            dropped_data: 0,
        }
    }

    /// One grant per direction, then advance both clocks by a slot.
    fn step(&mut self, grant: usize) {
        if let Some(out) = self.a.grant_bytes(FLOW, grant).expect("grant A") {
            if !out.pdu.is_sentinel() {
                if self.rng.f64() >= self.loss {
                    self.b.schedule_arrival(self.now + DELAY, FLOW, out.leg, out.pdu);
                } else if matches!(out.pdu, Pdu::Data(_)) {
                    self.dropped_data += 1;
                }
            }
        }
        if let Some(out) = self.b.grant_bytes(FLOW, grant).expect("grant B") {
            if !out.pdu.is_sentinel() && self.rng.f64() >= self.loss {
                self.a.schedule_arrival(self.now + DELAY, FLOW, out.leg, out.pdu);
            }
        }
        self.now += SLOT;
        self.a.advance_to(self.now);
        self.b.advance_to(self.now);
    }

    fn delivered(&self) -> usize {
        self.b_record.borrow().delivered.len()
    }
}

#[test]
fn test_recovers_every_sdu_under_loss() {
    for seed in 0..10 {
        let mut link = Link::new(seed, 0.2, config(32));
        let total = 120;
        let mut sent = Vec::new();
        for tag in 0..total {
            let data = payload(tag, link.rng.usize(1..=350));
            link.a.enqueue(FLOW, data.clone()).expect("enqueue");
            sent.push(data);
        }

        let mut slots = 0;
        while link.delivered() < total as usize {
            link.step(200);
            slots += 1;
            assert!(slots < 20_000, "seed {seed}: stalled at {}", link.delivered());
        }
        // let late retransmissions and duplicates settle
        for _ in 0..500 {
            link.step(200);
        }

        let record = link.b_record.borrow();
        let sns = record.delivered_sns();
        assert_eq!(sns, (0..total).collect::<Vec<_>>(), "seed {seed}");
        for sdu in &record.delivered {
            assert_eq!(sdu.data, sent[sdu.sn as usize], "seed {seed}");
        }
        assert!(record.discards_of(DiscardReason::ReassemblyImpossible).is_empty());

        let a_stats = link.a.flow_stats(FLOW).expect("stats");
        assert_eq!(a_stats.legs[0].tx.sdus_abandoned, 0, "seed {seed}");
        assert!(a_stats.legs[0].tx.retransmissions > 0, "seed {seed}");
    }
}

#[test]
fn test_retransmissions_track_losses() {
    let mut retransmissions = 0;
    let mut dropped = 0;
    for seed in 0..5 {
        let mut link = Link::new(seed, 0.05, config(AmTxConfig::default().max_retransmissions));
        let total = 150;
        for tag in 0..total {
            let len = link.rng.usize(1..=350);
            link.a.enqueue(FLOW, payload(tag, len)).expect("enqueue");
        }
        let mut slots = 0;
        while link.delivered() < total as usize {
            link.step(200);
            slots += 1;
            assert!(slots < 20_000, "seed {seed}: stalled at {}", link.delivered());
        }
        for _ in 0..500 {
            link.step(200);
        }

        let stats = link.a.flow_stats(FLOW).expect("stats");
        assert_eq!(stats.legs[0].tx.sdus_abandoned, 0, "seed {seed}");
        assert_eq!(link.b_record.borrow().delivered_sns(), (0..total).collect::<Vec<_>>());
        retransmissions += stats.legs[0].tx.retransmissions;
        dropped += link.dropped_data;
    }
    assert!(dropped > 0);
    // one retransmission per lost PDU, plus a little for lost reports
    assert!(
        retransmissions <= dropped + dropped / 2 + 2,
        "{retransmissions} retransmissions for {dropped} lost PDUs"
    );
}

#[test]
fn test_lossless_needs_no_retransmission() {
    let mut config = config(4);
    config.am_tx.retransmit_timeout_ms = 100;
    let mut link = Link::new(1, 0.0, config);
    for tag in 0..50 {
        link.a.enqueue(FLOW, payload(tag, 250)).expect("enqueue");
    }
    for _ in 0..400 {
        link.step(200);
    }
    assert_eq!(link.delivered(), 50);
    let stats = link.a.flow_stats(FLOW).expect("stats");
    assert_eq!(stats.legs[0].tx.retransmissions, 0);
    assert!(stats.bursts() >= 1);
}

#[test]
fn test_abandoned_sdu_is_skipped_by_move_window() {
    let mut link = Link::new(3, 0.0, config(0));
    link.a.enqueue(FLOW, payload(0, 150)).expect("SDU 0");
    link.a.enqueue(FLOW, payload(1, 50)).expect("SDU 1");

    // SDU 0 = PDUs 0..=1; lose PDU 1 once, with no retransmission budget
    let first = link.a.grant_bytes(FLOW, 200).expect("grant").expect("PDU 0");
    let lost = link.a.grant_bytes(FLOW, 200).expect("grant").expect("PDU 1");
    assert_eq!(lost.pdu.as_data().map(|d| d.sn), Some(1));
    link.b
        .on_pdu_arrival(FLOW, first.leg, first.pdu)
        .expect("PDU 0");

    for _ in 0..400 {
        link.step(200);
    }

    let record = link.b_record.borrow();
    assert_eq!(record.delivered_sns(), vec![1]);
    assert_eq!(record.discards_of(DiscardReason::ReassemblyImpossible), vec![0]);

    let a_stats = link.a.flow_stats(FLOW).expect("stats");
    assert_eq!(a_stats.legs[0].tx.sdus_abandoned, 1);
    assert!(a_stats.legs[0].tx.move_window_sent >= 1);
    let b_window = link.b.receive_window(FLOW, first.leg).expect("window");
    assert_eq!(b_window.next_delivered, 3);
    assert!(matches!(lost.pdu, Pdu::Data(_)));
}
