// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end delivery scenarios through the public engine API.
//!
//! Byte budgets are the payload size plus the 2-byte nominal header.

mod common;

use std::time::Duration;

use common::{engine, payload, FLOW};
use seglink::{
    AmRxConfig, AmTxConfig, DataPdu, DiscardReason, FlowConfig, FragmentDescriptor, FramingInfo,
    LegId, Pdu, Segment, SwitchPolicy,
};

const HEADER: usize = 2;

fn grant_all(engine: &mut seglink::LinkEngine, bytes: usize) -> Vec<seglink::Outgoing> {
    std::iter::from_fn(|| engine.grant_bytes(FLOW, bytes).expect("grant")).collect()
}

#[test]
fn test_whole_sdu_no_loss() {
    let (mut e, record) = engine();
    e.open_flow(FLOW, FlowConfig::unacknowledged()).expect("open");
    e.enqueue(FLOW, payload(0, 100)).expect("enqueue");

    let out = grant_all(&mut e, 200);
    assert_eq!(out.len(), 1);
    let pdu = out[0].pdu.as_data().expect("data PDU").clone();
    assert_eq!(pdu.framing, FramingInfo::WHOLE);
    assert_eq!(pdu.framing.bits(), 0b00);
    assert_eq!(pdu.payload_len(), 100);

    e.on_pdu_arrival(FLOW, out[0].leg, out[0].pdu.clone()).expect("arrival");
    let record = record.borrow();
    assert_eq!(record.delivered.len(), 1);
    assert_eq!(record.delivered[0].data, payload(0, 100));
}

#[test]
fn test_fragmentation_across_two_grants() {
    let (mut e, record) = engine();
    e.open_flow(FLOW, FlowConfig::unacknowledged()).expect("open");
    e.enqueue(FLOW, payload(0, 150)).expect("enqueue");

    let first = e.grant_bytes(FLOW, 100 + HEADER).expect("grant").expect("PDU1");
    let second = e.grant_bytes(FLOW, 100 + HEADER).expect("grant").expect("PDU2");
    assert_eq!(e.grant_bytes(FLOW, 100 + HEADER).expect("grant"), None);

    let p1 = first.pdu.as_data().expect("data");
    let p2 = second.pdu.as_data().expect("data");
    assert_eq!(p1.framing.bits(), 0b10);
    assert_eq!(p1.payload_len(), 100);
    assert_eq!(p2.framing.bits(), 0b01);
    assert_eq!(p2.payload_len(), 50);

    e.on_pdu_arrival(FLOW, first.leg, first.pdu.clone()).expect("PDU1");
    assert!(record.borrow().delivered.is_empty());
    e.on_pdu_arrival(FLOW, second.leg, second.pdu.clone()).expect("PDU2");
    assert_eq!(record.borrow().delivered.len(), 1);
    assert_eq!(record.borrow().delivered[0].data, payload(0, 150));
}

#[test]
fn test_fragments_arriving_reversed() {
    let (mut e, record) = engine();
    e.open_flow(FLOW, FlowConfig::unacknowledged()).expect("open");
    e.enqueue(FLOW, payload(0, 150)).expect("enqueue");
    let out = grant_all(&mut e, 100 + HEADER);
    assert_eq!(out.len(), 2);

    e.on_pdu_arrival(FLOW, out[1].leg, out[1].pdu.clone()).expect("PDU2");
    assert!(record.borrow().delivered.is_empty(), "held until PDU1 arrives");
    e.on_pdu_arrival(FLOW, out[0].leg, out[0].pdu.clone()).expect("PDU1");

    let record = record.borrow();
    assert_eq!(record.delivered.len(), 1);
    assert_eq!(record.delivered[0].data, payload(0, 150));
    assert!(record.discards.is_empty());
}

#[test]
fn test_timeout_forced_gap_skip() {
    let (mut e, record) = engine();
    let config = FlowConfig::unacknowledged();
    let timeout = config.um_rx.reordering_timeout();
    assert!(config.um_rx.window_size >= 5);
    e.open_flow(FLOW, config).expect("open");

    // 10-byte payload per PDU:
    //   PDU0-1: SDU0 | PDU2-3: SDU1 | PDU3: SDU2 | PDU4: SDU3
    for (tag, len) in [(0, 20), (1, 15), (2, 5), (3, 10)] {
        e.enqueue(FLOW, payload(tag, len)).expect("enqueue");
    }
    let out = grant_all(&mut e, 10 + HEADER);
    assert_eq!(out.len(), 5);

    for i in [0, 1, 3, 4] {
        e.on_pdu_arrival(FLOW, out[i].leg, out[i].pdu.clone()).expect("arrival");
    }
    assert_eq!(record.borrow().delivered_sns(), vec![0]);

    e.advance_to(timeout - Duration::from_millis(1));
    assert_eq!(record.borrow().delivered_sns(), vec![0]);

    e.advance_to(timeout);
    let record = record.borrow();
    assert_eq!(record.delivered_sns(), vec![0, 2, 3]);
    assert_eq!(record.delivered[1].data, payload(2, 5));
    assert_eq!(record.discards_of(DiscardReason::ReassemblyImpossible), vec![1]);

    let window = e.receive_window(FLOW, LegId::default()).expect("window");
    assert_eq!(window.next_delivered, 5);
    assert!(window.is_consistent());
}

fn am_pdu(sn: u32) -> Pdu {
    Pdu::Data(
        DataPdu::new(sn, vec![Segment::whole(sn, payload(sn, 8))])
            .with_fragment(FragmentDescriptor::whole(sn)),
    )
}

#[test]
fn test_arq_out_of_window_discard() {
    let (mut e, record) = engine();
    let config = FlowConfig {
        am_tx: AmTxConfig {
            window_size: 16,
            ..AmTxConfig::default()
        },
        am_rx: AmRxConfig {
            window_size: 16,
            ..AmRxConfig::default()
        },
        ..FlowConfig::acknowledged()
    };
    e.open_flow(FLOW, config).expect("open");
    let leg = LegId::default();

    for sn in 0..20 {
        e.on_pdu_arrival(FLOW, leg, am_pdu(sn)).expect("in order");
    }
    let before = e.receive_window(FLOW, leg).expect("window");
    assert_eq!(before.next_delivered, 20);
    assert_eq!(before.window_size, 16);

    e.on_pdu_arrival(FLOW, leg, am_pdu(40)).expect("discard is not an error");

    let after = e.receive_window(FLOW, leg).expect("window");
    assert_eq!(after, before, "no window movement");
    assert_eq!(record.borrow().discards_of(DiscardReason::OutOfWindow), vec![40]);
    assert_eq!(record.borrow().delivered.len(), 20);
    let stats = e.flow_stats(FLOW).expect("stats");
    assert_eq!(stats.legs[0].rx.out_of_window, 1);
}

#[test]
fn test_mode_switch_drain() {
    let (mut tx, tx_record) = engine();
    let (mut rx, rx_record) = engine();
    tx.open_flow(FLOW, FlowConfig::unacknowledged()).expect("open");
    rx.open_flow(FLOW, FlowConfig::unacknowledged()).expect("open");
    let (old, new) = (LegId(0), LegId(1));

    for tag in 0..3 {
        tx.enqueue(FLOW, payload(tag, 10)).expect("enqueue");
    }
    tx.switch_mode(FLOW, new, SwitchPolicy::Drain).expect("switch");
    rx.switch_mode(FLOW, new, SwitchPolicy::Drain).expect("switch");
    assert_eq!(tx.active_leg(FLOW), Some(new));

    for tag in 3..5 {
        tx.enqueue(FLOW, payload(tag, 10)).expect("held");
    }
    let stats = tx.flow_stats(FLOW).expect("stats");
    assert_eq!(stats.switch.sdus_staged, 2);
    assert_eq!(tx.buffered_bytes(FLOW), 30, "held SDUs invisible to produce");

    let out = grant_all(&mut tx, 10 + HEADER);
    assert_eq!(out.len(), 5);
    let legs: Vec<_> = out.iter().map(|o| o.leg).collect();
    assert_eq!(legs, vec![old, old, old, new, new]);
    assert_eq!(tx_record.borrow().drained, vec![old]);

    let sdus: Vec<_> = out
        .iter()
        .filter_map(|o| o.pdu.as_data())
        .map(|p| (p.sn, p.segments[0].sdu_sn))
        .collect();
    assert_eq!(sdus, vec![(0, 0), (1, 1), (2, 2), (0, 3), (1, 4)]);

    for o in out {
        rx.on_pdu_arrival(FLOW, o.leg, o.pdu).expect("arrival");
    }
    assert_eq!(rx_record.borrow().delivered_sns(), vec![0, 1, 2, 3, 4]);
    assert!(rx_record.borrow().discards.is_empty());
}
