// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use seglink::{FlowConfig, FlowContext, FlowDirectory, FlowId, LegId, LinkEngine, Sdu};

fuzz_target!(|data: &[u8]| {
    // byte 0: mode, then length-prefixed frames, each arriving 1 ms apart
    let Some((&mode, mut rest)) = data.split_first() else {
        return;
    };
    let config = if mode & 1 == 0 {
        FlowConfig::unacknowledged()
    } else {
        FlowConfig::acknowledged()
    };
    let directory = FlowDirectory::new().with(FlowContext::new(1, 1, 2));
    let mut engine = LinkEngine::new(directory, |_flow: FlowId, _sdu: Sdu| {});
    if engine.open_flow(1, config).is_err() {
        return;
    }

    let mut now = Duration::ZERO;
    while let Some((&len, tail)) = rest.split_first() {
        let len = usize::from(len).min(tail.len());
        let (frame, tail) = tail.split_at(len);
        let _ = engine.on_wire_bytes(1, LegId(0), frame);
        for _ in 0..16 {
            if engine.grant_bytes(1, 1024).ok().flatten().is_none() {
                break;
            }
        }
        now += Duration::from_millis(1);
        engine.advance_to(now);
        rest = tail;
    }
    engine.advance_to(now + Duration::from_secs(5));
});
