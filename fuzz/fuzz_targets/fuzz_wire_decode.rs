// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use seglink::wire::{decode, encode};

fuzz_target!(|data: &[u8]| {
    // Anything that decodes must survive a re-encode unchanged
    if let Ok(pdu) = decode(data) {
        if let Ok(bytes) = encode(&pdu) {
            assert_eq!(decode(&bytes).ok(), Some(pdu));
        }
    }
});
