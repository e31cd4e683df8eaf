// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receive window cursors and slot storage.
//!
//! Shared by both receive entities. The window covers
//! `[next_delivered, next_delivered + window_size)`; slot `i` of a
//! [`SlotBuffer`] holds PDU `next_delivered + i`.
//!
//! # Invariant
//!
//! `next_delivered <= next_expected <= next_delivered + window_size`
//!
//! # Example
//!
//! ```
//! use seglink::window::{WindowDescriptor, WindowPosition};
//!
//! let mut w = WindowDescriptor::new(8);
//! w.note_received(3);          // next_expected = 4
//! assert!(w.has_gap());        // 0..3 missing
//! w.advance(4);                // next_delivered = 4
//! assert_eq!(w.classify(2), WindowPosition::Duplicate);
//! assert_eq!(w.classify(5), WindowPosition::InWindow(1));
//! assert_eq!(w.classify(12), WindowPosition::Beyond(1));
//! ```

use std::collections::VecDeque;

use crate::pdu::SeqNum;

/// Where a sequence number falls relative to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPosition {
    /// Below `next_delivered`.
    Duplicate,
    /// Inside the window, at this slot index.
    InWindow(usize),
    /// Beyond the window; the window must slide by this many slots to admit it.
    Beyond(u32),
}

/// Receive window cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDescriptor {
    pub window_size: u32,
    /// One past the highest sequence number received.
    pub next_expected: SeqNum,
    /// Lowest sequence number not yet delivered (or skipped).
    pub next_delivered: SeqNum,
    /// `next_expected` captured when the reordering timer was armed.
    pub reorder_trigger: SeqNum,
}

impl WindowDescriptor {
    pub fn new(window_size: u32) -> Self {
        Self {
            window_size,
            next_expected: 0,
            next_delivered: 0,
            reorder_trigger: 0,
        }
    }

    /// Re-seed every cursor at `start`.
    pub fn reset(&mut self, start: SeqNum) {
        self.next_expected = start;
        self.next_delivered = start;
        self.reorder_trigger = start;
    }

    /// One past the last sequence number inside the window.
    pub fn upper_edge(&self) -> u64 {
        u64::from(self.next_delivered) + u64::from(self.window_size)
    }

    pub fn classify(&self, sn: SeqNum) -> WindowPosition {
        if sn < self.next_delivered {
            WindowPosition::Duplicate
        } else if u64::from(sn) < self.upper_edge() {
            WindowPosition::InWindow((sn - self.next_delivered) as usize)
        } else {
            let excess = u64::from(sn) + 1 - self.upper_edge();
            WindowPosition::Beyond(u32::try_from(excess).unwrap_or(u32::MAX))
        }
    }

    /// Record the arrival of `sn` (must be inside the window).
    pub fn note_received(&mut self, sn: SeqNum) {
        self.next_expected = self.next_expected.max(sn.saturating_add(1));
    }

    /// Slide `next_delivered` forward by `k`.
    pub fn advance(&mut self, k: u32) {
        self.next_delivered = self.next_delivered.saturating_add(k);
        self.next_expected = self.next_expected.max(self.next_delivered);
    }

    /// Some PDU between `next_delivered` and `next_expected` is missing.
    pub fn has_gap(&self) -> bool {
        self.next_delivered < self.next_expected
    }

    pub fn is_consistent(&self) -> bool {
        self.next_delivered <= self.next_expected
            && u64::from(self.next_expected) <= self.upper_edge()
    }
}

/// Window-aligned PDU storage: slot 0 is `next_delivered`.
#[derive(Debug, Clone)]
pub struct SlotBuffer<T> {
    slots: VecDeque<Option<T>>,
    occupied: usize,
}

impl<T> SlotBuffer<T> {
    pub fn new(size: u32) -> Self {
        let mut slots = VecDeque::with_capacity(size as usize);
        slots.resize_with(size as usize, || None);
        Self { slots, occupied: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of filled slots.
    pub fn occupied(&self) -> usize {
        self.occupied
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    pub fn get(&self, idx: usize) -> Option<&T> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    pub fn is_filled(&self, idx: usize) -> bool {
        self.get(idx).is_some()
    }

    /// Store `item` in an empty slot. Hands the item back when the slot is
    /// taken or out of range.
    pub fn insert(&mut self, idx: usize, item: T) -> Result<(), T> {
        match self.slots.get_mut(idx) {
            Some(slot) if slot.is_none() => {
                *slot = Some(item);
                self.occupied += 1;
                Ok(())
            }
            _ => Err(item),
        }
    }

    pub fn front(&self) -> Option<&T> {
        self.get(0)
    }

    /// Shift left by one slot, returning what was at slot 0.
    pub fn pop_front(&mut self) -> Option<T> {
        let item = self.slots.pop_front().flatten();
        self.slots.push_back(None);
        if item.is_some() {
            self.occupied -= 1;
        }
        item
    }

    /// Bitmap of filled slots.
    pub fn bitmap(&self) -> Vec<bool> {
        self.slots.iter().map(Option::is_some).collect()
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.occupied = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let mut w = WindowDescriptor::new(16);
        w.advance(20);
        assert_eq!(w.classify(19), WindowPosition::Duplicate);
        assert_eq!(w.classify(20), WindowPosition::InWindow(0));
        assert_eq!(w.classify(35), WindowPosition::InWindow(15));
        assert_eq!(w.classify(36), WindowPosition::Beyond(1));
        assert_eq!(w.classify(40), WindowPosition::Beyond(5));
    }

    #[test]
    fn test_cursors_stay_consistent() {
        let mut w = WindowDescriptor::new(4);
        w.note_received(2);
        assert_eq!(w.next_expected, 3);
        assert!(w.has_gap());
        w.note_received(1);
        assert_eq!(w.next_expected, 3);
        w.advance(3);
        assert!(!w.has_gap());
        w.advance(2);
        assert_eq!(w.next_expected, 5);
        assert!(w.is_consistent());
    }

    #[test]
    fn test_slot_buffer_shift() {
        let mut slots: SlotBuffer<u32> = SlotBuffer::new(4);
        assert!(slots.insert(1, 11).is_ok());
        assert_eq!(slots.insert(1, 12), Err(12));
        assert_eq!(slots.insert(4, 99), Err(99));
        assert_eq!(slots.bitmap(), vec![false, true, false, false]);
        assert_eq!(slots.pop_front(), None);
        assert_eq!(slots.front(), Some(&11));
        assert_eq!(slots.pop_front(), Some(11));
        assert!(slots.is_empty());
        assert_eq!(slots.capacity(), 4);
    }
}
