// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One direction of a simulated link.
//!
//! Each PDU handed to the channel is either dropped (Bernoulli loss) or
//! given an arrival time `now + delay +/- jitter`. Jitter larger than the
//! slot length reorders PDUs.

use std::time::Duration;

use crate::config::ChannelConfig;

/// Channel counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    pub pdus_sent: u64,
    pub bytes_sent: u64,
    pub pdus_dropped: u64,
}

/// Lossy, delaying channel driven by a seeded PRNG.
#[derive(Debug)]
pub struct SimChannel {
    config: ChannelConfig,
    rng: fastrand::Rng,
    stats: ChannelStats,
}

impl SimChannel {
    pub fn new(config: ChannelConfig, seed: u64) -> Self {
        Self {
            config,
            rng: fastrand::Rng::with_seed(seed),
            stats: ChannelStats::default(),
        }
    }

    /// Offer a PDU of `len` bytes at `now`. Returns its arrival time, or
    /// `None` if it was lost.
    pub fn transit(&mut self, now: Duration, len: usize) -> Option<Duration> {
        self.stats.pdus_sent += 1;
        self.stats.bytes_sent += len as u64;

        if self.config.loss_rate > 0.0 && self.rng.f64() < self.config.loss_rate {
            self.stats.pdus_dropped += 1;
            return None;
        }
        Some(now + self.delay())
    }

    fn delay(&mut self) -> Duration {
        let base = self.config.delay_ms;
        let jitter = self.config.jitter_ms;
        let ms = if jitter == 0 {
            base
        } else {
            // uniform in [base - jitter, base + jitter], floored at 0
            let offset = self.rng.u64(0..=2 * jitter);
            (base + offset).saturating_sub(jitter)
        };
        Duration::from_millis(ms)
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_channel_fixed_delay() {
        let config = ChannelConfig {
            loss_rate: 0.0,
            delay_ms: 7,
            jitter_ms: 0,
        };
        let mut ch = SimChannel::new(config, 0);
        for i in 0..100 {
            let now = Duration::from_millis(i);
            assert_eq!(ch.transit(now, 10), Some(now + Duration::from_millis(7)));
        }
        let stats = ch.stats();
        assert_eq!(stats.pdus_sent, 100);
        assert_eq!(stats.bytes_sent, 1000);
        assert_eq!(stats.pdus_dropped, 0);
    }

    #[test]
    fn test_loss_rate_roughly_honoured() {
        let mut ch = SimChannel::new(ChannelConfig::lossy(0.3), 42);
        let delivered = (0..10_000)
            .filter(|_| ch.transit(Duration::ZERO, 1).is_some())
            .count();
        assert!((6_500..7_500).contains(&delivered), "delivered {delivered}");
        assert_eq!(ch.stats().pdus_dropped, 10_000 - delivered as u64);
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let config = ChannelConfig {
            loss_rate: 0.0,
            delay_ms: 5,
            jitter_ms: 10,
        };
        let mut ch = SimChannel::new(config, 3);
        let mut seen_zero = false;
        let mut seen_max = false;
        for _ in 0..5_000 {
            let at = ch.transit(Duration::ZERO, 1).expect("lossless");
            assert!(at <= Duration::from_millis(15));
            seen_zero |= at == Duration::ZERO;
            seen_max |= at == Duration::from_millis(15);
        }
        assert!(seen_zero && seen_max);
    }

    #[test]
    fn test_same_seed_same_fate() {
        let mut a = SimChannel::new(ChannelConfig::tactical_radio(), 9);
        let mut b = SimChannel::new(ChannelConfig::tactical_radio(), 9);
        for i in 0..500 {
            let now = Duration::from_millis(i);
            assert_eq!(a.transit(now, 64), b.transit(now, 64));
        }
    }
}
