// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Entity and flow configuration.
//!
//! Every struct has a `Default` tuned for a moderately lossy terrestrial link,
//! plus named presets. Durations are stored in milliseconds so the structs map
//! one-to-one onto scenario files (behind the `serde` feature).

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Default PDU header overhead counted against each grant, in bytes.
pub const DEFAULT_HEADER_OVERHEAD: usize = 2;

/// Default transmit buffer capacity, in bytes.
pub const DEFAULT_TX_CAPACITY: usize = 64 * 1024;

/// Largest window any entity accepts.
pub const MAX_WINDOW_SIZE: u32 = 4096;

/// Unacknowledged transmit configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct TxConfig {
    /// Hard cap on buffered SDU bytes (0 = unbounded).
    pub capacity_bytes: usize,
    /// Fixed per-PDU header bytes charged against every grant.
    pub header_overhead: usize,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: DEFAULT_TX_CAPACITY,
            header_overhead: DEFAULT_HEADER_OVERHEAD,
        }
    }
}

impl TxConfig {
    /// No capacity limit.
    pub fn unbounded() -> Self {
        Self {
            capacity_bytes: 0,
            ..Self::default()
        }
    }
}

/// What an unacknowledged receiver does with a PDU beyond its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(tag = "kind", rename_all = "snake_case")
)]
pub enum UmOutOfWindowPolicy {
    /// Slide the window forward to admit the PDU when the slide is at most
    /// `max_slide` slots; discard otherwise.
    Slide { max_slide: u32 },
    /// Always discard.
    Discard,
}

/// Unacknowledged receive configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct UmRxConfig {
    /// Reordering window, in PDUs.
    pub window_size: u32,
    /// Reordering timer duration in milliseconds.
    pub reordering_timeout_ms: u64,
    /// Out-of-window handling.
    pub out_of_window: UmOutOfWindowPolicy,
    /// Point-to-multipoint leg: window of one, seeded by the first PDU.
    pub multicast: bool,
}

impl Default for UmRxConfig {
    fn default() -> Self {
        Self {
            window_size: 32,
            reordering_timeout_ms: 50,
            out_of_window: UmOutOfWindowPolicy::Slide { max_slide: 32 },
            multicast: false,
        }
    }
}

impl UmRxConfig {
    /// Reordering timeout as a `Duration`.
    pub fn reordering_timeout(&self) -> Duration {
        Duration::from_millis(self.reordering_timeout_ms)
    }

    /// Window size actually used by the entity.
    pub fn effective_window(&self) -> u32 {
        if self.multicast {
            1
        } else {
            self.window_size
        }
    }

    /// Out-of-window policy actually used by the entity.
    ///
    /// Multicast receivers always follow the sender, whatever the distance.
    pub fn effective_policy(&self) -> UmOutOfWindowPolicy {
        if self.multicast {
            UmOutOfWindowPolicy::Slide {
                max_slide: u32::MAX,
            }
        } else {
            self.out_of_window
        }
    }
}

/// Acknowledged receive configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct AmRxConfig {
    /// Receive window, in PDUs. Also the status bitmap length.
    pub window_size: u32,
    /// Status timer period in milliseconds.
    pub status_interval_ms: u64,
    /// Minimum spacing between two status reports in milliseconds.
    pub min_report_gap_ms: u64,
}

impl Default for AmRxConfig {
    fn default() -> Self {
        Self {
            window_size: 64,
            status_interval_ms: 20,
            min_report_gap_ms: 5,
        }
    }
}

impl AmRxConfig {
    /// Status timer period as a `Duration`.
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    /// Report rate limit as a `Duration`.
    pub fn min_report_gap(&self) -> Duration {
        Duration::from_millis(self.min_report_gap_ms)
    }
}

/// Acknowledged transmit configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct AmTxConfig {
    /// Transmit window, in PDUs.
    pub window_size: u32,
    /// Payload bytes per fragment.
    pub fragment_size: usize,
    /// Retransmissions allowed per PDU before its SDU is abandoned.
    pub max_retransmissions: u32,
    /// Retransmission timeout in milliseconds.
    pub retransmit_timeout_ms: u64,
    /// Hard cap on queued SDU bytes (0 = unbounded).
    pub capacity_bytes: usize,
    /// Fixed per-PDU header bytes charged against every grant.
    pub header_overhead: usize,
}

impl Default for AmTxConfig {
    fn default() -> Self {
        Self {
            window_size: 64,
            fragment_size: 512,
            max_retransmissions: 4,
            retransmit_timeout_ms: 100,
            capacity_bytes: DEFAULT_TX_CAPACITY,
            header_overhead: DEFAULT_HEADER_OVERHEAD,
        }
    }
}

impl AmTxConfig {
    /// Retransmission timeout as a `Duration`.
    pub fn retransmit_timeout(&self) -> Duration {
        Duration::from_millis(self.retransmit_timeout_ms)
    }

    /// Largest SDU that fits in an empty transmit window.
    pub fn max_sdu_len(&self) -> usize {
        self.fragment_size.saturating_mul(self.window_size as usize)
    }
}

/// Delivery model of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum DeliveryMode {
    /// Segmentation plus reordering, no retransmission.
    #[default]
    Unacknowledged,
    /// Selective-repeat ARQ.
    Acknowledged,
}

/// Complete configuration of one flow.
///
/// Only the sections matching `mode` are used.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct FlowConfig {
    pub mode: DeliveryMode,
    pub tx: TxConfig,
    pub um_rx: UmRxConfig,
    pub am_tx: AmTxConfig,
    pub am_rx: AmRxConfig,
}

impl FlowConfig {
    /// Default unacknowledged flow.
    pub fn unacknowledged() -> Self {
        Self::default()
    }

    /// Default acknowledged flow.
    pub fn acknowledged() -> Self {
        Self {
            mode: DeliveryMode::Acknowledged,
            ..Self::default()
        }
    }

    /// Short-range radio with bursty loss: small fragments, quick timers.
    pub fn lossy_radio() -> Self {
        Self {
            mode: DeliveryMode::Acknowledged,
            tx: TxConfig::default(),
            um_rx: UmRxConfig {
                window_size: 16,
                reordering_timeout_ms: 30,
                out_of_window: UmOutOfWindowPolicy::Slide { max_slide: 16 },
                multicast: false,
            },
            am_tx: AmTxConfig {
                window_size: 32,
                fragment_size: 128,
                max_retransmissions: 8,
                retransmit_timeout_ms: 40,
                ..AmTxConfig::default()
            },
            am_rx: AmRxConfig {
                window_size: 32,
                status_interval_ms: 10,
                min_report_gap_ms: 2,
            },
        }
    }

    /// Long-delay satellite hop: wide windows, patient timers.
    pub fn satellite() -> Self {
        Self {
            mode: DeliveryMode::Acknowledged,
            tx: TxConfig {
                capacity_bytes: 1024 * 1024,
                ..TxConfig::default()
            },
            um_rx: UmRxConfig {
                window_size: 256,
                reordering_timeout_ms: 600,
                out_of_window: UmOutOfWindowPolicy::Slide { max_slide: 256 },
                multicast: false,
            },
            am_tx: AmTxConfig {
                window_size: 512,
                fragment_size: 1024,
                max_retransmissions: 3,
                retransmit_timeout_ms: 1500, // ~2x GEO round trip
                capacity_bytes: 1024 * 1024,
                ..AmTxConfig::default()
            },
            am_rx: AmRxConfig {
                window_size: 512,
                status_interval_ms: 200,
                min_report_gap_ms: 50,
            },
        }
    }

    /// Check every section used by `mode`.
    pub fn validate(&self) -> Result<(), EngineError> {
        match self.mode {
            DeliveryMode::Unacknowledged => {
                check_window("um_rx.window_size", self.um_rx.window_size)?;
                if self.um_rx.reordering_timeout_ms == 0 {
                    return Err(invalid("um_rx.reordering_timeout_ms must be > 0"));
                }
            }
            DeliveryMode::Acknowledged => {
                check_window("am_tx.window_size", self.am_tx.window_size)?;
                check_window("am_rx.window_size", self.am_rx.window_size)?;
                if self.am_tx.fragment_size == 0 {
                    return Err(invalid("am_tx.fragment_size must be > 0"));
                }
                if self.am_tx.fragment_size > usize::from(u16::MAX) {
                    return Err(invalid("am_tx.fragment_size must fit in 16 bits"));
                }
                if self.am_tx.retransmit_timeout_ms == 0 {
                    return Err(invalid("am_tx.retransmit_timeout_ms must be > 0"));
                }
                if self.am_rx.status_interval_ms == 0 {
                    return Err(invalid("am_rx.status_interval_ms must be > 0"));
                }
                if self.am_tx.window_size > self.am_rx.window_size {
                    return Err(invalid(
                        "am_tx.window_size must not exceed am_rx.window_size",
                    ));
                }
            }
        }
        Ok(())
    }
}

fn check_window(name: &str, size: u32) -> Result<(), EngineError> {
    if size == 0 || size > MAX_WINDOW_SIZE {
        return Err(invalid(format!(
            "{name} must be in 1..={MAX_WINDOW_SIZE}, got {size}"
        )));
    }
    Ok(())
}

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::InvalidConfig(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(FlowConfig::unacknowledged().validate().is_ok());
        assert!(FlowConfig::acknowledged().validate().is_ok());
        assert!(FlowConfig::lossy_radio().validate().is_ok());
        assert!(FlowConfig::satellite().validate().is_ok());
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut cfg = FlowConfig::unacknowledged();
        cfg.um_rx.window_size = 0;
        assert!(matches!(cfg.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_am_window_mismatch_rejected() {
        let mut cfg = FlowConfig::acknowledged();
        cfg.am_tx.window_size = 128;
        cfg.am_rx.window_size = 64;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_unused_section_not_checked() {
        let mut cfg = FlowConfig::unacknowledged();
        cfg.am_tx.fragment_size = 0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_multicast_overrides() {
        let cfg = UmRxConfig {
            multicast: true,
            ..UmRxConfig::default()
        };
        assert_eq!(cfg.effective_window(), 1);
        assert_eq!(
            cfg.effective_policy(),
            UmOutOfWindowPolicy::Slide {
                max_slide: u32::MAX
            }
        );
    }

    #[test]
    fn test_max_sdu_len() {
        let cfg = AmTxConfig {
            window_size: 4,
            fragment_size: 100,
            ..AmTxConfig::default()
        };
        assert_eq!(cfg.max_sdu_len(), 400);
    }
}
