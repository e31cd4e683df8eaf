// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scenario file.
//!
//! ```toml
//! [flow]
//! mode = "acknowledged"
//!
//! [flow.am_tx]
//! fragment_size = 200
//! max_retransmissions = 16
//!
//! [channel]
//! loss_rate = 0.2
//! delay_ms = 20
//! jitter_ms = 5
//!
//! [traffic]
//! sdus = 500
//! grant_bytes = 256
//!
//! [switch]
//! after_sdus = 250
//! policy = "drain"
//! ```

use std::path::Path;

use seglink::{DeliveryMode, FlowConfig, SwitchPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scenario loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// One simulation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Flow configuration, shared by both endpoints.
    #[serde(default)]
    pub flow: FlowConfig,

    /// Channel impairments, applied in both directions.
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Offered load and grant schedule.
    #[serde(default)]
    pub traffic: TrafficConfig,

    /// Optional mid-stream leg switch.
    #[serde(default)]
    pub switch: Option<SwitchConfig>,
}

/// Simulated channel impairments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Packet loss probability (0.0 - 1.0).
    pub loss_rate: f64,
    /// Fixed delay in milliseconds.
    pub delay_ms: u64,
    /// Delay jitter in milliseconds (uniform random +/- jitter).
    pub jitter_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            delay_ms: 10,
            jitter_ms: 0,
        }
    }
}

impl ChannelConfig {
    /// Lossy link with the default delay.
    pub fn lossy(loss_rate: f64) -> Self {
        Self {
            loss_rate,
            ..Default::default()
        }
    }

    /// Long, jittery satellite hop.
    pub fn satellite() -> Self {
        Self {
            loss_rate: 0.10,
            delay_ms: 250,
            jitter_ms: 40,
        }
    }

    /// Tactical radio: heavy loss, jitter large enough to reorder.
    pub fn tactical_radio() -> Self {
        Self {
            loss_rate: 0.20,
            delay_ms: 100,
            jitter_ms: 75,
        }
    }
}

/// Offered load and grant schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    /// Number of SDUs to send.
    pub sdus: usize,
    /// Smallest SDU payload in bytes.
    pub min_sdu_len: usize,
    /// Largest SDU payload in bytes.
    pub max_sdu_len: usize,
    /// SDUs offered to the sender per slot (0 = as many as it accepts).
    pub sdus_per_slot: usize,
    /// Bytes granted per slot, in each direction.
    pub grant_bytes: usize,
    /// Slot length in milliseconds.
    pub slot_ms: u64,
    /// Seed for payload sizes and channel impairments.
    pub seed: u64,
    /// Idle slots after the sender empties before the run ends.
    pub settle_slots: u64,
    /// Hard stop.
    pub max_slots: u64,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            sdus: 200,
            min_sdu_len: 1,
            max_sdu_len: 400,
            sdus_per_slot: 1,
            grant_bytes: 600,
            slot_ms: 1,
            seed: 1,
            settle_slots: 2_000,
            max_slots: 1_000_000,
        }
    }
}

/// Leg switch performed by both endpoints once enough SDUs were offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchConfig {
    /// Switch after this many SDUs were enqueued.
    pub after_sdus: usize,
    #[serde(default)]
    pub policy: PolicyName,
}

/// Serializable name of a [`SwitchPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyName {
    HardClear,
    #[default]
    Drain,
}

impl From<PolicyName> for SwitchPolicy {
    fn from(name: PolicyName) -> Self {
        match name {
            PolicyName::HardClear => SwitchPolicy::HardClear,
            PolicyName::Drain => SwitchPolicy::Drain,
        }
    }
}

impl ScenarioConfig {
    /// Load and validate a scenario from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the scenario for contradictions.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.flow
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if !(0.0..1.0).contains(&self.channel.loss_rate) {
            return Err(ConfigError::Invalid(format!(
                "loss_rate {} outside [0, 1)",
                self.channel.loss_rate
            )));
        }
        let t = &self.traffic;
        if t.sdus == 0 {
            return Err(ConfigError::Invalid("no SDUs to send".into()));
        }
        if t.min_sdu_len == 0 || t.min_sdu_len > t.max_sdu_len {
            return Err(ConfigError::Invalid(format!(
                "SDU length range {}..={} is empty or includes 0",
                t.min_sdu_len, t.max_sdu_len
            )));
        }
        if t.slot_ms == 0 {
            return Err(ConfigError::Invalid("slot_ms must be positive".into()));
        }
        if t.grant_bytes <= self.flow.tx.header_overhead.max(self.flow.am_tx.header_overhead) {
            return Err(ConfigError::Invalid(format!(
                "grant of {} B leaves no room for payload",
                t.grant_bytes
            )));
        }
        if self.flow.mode == DeliveryMode::Acknowledged {
            let pdu_len = self.flow.am_tx.fragment_size + self.flow.am_tx.header_overhead;
            if t.grant_bytes < pdu_len {
                return Err(ConfigError::Invalid(format!(
                    "grant of {} B cannot carry a {} B acknowledged PDU",
                    t.grant_bytes, pdu_len
                )));
            }
            if t.max_sdu_len > self.flow.am_tx.max_sdu_len() {
                return Err(ConfigError::Invalid(format!(
                    "max_sdu_len {} exceeds the acknowledged window ({} B)",
                    t.max_sdu_len,
                    self.flow.am_tx.max_sdu_len()
                )));
            }
        }
        if let Some(switch) = &self.switch {
            if switch.after_sdus >= t.sdus {
                return Err(ConfigError::Invalid(format!(
                    "switch after {} SDUs never happens with {} SDUs",
                    switch.after_sdus, t.sdus
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_scenario() {
        let text = r#"
            [flow]
            mode = "acknowledged"

            [flow.am_tx]
            fragment_size = 120
            max_retransmissions = 8

            [channel]
            loss_rate = 0.25
            delay_ms = 30

            [traffic]
            sdus = 50
            seed = 7

            [switch]
            after_sdus = 20
            policy = "hard_clear"
        "#;
        let config: ScenarioConfig = toml::from_str(text).expect("parse");
        config.validate().expect("valid");

        assert_eq!(config.flow.mode, DeliveryMode::Acknowledged);
        assert_eq!(config.flow.am_tx.fragment_size, 120);
        assert_eq!(config.flow.am_tx.max_retransmissions, 8);
        assert_eq!(config.channel.loss_rate, 0.25);
        assert_eq!(config.channel.jitter_ms, 0);
        assert_eq!(config.traffic.sdus, 50);
        assert_eq!(config.traffic.grant_bytes, TrafficConfig::default().grant_bytes);
        assert_eq!(
            config.switch,
            Some(SwitchConfig {
                after_sdus: 20,
                policy: PolicyName::HardClear
            })
        );
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: ScenarioConfig = toml::from_str("").expect("parse");
        assert!(config.validate().is_ok());
        assert_eq!(config.flow.mode, DeliveryMode::Unacknowledged);
        assert!(config.switch.is_none());
    }

    #[test]
    fn test_invalid_loss_rate() {
        let config = ScenarioConfig {
            channel: ChannelConfig::lossy(1.0),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_switch_after_last_sdu_rejected() {
        let config = ScenarioConfig {
            switch: Some(SwitchConfig {
                after_sdus: 200,
                policy: PolicyName::Drain,
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_grant_too_small() {
        let mut config = ScenarioConfig::default();
        config.traffic.grant_bytes = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_acknowledged_grant_must_fit_fragment() {
        let mut config = ScenarioConfig {
            flow: FlowConfig::acknowledged(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        config.traffic.grant_bytes = config.flow.am_tx.fragment_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = ScenarioConfig::from_file("/nonexistent/scenario.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
