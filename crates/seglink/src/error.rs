// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for the delivery engine.
//!
//! Only conditions the caller must react to are errors. Steady-state losses
//! of a lossy link (duplicates, out-of-window arrivals, SDUs that can no
//! longer be reassembled) are [`DiscardReason`]s: counted and reported to the
//! observer, never propagated.

use std::fmt;

use thiserror::Error;

use crate::flow::{FlowId, LegId};
use crate::pdu::SeqNum;
use crate::timer::EntityId;
use crate::wire::WireError;

/// Engine errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Transmit queue is at capacity; the SDU was not accepted.
    #[error("flow {flow}: transmit buffer full ({requested} B requested, {available} B available)")]
    BufferFull {
        flow: FlowId,
        requested: usize,
        available: usize,
    },

    /// SDU cannot fit in the acknowledged-mode transmit window even when empty.
    #[error("flow {flow}: SDU of {len} B exceeds the largest transmittable SDU ({max} B)")]
    SduTooLarge { flow: FlowId, len: usize, max: usize },

    /// Fragment metadata contradicts buffered state. Fatal for the entity.
    #[error("fragmentation inconsistency at PDU {sn}: {detail}")]
    FragmentationInconsistency { sn: SeqNum, detail: String },

    /// Entity previously hit a fatal inconsistency and refuses further work.
    #[error("entity {entity} has failed and is no longer processing")]
    EntityFailed { entity: EntityId },

    /// No flow registered under this id.
    #[error("unknown flow {0}")]
    UnknownFlow(FlowId),

    /// Flow has no such leg.
    #[error("flow {flow}: unknown leg {leg}")]
    UnknownLeg { flow: FlowId, leg: LegId },

    /// Flow context provider does not know the flow.
    #[error("no flow context available for flow {0}")]
    NoFlowContext(FlowId),

    /// Flow is already open.
    #[error("flow {0} is already open")]
    FlowExists(FlowId),

    /// Malformed bytes on the wire.
    #[error("wire decode failed: {0}")]
    Wire(#[from] WireError),

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Build a [`EngineError::FragmentationInconsistency`].
    pub(crate) fn inconsistency(sn: SeqNum, detail: impl Into<String>) -> Self {
        Self::FragmentationInconsistency {
            sn,
            detail: detail.into(),
        }
    }

    /// True for errors that permanently disable the affected entity.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::FragmentationInconsistency { .. } | Self::EntityFailed { .. }
        )
    }
}

/// Why a PDU or SDU was dropped without delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscardReason {
    /// PDU already delivered or already buffered.
    LateDuplicate,
    /// PDU outside the receive window.
    OutOfWindow,
    /// SDU lost a fragment for good and can never be completed.
    ReassemblyImpossible,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LateDuplicate => write!(f, "late duplicate"),
            Self::OutOfWindow => write!(f, "out of window"),
            Self::ReassemblyImpossible => write!(f, "reassembly impossible"),
        }
    }
}
