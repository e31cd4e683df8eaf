// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # seglink - segmented link delivery
//!
//! Splits variable-length upper-layer data units (SDUs) into grant-sized
//! PDUs for a lossy, capacity-constrained link, and reassembles them on the
//! far side. Delivery is in order and at most once, with bounded buffering.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                          LinkEngine                                |
//! |   flows | event queue (arrivals, grants, timer fires) | sinks      |
//! +--------------------------------------------------------------------+
//! |                     ModeSwitchCoordinator                          |
//! |   active leg | draining leg | staging buffer                       |
//! +--------------------------------------------------------------------+
//! |   TransmitEntity (UM | AM)        |   ReceiveEntity (UM | AM)     |
//! |   segmentation, retransmission    |   window, reassembly, status  |
//! +--------------------------------------------------------------------+
//! |   wire codec | WindowDescriptor | EntityTimer | FragmentDescriptor |
//! +--------------------------------------------------------------------+
//! ```
//!
//! Two delivery modes share one windowing abstraction:
//!
//! | Mode | Loss handling |
//! |------|---------------|
//! | Unacknowledged | reordering timer skips gaps that never fill |
//! | Acknowledged | bitmap status reports drive selective retransmission |
//!
//! ## Quick start
//!
//! ```rust
//! use seglink::{FlowConfig, FlowContext, FlowDirectory, LinkEngine};
//!
//! let directory = FlowDirectory::new().with(FlowContext::new(1, 10, 20));
//! let mut engine = LinkEngine::new(directory, |flow: seglink::FlowId, sdu: seglink::Sdu| {
//!     println!("flow {flow}: SDU {} ({} B)", sdu.sn, sdu.len());
//! });
//! engine.open_flow(1, FlowConfig::unacknowledged())?;
//! engine.enqueue(1, vec![0u8; 300])?;
//!
//! while let Some(out) = engine.grant_bytes(1, 102)? {
//!     engine.on_pdu_arrival(1, out.leg, out.pdu)?;
//! }
//! # Ok::<(), seglink::EngineError>(())
//! ```
//!
//! ## Modules
//!
//! - [`engine`] - flows, event queue, collaborator traits
//! - [`tx`] / [`rx`] - transmit and receive entities
//! - [`switch`] - leg replacement (hard clear or drain)
//! - [`wire`] - byte encoding of PDUs

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod flow;
pub mod pdu;
pub mod rx;
pub mod switch;
pub mod timer;
pub mod tx;
pub mod window;
pub mod wire;

pub use config::{
    AmRxConfig, AmTxConfig, DeliveryMode, FlowConfig, TxConfig, UmOutOfWindowPolicy, UmRxConfig,
};
pub use engine::{
    EngineObserver, FlowStats, LegStats, LinkEngine, NoopObserver, Outgoing, UpperLayer, WireSink,
};
pub use error::{DiscardReason, EngineError};
pub use event::{Event, EventQueue, Outbox};
pub use flow::{FlowContext, FlowContextProvider, FlowDirectory, FlowId, LegId, NodeAddr};
pub use pdu::{
    ControlPdu, DataPdu, FragmentDescriptor, FramingInfo, Pdu, Sdu, Segment, SeqNum, StatusReport,
};
pub use rx::{AmReceiveEntity, ReceiveEntity, RxStats, UmReceiveEntity};
pub use switch::{Leg, LegOutput, LegState, ModeSwitchCoordinator, SwitchPolicy, SwitchStats};
pub use timer::{EntityId, EntityRole, EntityTimer, TimerRequest};
pub use tx::{AmTransmitEntity, BurstTransition, Produced, TransmitEntity, TxStats, UmTransmitEntity};
pub use window::{SlotBuffer, WindowDescriptor, WindowPosition};
pub use wire::WireError;
