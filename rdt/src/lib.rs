//! `rdt` — reliable, in-order message delivery over a lossy datagram channel.
//!
//! # Architecture
//!
//! ```text
//!  upper layer                                         upper layer
//!      │ submit(msg)                                        ▲ deliver(msg)
//!  ┌───▼──────┐   data frames (fixed size)   ┌──────────────┴┐
//!  │ RdtSender│─────────────────────────────▶│  RdtReceiver  │
//!  └───▲──────┘                              └──────┬────────┘
//!      │               acks                         │
//!      └────────────────────────────────────────────┘
//!          (both directions may drop, corrupt,
//!           duplicate and reorder frames)
//! ```
//!
//! The engines are plain state machines.  They own no socket, clock or
//! thread; every event is handed to them with a `&mut dyn Channel` through
//! which they send frames, deliver messages and arm their single timer.
//!
//! Each module has a single responsibility:
//! - [`checksum`]  — 16-bit wraparound checksum over a frame
//! - [`frame`]     — wire format (encode / decode, fragment capacity)
//! - [`config`]    — per-engine parameters and their validation
//! - [`error`]     — errors surfaced to callers
//! - [`channel`]   — the engine ↔ dispatcher boundary and a recording channel
//! - [`sender`]    — fragmentation, sliding window, go-back-N retransmission
//! - [`receiver`]  — validation, acks, reassembly, in-order delivery
//! - [`simulator`] — deterministic lossy link and event dispatcher for testing

pub mod channel;
pub mod checksum;
pub mod config;
pub mod error;
pub mod frame;
pub mod receiver;
pub mod sender;
pub mod simulator;

pub use channel::{Channel, Recorder, TimerCommand};
pub use config::RdtConfig;
pub use error::RdtError;
pub use frame::{Frame, FrameError, FrameFormat, FrameKey};
pub use receiver::{MessageState, RdtReceiver, ReceiverStats};
pub use sender::{EntryState, RdtSender, SenderStats};
pub use simulator::{LinkStats, SimulationReport, Simulator, SimulatorConfig};
