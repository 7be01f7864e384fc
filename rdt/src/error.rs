//! Error types for the ARQ engines.
//!
//! Protocol-level trouble (corrupted, duplicate or unknown frames) is never an
//! error: the engines drop such frames and let retransmission recover.  Only
//! mistakes by the caller surface here.

use thiserror::Error;

use crate::frame::FrameError;

/// Errors returned by the public engine API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RdtError {
    /// Submitted message is longer than the configured maximum.
    #[error("message of {len} bytes exceeds the maximum of {max} bytes")]
    MessageTooLarge { len: usize, max: usize },

    /// Every 32-bit message sequence number has been used.
    #[error("message sequence numbers exhausted")]
    SequenceExhausted,

    /// Configuration rejected at engine construction.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Frame could not be built.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}
