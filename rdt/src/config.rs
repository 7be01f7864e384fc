//! Per-engine configuration.
//!
//! Both ends of a link must agree on `frame_size`; the other knobs only
//! matter to the sender.  Values are fixed for the lifetime of an engine.

use std::time::Duration;

use crate::error::RdtError;
use crate::frame::{FrameFormat, DEFAULT_FRAME_SIZE};

/// Adjustable engine parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdtConfig {
    /// Size in bytes of every frame on the wire.
    pub frame_size: usize,
    /// Maximum number of frames in flight at once (W).
    pub window_size: usize,
    /// Retransmission timeout armed whenever frames are in flight.
    pub timeout: Duration,
    /// Longest message `submit` accepts.
    pub max_message_size: usize,
}

impl Default for RdtConfig {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            window_size: 10,
            timeout: Duration::from_millis(300),
            max_message_size: 1 << 20,
        }
    }
}

impl RdtConfig {
    /// Check every field and return the frame layout they describe.
    pub fn validate(&self) -> Result<FrameFormat, RdtError> {
        let format = FrameFormat::new(self.frame_size)
            .map_err(|e| RdtError::InvalidConfig(e.to_string()))?;
        if self.window_size == 0 {
            return Err(RdtError::InvalidConfig(
                "window size must be at least 1".into(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(RdtError::InvalidConfig(
                "retransmission timeout must be non-zero".into(),
            ));
        }
        // The total-size field on the wire is 32 bits wide.
        if u32::try_from(self.max_message_size).is_err() {
            return Err(RdtError::InvalidConfig(format!(
                "maximum message size {} does not fit the 32-bit size field",
                self.max_message_size
            )));
        }
        Ok(format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let format = RdtConfig::default().validate().unwrap();
        assert_eq!(format.frame_size(), 128);
        assert_eq!(format.max_payload(), 117);
    }

    #[test]
    fn zero_window_rejected() {
        let cfg = RdtConfig {
            window_size: 0,
            ..RdtConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(RdtError::InvalidConfig(_))));
    }

    #[test]
    fn zero_timeout_rejected() {
        let cfg = RdtConfig {
            timeout: Duration::ZERO,
            ..RdtConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(RdtError::InvalidConfig(_))));
    }

    #[test]
    fn frame_size_out_of_range_rejected() {
        for frame_size in [0, 15, 267, 4096] {
            let cfg = RdtConfig {
                frame_size,
                ..RdtConfig::default()
            };
            assert!(
                matches!(cfg.validate(), Err(RdtError::InvalidConfig(_))),
                "frame size {frame_size} accepted"
            );
        }
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn max_message_size_bounded_by_size_field() {
        let cfg = RdtConfig {
            max_message_size: u32::MAX as usize + 1,
            ..RdtConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(RdtError::InvalidConfig(_))));
    }
}
