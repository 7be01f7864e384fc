//! Wire format of the fixed-size frames exchanged by the two engines.
//!
//! Every datagram on the channel is exactly `frame_size` bytes long.  This
//! module is responsible for:
//! - Defining the on-wire layout (header fields, optional total-size field,
//!   payload, zero padding).
//! - Serialising a [`Frame`] into a sealed byte buffer ready for transmission.
//! - Parsing raw bytes back into a [`Frame`] (data direction) or a
//!   [`FrameKey`] (ack direction), rejecting corrupted or malformed input.
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  offset  size  field
//!  ------  ----  ---------------------------------------------
//!       0     2  checksum (see crate::checksum)
//!       2     4  message sequence number
//!       6     4  fragment sequence number
//!      10     1  payload length
//!      11     4  total message size   (fragment 0 only)
//!  11/15      n  payload
//!    ...      -  zero padding up to frame_size
//! ```
//!
//! An ack uses the same layout with payload length 0 and no total-size field;
//! its sequence numbers name the data frame being acknowledged.

use thiserror::Error;

use crate::checksum;

/// Byte length of the fixed header (checksum + seqs + payload length).
pub const HEADER_LEN: usize = 11;

/// Byte length of the total-message-size field carried by fragment 0.
pub const TOTAL_SIZE_LEN: usize = 4;

/// Smallest frame that still lets fragment 0 carry one payload byte.
pub const MIN_FRAME_SIZE: usize = HEADER_LEN + TOTAL_SIZE_LEN + 1;

/// Largest frame whose payload length still fits the 1-byte length field.
pub const MAX_FRAME_SIZE: usize = HEADER_LEN + u8::MAX as usize;

/// Frame size used when none is configured.
pub const DEFAULT_FRAME_SIZE: usize = 128;

// Byte offsets of each field within the serialised frame.
const OFF_MSG_SEQ: usize = 2;
const OFF_FRAG_SEQ: usize = 6;
const OFF_PAYLOAD_LEN: usize = 10;
const OFF_TOTAL_SIZE: usize = 11;

/// Identifies one fragment of one message.
///
/// Ordering is lexicographic on `(msg_seq, frag_seq)`, which is the order the
/// sender transmits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameKey {
    pub msg_seq: u32,
    pub frag_seq: u32,
}

impl FrameKey {
    pub fn new(msg_seq: u32, frag_seq: u32) -> Self {
        Self { msg_seq, frag_seq }
    }
}

impl std::fmt::Display for FrameKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "msg={} frag={}", self.msg_seq, self.frag_seq)
    }
}

/// A decoded frame: sequence numbers, optional total size and payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub key: FrameKey,
    /// Total size of the whole message.  Present on data fragment 0 only.
    pub total_size: Option<u32>,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a data fragment.  `total_size` must be `Some` exactly when
    /// `key.frag_seq == 0`.
    pub fn data(key: FrameKey, total_size: Option<u32>, payload: Vec<u8>) -> Self {
        Self {
            key,
            total_size,
            payload,
        }
    }

    /// Build an acknowledgement for the data frame identified by `key`.
    pub fn ack(key: FrameKey) -> Self {
        Self {
            key,
            total_size: None,
            payload: Vec::new(),
        }
    }
}

/// Errors that can arise when encoding or parsing a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Configured frame size outside `MIN_FRAME_SIZE..=MAX_FRAME_SIZE`.
    #[error("frame size {0} outside {}..={}", MIN_FRAME_SIZE, MAX_FRAME_SIZE)]
    InvalidFrameSize(usize),
    /// Raw buffer is not exactly one frame long.
    #[error("expected a {expected}-byte frame, got {actual} bytes")]
    WrongSize { expected: usize, actual: usize },
    /// Stored checksum does not match the recomputed one.
    #[error("checksum verification failed")]
    ChecksumFailed,
    /// Payload does not fit in the space the frame leaves for it.
    #[error("payload of {len} bytes exceeds fragment capacity of {capacity}")]
    PayloadTooLarge { len: usize, capacity: usize },
    /// `total_size` set on a fragment other than 0.
    #[error("total-size field is only carried by fragment 0")]
    MisplacedTotalSize,
    /// A frame offered as an ack carries payload bytes.
    #[error("ack frame claims a {0}-byte payload")]
    NotAnAck(usize),
}

/// Frame layout for one configured frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    frame_size: usize,
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
        }
    }
}

impl FrameFormat {
    /// Create a layout for `frame_size`-byte frames.
    pub fn new(frame_size: usize) -> Result<Self, FrameError> {
        if !(MIN_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&frame_size) {
            return Err(FrameError::InvalidFrameSize(frame_size));
        }
        Ok(Self { frame_size })
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Space after the header, shared by the total-size field and payload.
    pub fn max_payload(&self) -> usize {
        self.frame_size - HEADER_LEN
    }

    /// Payload bytes a fragment with sequence number `frag_seq` can carry.
    pub fn capacity(&self, frag_seq: u32) -> usize {
        if frag_seq == 0 {
            self.max_payload() - TOTAL_SIZE_LEN
        } else {
            self.max_payload()
        }
    }

    /// Number of fragments a `len`-byte message occupies.
    ///
    /// The total-size field rides in fragment 0, so this is
    /// `ceil((len + 4) / max_payload)`.  An empty message still takes one.
    pub fn fragment_count(&self, len: usize) -> usize {
        (len + TOTAL_SIZE_LEN).div_ceil(self.max_payload())
    }

    /// Serialise and seal `frame` into a new `frame_size`-byte buffer.
    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>, FrameError> {
        let first = frame.key.frag_seq == 0;
        if !first && frame.total_size.is_some() {
            return Err(FrameError::MisplacedTotalSize);
        }
        let capacity = self.capacity(frame.key.frag_seq);
        if frame.payload.len() > capacity {
            return Err(FrameError::PayloadTooLarge {
                len: frame.payload.len(),
                capacity,
            });
        }

        let mut buf = vec![0u8; self.frame_size];
        buf[OFF_MSG_SEQ..OFF_MSG_SEQ + 4].copy_from_slice(&frame.key.msg_seq.to_be_bytes());
        buf[OFF_FRAG_SEQ..OFF_FRAG_SEQ + 4].copy_from_slice(&frame.key.frag_seq.to_be_bytes());
        // Capacity never exceeds u8::MAX, checked in `new`.
        buf[OFF_PAYLOAD_LEN] = frame.payload.len() as u8;

        let mut off = HEADER_LEN;
        if first {
            let total = frame.total_size.unwrap_or(0);
            buf[OFF_TOTAL_SIZE..OFF_TOTAL_SIZE + TOTAL_SIZE_LEN]
                .copy_from_slice(&total.to_be_bytes());
            off += TOTAL_SIZE_LEN;
        }
        buf[off..off + frame.payload.len()].copy_from_slice(&frame.payload);

        checksum::seal(&mut buf);
        Ok(buf)
    }

    /// Serialise an ack for `key`.
    pub fn encode_ack(&self, key: FrameKey) -> Vec<u8> {
        let mut buf = vec![0u8; self.frame_size];
        buf[OFF_MSG_SEQ..OFF_MSG_SEQ + 4].copy_from_slice(&key.msg_seq.to_be_bytes());
        buf[OFF_FRAG_SEQ..OFF_FRAG_SEQ + 4].copy_from_slice(&key.frag_seq.to_be_bytes());
        checksum::seal(&mut buf);
        buf
    }

    /// Parse a data frame.
    ///
    /// Returns [`Err`] if the buffer has the wrong length, the checksum does
    /// not verify, or the payload-length field claims more bytes than the
    /// fragment can hold.
    pub fn decode(&self, buf: &[u8]) -> Result<Frame, FrameError> {
        let key = self.check(buf)?;
        let len = usize::from(buf[OFF_PAYLOAD_LEN]);
        let capacity = self.capacity(key.frag_seq);
        if len > capacity {
            return Err(FrameError::PayloadTooLarge { len, capacity });
        }

        let (total_size, off) = if key.frag_seq == 0 {
            (Some(read_u32(buf, OFF_TOTAL_SIZE)), HEADER_LEN + TOTAL_SIZE_LEN)
        } else {
            (None, HEADER_LEN)
        };

        Ok(Frame {
            key,
            total_size,
            payload: buf[off..off + len].to_vec(),
        })
    }

    /// Parse an ack, returning the key of the data frame it acknowledges.
    ///
    /// Acks have a zero payload length; anything else is refused so a data
    /// frame can never acknowledge itself.
    pub fn decode_ack(&self, buf: &[u8]) -> Result<FrameKey, FrameError> {
        let key = self.check(buf)?;
        match buf[OFF_PAYLOAD_LEN] {
            0 => Ok(key),
            len => Err(FrameError::NotAnAck(usize::from(len))),
        }
    }

    /// Length and checksum validation shared by both decode paths.
    fn check(&self, buf: &[u8]) -> Result<FrameKey, FrameError> {
        if buf.len() != self.frame_size {
            return Err(FrameError::WrongSize {
                expected: self.frame_size,
                actual: buf.len(),
            });
        }
        if !checksum::verify(buf) {
            return Err(FrameError::ChecksumFailed);
        }
        Ok(FrameKey::new(
            read_u32(buf, OFF_MSG_SEQ),
            read_u32(buf, OFF_FRAG_SEQ),
        ))
    }
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> FrameFormat {
        FrameFormat::new(DEFAULT_FRAME_SIZE).unwrap()
    }

    #[test]
    fn default_layout_capacities() {
        let f = format();
        assert_eq!(f.max_payload(), 117);
        assert_eq!(f.capacity(0), 113);
        assert_eq!(f.capacity(1), 117);
    }

    #[test]
    fn fragment_count_accounts_for_total_size_field() {
        let f = format();
        assert_eq!(f.fragment_count(0), 1);
        assert_eq!(f.fragment_count(113), 1);
        assert_eq!(f.fragment_count(114), 2);
        assert_eq!(f.fragment_count(300), 3);
    }

    #[test]
    fn frame_size_bounds_are_enforced() {
        assert_eq!(
            FrameFormat::new(MIN_FRAME_SIZE - 1),
            Err(FrameError::InvalidFrameSize(MIN_FRAME_SIZE - 1))
        );
        assert_eq!(
            FrameFormat::new(MAX_FRAME_SIZE + 1),
            Err(FrameError::InvalidFrameSize(MAX_FRAME_SIZE + 1))
        );
        assert!(FrameFormat::new(MIN_FRAME_SIZE).is_ok());
        assert!(FrameFormat::new(MAX_FRAME_SIZE).is_ok());
    }

    #[test]
    fn first_fragment_layout_on_wire() {
        let frame = Frame::data(FrameKey::new(0x0102_0304, 0), Some(300), b"abc".to_vec());
        let bytes = format().encode(&frame).unwrap();

        assert_eq!(bytes.len(), DEFAULT_FRAME_SIZE);
        assert_eq!(&bytes[2..6], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[6..10], &[0, 0, 0, 0]);
        assert_eq!(bytes[10], 3);
        assert_eq!(&bytes[11..15], &300u32.to_be_bytes());
        assert_eq!(&bytes[15..18], b"abc");
        assert!(bytes[18..].iter().all(|&b| b == 0));
        assert!(checksum::verify(&bytes));
    }

    #[test]
    fn later_fragment_has_no_total_size_field() {
        let frame = Frame::data(FrameKey::new(7, 2), None, b"xyz".to_vec());
        let bytes = format().encode(&frame).unwrap();
        assert_eq!(&bytes[11..14], b"xyz");

        let decoded = format().decode(&bytes).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn decode_recovers_first_fragment() {
        let frame = Frame::data(FrameKey::new(3, 0), Some(5), b"hello".to_vec());
        let decoded = format().decode(&format().encode(&frame).unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn ack_layout_has_zero_payload() {
        let bytes = format().encode_ack(FrameKey::new(9, 4));
        assert_eq!(bytes[10], 0);
        assert!(bytes[11..].iter().all(|&b| b == 0));
        assert_eq!(format().decode_ack(&bytes), Ok(FrameKey::new(9, 4)));
    }

    #[test]
    fn data_frame_is_not_accepted_as_ack() {
        let f = format();
        let data = f
            .encode(&Frame::data(FrameKey::new(4, 1), None, b"payload".to_vec()))
            .unwrap();
        assert_eq!(f.decode_ack(&data), Err(FrameError::NotAnAck(7)));
    }

    #[test]
    fn encode_ack_matches_encoding_an_ack_frame() {
        let key = FrameKey::new(1, 0);
        assert_eq!(
            format().encode_ack(key),
            format().encode(&Frame::ack(key)).unwrap()
        );
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let f = format();
        let frame = Frame::data(FrameKey::new(0, 0), Some(200), vec![0u8; 114]);
        assert_eq!(
            f.encode(&frame),
            Err(FrameError::PayloadTooLarge {
                len: 114,
                capacity: 113
            })
        );
    }

    #[test]
    fn total_size_on_later_fragment_is_rejected() {
        let frame = Frame::data(FrameKey::new(0, 1), Some(10), vec![1]);
        assert_eq!(format().encode(&frame), Err(FrameError::MisplacedTotalSize));
    }

    #[test]
    fn corrupted_frame_fails_checksum() {
        let frame = Frame::data(FrameKey::new(1, 1), None, b"data".to_vec());
        let mut bytes = format().encode(&frame).unwrap();
        bytes[12] ^= 0x40;
        assert_eq!(format().decode(&bytes), Err(FrameError::ChecksumFailed));
        assert_eq!(format().decode_ack(&bytes), Err(FrameError::ChecksumFailed));
    }

    #[test]
    fn wrong_length_is_rejected() {
        let bytes = vec![0u8; DEFAULT_FRAME_SIZE - 1];
        assert_eq!(
            format().decode(&bytes),
            Err(FrameError::WrongSize {
                expected: DEFAULT_FRAME_SIZE,
                actual: DEFAULT_FRAME_SIZE - 1
            })
        );
    }

    #[test]
    fn impossible_payload_length_is_rejected_even_with_valid_checksum() {
        let mut bytes = vec![0u8; DEFAULT_FRAME_SIZE];
        bytes[6..10].copy_from_slice(&1u32.to_be_bytes());
        bytes[10] = 200;
        checksum::seal(&mut bytes);
        assert_eq!(
            format().decode(&bytes),
            Err(FrameError::PayloadTooLarge {
                len: 200,
                capacity: 117
            })
        );
    }
}
