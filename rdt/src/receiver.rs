//! Receive-side ARQ state machine.
//!
//! [`RdtReceiver`] turns a stream of possibly corrupted, duplicated and
//! reordered data frames back into the sender's messages:
//!
//! - Frames that fail the checksum are **silently discarded**, without an ack.
//!   Corruption looks exactly like loss to the sender and is recovered the
//!   same way, by timeout.
//! - Every valid frame is acked, duplicates included.  The ack is sent before
//!   the reassembly buffer is consulted.
//! - Fragments are stored per message until the received byte count equals
//!   the total size announced by fragment 0.
//! - Complete messages are delivered strictly in sequence order.  A message
//!   that completes early waits for all lower-numbered ones.
//!
//! This module only manages state; all I/O goes through [`Channel`].

use std::collections::BTreeMap;

use crate::channel::Channel;
use crate::config::RdtConfig;
use crate::error::RdtError;
use crate::frame::FrameFormat;

// ---------------------------------------------------------------------------
// Reassembly
// ---------------------------------------------------------------------------

/// Lifecycle of one message at the receiver.
///
/// ```text
///  Partial ──last byte arrives──▶ Received ──its turn──▶ Delivered
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageState {
    /// Some fragments (or the total size) still missing.
    #[default]
    Partial,
    /// Every byte present; waiting for lower-numbered messages.
    Received,
    /// Handed to the upper layer.  Terminal.
    Delivered,
}

/// Reassembly state for one message sequence number.
#[derive(Debug, Default)]
struct Reassembly {
    /// Announced by fragment 0; unknown until it arrives.
    total_size: Option<u32>,
    /// Sum of stored payload lengths.
    received_bytes: usize,
    /// Payloads keyed by fragment sequence number.  Emptied on delivery.
    fragments: BTreeMap<u32, Vec<u8>>,
    state: MessageState,
}

impl Reassembly {
    fn is_byte_complete(&self) -> bool {
        self.total_size
            .is_some_and(|total| total as usize == self.received_bytes)
    }
}

/// Running totals kept by the receiver.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverStats {
    /// Frames that passed validation.
    pub frames_received: u64,
    /// Frames dropped for a bad checksum or impossible header.
    pub corrupt_frames: u64,
    /// Valid frames that were already stored or belong to a delivered message.
    pub duplicate_frames: u64,
    pub acks_sent: u64,
    pub messages_delivered: u64,
}

// ---------------------------------------------------------------------------
// RdtReceiver
// ---------------------------------------------------------------------------

/// Receiver engine for one link.
#[derive(Debug)]
pub struct RdtReceiver {
    format: FrameFormat,

    /// One entry per message seen so far.  Delivered entries are kept (with
    /// their payloads released) so late duplicates are recognised.
    messages: BTreeMap<u32, Reassembly>,

    /// Sequence number of the next message to hand upward.  Every lower one
    /// has been delivered.
    next_delivery: u64,

    stats: ReceiverStats,
}

impl RdtReceiver {
    /// Create a receiver.  Only `config.frame_size` is relevant here.
    pub fn new(config: &RdtConfig) -> Result<Self, RdtError> {
        let format = config.validate()?;
        Ok(Self {
            format,
            messages: BTreeMap::new(),
            next_delivery: 0,
            stats: ReceiverStats::default(),
        })
    }

    /// Process a data frame arriving from the sender.
    pub fn on_frame(&mut self, frame: &[u8], channel: &mut dyn Channel) {
        let frame = match self.format.decode(frame) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.corrupt_frames += 1;
                log::trace!("[receiver] ← DATA dropped: {e}");
                return;
            }
        };
        self.stats.frames_received += 1;
        let key = frame.key;

        channel.send_frame(&self.format.encode_ack(key));
        self.stats.acks_sent += 1;
        log::debug!("[receiver] ← DATA {key} len={}; → ACK", frame.payload.len());

        let entry = self.messages.entry(key.msg_seq).or_default();
        if entry.state == MessageState::Delivered || entry.fragments.contains_key(&key.frag_seq) {
            self.stats.duplicate_frames += 1;
            log::trace!("[receiver] {key} duplicate");
            return;
        }

        if let Some(total) = frame.total_size {
            entry.total_size = Some(total);
        }
        entry.received_bytes += frame.payload.len();
        entry.fragments.insert(key.frag_seq, frame.payload);
        if entry.is_byte_complete() {
            entry.state = MessageState::Received;
            log::debug!("[receiver] msg={} complete ({} bytes)", key.msg_seq, entry.received_bytes);
        }

        self.deliver_ready(channel);
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Number of messages handed to the upper layer so far.
    pub fn delivered(&self) -> u64 {
        self.next_delivery
    }

    /// Sequence number the receiver will deliver next.
    pub fn next_delivery(&self) -> u64 {
        self.next_delivery
    }

    /// State of message `msg_seq`, or `None` if no fragment of it was seen.
    pub fn message_state(&self, msg_seq: u32) -> Option<MessageState> {
        self.messages.get(&msg_seq).map(|m| m.state)
    }

    /// Messages with at least one fragment stored but not yet delivered.
    pub fn buffered_messages(&self) -> usize {
        self.messages
            .values()
            .filter(|m| m.state != MessageState::Delivered)
            .count()
    }

    pub fn frame_format(&self) -> FrameFormat {
        self.format
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Deliver `next_delivery` while it is complete, cascading upward.
    fn deliver_ready(&mut self, channel: &mut dyn Channel) {
        while let Ok(seq) = u32::try_from(self.next_delivery) {
            let Some(entry) = self.messages.get_mut(&seq) else {
                return;
            };
            if entry.state != MessageState::Received {
                return;
            }

            let mut message = Vec::with_capacity(entry.received_bytes);
            for payload in std::mem::take(&mut entry.fragments).into_values() {
                message.extend_from_slice(&payload);
            }
            entry.state = MessageState::Delivered;

            self.next_delivery += 1;
            self.stats.messages_delivered += 1;
            log::debug!("[receiver] → DELIVER msg={seq} len={}", message.len());
            channel.deliver_message(message);
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Recorder;
    use crate::checksum;
    use crate::frame::{Frame, FrameKey};
    use crate::sender::RdtSender;

    fn receiver() -> RdtReceiver {
        RdtReceiver::new(&RdtConfig::default()).unwrap()
    }

    fn data(r: &RdtReceiver, msg: u32, frag: u32, total: Option<u32>, payload: &[u8]) -> Vec<u8> {
        r.frame_format()
            .encode(&Frame::data(FrameKey::new(msg, frag), total, payload.to_vec()))
            .unwrap()
    }

    fn acked_keys(r: &RdtReceiver, rec: &Recorder) -> Vec<FrameKey> {
        rec.frames
            .iter()
            .map(|f| r.frame_format().decode_ack(f).unwrap())
            .collect()
    }

    /// Frames the sender produces for `messages` with an unbounded window.
    fn sender_frames(messages: &[&[u8]]) -> Vec<Vec<u8>> {
        let cfg = RdtConfig {
            window_size: 1000,
            ..RdtConfig::default()
        };
        let mut s = RdtSender::new(&cfg).unwrap();
        let mut rec = Recorder::new();
        for m in messages {
            s.submit(m, &mut rec).unwrap();
        }
        rec.frames
    }

    #[test]
    fn initial_state() {
        let r = receiver();
        assert_eq!(r.delivered(), 0);
        assert_eq!(r.buffered_messages(), 0);
        assert_eq!(r.message_state(0), None);
    }

    #[test]
    fn single_fragment_message_is_acked_and_delivered() {
        let mut r = receiver();
        let mut rec = Recorder::new();
        r.on_frame(&data(&r, 0, 0, Some(5), b"hello"), &mut rec);

        assert_eq!(acked_keys(&r, &rec), vec![FrameKey::new(0, 0)]);
        assert_eq!(rec.delivered, vec![b"hello".to_vec()]);
        assert_eq!(r.message_state(0), Some(MessageState::Delivered));
        assert_eq!(r.delivered(), 1);
    }

    #[test]
    fn corrupted_frame_gets_no_ack() {
        let mut r = receiver();
        let mut rec = Recorder::new();
        let mut frame = data(&r, 0, 0, Some(5), b"hello");
        frame[20] ^= 0x08;
        r.on_frame(&frame, &mut rec);

        assert!(rec.is_empty());
        assert_eq!(r.message_state(0), None);
        assert_eq!(r.stats().corrupt_frames, 1);
    }

    #[test]
    fn impossible_payload_length_gets_no_ack() {
        let mut r = receiver();
        let mut rec = Recorder::new();
        let mut frame = vec![0u8; r.frame_format().frame_size()];
        frame[10] = 250;
        checksum::seal(&mut frame);
        r.on_frame(&frame, &mut rec);

        assert!(rec.is_empty());
        assert_eq!(r.stats().corrupt_frames, 1);
    }

    #[test]
    fn empty_message_is_delivered_empty() {
        let mut r = receiver();
        let mut rec = Recorder::new();
        r.on_frame(&data(&r, 0, 0, Some(0), b""), &mut rec);
        assert_eq!(rec.delivered, vec![Vec::<u8>::new()]);
    }

    #[test]
    fn fragments_out_of_order_reassemble() {
        let message: Vec<u8> = (0..300u32).map(|i| (i * 7) as u8).collect();
        let frames = sender_frames(&[&message]);
        assert_eq!(frames.len(), 3);

        let mut r = receiver();
        let mut rec = Recorder::new();
        for f in frames.iter().rev() {
            r.on_frame(f, &mut rec);
        }

        assert_eq!(rec.delivered, vec![message]);
        assert_eq!(rec.frames.len(), 3);
    }

    #[test]
    fn partial_message_waits_for_missing_fragment() {
        let message = vec![0xabu8; 250];
        let frames = sender_frames(&[&message]);
        let mut r = receiver();
        let mut rec = Recorder::new();

        r.on_frame(&frames[0], &mut rec);
        r.on_frame(&frames[2], &mut rec);
        assert!(rec.delivered.is_empty());
        assert_eq!(r.message_state(0), Some(MessageState::Partial));

        r.on_frame(&frames[1], &mut rec);
        assert_eq!(rec.delivered, vec![message]);
    }

    #[test]
    fn later_message_held_until_earlier_one_delivered() {
        let mut r = receiver();
        let mut rec = Recorder::new();

        r.on_frame(&data(&r, 1, 0, Some(3), b"two"), &mut rec);
        r.on_frame(&data(&r, 2, 0, Some(5), b"three"), &mut rec);
        assert!(rec.delivered.is_empty());
        assert_eq!(r.message_state(1), Some(MessageState::Received));
        assert_eq!(r.buffered_messages(), 2);

        r.on_frame(&data(&r, 0, 0, Some(3), b"one"), &mut rec);
        assert_eq!(
            rec.delivered,
            vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
        );
        assert_eq!(r.next_delivery(), 3);
        assert_eq!(r.buffered_messages(), 0);
    }

    #[test]
    fn duplicate_fragment_is_reacked_but_not_restored() {
        let message = vec![1u8; 200];
        let frames = sender_frames(&[&message]);
        let mut r = receiver();
        let mut rec = Recorder::new();

        r.on_frame(&frames[0], &mut rec);
        r.on_frame(&frames[0], &mut rec);
        assert_eq!(rec.frames.len(), 2);
        assert_eq!(r.stats().duplicate_frames, 1);

        r.on_frame(&frames[1], &mut rec);
        assert_eq!(rec.delivered, vec![message]);
    }

    #[test]
    fn duplicate_after_delivery_is_acked_not_redelivered() {
        let mut r = receiver();
        let mut rec = Recorder::new();
        let frame = data(&r, 0, 0, Some(2), b"hi");

        r.on_frame(&frame, &mut rec);
        r.on_frame(&frame, &mut rec);

        assert_eq!(rec.delivered.len(), 1);
        assert_eq!(
            acked_keys(&r, &rec),
            vec![FrameKey::new(0, 0), FrameKey::new(0, 0)]
        );
        assert_eq!(r.message_state(0), Some(MessageState::Delivered));
        assert_eq!(r.stats().messages_delivered, 1);
    }

    #[test]
    fn three_hundred_byte_message_reassembled_in_order() {
        let first = b"earlier".to_vec();
        let message: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
        let frames = sender_frames(&[&first, &message]);
        assert_eq!(frames.len(), 4);

        let mut r = receiver();
        let mut rec = Recorder::new();
        // The 300-byte message arrives before the earlier one.
        for f in &frames[1..] {
            r.on_frame(f, &mut rec);
        }
        assert!(rec.delivered.is_empty());

        r.on_frame(&frames[0], &mut rec);
        assert_eq!(rec.delivered, vec![first, message]);
    }
}
