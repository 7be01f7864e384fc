//! Send-side ARQ state machine.
//!
//! [`RdtSender`] fragments submitted messages into fixed-size frames, keeps
//! every frame in an outbound buffer until it is acknowledged, and releases at
//! most `window_size` of them onto the channel at a time.
//!
//! # Protocol contract
//!
//! - Frames leave in ascending `(msg_seq, frag_seq)` order.
//! - At most `window_size` frames are [`EntryState::InFlight`] at once.
//! - Acks are **selective**: each names exactly one data frame.
//! - `submit` sends new frames into any free window slot straight away.  On
//!   the ack path the window is refilled only once the whole current window
//!   has been acknowledged (the in-flight count drops to zero).
//! - On timeout every in-flight frame is presumed lost and the window is
//!   sent again as a whole (go back N).  Frames whose ack was merely late are
//!   resent too; the receiver acks duplicates, so this is harmless.
//! - One retransmission timer, armed while anything is in flight.
//!
//! This module only manages state; all I/O goes through [`Channel`].

use std::collections::BTreeMap;
use std::time::Duration;

use crate::channel::Channel;
use crate::config::RdtConfig;
use crate::error::RdtError;
use crate::frame::{Frame, FrameFormat, FrameKey};

// ---------------------------------------------------------------------------
// OutboundEntry
// ---------------------------------------------------------------------------

/// Lifecycle of one buffered frame.
///
/// ```text
///  Pending ──window fill──▶ InFlight ──ack──▶ Acked
///     ▲                        │
///     └───────timeout──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Waiting for a slot in the window.
    Pending,
    /// Sent and not yet acknowledged.
    InFlight,
    /// Acknowledged; never sent again.
    Acked,
}

/// A frame held in the outbound buffer.
#[derive(Debug, Clone)]
pub struct OutboundEntry {
    /// The sealed frame, ready for the channel.
    pub bytes: Vec<u8>,
    pub state: EntryState,
    /// Number of times this frame has been put on the channel by window fill.
    pub tx_count: u32,
}

impl OutboundEntry {
    fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            state: EntryState::Pending,
            tx_count: 0,
        }
    }
}

/// Running totals kept by the sender.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SenderStats {
    pub messages_submitted: u64,
    /// Frames put on the channel by window fill, retransmissions included.
    pub frames_sent: u64,
    /// Subset of `frames_sent` that were not first transmissions.
    pub retransmissions: u64,
    pub timeouts: u64,
    /// Acks that passed the checksum.
    pub acks_received: u64,
    /// Acks that failed to parse or verify.
    pub corrupt_acks: u64,
    /// Valid acks that changed nothing (duplicate, late, unknown).
    pub stale_acks: u64,
    /// Frames flushed by [`RdtSender::drain`].
    pub frames_drained: u64,
}

// ---------------------------------------------------------------------------
// RdtSender
// ---------------------------------------------------------------------------

/// Sender engine for one link.
#[derive(Debug)]
pub struct RdtSender {
    format: FrameFormat,
    window_size: usize,
    timeout: Duration,
    max_message_size: usize,

    /// Sequence number for the next accepted message.  Wider than the wire
    /// field so exhaustion is detectable instead of wrapping.
    next_msg_seq: u64,

    /// Every frame not yet released, ordered by transmission priority.
    buffer: BTreeMap<FrameKey, OutboundEntry>,

    /// Fragments still awaiting an ack, per message.
    unacked_fragments: BTreeMap<u32, usize>,

    /// Number of entries currently in [`EntryState::InFlight`].
    in_flight: usize,

    timer_armed: bool,

    stats: SenderStats,
}

impl RdtSender {
    /// Create a sender from a validated copy of `config`.
    pub fn new(config: &RdtConfig) -> Result<Self, RdtError> {
        let format = config.validate()?;
        Ok(Self {
            format,
            window_size: config.window_size,
            timeout: config.timeout,
            max_message_size: config.max_message_size,
            next_msg_seq: 0,
            buffer: BTreeMap::new(),
            unacked_fragments: BTreeMap::new(),
            in_flight: 0,
            timer_armed: false,
            stats: SenderStats::default(),
        })
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Accept a message from the upper layer.
    ///
    /// Fragments the message, buffers every fragment as
    /// [`EntryState::Pending`] and fills the window.  Returns the message
    /// sequence number assigned to it.
    ///
    /// A rejected message leaves the sender untouched and does not consume a
    /// sequence number.
    pub fn submit(&mut self, message: &[u8], channel: &mut dyn Channel) -> Result<u32, RdtError> {
        if message.len() > self.max_message_size {
            log::warn!(
                "[sender] rejecting {}-byte message (max {})",
                message.len(),
                self.max_message_size
            );
            return Err(RdtError::MessageTooLarge {
                len: message.len(),
                max: self.max_message_size,
            });
        }
        let msg_seq =
            u32::try_from(self.next_msg_seq).map_err(|_| RdtError::SequenceExhausted)?;

        let frames = self.fragment(msg_seq, message)?;
        log::debug!(
            "[sender] ← SUBMIT msg={} len={} frags={}",
            msg_seq,
            message.len(),
            frames.len()
        );
        self.unacked_fragments.insert(msg_seq, frames.len());
        for (key, bytes) in frames {
            self.buffer.insert(key, OutboundEntry::new(bytes));
        }
        self.next_msg_seq += 1;
        self.stats.messages_submitted += 1;

        self.fill_window(channel);
        Ok(msg_seq)
    }

    /// Process a frame arriving from the receiver (an ack).
    ///
    /// Corrupted acks and acks that match nothing outstanding are dropped.
    /// Once the whole window is acknowledged the timer is stopped and the
    /// next window is released.
    pub fn on_frame(&mut self, frame: &[u8], channel: &mut dyn Channel) {
        let key = match self.format.decode_ack(frame) {
            Ok(key) => key,
            Err(e) => {
                self.stats.corrupt_acks += 1;
                log::trace!("[sender] ← ACK dropped: {e}");
                return;
            }
        };
        self.stats.acks_received += 1;

        let Some(entry) = self.buffer.get_mut(&key) else {
            self.stats.stale_acks += 1;
            log::trace!("[sender] ← ACK {key} for released frame");
            return;
        };
        match entry.state {
            EntryState::Acked => {
                self.stats.stale_acks += 1;
                log::trace!("[sender] ← ACK {key} duplicate");
                return;
            }
            EntryState::Pending if entry.tx_count == 0 => {
                self.stats.stale_acks += 1;
                log::trace!("[sender] ← ACK {key} for frame never sent");
                return;
            }
            // Not reached while window fill takes the lowest keys first: sent
            // frames sort below never-sent ones, so `on_timeout` resends every
            // entry it re-pends before returning.
            EntryState::Pending => {}
            EntryState::InFlight => self.in_flight -= 1,
        }
        entry.state = EntryState::Acked;
        log::debug!("[sender] ← ACK {key} in_flight={}", self.in_flight);

        self.release_if_complete(key.msg_seq);

        if self.in_flight == 0 {
            self.stop_timer(channel);
            self.fill_window(channel);
        }
    }

    /// Handle expiry of the retransmission timer.
    ///
    /// Every in-flight frame goes back to pending and the window is filled
    /// again, which resends the same frames in the same order.  A timeout
    /// that arrives while the timer is not armed is ignored.
    pub fn on_timeout(&mut self, channel: &mut dyn Channel) {
        if !self.timer_armed {
            log::trace!("[sender] ignoring timeout while disarmed");
            return;
        }
        self.timer_armed = false;
        self.stats.timeouts += 1;

        let mut lost = 0usize;
        for entry in self
            .buffer
            .values_mut()
            .filter(|e| e.state == EntryState::InFlight)
        {
            entry.state = EntryState::Pending;
            lost += 1;
        }
        self.in_flight = 0;
        log::debug!("[sender] timeout — going back over {lost} frame(s)");

        self.fill_window(channel);
    }

    /// Flush every unacknowledged frame at shutdown, ignoring the window.
    ///
    /// Stops the timer and releases the whole buffer.  Returns the number of
    /// frames written to the channel.
    pub fn drain(&mut self, channel: &mut dyn Channel) -> usize {
        self.stop_timer(channel);

        let mut flushed = 0usize;
        for entry in self.buffer.values().filter(|e| e.state != EntryState::Acked) {
            channel.send_frame(&entry.bytes);
            flushed += 1;
        }
        self.buffer.clear();
        self.unacked_fragments.clear();
        self.in_flight = 0;
        self.stats.frames_drained += flushed as u64;

        log::info!("[sender] drained {flushed} frame(s)");
        flushed
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Number of frames sent and awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Number of buffered frames waiting for a window slot.
    pub fn pending(&self) -> usize {
        self.buffer
            .values()
            .filter(|e| e.state == EntryState::Pending)
            .count()
    }

    /// `true` when every submitted frame has been acknowledged or drained.
    pub fn is_idle(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn timer_armed(&self) -> bool {
        self.timer_armed
    }

    /// State of one buffered frame, or `None` once it has been released.
    pub fn entry_state(&self, key: FrameKey) -> Option<EntryState> {
        self.buffer.get(&key).map(|e| e.state)
    }

    pub fn frame_format(&self) -> FrameFormat {
        self.format
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Split `message` into sealed frames.
    ///
    /// Fragment 0 carries the total size and `capacity(0)` payload bytes;
    /// every later fragment carries up to `max_payload` bytes.
    fn fragment(&self, msg_seq: u32, message: &[u8]) -> Result<Vec<(FrameKey, Vec<u8>)>, RdtError> {
        let total = u32::try_from(message.len()).map_err(|_| RdtError::MessageTooLarge {
            len: message.len(),
            max: self.max_message_size,
        })?;
        let count = self.format.fragment_count(message.len());

        let mut frames = Vec::with_capacity(count);
        let mut rest = message;
        for frag_seq in 0..count as u32 {
            let take = rest.len().min(self.format.capacity(frag_seq));
            let (chunk, tail) = rest.split_at(take);
            rest = tail;

            let key = FrameKey::new(msg_seq, frag_seq);
            let total_size = (frag_seq == 0).then_some(total);
            let bytes = self
                .format
                .encode(&Frame::data(key, total_size, chunk.to_vec()))?;
            frames.push((key, bytes));
        }
        debug_assert!(rest.is_empty(), "fragment count too small");
        Ok(frames)
    }

    /// Move pending frames into the window until it is full, then make sure
    /// the timer runs while anything is in flight.
    fn fill_window(&mut self, channel: &mut dyn Channel) {
        let room = self.window_size.saturating_sub(self.in_flight);
        for (key, entry) in self
            .buffer
            .iter_mut()
            .filter(|(_, e)| e.state == EntryState::Pending)
            .take(room)
        {
            if entry.tx_count > 0 {
                self.stats.retransmissions += 1;
            }
            entry.state = EntryState::InFlight;
            entry.tx_count += 1;
            self.in_flight += 1;
            self.stats.frames_sent += 1;
            channel.send_frame(&entry.bytes);
            log::debug!(
                "[sender] → DATA {key} tx={} in_flight={}",
                entry.tx_count,
                self.in_flight
            );
        }

        if self.in_flight > 0 && !self.timer_armed {
            channel.start_timer(self.timeout);
            self.timer_armed = true;
        }
    }

    fn stop_timer(&mut self, channel: &mut dyn Channel) {
        if self.timer_armed {
            channel.stop_timer();
            self.timer_armed = false;
        }
    }

    /// Drop a message's entries once every one of its fragments is acked.
    fn release_if_complete(&mut self, msg_seq: u32) {
        let Some(remaining) = self.unacked_fragments.get_mut(&msg_seq) else {
            return;
        };
        *remaining -= 1;
        if *remaining > 0 {
            return;
        }
        self.unacked_fragments.remove(&msg_seq);

        let keys: Vec<FrameKey> = self
            .buffer
            .range(FrameKey::new(msg_seq, 0)..=FrameKey::new(msg_seq, u32::MAX))
            .map(|(k, _)| *k)
            .collect();
        for key in keys {
            self.buffer.remove(&key);
        }
        log::debug!("[sender] msg={msg_seq} fully acknowledged");
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
