//! The boundary between the engines and whatever carries their frames.
//!
//! The engines never own a socket, a clock or an upper layer.  Every
//! operation takes a `&mut dyn Channel` and pushes its side effects through
//! it: frames to transmit, messages to hand upward, timer commands.  The
//! dispatcher that owns the channel feeds events back in (frame arrivals,
//! [`crate::sender::RdtSender::on_timeout`]).
//!
//! [`Recorder`] is a channel that only writes down what it is asked to do.
//! It is the building block of [`crate::simulator`] and of most tests.

use std::time::Duration;

/// Side effects an engine may request while handling one event.
pub trait Channel {
    /// Hand one encoded frame to the (unreliable) lower layer.
    fn send_frame(&mut self, frame: &[u8]);

    /// Hand one reassembled message to the upper layer.
    fn deliver_message(&mut self, message: Vec<u8>);

    /// Arm the single retransmission timer.  Never called while armed.
    fn start_timer(&mut self, timeout: Duration);

    /// Disarm the retransmission timer.
    fn stop_timer(&mut self);
}

/// A timer request captured by [`Recorder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    Start(Duration),
    Stop,
}

/// A [`Channel`] that records every request in order of arrival.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Recorder {
    /// Encoded frames, in send order.
    pub frames: Vec<Vec<u8>>,
    /// Delivered messages, in delivery order.
    pub delivered: Vec<Vec<u8>>,
    /// Timer commands, in issue order.
    pub timer: Vec<TimerCommand>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move everything recorded so far out, leaving the recorder empty.
    pub fn take(&mut self) -> Recorder {
        std::mem::take(self)
    }

    /// `true` when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.delivered.is_empty() && self.timer.is_empty()
    }

    /// Timer state implied by the most recent command, if any was issued.
    pub fn timer_armed(&self) -> Option<bool> {
        self.timer
            .last()
            .map(|cmd| matches!(cmd, TimerCommand::Start(_)))
    }
}

impl Channel for Recorder {
    fn send_frame(&mut self, frame: &[u8]) {
        self.frames.push(frame.to_vec());
    }

    fn deliver_message(&mut self, message: Vec<u8>) {
        self.delivered.push(message);
    }

    fn start_timer(&mut self, timeout: Duration) {
        self.timer.push(TimerCommand::Start(timeout));
    }

    fn stop_timer(&mut self) {
        self.timer.push(TimerCommand::Stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_in_order() {
        let mut rec = Recorder::new();
        assert!(rec.is_empty());
        assert_eq!(rec.timer_armed(), None);

        let ch: &mut dyn Channel = &mut rec;
        ch.send_frame(b"one");
        ch.start_timer(Duration::from_millis(5));
        ch.send_frame(b"two");
        ch.deliver_message(b"msg".to_vec());
        ch.stop_timer();

        assert_eq!(rec.frames, vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(rec.delivered, vec![b"msg".to_vec()]);
        assert_eq!(
            rec.timer,
            vec![
                TimerCommand::Start(Duration::from_millis(5)),
                TimerCommand::Stop
            ]
        );
        assert_eq!(rec.timer_armed(), Some(false));
    }

    #[test]
    fn take_empties_the_recorder() {
        let mut rec = Recorder::new();
        rec.send_frame(b"x");
        let taken = rec.take();
        assert_eq!(taken.frames.len(), 1);
        assert!(rec.is_empty());
    }
}
