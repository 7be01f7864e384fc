//! Deterministic discrete-event simulation of one sender/receiver pair.
//!
//! Real channels drop, corrupt, duplicate and reorder datagrams.  To exercise
//! the engines without a real network, [`Simulator`] plays both the channel
//! and the event dispatcher on a virtual clock:
//!
//! | Fault        | Model                                                    |
//! |--------------|----------------------------------------------------------|
//! | Loss         | Drop a frame with probability `loss_rate`.               |
//! | Corruption   | Flip one random bit with probability `corrupt_rate`.     |
//! | Duplication  | Deliver two copies with probability `duplicate_rate`.    |
//! | Reordering   | Each copy is delayed by `latency + U(0, jitter)`, so     |
//! |              | frames sent close together can overtake each other.      |
//!
//! Faults apply in both directions.  Events are kept in a min-heap keyed by
//! virtual delivery time (ties broken by scheduling order) and handed to the
//! engines one at a time, each running to completion.  All randomness comes
//! from a seeded ChaCha8 RNG, so a given seed always yields the same
//! [`SimulationReport`].

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::channel::{Recorder, TimerCommand};
use crate::config::RdtConfig;
use crate::error::RdtError;
use crate::receiver::{RdtReceiver, ReceiverStats};
use crate::sender::{RdtSender, SenderStats};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Fault model and pacing for a simulation run.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Probability that a frame is silently dropped.
    pub loss_rate: f64,
    /// Probability that a surviving copy has one bit flipped.
    pub corrupt_rate: f64,
    /// Probability that a surviving frame is delivered twice.
    pub duplicate_rate: f64,
    /// One-way delay applied to every frame.
    pub latency: Duration,
    /// Upper bound of the uniform extra delay added to each copy.
    pub jitter: Duration,
    /// Virtual time between consecutive submissions.
    pub submit_interval: Duration,
    /// Virtual time after which the run stops and the sender is drained.
    pub deadline: Duration,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default: the simulator is a plain delay line.
        Self {
            loss_rate: 0.0,
            corrupt_rate: 0.0,
            duplicate_rate: 0.0,
            latency: Duration::from_millis(10),
            jitter: Duration::ZERO,
            submit_interval: Duration::from_millis(1),
            deadline: Duration::from_secs(3600),
            seed: 0,
        }
    }
}

impl SimulatorConfig {
    fn validate(&self) -> Result<(), RdtError> {
        for (name, p) in [
            ("loss rate", self.loss_rate),
            ("corruption rate", self.corrupt_rate),
            ("duplication rate", self.duplicate_rate),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(RdtError::InvalidConfig(format!(
                    "{name} {p} outside [0, 1]"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// What the impaired link did to the frames offered to it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    pub frames_offered: u64,
    pub frames_lost: u64,
    pub frames_corrupted: u64,
    pub frames_duplicated: u64,
    /// Copies that reached an engine.
    pub frames_delivered: u64,
}

/// Outcome of [`Simulator::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationReport {
    /// Messages handed to the receiver's upper layer, in delivery order.
    pub delivered: Vec<Vec<u8>>,
    /// Submissions the sender refused.
    pub rejected: usize,
    /// `true` when every accepted message was delivered and acknowledged
    /// before the deadline.
    pub completed: bool,
    /// Largest in-flight count observed after any event.
    pub max_in_flight: usize,
    /// Frames flushed by the final drain.
    pub frames_drained: usize,
    /// Virtual time at which the last event was processed.
    pub elapsed: Duration,
    pub sender: SenderStats,
    pub receiver: ReceiverStats,
    pub link: LinkStats,
}

// ---------------------------------------------------------------------------
// Event queue
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Event {
    /// Submit message `i` of the run.
    Submit(usize),
    /// A data frame reaches the receiver.
    ToReceiver(Vec<u8>),
    /// An ack reaches the sender.
    ToSender(Vec<u8>),
    /// The retransmission timer armed as generation `n` expires.
    Timeout(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Sender,
    Receiver,
}

#[derive(Debug)]
struct Scheduled {
    at: Duration,
    order: u64,
    event: Event,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        (self.at, self.order) == (other.at, other.order)
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest event.
        (other.at, other.order).cmp(&(self.at, self.order))
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// Drives one [`RdtSender`] and one [`RdtReceiver`] over a simulated link.
#[derive(Debug)]
pub struct Simulator {
    config: SimulatorConfig,
    rng: ChaCha8Rng,
    sender: RdtSender,
    receiver: RdtReceiver,

    now: Duration,
    next_order: u64,
    queue: BinaryHeap<Scheduled>,

    /// Bumped on every start/stop so stale expiries can be recognised.
    timer_generation: u64,
    timer_armed: bool,

    delivered: Vec<Vec<u8>>,
    link: LinkStats,
    max_in_flight: usize,
}

impl Simulator {
    /// Build a simulator whose engines both use `rdt`.
    pub fn new(rdt: &RdtConfig, config: SimulatorConfig) -> Result<Self, RdtError> {
        config.validate()?;
        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            sender: RdtSender::new(rdt)?,
            receiver: RdtReceiver::new(rdt)?,
            config,
            now: Duration::ZERO,
            next_order: 0,
            queue: BinaryHeap::new(),
            timer_generation: 0,
            timer_armed: false,
            delivered: Vec::new(),
            link: LinkStats::default(),
            max_in_flight: 0,
        })
    }

    /// Submit `messages` one per `submit_interval` and run until all accepted
    /// ones are delivered and acknowledged, or the deadline passes.  Then
    /// drain the sender and let the flushed frames settle.
    pub fn run(mut self, messages: &[Vec<u8>]) -> SimulationReport {
        for i in 0..messages.len() {
            let at = self.config.submit_interval * i as u32;
            self.schedule(at, Event::Submit(i));
        }

        let mut submitted = 0usize;
        let mut rejected = 0usize;
        let mut completed = false;

        loop {
            let accepted = (submitted - rejected) as u64;
            if submitted == messages.len()
                && self.receiver.delivered() == accepted
                && self.sender.is_idle()
            {
                completed = true;
                break;
            }

            let Some(next) = self.queue.pop() else {
                break;
            };
            if next.at > self.config.deadline {
                log::warn!("[sim] deadline {:?} reached", self.config.deadline);
                break;
            }
            self.now = next.at;

            match next.event {
                Event::Submit(i) => {
                    submitted += 1;
                    let mut rec = Recorder::new();
                    if let Err(e) = self.sender.submit(&messages[i], &mut rec) {
                        log::warn!("[sim] message {i} rejected: {e}");
                        rejected += 1;
                    }
                    self.apply(Side::Sender, rec);
                }
                event => self.dispatch(event),
            }
            self.max_in_flight = self.max_in_flight.max(self.sender.in_flight());
        }

        let mut rec = Recorder::new();
        let frames_drained = self.sender.drain(&mut rec);
        self.apply(Side::Sender, rec);
        self.settle();

        let report = SimulationReport {
            delivered: self.delivered,
            rejected,
            completed,
            max_in_flight: self.max_in_flight,
            frames_drained,
            elapsed: self.now,
            sender: self.sender.stats(),
            receiver: self.receiver.stats(),
            link: self.link,
        };
        log::info!(
            "[sim] {} message(s) delivered in {:?}; {} frame(s) sent, {} timeout(s), {} lost, {} corrupted",
            report.delivered.len(),
            report.elapsed,
            report.sender.frames_sent,
            report.sender.timeouts,
            report.link.frames_lost,
            report.link.frames_corrupted
        );
        report
    }

    /// Process whatever frames are still on the link after the drain.
    /// Timers and submissions are no longer honoured.
    fn settle(&mut self) {
        while let Some(next) = self.queue.pop() {
            if matches!(next.event, Event::ToReceiver(_) | Event::ToSender(_)) {
                self.now = next.at;
                self.dispatch(next.event);
            }
        }
    }

    /// Hand one link or timer event to the engine it concerns.
    fn dispatch(&mut self, event: Event) {
        let mut rec = Recorder::new();
        match event {
            Event::ToReceiver(frame) => {
                self.link.frames_delivered += 1;
                self.receiver.on_frame(&frame, &mut rec);
                self.apply(Side::Receiver, rec);
            }
            Event::ToSender(frame) => {
                self.link.frames_delivered += 1;
                self.sender.on_frame(&frame, &mut rec);
                self.apply(Side::Sender, rec);
            }
            Event::Timeout(generation) => {
                if generation != self.timer_generation || !self.timer_armed {
                    return;
                }
                self.timer_armed = false;
                self.sender.on_timeout(&mut rec);
                self.apply(Side::Sender, rec);
            }
            Event::Submit(_) => {}
        }
    }

    /// Carry out the side effects an engine recorded.
    fn apply(&mut self, from: Side, rec: Recorder) {
        for cmd in rec.timer {
            self.timer_generation += 1;
            match cmd {
                TimerCommand::Start(timeout) => {
                    debug_assert!(!self.timer_armed, "timer re-armed while running");
                    self.timer_armed = true;
                    let at = self.now + timeout;
                    let generation = self.timer_generation;
                    self.schedule(at, Event::Timeout(generation));
                }
                TimerCommand::Stop => self.timer_armed = false,
            }
        }
        for frame in rec.frames {
            self.transmit(from, frame);
        }
        self.delivered.extend(rec.delivered);
    }

    /// Push one frame through the impaired link.
    fn transmit(&mut self, from: Side, frame: Vec<u8>) {
        self.link.frames_offered += 1;
        if self.rng.gen_bool(self.config.loss_rate) {
            self.link.frames_lost += 1;
            return;
        }
        let copies = if self.rng.gen_bool(self.config.duplicate_rate) {
            self.link.frames_duplicated += 1;
            2
        } else {
            1
        };

        for _ in 0..copies {
            let mut bytes = frame.clone();
            if !bytes.is_empty() && self.rng.gen_bool(self.config.corrupt_rate) {
                let bit = self.rng.gen_range(0..bytes.len() * 8);
                bytes[bit / 8] ^= 1 << (bit % 8);
                self.link.frames_corrupted += 1;
            }
            let delay = self.config.latency + self.config.jitter.mul_f64(self.rng.gen::<f64>());
            let event = match from {
                Side::Sender => Event::ToReceiver(bytes),
                Side::Receiver => Event::ToSender(bytes),
            };
            let at = self.now + delay;
            self.schedule(at, event);
        }
    }

    fn schedule(&mut self, at: Duration, event: Event) {
        let order = self.next_order;
        self.next_order += 1;
        self.queue.push(Scheduled { at, order, event });
    }
}
