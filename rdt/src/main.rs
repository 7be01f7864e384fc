//! Entry point for `rdt-sim`.
//!
//! Generates a batch of random messages, pushes them through a simulated
//! lossy link and checks that the receiver delivered every one of them, in
//! order and byte for byte.  All protocol work lives in the library;
//! `main.rs` owns only process setup (logging, argument parsing).

use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use rdt::{RdtConfig, Simulator, SimulatorConfig};

/// Reliable message delivery over a simulated lossy channel.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Number of messages to submit.
    #[arg(short = 'n', long, default_value_t = 100)]
    messages: usize,

    /// Longest generated message, in bytes.
    #[arg(long, default_value_t = 1000)]
    max_len: usize,

    /// Probability that a frame is dropped.
    #[arg(long, default_value_t = 0.1)]
    loss: f64,

    /// Probability that a frame has one bit flipped.
    #[arg(long, default_value_t = 0.05)]
    corrupt: f64,

    /// Probability that a frame is duplicated.
    #[arg(long, default_value_t = 0.0)]
    duplicate: f64,

    /// One-way link latency in milliseconds.
    #[arg(long, default_value_t = 20)]
    latency_ms: u64,

    /// Maximum extra random delay in milliseconds (causes reordering).
    #[arg(long, default_value_t = 20)]
    jitter_ms: u64,

    /// Virtual milliseconds between submissions.
    #[arg(long, default_value_t = 5)]
    interval_ms: u64,

    /// RNG seed for message contents and link faults.
    #[arg(short, long, default_value_t = 1)]
    seed: u64,

    /// Frame size in bytes.
    #[arg(long, default_value_t = rdt::frame::DEFAULT_FRAME_SIZE)]
    frame_size: usize,

    /// Sliding window size in frames.
    #[arg(short, long, default_value_t = 10)]
    window: usize,

    /// Retransmission timeout in milliseconds.
    #[arg(short, long, default_value_t = 300)]
    timeout_ms: u64,
}

fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    let rdt = RdtConfig {
        frame_size: cli.frame_size,
        window_size: cli.window,
        timeout: Duration::from_millis(cli.timeout_ms),
        ..RdtConfig::default()
    };
    let link = SimulatorConfig {
        loss_rate: cli.loss,
        corrupt_rate: cli.corrupt,
        duplicate_rate: cli.duplicate,
        latency: Duration::from_millis(cli.latency_ms),
        jitter: Duration::from_millis(cli.jitter_ms),
        submit_interval: Duration::from_millis(cli.interval_ms),
        seed: cli.seed,
        ..SimulatorConfig::default()
    };

    let mut rng = ChaCha8Rng::seed_from_u64(cli.seed);
    let messages: Vec<Vec<u8>> = (0..cli.messages)
        .map(|_| {
            let len = rng.gen_range(0..=cli.max_len);
            (0..len).map(|_| rng.gen()).collect()
        })
        .collect();

    log::info!(
        "Simulating {} message(s): loss={} corrupt={} duplicate={} window={}",
        messages.len(),
        cli.loss,
        cli.corrupt,
        cli.duplicate,
        cli.window
    );
    let report = Simulator::new(&rdt, link)?.run(&messages);

    println!("messages delivered : {}/{}", report.delivered.len(), messages.len());
    println!("rejected           : {}", report.rejected);
    println!("virtual time       : {:?}", report.elapsed);
    println!("frames sent        : {}", report.sender.frames_sent);
    println!("retransmissions    : {}", report.sender.retransmissions);
    println!("timeouts           : {}", report.sender.timeouts);
    println!("acks received      : {}", report.sender.acks_received);
    println!("corrupt acks       : {}", report.sender.corrupt_acks);
    println!("corrupt frames     : {}", report.receiver.corrupt_frames);
    println!("duplicate frames   : {}", report.receiver.duplicate_frames);
    println!("frames lost        : {}", report.link.frames_lost);
    println!("max in flight      : {}", report.max_in_flight);

    if !report.completed {
        bail!("deadline reached before every message was delivered");
    }
    let accepted: Vec<&Vec<u8>> = messages
        .iter()
        .filter(|m| m.len() <= rdt.max_message_size)
        .collect();
    if report.delivered.iter().ne(accepted.iter().copied()) {
        bail!("delivered messages differ from submitted ones");
    }
    log::info!("All messages delivered in order");
    Ok(())
}
