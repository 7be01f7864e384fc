//! 16-bit wraparound checksum over a frame.
//!
//! The checksum occupies the first [`CHECKSUM_LEN`] bytes of every frame and
//! covers everything after it, padding included.  The code is a plain modular
//! sum of big-endian 16-bit words:
//!
//! ```text
//!  sum = Σ word[i]  (mod 2^16)     for every word after the checksum field
//! ```
//!
//! Any single corrupted word changes the sum.  Corruption spread over several
//! words can cancel out under wraparound and go unnoticed; this is a weak
//! integrity check, not a cryptographic one.

/// Width of the checksum field at the start of every frame.
pub const CHECKSUM_LEN: usize = 2;

/// Compute the checksum of `frame`, skipping the checksum field itself.
///
/// A trailing odd byte is treated as the high byte of a word whose low byte
/// is zero.  Frames shorter than [`CHECKSUM_LEN`] sum to `0`.
pub fn compute(frame: &[u8]) -> u16 {
    let body = frame.get(CHECKSUM_LEN..).unwrap_or(&[]);
    let mut words = body.chunks_exact(2);
    let mut sum = words
        .by_ref()
        .fold(0u16, |acc, w| acc.wrapping_add(u16::from_be_bytes([w[0], w[1]])));
    if let [last] = words.remainder() {
        sum = sum.wrapping_add(u16::from(*last) << 8);
    }
    sum
}

/// Read the checksum stored in `frame`, if the frame is long enough to hold one.
pub fn stored(frame: &[u8]) -> Option<u16> {
    frame
        .get(..CHECKSUM_LEN)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
}

/// Write the checksum of `frame` into its checksum field.
///
/// Does nothing if `frame` is shorter than the checksum field.
pub fn seal(frame: &mut [u8]) {
    if frame.len() < CHECKSUM_LEN {
        return;
    }
    let sum = compute(frame);
    frame[..CHECKSUM_LEN].copy_from_slice(&sum.to_be_bytes());
}

/// `true` when the stored checksum matches the recomputed one.
pub fn verify(frame: &[u8]) -> bool {
    stored(frame) == Some(compute(frame))
}
