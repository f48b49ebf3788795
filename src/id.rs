//! `IdGenerator`: monotonic message-ids and a per-session unique string
//! generator.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

const BASE32_ALPHABET: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

/// Epoch used by the unique-string generator, milliseconds since the Unix
/// epoch.
const UNIQUE_STRING_EPOCH_MS: i64 = 1_414_213_562_373;

pub struct IdGenerator {
    next_msg_id: AtomicU64,
    unique_counter: AtomicU64,
}

impl IdGenerator {
    /// Seeds the message-id counter at `0xffff + uniform_random(0..=0xffff)`.
    #[must_use]
    pub fn new() -> Self {
        let seed = 0xffff_u64 + rand::rng().random_range(0..=0xffff_u64);
        Self {
            next_msg_id: AtomicU64::new(seed),
            unique_counter: AtomicU64::new(0),
        }
    }

    /// Re-seeds the message-id counter. Called on each new connection.
    pub fn reseed(&self) {
        let seed = 0xffff_u64 + rand::rng().random_range(0..=0xffff_u64);
        self.next_msg_id.store(seed, Ordering::SeqCst);
    }

    /// Next message-id, emitted as a base-10 string.
    pub fn next_msg_id(&self) -> String {
        self.next_msg_id.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// A process-lifetime-unique string:
    /// `(millis_since_epoch - UNIQUE_STRING_EPOCH_MS) << 16 | (counter & 0xffff)`,
    /// base-32 encoded.
    pub fn next_unique_string(&self, now_millis: i64) -> String {
        let counter = self.unique_counter.fetch_add(1, Ordering::SeqCst) & 0xffff;
        let delta = now_millis - UNIQUE_STRING_EPOCH_MS;
        let value = (delta << 16) | (counter as i64 & 0xffff);
        base32_encode(value)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn base32_encode(value: i64) -> String {
    if value == 0 {
        return "0".into();
    }
    // Negative delta: clock before the epoch.
    let negative = value < 0;
    let mut magnitude = value.unsigned_abs();
    let mut digits = Vec::new();
    while magnitude > 0 {
        let idx = (magnitude & 0x1f) as usize;
        digits.push(BASE32_ALPHABET[idx]);
        magnitude >>= 5;
    }
    if negative {
        digits.push(b'-');
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}
