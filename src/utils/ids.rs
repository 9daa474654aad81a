//! Opaque identifiers for conversations and messages.

use base64::Engine as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const ID_BYTES: usize = 12;

static FALLBACK_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a URL-safe random identifier (16 characters).
pub fn new_id() -> String {
    random_urlsafe(ID_BYTES)
}

pub fn random_urlsafe(bytes_len: usize) -> String {
    let bytes = best_effort_random_bytes(bytes_len);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn best_effort_random_bytes(len: usize) -> Vec<u8> {
    let mut out = vec![0_u8; len];
    if getrandom::fill(&mut out).is_ok() {
        return out;
    }

    // OS entropy unavailable: mix the clock with a process-wide counter so ids
    // stay unique within this process.
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let count = FALLBACK_COUNTER.fetch_add(1, Ordering::Relaxed);
    let seed = nanos ^ count.rotate_left(32);
    for (index, byte) in out.iter_mut().enumerate() {
        let shifted = seed.rotate_left((index as u32 * 8) % 64) ^ count;
        *byte = (shifted & 0xff) as u8;
    }
    out
}
