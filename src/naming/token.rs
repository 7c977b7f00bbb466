// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Short time-ordered tokens for allocation identifiers.
//!
//! A token is 8 Crockford base32 characters encoding 40 bits:
//!
//! ```text
//!  39            12 11          0
//! ┌────────────────┬─────────────┐
//! │ unix seconds   │ 1/4096 sec  │
//! │ (low 28 bits)  │ fraction    │
//! └────────────────┴─────────────┘
//! ```
//!
//! Tokens sort lexicographically in time order. Within one process every
//! token is strictly greater than the previous one, even when the clock
//! stalls or steps backwards.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// Characters in a token.
pub const TOKEN_LEN: usize = 8;

const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const MASK: u64 = (1 << 40) - 1;
const SECONDS_MASK: u64 = 0x0FFF_FFFF;

static LAST: AtomicU64 = AtomicU64::new(0);

/// Raw 40-bit value for a wall-clock instant.
fn value_at(secs: i64, nanos: u32) -> u64 {
    let secs = (secs.max(0) as u64) & SECONDS_MASK;
    let fraction = (u64::from(nanos) >> 18) & 0xFFF;
    (secs << 12) | fraction
}

/// Render a 40-bit value.
fn encode(value: u64) -> String {
    (0..TOKEN_LEN)
        .rev()
        .map(|i| ALPHABET[((value >> (i * 5)) & 0x1F) as usize] as char)
        .collect()
}

/// Parse a token back into its 40-bit value.
///
/// Lowercase input is accepted; `I`/`L` and `O` read as `1` and `0`.
pub fn decode(token: &str) -> Option<u64> {
    if token.len() != TOKEN_LEN {
        return None;
    }
    token.chars().try_fold(0u64, |acc, c| {
        let c = match c.to_ascii_uppercase() {
            'I' | 'L' => '1',
            'O' => '0',
            other => other,
        };
        let digit = ALPHABET.iter().position(|&a| a as char == c)?;
        Some((acc << 5) | digit as u64)
    })
}

/// Whether `token` is a well-formed token.
pub fn is_valid(token: &str) -> bool {
    decode(token).is_some()
}

/// Token for an explicit instant, without the monotonic guard.
pub fn token_at(secs: i64, nanos: u32) -> String {
    encode(value_at(secs, nanos))
}

/// Next token for this process.
pub fn next_token() -> String {
    let now = Utc::now();
    let candidate = value_at(now.timestamp(), now.timestamp_subsec_nanos());
    let previous = LAST
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(candidate.max(last + 1) & MASK)
        })
        .unwrap_or(candidate);
    encode(candidate.max(previous + 1) & MASK)
}
