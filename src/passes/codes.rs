use rand::Rng;
use uuid::Uuid;

use crate::db::Pass;

const ENABLE_LOGS: bool = true;

use crate::log_warn;

/// Characters that survive being read aloud or typed from a printed badge:
/// no 0/O, 1/I/L.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
pub const CODE_LEN: usize = 4;
pub const DEFAULT_CODE_PREFIX: &str = "CP";

/// 32 lowercase hex characters.
pub fn new_pass_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn human_code<R: Rng + ?Sized>(rng: &mut R, prefix: &str) -> String {
    let suffix: String = (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("{prefix}-{suffix}")
}

/// Draw codes until one is not already used by `existing`.
///
/// With 31^4 combinations collisions are rare; after `max_attempts` draws the
/// last candidate is returned anyway so intake never fails on this.
pub fn unique_code<R: Rng + ?Sized>(
    rng: &mut R,
    prefix: &str,
    existing: &[Pass],
    max_attempts: u32,
) -> String {
    let taken = |code: &str| existing.iter().any(|pass| pass.code.trim() == code);

    let mut candidate = human_code(rng, prefix);
    for _ in 1..max_attempts.max(1) {
        if !taken(&candidate) {
            return candidate;
        }
        candidate = human_code(rng, prefix);
    }

    if taken(&candidate) {
        log_warn!("no unused pass code after {max_attempts} attempts; reusing {candidate}");
    }
    candidate
}
