use hmac::{Hmac, KeyInit, Mac};
use sha1::Sha1;
use std::time::{SystemTime, UNIX_EPOCH};

/// Time step shared with every TOTP authenticator app.
pub const STEP_SECS: u64 = 30;

const DIGITS: u32 = 6;
const BASE32_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

#[derive(Debug, thiserror::Error)]
#[error("totp seed is not valid base32")]
pub struct BadSeed;

/// Seeds arrive copy-pasted from broker portals: spaces and lowercase are
/// common and harmless, so they are stripped before decoding.
fn normalize(seed: &str) -> String {
    seed.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn decode_base32(s: &str) -> Result<Vec<u8>, BadSeed> {
    let mut bits: u32 = 0;
    let mut bit_count: u32 = 0;
    let mut out = Vec::with_capacity(s.len() * 5 / 8);
    for &b in s.as_bytes() {
        if b == b'=' {
            continue;
        }
        let value = BASE32_ALPHABET
            .iter()
            .position(|&a| a == b)
            .ok_or(BadSeed)? as u32;
        bits = (bits << 5) | value;
        bit_count += 5;
        if bit_count >= 8 {
            bit_count -= 8;
            out.push((bits >> bit_count) as u8);
        }
    }
    if out.is_empty() {
        return Err(BadSeed);
    }
    Ok(out)
}

/// RFC 6238 code for the window containing `unix_time`.
pub fn code_at(seed: &str, unix_time: u64) -> Result<String, BadSeed> {
    let key = decode_base32(&normalize(seed))?;
    let counter = unix_time / STEP_SECS;

    let mut mac = Hmac::<Sha1>::new_from_slice(&key).map_err(|_| BadSeed)?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let truncated = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    let code = truncated % 10u32.pow(DIGITS);
    Ok(format!("{code:0width$}", width = DIGITS as usize))
}

/// Seconds until the current window rolls over.
pub fn seconds_remaining(unix_time: u64) -> u64 {
    STEP_SECS - unix_time % STEP_SECS
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Current code plus seconds left in its window.
pub fn now_code(seed: &str) -> Result<(String, u64), BadSeed> {
    let now = unix_now();
    Ok((code_at(seed, now)?, seconds_remaining(now)))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ASCII "12345678901234567890", the RFC 6238 SHA-1 test key.
    const RFC_SEED: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn rfc6238_sha1_vectors() {
        // Low-order six digits of the published 8-digit vectors.
        assert_eq!(code_at(RFC_SEED, 59).unwrap(), "287082");
        assert_eq!(code_at(RFC_SEED, 1111111109).unwrap(), "081804");
        assert_eq!(code_at(RFC_SEED, 1234567890).unwrap(), "005924");
        assert_eq!(code_at(RFC_SEED, 2000000000).unwrap(), "279037");
    }

    #[test]
    fn seed_normalization_accepts_spaced_lowercase() {
        let spaced = "gezd gnbv gy3t qojq gezd gnbv gy3t qojq";
        assert_eq!(code_at(spaced, 59).unwrap(), code_at(RFC_SEED, 59).unwrap());
    }

    #[test]
    fn stable_within_a_window_and_rolls_over() {
        let a = code_at(RFC_SEED, 60).unwrap();
        let b = code_at(RFC_SEED, 89).unwrap();
        let c = code_at(RFC_SEED, 90).unwrap();
        assert_eq!(a, b);
        assert_ne!(b, c);
    }

    #[test]
    fn window_remaining() {
        assert_eq!(seconds_remaining(0), 30);
        assert_eq!(seconds_remaining(59), 1);
        assert_eq!(seconds_remaining(90), 30);
    }

    #[test]
    fn garbage_seed_is_rejected() {
        assert!(code_at("not base32 !!", 59).is_err());
        assert!(code_at("", 59).is_err());
    }
}
