//! Short, URL-safe link identifiers.
//!
//! A link ID is a random 128-bit value encoded with a base-57 alphabet
//! into a fixed 22-character string. The alphabet excludes characters
//! that are easy to confuse (0/O, 1/I/l), and is stable: IDs remain
//! decodable across restarts and between processes.

use anyhow::{anyhow, Result};
use uuid::Uuid;

/// Encoding alphabet, ordered. Index 0 is the padding character.
const ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Encoded length of a 128-bit value: ceil(128 / log2(57)).
const ENCODED_LEN: usize = 22;

/// Generates a new random link ID (also used for OAuth nonces).
pub fn new_id() -> String {
    encode(Uuid::new_v4().as_u128())
}

/// Encodes a 128-bit value as a fixed-width base-57 string.
fn encode(mut n: u128) -> String {
    let base = ALPHABET.len() as u128;
    let mut out = [ALPHABET[0]; ENCODED_LEN];
    let mut i = ENCODED_LEN;
    while n > 0 {
        i -= 1;
        out[i] = ALPHABET[(n % base) as usize];
        n /= base;
    }
    // Leading positions keep the padding character.
    String::from_utf8_lossy(&out).into_owned()
}

/// Decodes a 22-character base-57 string back into its 128-bit value.
///
/// This is the validation path for every RPC request that carries a
/// link ID: wrong length, characters outside the alphabet, and values
/// that overflow 128 bits are all rejected.
pub fn decode(s: &str) -> Result<u128> {
    if s.len() != ENCODED_LEN {
        return Err(anyhow!("invalid ID length: {}", s.len()));
    }

    let base = ALPHABET.len() as u128;
    let mut n: u128 = 0;
    for c in s.bytes() {
        let digit = ALPHABET
            .iter()
            .position(|&a| a == c)
            .ok_or_else(|| anyhow!("invalid ID character: {:?}", c as char))?;
        n = n
            .checked_mul(base)
            .and_then(|n| n.checked_add(digit as u128))
            .ok_or_else(|| anyhow!("ID value out of range"))?;
    }
    Ok(n)
}

/// Checks that the given string is a well-formed link ID.
pub fn validate(s: &str) -> Result<()> {
    decode(s).map(|_| ())
}
