//! C4 identifiers: a SHA-512 digest reinterpreted as a big-endian integer,
//! base58-encoded with a 58-character alphabet, zero-padded to 88 characters
//! and prefixed with the literal "c4".

use anyhow::{bail, Context, Result};
use bs58::Alphabet;

const PREFIX: &str = "c4";
const ENCODED_LEN: usize = 88;
const DIGEST_LEN: usize = 64;

/// The alphabet mandated by the C4 identifier format: the 58 characters that
/// remain after dropping the visually ambiguous `0`, `O`, `I`, `l`.
const ALPHABET_CHARS: &[u8; 58] =
    b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

fn alphabet() -> Alphabet {
    Alphabet::new(ALPHABET_CHARS).expect("C4 alphabet is a valid 58-symbol bs58 alphabet")
}

/// Encodes a raw 64-byte SHA-512 digest as a C4 identifier string.
pub fn encode(digest: &[u8]) -> String {
    debug_assert_eq!(digest.len(), DIGEST_LEN, "C4 digest must be SHA-512 length");
    let alphabet = alphabet();
    let encoded = bs58::encode(digest).with_alphabet(&alphabet).into_string();
    let padding = ENCODED_LEN.saturating_sub(encoded.len());
    let mut out = String::with_capacity(PREFIX.len() + ENCODED_LEN);
    out.push_str(PREFIX);
    out.extend(std::iter::repeat('1').take(padding));
    out.push_str(&encoded);
    out
}

/// Decodes a C4 identifier string back to its raw 64-byte SHA-512 digest.
///
/// Returns an error if the string isn't exactly 90 characters, doesn't carry
/// the `c4` prefix, or doesn't decode back to exactly 64 bytes.
pub fn decode(c4_id: &str) -> Result<Vec<u8>> {
    let body = c4_id
        .strip_prefix(PREFIX)
        .with_context(|| format!("C4 identifier '{c4_id}' is missing the 'c4' prefix"))?;

    if body.len() != ENCODED_LEN {
        bail!(
            "C4 identifier '{c4_id}' has body length {}, expected {ENCODED_LEN}",
            body.len()
        );
    }

    let trimmed = body.trim_start_matches('1');
    let alphabet = alphabet();
    let decoded = bs58::decode(trimmed)
        .with_alphabet(&alphabet)
        .into_vec()
        .with_context(|| format!("C4 identifier '{c4_id}' failed base58 decoding"))?;

    if decoded.len() > DIGEST_LEN {
        bail!(
            "C4 identifier '{c4_id}' decodes to {} bytes, expected at most {DIGEST_LEN}",
            decoded.len()
        );
    }

    let mut out = vec![0u8; DIGEST_LEN - decoded.len()];
    out.extend_from_slice(&decoded);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha512};

    #[test]
    fn round_trip_is_exact() {
        let digest = Sha512::digest(b"round trip me");
        let id = encode(&digest);
        assert_eq!(id.len(), 90);
        assert!(id.starts_with("c4"));
        let decoded = decode(&id).unwrap();
        assert_eq!(decoded.len(), 64);
        assert_eq!(decoded, digest.as_slice());
    }

    #[test]
    fn empty_digest_still_encodes_to_90_chars() {
        let digest = Sha512::digest(b"");
        let id = encode(&digest);
        assert_eq!(id.len(), 90);
    }
}
