//! VNC DES challenge-response authentication.
//!
//! The server sends a 16-byte random challenge; the client answers with
//! the challenge encrypted under a DES key derived from the password.
//! VNC derives that key with a quirk every server expects: the password
//! is truncated/zero-padded to 8 ASCII bytes and then the bit order of
//! every byte is reversed.

use des::Des;
use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockEncrypt, KeyInit};

/// Challenge and response are both exactly this long.
pub const CHALLENGE_LEN: usize = 16;

const KEY_LEN: usize = 8;

/// Derive the DES key from a password: first 8 bytes, zero-padded on
/// the right, each byte bit-reversed.
pub fn derive_key(password: &str) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    for (slot, byte) in key.iter_mut().zip(password.bytes()) {
        *slot = byte.reverse_bits();
    }
    key
}

/// Encrypt the server challenge: DES-ECB over both 8-byte halves with
/// the derived key.
pub fn encrypt_challenge(challenge: &[u8; CHALLENGE_LEN], password: &str) -> [u8; CHALLENGE_LEN] {
    let key = derive_key(password);
    let cipher = Des::new(&key.into());
    let mut response = *challenge;
    for block in response.chunks_exact_mut(KEY_LEN) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    response
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_flip_is_an_involution() {
        for b in 0u8..=255 {
            assert_eq!(b.reverse_bits().reverse_bits(), b);
        }
    }

    #[test]
    fn key_bytes_are_bit_reversed() {
        // 'a' = 0x61 → 0x86, 'b' = 0x62 → 0x46, 'c' = 0x63 → 0xC6.
        assert_eq!(derive_key("abc"), [0x86, 0x46, 0xC6, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn short_passwords_are_zero_padded() {
        let key = derive_key("pw");
        assert_eq!(&key[2..], &[0u8; 6]);
        assert_ne!(&key[..2], &[0u8; 2]);
    }

    #[test]
    fn long_passwords_use_only_eight_bytes() {
        assert_eq!(derive_key("longpassword"), derive_key("longpass"));
    }

    #[test]
    fn response_is_deterministic_and_differs_from_challenge() {
        let challenge: [u8; CHALLENGE_LEN] =
            [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];
        let a = encrypt_challenge(&challenge, "s3cret");
        let b = encrypt_challenge(&challenge, "s3cret");
        assert_eq!(a, b);
        assert_ne!(a, challenge);
    }

    #[test]
    fn blocks_are_encrypted_independently() {
        // ECB: identical halves of the challenge produce identical
        // halves of the response.
        let half = [0x5A; 8];
        let mut challenge = [0u8; CHALLENGE_LEN];
        challenge[..8].copy_from_slice(&half);
        challenge[8..].copy_from_slice(&half);

        let response = encrypt_challenge(&challenge, "hunter2");
        assert_eq!(response[..8], response[8..]);
    }

    #[test]
    fn different_passwords_yield_different_responses() {
        let challenge = [0xA5; CHALLENGE_LEN];
        assert_ne!(
            encrypt_challenge(&challenge, "alpha"),
            encrypt_challenge(&challenge, "bravo"),
        );
    }
}
