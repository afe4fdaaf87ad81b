//! NIP-44 (v2): authenticated encrypted payloads.
//!
//! Per message: a random 32-byte nonce expands the conversation key into
//! `(chacha_key, chacha_nonce, hmac_key)` via HKDF; the plaintext is padded
//! to a power-of-two-derived chunk size, encrypted with ChaCha20 and
//! authenticated with HMAC-SHA-256 over `nonce || ciphertext`. Wire form is
//! `base64(0x02 || nonce || ciphertext || mac)`.

use std::fmt;
use std::ops::Range;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::crypto;
use crate::keys::KeyError;

const VERSION: u8 = 2;

const MESSAGE_KEYS_SIZE: usize = 76;
const CHACHA_KEY_SIZE: usize = 32;
const CHACHA_NONCE_SIZE: usize = 12;
const CHACHA_KEY_RANGE: Range<usize> = 0..CHACHA_KEY_SIZE;
const CHACHA_NONCE_RANGE: Range<usize> = CHACHA_KEY_SIZE..CHACHA_KEY_SIZE + CHACHA_NONCE_SIZE;
const HMAC_KEY_RANGE: Range<usize> = CHACHA_KEY_SIZE + CHACHA_NONCE_SIZE..MESSAGE_KEYS_SIZE;

const MIN_PLAINTEXT_SIZE: usize = 1;
const MAX_PLAINTEXT_SIZE: usize = 65535;

// version + nonce + (length prefix + minimum padded block) + mac
const MIN_PAYLOAD_SIZE: usize = 1 + 32 + 2 + 32 + 32;
// version + nonce + (length prefix + maximum padded block) + mac
const MAX_PAYLOAD_SIZE: usize = 1 + 32 + 2 + 65536 + 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Nip44Error {
    #[error("message too short")]
    MessageTooShort,

    #[error("message too long")]
    MessageTooLong,

    #[error("unsupported payload version: {0}")]
    UnsupportedVersion(u8),

    #[error("payload too short")]
    PayloadTooShort,

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("invalid padding")]
    InvalidPadding,

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("random generation failed")]
    RandomGenerationFailed,

    #[error("key error: {0}")]
    Key(String),
}

impl From<KeyError> for Nip44Error {
    fn from(e: KeyError) -> Self {
        Nip44Error::Key(e.to_string())
    }
}

type Result<T> = std::result::Result<T, Nip44Error>;

/// Shared conversation key for one pair of identities, symmetric in the
/// two directions.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ConversationKey([u8; 32]);

impl ConversationKey {
    #[inline]
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != 32 {
            return Err(Nip44Error::Key("invalid conversation key length".to_string()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(slice);
        Ok(Self(arr))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConversationKey(<sensitive>)")
    }
}

/// Per-message keys expanded from the conversation key and nonce.
struct MessageKeys {
    chacha_key: [u8; 32],
    chacha_nonce: [u8; 12],
    hmac_key: [u8; 32],
}

impl MessageKeys {
    fn derive(conversation_key: &ConversationKey, nonce: &[u8; 32]) -> Result<Self> {
        let hk = Hkdf::<Sha256>::from_prk(conversation_key.as_bytes())
            .map_err(|_| Nip44Error::Key("invalid conversation key".to_string()))?;

        let mut okm = [0u8; MESSAGE_KEYS_SIZE];
        hk.expand(nonce, &mut okm)
            .map_err(|_| Nip44Error::Key("hkdf expand failed".to_string()))?;

        let mut chacha_key = [0u8; 32];
        let mut chacha_nonce = [0u8; 12];
        let mut hmac_key = [0u8; 32];
        chacha_key.copy_from_slice(&okm[CHACHA_KEY_RANGE]);
        chacha_nonce.copy_from_slice(&okm[CHACHA_NONCE_RANGE]);
        hmac_key.copy_from_slice(&okm[HMAC_KEY_RANGE]);

        Ok(MessageKeys {
            chacha_key,
            chacha_nonce,
            hmac_key,
        })
    }
}

/// Padded length for a plaintext of `unpadded_len` bytes: at most 32, or
/// rounded up to a chunk of `max(32, next_power_of_two(len) / 8)`.
pub(crate) fn padded_len(unpadded_len: usize) -> usize {
    if unpadded_len <= 32 {
        return 32;
    }
    let next_power = unpadded_len.next_power_of_two();
    let chunk = std::cmp::max(32, next_power / 8);
    unpadded_len.div_ceil(chunk) * chunk
}

fn pad(plaintext: &[u8]) -> Result<Vec<u8>> {
    let len = plaintext.len();
    if len < MIN_PLAINTEXT_SIZE {
        return Err(Nip44Error::MessageTooShort);
    }
    if len > MAX_PLAINTEXT_SIZE {
        return Err(Nip44Error::MessageTooLong);
    }

    let target = padded_len(len);
    let mut padded = Vec::with_capacity(2 + target);
    padded.extend_from_slice(&(len as u16).to_be_bytes());
    padded.extend_from_slice(plaintext);
    padded.resize(2 + target, 0);
    Ok(padded)
}

fn unpad(padded: &[u8]) -> Result<Vec<u8>> {
    if padded.len() < 2 {
        return Err(Nip44Error::InvalidPadding);
    }

    let unpadded_len = u16::from_be_bytes([padded[0], padded[1]]) as usize;
    if unpadded_len == 0 {
        return Err(Nip44Error::InvalidPadding);
    }
    if padded.len() != 2 + padded_len(unpadded_len) {
        return Err(Nip44Error::InvalidPadding);
    }

    Ok(padded[2..2 + unpadded_len].to_vec())
}

/// Encrypt `plaintext` under the conversation key; returns the base64
/// payload.
pub fn encrypt(conversation_key: &ConversationKey, plaintext: &str) -> Result<String> {
    let nonce: [u8; 32] =
        crypto::random_bytes().map_err(|_| Nip44Error::RandomGenerationFailed)?;
    let payload = encrypt_with_nonce(conversation_key, plaintext.as_bytes(), &nonce)?;
    Ok(BASE64.encode(payload))
}

fn encrypt_with_nonce(
    conversation_key: &ConversationKey,
    plaintext: &[u8],
    nonce: &[u8; 32],
) -> Result<Vec<u8>> {
    let mut ciphertext = pad(plaintext)?;

    let keys = MessageKeys::derive(conversation_key, nonce)?;
    let mut cipher = ChaCha20::new(&keys.chacha_key.into(), &keys.chacha_nonce.into());
    cipher.apply_keystream(&mut ciphertext);

    let mut mac =
        Hmac::<Sha256>::new_from_slice(&keys.hmac_key).expect("HMAC can take any size key");
    mac.update(nonce);
    mac.update(&ciphertext);
    let mac_bytes = mac.finalize().into_bytes();

    let mut payload = Vec::with_capacity(1 + 32 + ciphertext.len() + 32);
    payload.push(VERSION);
    payload.extend_from_slice(nonce);
    payload.extend_from_slice(&ciphertext);
    payload.extend_from_slice(&mac_bytes);
    Ok(payload)
}

/// Decrypt a base64 payload under the conversation key.
pub fn decrypt(conversation_key: &ConversationKey, payload: &str) -> Result<String> {
    // "#" flags an incompatible future format.
    if payload.starts_with('#') {
        return Err(Nip44Error::UnsupportedVersion(0));
    }

    let data = BASE64
        .decode(payload)
        .map_err(|e| Nip44Error::Malformed(e.to_string()))?;

    match data.first() {
        None => return Err(Nip44Error::UnsupportedVersion(0)),
        Some(&VERSION) => {}
        Some(&other) => return Err(Nip44Error::UnsupportedVersion(other)),
    }

    let len = data.len();
    if len < MIN_PAYLOAD_SIZE {
        return Err(Nip44Error::PayloadTooShort);
    }
    if len > MAX_PAYLOAD_SIZE {
        return Err(Nip44Error::Malformed("payload too long".to_string()));
    }

    let nonce: [u8; 32] = data[1..33]
        .try_into()
        .map_err(|_| Nip44Error::Malformed("nonce".to_string()))?;
    let ciphertext = &data[33..len - 32];
    let mac = &data[len - 32..];

    let keys = MessageKeys::derive(conversation_key, &nonce)?;

    let mut verifier =
        Hmac::<Sha256>::new_from_slice(&keys.hmac_key).expect("HMAC can take any size key");
    verifier.update(&nonce);
    verifier.update(ciphertext);
    // Constant-time comparison.
    verifier
        .verify_slice(mac)
        .map_err(|_| Nip44Error::AuthenticationFailed)?;

    let mut padded = ciphertext.to_vec();
    let mut cipher = ChaCha20::new(&keys.chacha_key.into(), &keys.chacha_nonce.into());
    cipher.apply_keystream(&mut padded);

    let plaintext = unpad(&padded)?;
    String::from_utf8(plaintext).map_err(|e| Nip44Error::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Keys;

    fn conversation_pair() -> (ConversationKey, ConversationKey) {
        let alice = Keys::generate();
        let bob = Keys::generate();
        (
            alice.conversation_key(&bob.public_key().unwrap()).unwrap(),
            bob.conversation_key(&alice.public_key().unwrap()).unwrap(),
        )
    }

    #[test]
    fn padded_len_reference_values() {
        assert_eq!(padded_len(1), 32);
        assert_eq!(padded_len(32), 32);
        assert_eq!(padded_len(33), 64);
        assert_eq!(padded_len(64), 64);
        assert_eq!(padded_len(65), 96);
        assert_eq!(padded_len(256), 256);
        assert_eq!(padded_len(257), 320);
        assert_eq!(padded_len(65535), 65536);
    }

    #[test]
    fn padded_len_properties() {
        for n in 1..=65535usize {
            let p = padded_len(n);
            assert_eq!(p % 32, 0, "padded_len({n}) not a multiple of 32");
            assert!(p >= n.max(32));
            assert_eq!(padded_len(p), p, "padded_len not idempotent at {n}");
        }
    }

    #[test]
    fn pad_unpad_roundtrip() {
        for len in [1usize, 5, 31, 32, 33, 100, 1000, 65535] {
            let plaintext = vec![0xabu8; len];
            let padded = pad(&plaintext).unwrap();
            assert_eq!(padded.len(), 2 + padded_len(len));
            assert_eq!(unpad(&padded).unwrap(), plaintext);
        }
    }

    #[test]
    fn pad_rejects_out_of_range_messages() {
        assert_eq!(pad(b"").unwrap_err(), Nip44Error::MessageTooShort);
        assert_eq!(
            pad(&vec![0u8; 65536]).unwrap_err(),
            Nip44Error::MessageTooLong
        );
    }

    #[test]
    fn unpad_rejects_zero_and_mismatched_lengths() {
        let mut padded = pad(b"hello").unwrap();
        padded[0] = 0;
        padded[1] = 0;
        assert_eq!(unpad(&padded).unwrap_err(), Nip44Error::InvalidPadding);

        let mut oversized = pad(b"hello").unwrap();
        oversized.push(0);
        assert_eq!(unpad(&oversized).unwrap_err(), Nip44Error::InvalidPadding);
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let (alice_key, bob_key) = conversation_pair();
        for msg in ["a", "hello world", &"long ".repeat(500)] {
            let payload = encrypt(&alice_key, msg).unwrap();
            assert_eq!(decrypt(&bob_key, &payload).unwrap(), msg);
        }
    }

    #[test]
    fn encryption_is_randomized() {
        let (key, _) = conversation_pair();
        assert_ne!(encrypt(&key, "same").unwrap(), encrypt(&key, "same").unwrap());
    }

    #[test]
    fn tampered_payload_fails_authentication() {
        let (alice_key, bob_key) = conversation_pair();
        let payload = encrypt(&alice_key, "attack at dawn").unwrap();
        let mut raw = BASE64.decode(&payload).unwrap();
        let mid = raw.len() / 2;
        raw[mid] ^= 0x01;
        let tampered = BASE64.encode(raw);
        assert_eq!(
            decrypt(&bob_key, &tampered).unwrap_err(),
            Nip44Error::AuthenticationFailed
        );
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let (alice_key, _) = conversation_pair();
        let (stranger_key, _) = conversation_pair();
        let payload = encrypt(&alice_key, "secret").unwrap();
        assert_eq!(
            decrypt(&stranger_key, &payload).unwrap_err(),
            Nip44Error::AuthenticationFailed
        );
    }

    #[test]
    fn rejects_bad_versions_and_short_payloads() {
        let (key, _) = conversation_pair();
        assert_eq!(
            decrypt(&key, "#future").unwrap_err(),
            Nip44Error::UnsupportedVersion(0)
        );
        assert_eq!(
            decrypt(&key, "").unwrap_err(),
            Nip44Error::UnsupportedVersion(0)
        );

        let wrong_version = BASE64.encode([1u8; 99]);
        assert_eq!(
            decrypt(&key, &wrong_version).unwrap_err(),
            Nip44Error::UnsupportedVersion(1)
        );

        let mut short = vec![VERSION];
        short.extend_from_slice(&[0u8; 50]);
        assert_eq!(
            decrypt(&key, &BASE64.encode(short)).unwrap_err(),
            Nip44Error::PayloadTooShort
        );
    }
}
