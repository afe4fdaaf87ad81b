//! NIP-04: legacy encrypted direct messages.
//!
//! AES-256-CBC under an ECDH-derived shared secret, encoded as
//! `base64(ciphertext) + "?iv=" + base64(iv)`. Payloads above 1 KiB are
//! gzip-compressed before encryption when that actually shrinks them, and
//! marked with a `gz:` prefix. The construction carries no authenticator;
//! provenance comes from the signed event wrapping the ciphertext.

use aes::Aes256;
use base64::engine::{general_purpose, Engine};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use thiserror::Error;

use crate::crypto;
use crate::keys::KeyError;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Compress only payloads larger than this, and only when gzip wins.
const COMPRESSION_THRESHOLD: usize = 1024;

const GZIP_PREFIX: &str = "gz:";
const IV_SEPARATOR: &str = "?iv=";

#[derive(Debug, Error)]
pub enum Nip04Error {
    #[error("malformed envelope")]
    MalformedEnvelope,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("random generation failed")]
    RandomGenerationFailed,

    #[error(transparent)]
    Key(#[from] KeyError),
}

type Result<T> = std::result::Result<T, Nip04Error>;

/// Encrypt `plaintext` under a 32-byte shared secret.
pub fn encrypt(shared_key: &[u8; 32], plaintext: &str) -> Result<String> {
    let raw = plaintext.as_bytes();
    let mut compressed = false;
    let data: Vec<u8> = if raw.len() > COMPRESSION_THRESHOLD {
        match crypto::gzip_compress(raw) {
            Ok(gz) if gz.len() < raw.len() => {
                compressed = true;
                gz
            }
            _ => raw.to_vec(),
        }
    } else {
        raw.to_vec()
    };

    let iv: [u8; 16] =
        crypto::random_bytes().map_err(|_| Nip04Error::RandomGenerationFailed)?;

    let cipher = Aes256CbcEnc::new(shared_key.into(), &iv.into());
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(&data);

    let prefix = if compressed { GZIP_PREFIX } else { "" };
    Ok(format!(
        "{}{}{}{}",
        prefix,
        general_purpose::STANDARD.encode(ciphertext),
        IV_SEPARATOR,
        general_purpose::STANDARD.encode(iv)
    ))
}

/// Decrypt a `(gz:)? base64 "?iv=" base64` envelope under a 32-byte shared
/// secret.
pub fn decrypt(shared_key: &[u8; 32], ciphertext: &str) -> Result<String> {
    let (compressed, body) = match ciphertext.strip_prefix(GZIP_PREFIX) {
        Some(rest) => (true, rest),
        None => (false, ciphertext),
    };

    // Exactly one "?iv=" separator.
    let parts: Vec<&str> = body.split(IV_SEPARATOR).collect();
    if parts.len() != 2 {
        return Err(Nip04Error::MalformedEnvelope);
    }

    let mut encrypted = general_purpose::STANDARD
        .decode(parts[0])
        .map_err(|_| Nip04Error::MalformedEnvelope)?;
    let iv = general_purpose::STANDARD
        .decode(parts[1])
        .map_err(|_| Nip04Error::MalformedEnvelope)?;
    if iv.len() != 16 {
        return Err(Nip04Error::MalformedEnvelope);
    }

    let cipher = Aes256CbcDec::new(shared_key.into(), iv.as_slice().into());
    let decrypted = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&mut encrypted)
        .map_err(|_| Nip04Error::DecryptionFailed)?;

    let plaintext = if compressed {
        crypto::gzip_decompress(&decrypted).map_err(|_| Nip04Error::DecryptionFailed)?
    } else {
        decrypted
    };

    String::from_utf8(plaintext).map_err(|_| Nip04Error::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Keys;

    fn shared_pair() -> ([u8; 32], [u8; 32]) {
        let alice = Keys::generate();
        let bob = Keys::generate();
        let a = alice
            .ecdh_shared_secret(&bob.public_key().unwrap())
            .unwrap();
        let b = bob
            .ecdh_shared_secret(&alice.public_key().unwrap())
            .unwrap();
        (a, b)
    }

    #[test]
    fn roundtrip_small_payload() {
        let (a, b) = shared_pair();
        let ciphertext = encrypt(&a, "hello nostr").unwrap();
        assert!(!ciphertext.starts_with(GZIP_PREFIX));
        assert!(ciphertext.contains(IV_SEPARATOR));
        assert_eq!(decrypt(&b, &ciphertext).unwrap(), "hello nostr");
    }

    #[test]
    fn large_compressible_payload_is_gzipped() {
        let (a, b) = shared_pair();
        let plaintext = "token ".repeat(1000);
        let ciphertext = encrypt(&a, &plaintext).unwrap();
        assert!(ciphertext.starts_with(GZIP_PREFIX));
        assert_eq!(decrypt(&b, &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn distinct_ivs_give_distinct_ciphertexts() {
        let (a, _) = shared_pair();
        assert_ne!(encrypt(&a, "same").unwrap(), encrypt(&a, "same").unwrap());
    }

    #[test]
    fn rejects_malformed_envelopes() {
        let (a, _) = shared_pair();
        assert!(matches!(
            decrypt(&a, "no-separator"),
            Err(Nip04Error::MalformedEnvelope)
        ));
        assert!(matches!(
            decrypt(&a, "one?iv=two?iv=three"),
            Err(Nip04Error::MalformedEnvelope)
        ));
        // IV decodes but is not 16 bytes.
        let short_iv = general_purpose::STANDARD.encode([0u8; 8]);
        let body = general_purpose::STANDARD.encode([0u8; 16]);
        assert!(matches!(
            decrypt(&a, &format!("{body}?iv={short_iv}")),
            Err(Nip04Error::MalformedEnvelope)
        ));
        assert!(matches!(
            decrypt(&a, "!!notbase64!!?iv=!!also!!"),
            Err(Nip04Error::MalformedEnvelope)
        ));
    }

    #[test]
    fn wrong_key_fails_decryption() {
        let (a, _) = shared_pair();
        let (c, _) = shared_pair();
        let ciphertext = encrypt(&a, "secret").unwrap();
        assert!(decrypt(&c, &ciphertext).is_err());
    }
}
