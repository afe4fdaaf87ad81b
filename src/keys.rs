//! Key holder.
//!
//! [`Keys`] owns the 32-byte secp256k1 secret and its derived x-only public
//! key. Accessors hand out fresh copies, never aliases into the internal
//! buffer, and [`Keys::clear`] zeroes the secret in place: every
//! secret-using operation afterwards fails with [`KeyError::Cleared`], and
//! so does public-key access, since the public key is linkable to the
//! cleared identity.

use hkdf::Hkdf;
use k256::schnorr::SigningKey;
use parking_lot::RwLock;
use sha2::Sha256;
use signature::hazmat::PrehashSigner;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto;
use crate::signer::nip04::{self, Nip04Error};
use crate::signer::nip44::{self, ConversationKey, Nip44Error};
use crate::types::nostr::PublicKey;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("invalid hex encoding")]
    InvalidHex,

    #[error("invalid bech32: {0}")]
    InvalidBech32(String),

    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("key holder has been cleared")]
    Cleared,

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("ecdh failed: {0}")]
    Ecdh(String),
}

type Result<T> = std::result::Result<T, KeyError>;

#[derive(Zeroize, ZeroizeOnDrop)]
struct KeyMaterial {
    secret: [u8; 32],
    #[zeroize(skip)]
    public: [u8; 32],
}

/// Owner of a secp256k1 secret key and its x-only public key.
pub struct Keys {
    material: RwLock<Option<KeyMaterial>>,
}

impl Keys {
    /// Construct from raw secret bytes. Fails unless exactly 32 bytes of a
    /// valid secp256k1 scalar are supplied.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(KeyError::InvalidKeyLength(bytes.len()));
        }
        let mut secret = [0u8; 32];
        secret.copy_from_slice(bytes);

        let signing_key = SigningKey::from_bytes(&secret)
            .map_err(|e| KeyError::InvalidSecretKey(e.to_string()))?;
        let public: [u8; 32] = signing_key.verifying_key().to_bytes().into();

        Ok(Self {
            material: RwLock::new(Some(KeyMaterial { secret, public })),
        })
    }

    /// Construct from a 64-character hex secret.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim()).map_err(|_| KeyError::InvalidHex)?;
        Self::from_secret_bytes(&bytes)
    }

    /// Construct from a Bech32 `nsec` string.
    pub fn from_nsec(nsec: &str) -> Result<Self> {
        let bytes = crypto::bech32_decode("nsec", nsec.trim())
            .map_err(|e| KeyError::InvalidBech32(e.to_string()))?;
        Self::from_secret_bytes(&bytes)
    }

    /// Accepts either an `nsec1…` string or hex.
    pub fn parse(s: &str) -> Result<Self> {
        if s.trim().starts_with("nsec1") {
            Self::from_nsec(s)
        } else {
            Self::from_hex(s)
        }
    }

    /// Generate a fresh random key pair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut k256::elliptic_curve::rand_core::OsRng);
        let secret: [u8; 32] = signing_key.to_bytes().into();
        let public: [u8; 32] = signing_key.verifying_key().to_bytes().into();
        Self {
            material: RwLock::new(Some(KeyMaterial { secret, public })),
        }
    }

    fn with_material<T>(&self, f: impl FnOnce(&KeyMaterial) -> Result<T>) -> Result<T> {
        let guard = self.material.read();
        match guard.as_ref() {
            Some(material) => f(material),
            None => Err(KeyError::Cleared),
        }
    }

    /// Secret key as a fresh byte copy.
    pub fn secret_key_bytes(&self) -> Result<[u8; 32]> {
        self.with_material(|m| Ok(m.secret))
    }

    /// Secret key as lowercase hex.
    pub fn secret_key_hex(&self) -> Result<String> {
        self.with_material(|m| Ok(hex::encode(m.secret)))
    }

    /// Secret key in Bech32 `nsec` form.
    pub fn nsec(&self) -> Result<String> {
        self.with_material(|m| {
            crypto::bech32_encode("nsec", &m.secret)
                .map_err(|e| KeyError::InvalidBech32(e.to_string()))
        })
    }

    /// X-only public key.
    pub fn public_key(&self) -> Result<PublicKey> {
        self.with_material(|m| Ok(PublicKey(m.public)))
    }

    /// X-only public key as a fresh byte copy.
    pub fn public_key_bytes(&self) -> Result<[u8; 32]> {
        self.with_material(|m| Ok(m.public))
    }

    /// X-only public key as lowercase hex.
    pub fn public_key_hex(&self) -> Result<String> {
        self.with_material(|m| Ok(hex::encode(m.public)))
    }

    /// Public key in Bech32 `npub` form.
    pub fn npub(&self) -> Result<String> {
        self.with_material(|m| {
            crypto::bech32_encode("npub", &m.public)
                .map_err(|e| KeyError::InvalidBech32(e.to_string()))
        })
    }

    /// BIP-340 Schnorr signature over a 32-byte digest.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<[u8; 64]> {
        self.with_material(|m| {
            let signing_key = SigningKey::from_bytes(&m.secret)
                .map_err(|e| KeyError::InvalidSecretKey(e.to_string()))?;
            let signature = signing_key
                .sign_prehash(digest)
                .map_err(|e| KeyError::SigningFailed(e.to_string()))?;
            Ok(signature.to_bytes())
        })
    }

    /// [`Keys::sign_digest`], hex-encoded.
    pub fn sign_digest_hex(&self, digest: &[u8; 32]) -> Result<String> {
        Ok(hex::encode(self.sign_digest(digest)?))
    }

    /// Legacy (NIP-04) shared secret: `SHA-256` of the ECDH x-coordinate,
    /// with the peer point reconstructed from its x-only key.
    pub fn ecdh_shared_secret(&self, peer: &PublicKey) -> Result<[u8; 32]> {
        self.with_material(|m| {
            let x = crypto::shared_secret_x(&m.secret, &peer.0)
                .map_err(|e| KeyError::Ecdh(e.to_string()))?;
            Ok(crypto::sha256(&x))
        })
    }

    /// NIP-44 conversation key: `HKDF-Extract(salt="nip44-v2", ikm=x)` over
    /// the raw ECDH x-coordinate.
    pub fn conversation_key(&self, peer: &PublicKey) -> Result<ConversationKey> {
        self.with_material(|m| {
            let x = crypto::shared_secret_x(&m.secret, &peer.0)
                .map_err(|e| KeyError::Ecdh(e.to_string()))?;
            let (prk, _) = Hkdf::<Sha256>::extract(Some(b"nip44-v2"), &x);
            let mut key = [0u8; 32];
            key.copy_from_slice(&prk);
            Ok(ConversationKey::new(key))
        })
    }

    /// Case-insensitive comparison against this holder's public key hex.
    /// Returns `false` once cleared.
    pub fn is_my_pubkey(&self, pubkey_hex: &str) -> bool {
        self.public_key_hex()
            .map(|own| own.eq_ignore_ascii_case(pubkey_hex.trim()))
            .unwrap_or(false)
    }

    /// Encrypt a NIP-04 sealed envelope for `peer`.
    pub fn nip04_encrypt(&self, peer: &PublicKey, plaintext: &str) -> std::result::Result<String, Nip04Error> {
        let shared = self.ecdh_shared_secret(peer)?;
        nip04::encrypt(&shared, plaintext)
    }

    /// Decrypt a NIP-04 sealed envelope from `peer`.
    pub fn nip04_decrypt(&self, peer: &PublicKey, ciphertext: &str) -> std::result::Result<String, Nip04Error> {
        let shared = self.ecdh_shared_secret(peer)?;
        nip04::decrypt(&shared, ciphertext)
    }

    /// Encrypt a NIP-44 sealed envelope for `peer`.
    pub fn nip44_encrypt(&self, peer: &PublicKey, plaintext: &str) -> std::result::Result<String, Nip44Error> {
        let key = self.conversation_key(peer)?;
        nip44::encrypt(&key, plaintext)
    }

    /// Decrypt a NIP-44 sealed envelope from `peer`.
    pub fn nip44_decrypt(&self, peer: &PublicKey, payload: &str) -> std::result::Result<String, Nip44Error> {
        let key = self.conversation_key(peer)?;
        nip44::decrypt(&key, payload)
    }

    /// Zero the secret buffer and enter the cleared state. Idempotent.
    pub fn clear(&self) {
        // KeyMaterial zeroizes its secret on drop.
        self.material.write().take();
    }

    pub fn is_cleared(&self) -> bool {
        self.material.read().is_none()
    }
}

impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.public_key_hex() {
            Ok(public) => write!(f, "Keys({public})"),
            Err(_) => f.write_str("Keys(<cleared>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_length() {
        assert!(matches!(
            Keys::from_secret_bytes(&[1u8; 31]),
            Err(KeyError::InvalidKeyLength(31))
        ));
        assert!(matches!(
            Keys::from_hex("abcd"),
            Err(KeyError::InvalidKeyLength(2))
        ));
        assert!(matches!(Keys::from_hex("zz"), Err(KeyError::InvalidHex)));
    }

    #[test]
    fn hex_roundtrip() {
        let keys = Keys::generate();
        let restored = Keys::from_hex(&keys.secret_key_hex().unwrap()).unwrap();
        assert_eq!(
            keys.public_key_hex().unwrap(),
            restored.public_key_hex().unwrap()
        );
    }

    #[test]
    fn nsec_npub_roundtrip() {
        let keys = Keys::generate();
        let nsec = keys.nsec().unwrap();
        assert!(nsec.starts_with("nsec1"));
        let restored = Keys::from_nsec(&nsec).unwrap();
        assert_eq!(
            restored.secret_key_bytes().unwrap(),
            keys.secret_key_bytes().unwrap()
        );
        assert!(keys.npub().unwrap().starts_with("npub1"));
        assert!(matches!(
            Keys::from_nsec(&keys.npub().unwrap()),
            Err(KeyError::InvalidBech32(_))
        ));
    }

    #[test]
    fn accessors_return_copies() {
        let keys = Keys::generate();
        let mut copy = keys.secret_key_bytes().unwrap();
        copy[0] ^= 0xff;
        assert_ne!(copy, keys.secret_key_bytes().unwrap());
    }

    #[test]
    fn ecdh_is_symmetric() {
        let alice = Keys::generate();
        let bob = Keys::generate();
        let alice_pub = alice.public_key().unwrap();
        let bob_pub = bob.public_key().unwrap();

        assert_eq!(
            alice.ecdh_shared_secret(&bob_pub).unwrap(),
            bob.ecdh_shared_secret(&alice_pub).unwrap()
        );
        assert_eq!(
            alice.conversation_key(&bob_pub).unwrap().as_bytes(),
            bob.conversation_key(&alice_pub).unwrap().as_bytes()
        );
    }

    #[test]
    fn is_my_pubkey_ignores_case() {
        let keys = Keys::generate();
        let upper = keys.public_key_hex().unwrap().to_uppercase();
        assert!(keys.is_my_pubkey(&upper));
        assert!(!keys.is_my_pubkey(&"0".repeat(64)));
    }

    #[test]
    fn cleared_keys_refuse_everything() {
        let keys = Keys::generate();
        let peer = Keys::generate().public_key().unwrap();
        keys.clear();
        keys.clear(); // idempotent

        assert!(keys.is_cleared());
        assert!(matches!(keys.secret_key_bytes(), Err(KeyError::Cleared)));
        assert!(matches!(keys.public_key(), Err(KeyError::Cleared)));
        assert!(matches!(keys.npub(), Err(KeyError::Cleared)));
        assert!(matches!(keys.sign_digest(&[0u8; 32]), Err(KeyError::Cleared)));
        assert!(matches!(keys.ecdh_shared_secret(&peer), Err(KeyError::Cleared)));
        assert!(!keys.is_my_pubkey(&"0".repeat(64)));
    }
}
