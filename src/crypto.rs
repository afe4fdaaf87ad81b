//! Primitives adapter.
//!
//! Every low-level primitive the SDK relies on is funneled through this
//! module so the rest of the crate never touches a crypto crate directly
//! for the shared concerns: hashing, randomness, ECDH, Bech32 and gzip.

use std::io::{Read, Write};

use bech32::{FromBase32, ToBase32, Variant};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use getrandom::getrandom;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("random generation failed")]
    RandomGenerationFailed,

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("bech32 error: {0}")]
    Bech32(String),

    #[error("gzip error: {0}")]
    Gzip(String),
}

/// SHA-256 digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Fill a fixed-size buffer from the OS entropy source.
pub fn random_bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut buf = [0u8; N];
    getrandom(&mut buf).map_err(|_| CryptoError::RandomGenerationFailed)?;
    Ok(buf)
}

/// ECDH over secp256k1, returning the raw x-coordinate of the shared point.
///
/// Nostr public keys are x-only; the full point is recovered by trying the
/// even-parity prefix first and falling back to odd parity.
pub fn shared_secret_x(secret: &[u8; 32], peer_x: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
    use k256::{ecdh::diffie_hellman, PublicKey as K256PublicKey, SecretKey as K256SecretKey};

    let sk = K256SecretKey::from_slice(secret)
        .map_err(|e| CryptoError::InvalidSecretKey(e.to_string()))?;

    let mut compressed = [0u8; 33];
    compressed[0] = 0x02;
    compressed[1..].copy_from_slice(peer_x);
    let pk = K256PublicKey::from_sec1_bytes(&compressed)
        .or_else(|_| {
            compressed[0] = 0x03;
            K256PublicKey::from_sec1_bytes(&compressed)
        })
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;

    let shared = diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine());
    let mut x = [0u8; 32];
    x.copy_from_slice(shared.raw_secret_bytes());
    Ok(x)
}

/// Encode bytes as a Bech32 string under the given human-readable part.
pub fn bech32_encode(hrp: &str, data: &[u8]) -> Result<String, CryptoError> {
    bech32::encode(hrp, data.to_base32(), Variant::Bech32)
        .map_err(|e| CryptoError::Bech32(e.to_string()))
}

/// Decode a Bech32 string, checking the human-readable part.
pub fn bech32_decode(expected_hrp: &str, s: &str) -> Result<Vec<u8>, CryptoError> {
    let (hrp, data, variant) = bech32::decode(s).map_err(|e| CryptoError::Bech32(e.to_string()))?;
    if hrp != expected_hrp {
        return Err(CryptoError::Bech32(format!(
            "expected hrp {expected_hrp}, got {hrp}"
        )));
    }
    if variant != Variant::Bech32 {
        return Err(CryptoError::Bech32("unexpected bech32m variant".to_string()));
    }
    Vec::<u8>::from_base32(&data).map_err(|e| CryptoError::Bech32(e.to_string()))
}

/// Gzip-compress a buffer.
pub fn gzip_compress(data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| CryptoError::Gzip(e.to_string()))?;
    encoder.finish().map_err(|e| CryptoError::Gzip(e.to_string()))
}

/// Gunzip a buffer.
pub fn gzip_decompress(data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CryptoError::Gzip(e.to_string()))?;
    Ok(out)
}
