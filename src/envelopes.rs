//! Application envelopes.
//!
//! Token transfers, payment requests and payment-request responses are
//! ordinary events whose `content` is a NIP-04 sealed envelope around a
//! type-prefixed UTF-8 string, with unencrypted tags carrying routing and
//! filter hints. Nametag bindings are plaintext addressable events keyed by
//! a hashed identifier.

use thiserror::Error;

use crate::keys::{KeyError, Keys};
use crate::signer::nip04::Nip04Error;
use crate::types::nostr::{Event, EventError, PublicKey};

pub mod nametag;
pub mod payment_request;
pub mod token_transfer;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("event is not this envelope type")]
    NotThisEnvelope,

    #[error("missing recipient tag")]
    MissingRecipient,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("random generation failed")]
    RandomGenerationFailed,

    #[error(transparent)]
    Nip04(#[from] Nip04Error),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Event(#[from] EventError),
}

type Result<T> = std::result::Result<T, EnvelopeError>;

/// Pick the counter-party for decryption: the `p`-tagged recipient when we
/// authored the event, the author otherwise.
pub(crate) fn counterparty(keys: &Keys, event: &Event) -> Result<PublicKey> {
    if keys.is_my_pubkey(&event.pubkey().to_hex()) {
        let hex = event
            .tag_value("p")
            .ok_or(EnvelopeError::MissingRecipient)?;
        Ok(PublicKey::from_hex(hex)?)
    } else {
        Ok(event.pubkey())
    }
}

/// Decrypt the envelope content and strip the expected type prefix.
pub(crate) fn decrypt_prefixed(keys: &Keys, event: &Event, prefix: &str) -> Result<String> {
    let peer = counterparty(keys, event)?;
    let plaintext = keys.nip04_decrypt(&peer, event.content())?;
    plaintext
        .strip_prefix(prefix)
        .map(str::to_string)
        .ok_or(EnvelopeError::NotThisEnvelope)
}
