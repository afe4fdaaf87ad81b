//! Core Nostr types: ids, keys-on-the-wire, kinds, templates and events.
//!
//! An [`Event`] is immutable once constructed. Anything that needs to change
//! fields goes through a [`Template`] and is re-signed; there is no mutable
//! access to a signed event, so the id/signature invariants cannot be broken
//! by callers.

use std::fmt;

use k256::schnorr::{Signature, VerifyingKey};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use signature::hazmat::PrehashVerifier;
use thiserror::Error;

use crate::crypto;
use crate::keys::{KeyError, Keys};
use crate::util::now_seconds;

/// Event kind. All defined ranges fit in 16 bits.
pub type Kind = u16;

pub const METADATA: Kind = 0;
pub const TEXT_NOTE: Kind = 1;
pub const CONTACT_LIST: Kind = 3;
pub const ENCRYPTED_DIRECT_MESSAGE: Kind = 4;
pub const SEAL: Kind = 13;
pub const CHAT_MESSAGE: Kind = 14;
pub const READ_RECEIPT: Kind = 15;
pub const GIFT_WRAP: Kind = 1059;
pub const TOKEN_TRANSFER: Kind = 4004;
pub const PAYMENT_REQUEST: Kind = 4005;
pub const PAYMENT_REQUEST_RESPONSE: Kind = 4006;
pub const RELAY_LIST: Kind = 10002;
pub const CLIENT_AUTH: Kind = 22242;
pub const NAMETAG_BINDING: Kind = 30078;

/// Replaceable kinds: relays keep only the newest event per author.
pub fn is_replaceable(kind: Kind) -> bool {
    matches!(kind, METADATA | CONTACT_LIST) || (10_000..20_000).contains(&kind)
}

/// Ephemeral kinds: relays are not expected to store these at all.
pub fn is_ephemeral(kind: Kind) -> bool {
    (20_000..30_000).contains(&kind)
}

/// Addressable kinds: replaceable per (author, kind, `d` tag).
pub fn is_addressable(kind: Kind) -> bool {
    (30_000..40_000).contains(&kind)
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("malformed event: {0}")]
    Malformed(String),

    #[error(transparent)]
    Key(#[from] KeyError),
}

type Result<T> = std::result::Result<T, EventError>;

// ============================================================================
// Basic types - 32-byte identifiers carried as hex on the wire
// ============================================================================

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(pub [u8; 32]);

impl EventId {
    pub fn from_hex(s: &str) -> Result<Self> {
        let mut arr = [0u8; 32];
        if s.len() != 64 || hex::decode_to_slice(s, &mut arr).is_err() {
            return Err(EventError::Malformed("invalid event id".to_string()));
        }
        Ok(EventId(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.to_hex())
    }
}

impl Serialize for EventId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        EventId::from_hex(&s).map_err(D::Error::custom)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn from_hex(s: &str) -> Result<Self> {
        let mut arr = [0u8; 32];
        if s.len() != 64 || hex::decode_to_slice(s, &mut arr).is_err() {
            return Err(EventError::Malformed("invalid pubkey".to_string()));
        }
        Ok(PublicKey(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PublicKey::from_hex(&s).map_err(D::Error::custom)
    }
}

// ============================================================================
// Template & Event
// ============================================================================

/// Unsigned event payload. The mutable half of event construction: fill it
/// in, then [`Template::sign`] it into an immutable [`Event`].
#[derive(Debug, Clone)]
pub struct Template {
    pub kind: Kind,
    pub content: String,
    pub tags: Vec<Vec<String>>,
    pub created_at: Option<u64>,
}

impl Template {
    pub fn new(kind: Kind, content: impl Into<String>, tags: Vec<Vec<String>>) -> Self {
        Template {
            kind,
            content: content.into(),
            tags,
            created_at: None,
        }
    }

    pub fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Sign this template into an immutable event under `keys`.
    pub fn sign(&self, keys: &Keys) -> Result<Event> {
        validate_tags(&self.tags)?;
        let pubkey = keys.public_key()?;
        let created_at = self.created_at.unwrap_or_else(now_seconds);
        let id = compute_event_id(&pubkey, created_at, self.kind, &self.tags, &self.content);
        let sig = keys.sign_digest(&id.to_bytes())?;

        Ok(Event {
            id,
            pubkey,
            created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
            sig: hex::encode(sig),
        })
    }
}

/// Compute the canonical event id: the SHA-256 of the NIP-01 preimage
/// `[0, pubkey, created_at, kind, tags, content]` serialized as minimal
/// JSON with no whitespace.
pub(crate) fn compute_event_id(
    pubkey: &PublicKey,
    created_at: u64,
    kind: Kind,
    tags: &[Vec<String>],
    content: &str,
) -> EventId {
    let preimage =
        serde_json::to_string(&(0u8, pubkey.to_hex(), created_at, kind, tags, content))
            .unwrap_or_default();
    EventId(crypto::sha256(preimage.as_bytes()))
}

fn validate_tags(tags: &[Vec<String>]) -> Result<()> {
    if tags.iter().any(|tag| tag.is_empty()) {
        return Err(EventError::Malformed("empty tag".to_string()));
    }
    Ok(())
}

/// A signed, content-addressed Nostr event. Structurally immutable: fields
/// are only reachable through accessors, so the id and signature stay valid
/// for the lifetime of the value.
#[derive(Clone, Serialize)]
pub struct Event {
    id: EventId,
    pubkey: PublicKey,
    created_at: u64,
    kind: Kind,
    tags: Vec<Vec<String>>,
    content: String,
    sig: String,
}

impl Event {
    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn pubkey(&self) -> PublicKey {
        self.pubkey
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn tags(&self) -> &[Vec<String>] {
        &self.tags
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn sig(&self) -> &str {
        &self.sig
    }

    /// Whether any tag has the given name.
    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|t| t.first().map(String::as_str) == Some(name))
    }

    /// Value (index 1) of the first tag with the given name.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }

    /// Values (index 1) of every tag with the given name.
    pub fn tag_values(&self, name: &str) -> Vec<&str> {
        self.tags
            .iter()
            .filter(|t| t.first().map(String::as_str) == Some(name))
            .filter_map(|t| t.get(1))
            .map(String::as_str)
            .collect()
    }

    /// Remainder (everything after the name) of the first matching tag.
    pub fn tag_entry(&self, name: &str) -> Option<&[String]> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .map(|t| &t[1..])
    }

    /// Verify the canonical id and the BIP-340 signature. Any failure,
    /// including malformed signature bytes, yields `false`.
    pub fn verify(&self) -> bool {
        let recomputed =
            compute_event_id(&self.pubkey, self.created_at, self.kind, &self.tags, &self.content);
        if recomputed != self.id {
            return false;
        }

        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.pubkey.0) else {
            return false;
        };
        let Ok(sig_bytes) = hex::decode(&self.sig) else {
            return false;
        };
        let Ok(signature) = Signature::try_from(sig_bytes.as_slice()) else {
            return false;
        };
        verifying_key.verify_prehash(&self.id.0, &signature).is_ok()
    }

    /// Deterministic JSON form: `{id, pubkey, created_at, kind, tags,
    /// content, sig}`, minimal escapes, integers without fractional part.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| EventError::Malformed(e.to_string()))?;
        Self::from_value(&value)
    }

    /// Parse an event from a JSON object, rejecting missing or mistyped
    /// fields. Unknown fields are ignored.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| EventError::Malformed("not a JSON object".to_string()))?;

        let field = |name: &str| {
            obj.get(name)
                .ok_or_else(|| EventError::Malformed(format!("missing field: {name}")))
        };

        let id = EventId::from_hex(
            field("id")?
                .as_str()
                .ok_or_else(|| EventError::Malformed("id is not a string".to_string()))?,
        )?;
        let pubkey = PublicKey::from_hex(
            field("pubkey")?
                .as_str()
                .ok_or_else(|| EventError::Malformed("pubkey is not a string".to_string()))?,
        )?;
        let created_at = field("created_at")?
            .as_u64()
            .ok_or_else(|| EventError::Malformed("created_at is not an integer".to_string()))?;
        let kind = field("kind")?
            .as_u64()
            .filter(|k| *k <= Kind::MAX as u64)
            .ok_or_else(|| EventError::Malformed("kind out of range".to_string()))?
            as Kind;

        let tags: Vec<Vec<String>> = serde_json::from_value(field("tags")?.clone())
            .map_err(|_| EventError::Malformed("tags is not an array of string arrays".to_string()))?;
        validate_tags(&tags)?;

        let content = field("content")?
            .as_str()
            .ok_or_else(|| EventError::Malformed("content is not a string".to_string()))?
            .to_string();
        let sig = field("sig")?
            .as_str()
            .ok_or_else(|| EventError::Malformed("sig is not a string".to_string()))?
            .to_string();
        if hex::decode(&sig).map(|b| b.len() != 64).unwrap_or(true) {
            return Err(EventError::Malformed("sig is not 64 hex bytes".to_string()));
        }

        Ok(Event {
            id,
            pubkey,
            created_at,
            kind,
            tags,
            content,
            sig,
        })
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("pubkey", &self.pubkey)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
