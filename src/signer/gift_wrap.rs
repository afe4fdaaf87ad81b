//! Gift wraps: three-layer sender-anonymous envelopes (NIP-17/NIP-59).
//!
//! Layering, inside out: an unsigned *rumor* carries the application
//! payload; a kind-13 *seal* signed by the true sender carries the
//! NIP-44-encrypted rumor; a kind-1059 *gift wrap* signed by a throwaway
//! key pair carries the encrypted seal and a single `p` routing tag. Both
//! outer timestamps are independently fuzzed by up to two days so traffic
//! analysis cannot order conversations.

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keys::{KeyError, Keys};
use crate::signer::nip44::Nip44Error;
use crate::types::nostr::{
    compute_event_id, Event, EventError, EventId, Kind, PublicKey, Template, CHAT_MESSAGE,
    GIFT_WRAP, READ_RECEIPT, SEAL,
};
use crate::util::now_seconds;

/// Maximum timestamp fuzz applied to seal and wrap, in seconds (two days).
const MAX_TIMESTAMP_SKEW_SECS: i64 = 2 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum GiftWrapError {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Nip44(#[from] Nip44Error),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error("invalid seal: {0}")]
    InvalidSeal(String),

    #[error("malformed rumor: {0}")]
    MalformedRumor(String),

    #[error("seal signer does not match rumor author")]
    SenderMismatch,
}

type Result<T> = std::result::Result<T, GiftWrapError>;

/// The innermost, unsigned event layer. Identical to an [`Event`] except
/// that it carries no signature; its id is still content-addressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rumor {
    pub id: EventId,
    pub pubkey: PublicKey,
    pub created_at: u64,
    pub kind: Kind,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl Rumor {
    /// Build a rumor authored by `keys`, stamped with the real current time.
    pub fn build(
        keys: &Keys,
        kind: Kind,
        content: impl Into<String>,
        tags: Vec<Vec<String>>,
    ) -> Result<Self> {
        let pubkey = keys.public_key()?;
        let content = content.into();
        let created_at = now_seconds();
        let id = compute_event_id(&pubkey, created_at, kind, &tags, &content);
        Ok(Rumor {
            id,
            pubkey,
            created_at,
            kind,
            tags,
            content,
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| GiftWrapError::MalformedRumor(e.to_string()))
    }

    /// Value of the first `e` tag, if any: the event this rumor replies to.
    pub fn reply_to_event_id(&self) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some("e"))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }
}

/// A decrypted private message, as seen by the recipient after unwrapping.
#[derive(Debug, Clone)]
pub struct PrivateMessage {
    /// The true sender: the seal's signer.
    pub sender_pubkey: PublicKey,
    pub kind: Kind,
    pub content: String,
    /// The rumor's (unfuzzed) timestamp.
    pub created_at: u64,
    pub tags: Vec<Vec<String>>,
    pub reply_to_event_id: Option<String>,
}

/// Current time with an independent uniform offset in ±2 days.
fn fuzzed_timestamp() -> u64 {
    let offset = rand::thread_rng().gen_range(-MAX_TIMESTAMP_SKEW_SECS..=MAX_TIMESTAMP_SKEW_SECS);
    (now_seconds() as i64 + offset).max(0) as u64
}

/// Wrap `rumor` for `recipient`: seal it under the sender identity, then
/// wrap the seal under a freshly generated ephemeral identity.
pub fn wrap(sender: &Keys, recipient: &PublicKey, rumor: &Rumor) -> Result<Event> {
    let seal_content = sender.nip44_encrypt(recipient, &rumor.to_json())?;
    let seal = Template::new(SEAL, seal_content, vec![])
        .with_created_at(fuzzed_timestamp())
        .sign(sender)?;

    // Never reused: one ephemeral identity per wrap.
    let ephemeral = Keys::generate();
    let wrap_content = ephemeral.nip44_encrypt(recipient, &seal.to_json())?;
    let gift_wrap = Template::new(
        GIFT_WRAP,
        wrap_content,
        vec![vec!["p".to_string(), recipient.to_hex()]],
    )
    .with_created_at(fuzzed_timestamp())
    .sign(&ephemeral)?;

    Ok(gift_wrap)
}

/// Wrap a kind-14 chat rumor carrying `content`, optionally marking it as a
/// reply to an earlier event.
pub fn wrap_private_message(
    sender: &Keys,
    recipient: &PublicKey,
    content: &str,
    reply_to_event_id: Option<&str>,
) -> Result<Event> {
    let mut tags = vec![vec!["p".to_string(), recipient.to_hex()]];
    if let Some(reply_to) = reply_to_event_id {
        tags.push(vec![
            "e".to_string(),
            reply_to.to_string(),
            String::new(),
            "reply".to_string(),
        ]);
    }
    let rumor = Rumor::build(sender, CHAT_MESSAGE, content, tags)?;
    wrap(sender, recipient, &rumor)
}

/// Wrap a kind-15 read receipt for `event_id`.
pub fn wrap_read_receipt(sender: &Keys, recipient: &PublicKey, event_id: &str) -> Result<Event> {
    let tags = vec![
        vec!["p".to_string(), recipient.to_hex()],
        vec!["e".to_string(), event_id.to_string()],
    ];
    let rumor = Rumor::build(sender, READ_RECEIPT, "", tags)?;
    wrap(sender, recipient, &rumor)
}

/// Unwrap a gift wrap addressed to `recipient`.
///
/// Decrypts the wrap with the wrap's (ephemeral) signer, verifies the seal
/// signature, decrypts the rumor with the seal's signer, and checks the
/// rumor's declared author against the seal signer.
pub fn unwrap(recipient: &Keys, gift_wrap: &Event) -> Result<PrivateMessage> {
    let seal_json = recipient.nip44_decrypt(&gift_wrap.pubkey(), gift_wrap.content())?;
    let seal = Event::from_json(&seal_json)
        .map_err(|e| GiftWrapError::InvalidSeal(e.to_string()))?;
    if seal.kind() != SEAL {
        return Err(GiftWrapError::InvalidSeal(format!(
            "unexpected kind {}",
            seal.kind()
        )));
    }
    if !seal.verify() {
        return Err(GiftWrapError::InvalidSeal("signature check failed".to_string()));
    }

    let rumor_json = recipient.nip44_decrypt(&seal.pubkey(), seal.content())?;
    let rumor = Rumor::from_json(&rumor_json)?;
    if rumor.pubkey != seal.pubkey() {
        return Err(GiftWrapError::SenderMismatch);
    }

    let reply_to_event_id = rumor.reply_to_event_id().map(str::to_string);
    Ok(PrivateMessage {
        sender_pubkey: seal.pubkey(),
        kind: rumor.kind,
        content: rumor.content,
        created_at: rumor.created_at,
        tags: rumor.tags,
        reply_to_event_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gift_wrap_roundtrip() {
        let alice = Keys::generate();
        let bob = Keys::generate();
        let bob_pub = bob.public_key().unwrap();

        let wrapped = wrap_private_message(&alice, &bob_pub, "Hi Bob", None).unwrap();

        assert_eq!(wrapped.kind(), GIFT_WRAP);
        assert_eq!(wrapped.tags().len(), 1);
        assert_eq!(wrapped.tag_value("p"), Some(bob_pub.to_hex().as_str()));
        // Signed by neither party: an ephemeral identity.
        assert_ne!(wrapped.pubkey(), alice.public_key().unwrap());
        assert_ne!(wrapped.pubkey(), bob_pub);

        let now = now_seconds() as i64;
        let skew = wrapped.created_at() as i64 - now;
        assert!(skew.abs() <= MAX_TIMESTAMP_SKEW_SECS + 5);

        let message = unwrap(&bob, &wrapped).unwrap();
        assert_eq!(message.sender_pubkey, alice.public_key().unwrap());
        assert_eq!(message.kind, CHAT_MESSAGE);
        assert_eq!(message.content, "Hi Bob");
        assert_eq!(message.reply_to_event_id, None);
    }

    #[test]
    fn reply_tag_is_carried_through() {
        let alice = Keys::generate();
        let bob = Keys::generate();
        let bob_pub = bob.public_key().unwrap();
        let parent = "ab".repeat(32);

        let wrapped =
            wrap_private_message(&alice, &bob_pub, "re: hi", Some(&parent)).unwrap();
        let message = unwrap(&bob, &wrapped).unwrap();
        assert_eq!(message.reply_to_event_id.as_deref(), Some(parent.as_str()));
    }

    #[test]
    fn two_wraps_use_distinct_ephemeral_identities() {
        let alice = Keys::generate();
        let bob = Keys::generate();
        let bob_pub = bob.public_key().unwrap();

        let w1 = wrap_private_message(&alice, &bob_pub, "same", None).unwrap();
        let w2 = wrap_private_message(&alice, &bob_pub, "same", None).unwrap();
        assert_ne!(w1.pubkey(), w2.pubkey());
    }

    #[test]
    fn read_receipt_rumor_shape() {
        let alice = Keys::generate();
        let bob = Keys::generate();
        let bob_pub = bob.public_key().unwrap();
        let seen = "cd".repeat(32);

        let wrapped = wrap_read_receipt(&alice, &bob_pub, &seen).unwrap();
        let message = unwrap(&bob, &wrapped).unwrap();
        assert_eq!(message.kind, READ_RECEIPT);
        assert_eq!(message.content, "");
        assert_eq!(message.reply_to_event_id.as_deref(), Some(seen.as_str()));
    }

    #[test]
    fn wrong_recipient_cannot_unwrap() {
        let alice = Keys::generate();
        let bob = Keys::generate();
        let eve = Keys::generate();

        let wrapped =
            wrap_private_message(&alice, &bob.public_key().unwrap(), "secret", None).unwrap();
        assert!(unwrap(&eve, &wrapped).is_err());
    }

    #[test]
    fn seal_forged_by_third_party_is_rejected() {
        let alice = Keys::generate();
        let mallory = Keys::generate();
        let bob = Keys::generate();
        let bob_pub = bob.public_key().unwrap();

        // Rumor claims Alice authored it, but the seal is Mallory's.
        let rumor = Rumor::build(&alice, CHAT_MESSAGE, "forged", vec![]).unwrap();
        let seal_content = mallory.nip44_encrypt(&bob_pub, &rumor.to_json()).unwrap();
        let seal = Template::new(SEAL, seal_content, vec![]).sign(&mallory).unwrap();

        let ephemeral = Keys::generate();
        let wrap_content = ephemeral.nip44_encrypt(&bob_pub, &seal.to_json()).unwrap();
        let forged = Template::new(
            GIFT_WRAP,
            wrap_content,
            vec![vec!["p".to_string(), bob_pub.to_hex()]],
        )
        .sign(&ephemeral)
        .unwrap();

        assert!(matches!(
            unwrap(&bob, &forged),
            Err(GiftWrapError::SenderMismatch)
        ));
    }
}
