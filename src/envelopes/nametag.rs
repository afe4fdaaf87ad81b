//! Nametag bindings.
//!
//! A nametag is a human-readable identifier bound to an address through an
//! addressable-replaceable event. Only the SHA-256 of the normalized
//! nametag ever appears on relays, so the plaintext identifier cannot be
//! enumerated from public data.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::envelopes::EnvelopeError;
use crate::types::filter::Filter;
use crate::types::nostr::{Event, Template, NAMETAG_BINDING};

/// Optional suffix users type; stripped before hashing.
pub const NAMETAG_SUFFIX: &str = "@unicity";

type Result<T> = std::result::Result<T, EnvelopeError>;

/// External E.164 phone-number normalizer. Phone-shaped nametags are routed
/// through this before hashing so `+1 (555) 123-4567` and `15551234567`
/// bind to the same record.
pub trait PhoneNormalizer: Send + Sync {
    /// Returns the E.164 form, or `None` when the input is not a usable
    /// phone number.
    fn normalize(&self, raw: &str) -> Option<String>;
}

static PHONE_SHAPED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\+?[0-9][0-9 \-().]{4,}$").expect("phone regex is valid")
});

/// Whether the (already lowercased, suffix-stripped) input looks like a
/// phone number.
pub fn looks_like_phone_number(s: &str) -> bool {
    PHONE_SHAPED.is_match(s)
}

/// Normalize a nametag: trim, lowercase, strip a trailing `@unicity`, and
/// run phone-shaped inputs through the external normalizer when one is
/// configured.
pub fn normalize_nametag(input: &str, phone: Option<&dyn PhoneNormalizer>) -> String {
    let lowered = input.trim().to_lowercase();
    let stripped = lowered.strip_suffix(NAMETAG_SUFFIX).unwrap_or(&lowered);

    if let Some(normalizer) = phone {
        if looks_like_phone_number(stripped) {
            if let Some(e164) = normalizer.normalize(stripped) {
                return e164;
            }
        }
    }
    stripped.to_string()
}

/// Hex SHA-256 of a normalized nametag.
pub fn nametag_hash(normalized: &str) -> String {
    hex::encode(crypto::sha256(normalized.as_bytes()))
}

/// Plaintext content of a binding event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NametagBinding {
    pub nametag_hash: String,
    pub address: String,
    pub verified: bool,
}

/// Build the addressable binding event template for a hashed nametag.
pub fn binding_template(hash: &str, address: &str, verified: bool) -> Result<Template> {
    let binding = NametagBinding {
        nametag_hash: hash.to_string(),
        address: address.to_string(),
        verified,
    };
    let content = serde_json::to_string(&binding)
        .map_err(|e| EnvelopeError::MalformedPayload(e.to_string()))?;

    let tags = vec![
        vec!["d".to_string(), hash.to_string()],
        vec!["nametag".to_string(), hash.to_string()],
        vec!["t".to_string(), hash.to_string()],
        vec!["address".to_string(), address.to_string()],
    ];
    Ok(Template::new(NAMETAG_BINDING, content, tags))
}

/// Parse a binding event back into its content.
pub fn parse_binding(event: &Event) -> Result<NametagBinding> {
    if event.kind() != NAMETAG_BINDING {
        return Err(EnvelopeError::NotThisEnvelope);
    }
    serde_json::from_str(event.content())
        .map_err(|e| EnvelopeError::MalformedPayload(e.to_string()))
}

/// Filter resolving a hashed nametag to the binding author's pubkey.
pub fn nametag_to_pubkey_filter(hash: &str) -> Filter {
    Filter::new().kind(NAMETAG_BINDING).tag("t", [hash])
}

/// Filter listing a pubkey's own bindings.
pub fn pubkey_to_nametag_filter(pubkey_hex: &str) -> Filter {
    Filter::new()
        .kind(NAMETAG_BINDING)
        .author(pubkey_hex)
        .limit(10)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Keys;

    struct FakeNormalizer;

    impl PhoneNormalizer for FakeNormalizer {
        fn normalize(&self, raw: &str) -> Option<String> {
            let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
            (!digits.is_empty()).then(|| format!("+{digits}"))
        }
    }

    #[test]
    fn normalization_rules() {
        assert_eq!(normalize_nametag("  Alice@unicity ", None), "alice");
        assert_eq!(normalize_nametag("BOB", None), "bob");
        assert_eq!(normalize_nametag("carol", None), "carol");
        // Suffix only stripped at the end.
        assert_eq!(normalize_nametag("x@unicityy", None), "x@unicityy");
    }

    #[test]
    fn phone_shaped_inputs_use_the_normalizer() {
        let normalizer = FakeNormalizer;
        assert_eq!(
            normalize_nametag("+1 (555) 123-4567", Some(&normalizer)),
            "+15551234567"
        );
        // Not phone-shaped, normalizer is bypassed.
        assert_eq!(normalize_nametag("alice", Some(&normalizer)), "alice");
        // No normalizer configured, phone-shaped input is kept as-is.
        assert_eq!(normalize_nametag("555 12345", None), "555 12345");
    }

    #[test]
    fn hash_is_hex_sha256() {
        let hash = nametag_hash("alice");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, nametag_hash("alice"));
        assert_ne!(hash, nametag_hash("bob"));
    }

    #[test]
    fn binding_event_roundtrip() {
        let keys = Keys::generate();
        let hash = nametag_hash("alice");
        let event = binding_template(&hash, "addr-1", true)
            .unwrap()
            .sign(&keys)
            .unwrap();

        assert_eq!(event.kind(), NAMETAG_BINDING);
        assert_eq!(event.tag_value("d"), Some(hash.as_str()));
        assert_eq!(event.tag_value("nametag"), Some(hash.as_str()));
        assert_eq!(event.tag_value("t"), Some(hash.as_str()));
        assert_eq!(event.tag_value("address"), Some("addr-1"));

        let binding = parse_binding(&event).unwrap();
        assert_eq!(binding.nametag_hash, hash);
        assert_eq!(binding.address, "addr-1");
        assert!(binding.verified);
    }

    #[test]
    fn lookup_filters() {
        let hash = nametag_hash("alice");
        let forward = nametag_to_pubkey_filter(&hash);
        assert_eq!(forward.kinds.as_deref(), Some(&[NAMETAG_BINDING][..]));
        assert_eq!(forward.tags.get("t").unwrap(), &vec![hash.clone()]);

        let reverse = pubkey_to_nametag_filter(&"a".repeat(64));
        assert_eq!(reverse.authors.as_deref(), Some(&["a".repeat(64)][..]));
        assert_eq!(reverse.limit, Some(10));
    }
}
