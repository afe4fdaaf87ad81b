//! Payment-request envelopes and their responses.

use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::envelopes::{decrypt_prefixed, EnvelopeError};
use crate::keys::Keys;
use crate::types::nostr::{
    Event, PublicKey, Template, PAYMENT_REQUEST, PAYMENT_REQUEST_RESPONSE,
};
use crate::util::now_millis;

const REQUEST_PREFIX: &str = "payment_request:";
const RESPONSE_PREFIX: &str = "payment_request_response:";
const REQUEST_TYPE_TAG: &str = "payment_request";
const RESPONSE_TYPE_TAG: &str = "payment_request_response";

/// Default validity window for a request without an explicit deadline.
const DEFAULT_DEADLINE_MS: u64 = 5 * 60 * 1000;

type Result<T> = std::result::Result<T, EnvelopeError>;

/// Encrypted request payload. `deadline` is milliseconds since epoch;
/// `null` on the wire means the request never expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequestPayload {
    pub amount: String,
    pub coin_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub recipient_nametag: String,
    pub request_id: String,
    pub deadline: Option<u64>,
}

impl PaymentRequestPayload {
    /// Whether the deadline is set and has passed.
    pub fn is_expired(&self) -> bool {
        self.deadline.map(|d| now_millis() > d).unwrap_or(false)
    }
}

/// Deadline policy when building a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Deadline {
    /// Five minutes from now.
    #[default]
    Default,
    /// No deadline at all.
    None,
    /// Explicit deadline, milliseconds since epoch.
    At(u64),
}

#[derive(Debug, Clone, Default)]
pub struct PaymentRequestOptions {
    pub message: Option<String>,
    /// Generated (4 random bytes, 8 hex chars) when absent.
    pub request_id: Option<String>,
    pub deadline: Deadline,
}

/// A parsed payment request.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub payload: PaymentRequestPayload,
    pub requester: PublicKey,
    pub event_id: String,
}

/// Outcome carried by a payment-request response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentRequestStatus {
    #[serde(rename = "DECLINED")]
    Declined,
    #[serde(rename = "EXPIRED")]
    Expired,
}

impl PaymentRequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            PaymentRequestStatus::Declined => "DECLINED",
            PaymentRequestStatus::Expired => "EXPIRED",
        }
    }
}

/// Encrypted response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponsePayload {
    pub request_id: String,
    pub original_event_id: String,
    pub status: PaymentRequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A parsed payment-request response.
#[derive(Debug, Clone)]
pub struct PaymentResponse {
    pub payload: PaymentResponsePayload,
    pub responder: PublicKey,
    pub event_id: String,
}

fn generate_request_id() -> Result<String> {
    let bytes: [u8; 4] =
        crypto::random_bytes().map_err(|_| EnvelopeError::RandomGenerationFailed)?;
    Ok(hex::encode(bytes))
}

/// Build a signed payment-request event aimed at `target`, asking for
/// `amount` of `coin_id` to be sent to `recipient_nametag`.
///
/// Returns the event together with the final payload, so callers learn the
/// generated request id and effective deadline.
pub fn build_request(
    keys: &Keys,
    target: &PublicKey,
    amount: &str,
    coin_id: &str,
    recipient_nametag: &str,
    options: PaymentRequestOptions,
) -> Result<(Event, PaymentRequestPayload)> {
    let request_id = match options.request_id {
        Some(id) => id,
        None => generate_request_id()?,
    };
    let deadline = match options.deadline {
        Deadline::Default => Some(now_millis() + DEFAULT_DEADLINE_MS),
        Deadline::None => None,
        Deadline::At(ms) => Some(ms),
    };

    let payload = PaymentRequestPayload {
        amount: amount.to_string(),
        coin_id: coin_id.to_string(),
        message: options.message,
        recipient_nametag: recipient_nametag.to_string(),
        request_id,
        deadline,
    };
    let json = serde_json::to_string(&payload)
        .map_err(|e| EnvelopeError::MalformedPayload(e.to_string()))?;
    let content = keys.nip04_encrypt(target, &format!("{REQUEST_PREFIX}{json}"))?;

    let tags = vec![
        vec!["p".to_string(), target.to_hex()],
        vec!["type".to_string(), REQUEST_TYPE_TAG.to_string()],
        vec!["amount".to_string(), amount.to_string()],
        vec!["recipient".to_string(), recipient_nametag.to_string()],
    ];
    let event = Template::new(PAYMENT_REQUEST, content, tags).sign(keys)?;
    Ok((event, payload))
}

/// Parse and decrypt a payment-request event.
pub fn parse_request(keys: &Keys, event: &Event) -> Result<PaymentRequest> {
    if event.kind() != PAYMENT_REQUEST || event.tag_value("type") != Some(REQUEST_TYPE_TAG) {
        return Err(EnvelopeError::NotThisEnvelope);
    }
    let json = decrypt_prefixed(keys, event, REQUEST_PREFIX)?;
    let payload: PaymentRequestPayload =
        serde_json::from_str(&json).map_err(|e| EnvelopeError::MalformedPayload(e.to_string()))?;
    Ok(PaymentRequest {
        payload,
        requester: event.pubkey(),
        event_id: event.id().to_hex(),
    })
}

/// Build a signed response declining or expiring a request.
pub fn build_response(
    keys: &Keys,
    requester: &PublicKey,
    request_id: &str,
    original_event_id: &str,
    status: PaymentRequestStatus,
    reason: Option<String>,
) -> Result<Event> {
    let payload = PaymentResponsePayload {
        request_id: request_id.to_string(),
        original_event_id: original_event_id.to_string(),
        status,
        reason,
    };
    let json = serde_json::to_string(&payload)
        .map_err(|e| EnvelopeError::MalformedPayload(e.to_string()))?;
    let content = keys.nip04_encrypt(requester, &format!("{RESPONSE_PREFIX}{json}"))?;

    let tags = vec![
        vec!["p".to_string(), requester.to_hex()],
        vec!["type".to_string(), RESPONSE_TYPE_TAG.to_string()],
        vec!["status".to_string(), status.as_str().to_string()],
        vec![
            "e".to_string(),
            original_event_id.to_string(),
            String::new(),
            "reply".to_string(),
        ],
    ];
    Ok(Template::new(PAYMENT_REQUEST_RESPONSE, content, tags).sign(keys)?)
}

/// Parse and decrypt a payment-request response.
pub fn parse_response(keys: &Keys, event: &Event) -> Result<PaymentResponse> {
    if event.kind() != PAYMENT_REQUEST_RESPONSE
        || event.tag_value("type") != Some(RESPONSE_TYPE_TAG)
    {
        return Err(EnvelopeError::NotThisEnvelope);
    }
    let json = decrypt_prefixed(keys, event, RESPONSE_PREFIX)?;
    let payload: PaymentResponsePayload =
        serde_json::from_str(&json).map_err(|e| EnvelopeError::MalformedPayload(e.to_string()))?;
    Ok(PaymentResponse {
        payload,
        responder: event.pubkey(),
        event_id: event.id().to_hex(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrip_with_generated_id_and_default_deadline() {
        let requester = Keys::generate();
        let payer = Keys::generate();
        let payer_pub = payer.public_key().unwrap();

        let before = now_millis();
        let (event, payload) = build_request(
            &requester,
            &payer_pub,
            "42",
            "unicity",
            "alice",
            PaymentRequestOptions::default(),
        )
        .unwrap();

        assert_eq!(payload.request_id.len(), 8);
        let deadline = payload.deadline.unwrap();
        assert!(deadline >= before + DEFAULT_DEADLINE_MS);
        assert!(deadline <= now_millis() + DEFAULT_DEADLINE_MS);
        assert!(!payload.is_expired());

        assert_eq!(event.kind(), PAYMENT_REQUEST);
        assert_eq!(event.tag_value("type"), Some("payment_request"));
        assert_eq!(event.tag_value("amount"), Some("42"));
        assert_eq!(event.tag_value("recipient"), Some("alice"));

        let parsed = parse_request(&payer, &event).unwrap();
        assert_eq!(parsed.payload, payload);
        assert_eq!(parsed.requester, requester.public_key().unwrap());
    }

    #[test]
    fn explicit_null_deadline_never_expires() {
        let requester = Keys::generate();
        let payer = Keys::generate();
        let payer_pub = payer.public_key().unwrap();

        let (event, payload) = build_request(
            &requester,
            &payer_pub,
            "1",
            "unicity",
            "bob",
            PaymentRequestOptions {
                deadline: Deadline::None,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(payload.deadline, None);
        assert!(!payload.is_expired());
        // "No deadline" travels as an explicit null.
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains(r#""deadline":null"#));

        let parsed = parse_request(&payer, &event).unwrap();
        assert_eq!(parsed.payload.deadline, None);
    }

    #[test]
    fn past_deadline_is_expired() {
        let requester = Keys::generate();
        let payer_pub = Keys::generate().public_key().unwrap();
        let (_, payload) = build_request(
            &requester,
            &payer_pub,
            "1",
            "unicity",
            "bob",
            PaymentRequestOptions {
                deadline: Deadline::At(now_millis().saturating_sub(1)),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(payload.is_expired());
    }

    #[test]
    fn response_roundtrip() {
        let requester = Keys::generate();
        let payer = Keys::generate();
        let requester_pub = requester.public_key().unwrap();
        let original = "ab".repeat(32);

        let event = build_response(
            &payer,
            &requester_pub,
            "deadbeef",
            &original,
            PaymentRequestStatus::Declined,
            Some("not today".to_string()),
        )
        .unwrap();

        assert_eq!(event.tag_value("status"), Some("DECLINED"));
        assert_eq!(
            event.tag_entry("e").unwrap(),
            &[original.clone(), String::new(), "reply".to_string()]
        );

        let parsed = parse_response(&requester, &event).unwrap();
        assert_eq!(parsed.payload.request_id, "deadbeef");
        assert_eq!(parsed.payload.original_event_id, original);
        assert_eq!(parsed.payload.status, PaymentRequestStatus::Declined);
        assert_eq!(parsed.payload.reason.as_deref(), Some("not today"));
    }

    #[test]
    fn wrong_type_tag_is_not_this_envelope() {
        let requester = Keys::generate();
        let payer = Keys::generate();
        let payer_pub = payer.public_key().unwrap();
        let (request, _) = build_request(
            &requester,
            &payer_pub,
            "1",
            "unicity",
            "bob",
            PaymentRequestOptions::default(),
        )
        .unwrap();
        assert!(matches!(
            parse_response(&payer, &request),
            Err(EnvelopeError::NotThisEnvelope)
        ));
    }
}
