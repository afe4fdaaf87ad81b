//! Token-transfer envelopes.

use crate::envelopes::{decrypt_prefixed, EnvelopeError};
use crate::keys::Keys;
use crate::types::nostr::{Event, PublicKey, Template, TOKEN_TRANSFER};

const PREFIX: &str = "token_transfer:";
const TYPE_TAG: &str = "token_transfer";

type Result<T> = std::result::Result<T, EnvelopeError>;

/// Optional hints attached in the clear alongside the sealed token.
#[derive(Debug, Clone, Default)]
pub struct TokenTransferOptions {
    /// Displayed amount, not authoritative.
    pub amount: Option<String>,
    pub symbol: Option<String>,
    /// Id of the payment request this transfer answers.
    pub reply_to_event_id: Option<String>,
}

/// A parsed token transfer.
#[derive(Debug, Clone)]
pub struct TokenTransfer {
    /// Opaque token string as supplied by the sender.
    pub token: String,
    pub sender: PublicKey,
    pub recipient: Option<PublicKey>,
    pub amount: Option<String>,
    pub symbol: Option<String>,
    pub reply_to_event_id: Option<String>,
    pub event_id: String,
}

/// Build a signed token-transfer event for `recipient` carrying the opaque
/// `token` string.
pub fn build(
    keys: &Keys,
    recipient: &PublicKey,
    token: &str,
    options: &TokenTransferOptions,
) -> Result<Event> {
    let mut tags = vec![
        vec!["p".to_string(), recipient.to_hex()],
        vec!["type".to_string(), TYPE_TAG.to_string()],
    ];
    if let Some(amount) = &options.amount {
        tags.push(vec!["amount".to_string(), amount.clone()]);
    }
    if let Some(symbol) = &options.symbol {
        tags.push(vec!["symbol".to_string(), symbol.clone()]);
    }
    if let Some(reply_to) = &options.reply_to_event_id {
        tags.push(vec![
            "e".to_string(),
            reply_to.clone(),
            String::new(),
            "reply".to_string(),
        ]);
    }

    let content = keys.nip04_encrypt(recipient, &format!("{PREFIX}{token}"))?;
    Ok(Template::new(TOKEN_TRANSFER, content, tags).sign(keys)?)
}

/// Parse and decrypt a token-transfer event, whichever side of it we are.
pub fn parse(keys: &Keys, event: &Event) -> Result<TokenTransfer> {
    if event.kind() != TOKEN_TRANSFER || event.tag_value("type") != Some(TYPE_TAG) {
        return Err(EnvelopeError::NotThisEnvelope);
    }

    let token = decrypt_prefixed(keys, event, PREFIX)?;
    let recipient = event
        .tag_value("p")
        .and_then(|hex| PublicKey::from_hex(hex).ok());
    let reply_to_event_id = event
        .tags()
        .iter()
        .find(|t| {
            t.first().map(String::as_str) == Some("e")
                && t.get(3).map(String::as_str) == Some("reply")
        })
        .and_then(|t| t.get(1))
        .cloned();

    Ok(TokenTransfer {
        token,
        sender: event.pubkey(),
        recipient,
        amount: event.tag_value("amount").map(str::to_string),
        symbol: event.tag_value("symbol").map(str::to_string),
        reply_to_event_id,
        event_id: event.id().to_hex(),
    })
}
