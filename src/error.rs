//! Top-level error type.

use thiserror::Error;

use crate::envelopes::EnvelopeError;
use crate::keys::KeyError;
use crate::relays::types::RelayError;
use crate::signer::gift_wrap::GiftWrapError;
use crate::signer::nip04::Nip04Error;
use crate::signer::nip44::Nip44Error;
use crate::types::nostr::EventError;

/// Errors surfaced by client operations. Module-level errors convert into
/// this so callers only ever match one type at the API boundary.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client has been shut down; no further operations are accepted.
    #[error("client is closed")]
    Closed,

    /// A publish found no open relay socket at send time.
    #[error("no connected relay")]
    NoConnectedRelay,

    /// A relay answered `OK … false`.
    #[error("event rejected by relay: {0}")]
    EventRejected(String),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Nip04(#[from] Nip04Error),

    #[error(transparent)]
    Nip44(#[from] Nip44Error),

    #[error(transparent)]
    GiftWrap(#[from] GiftWrapError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}
