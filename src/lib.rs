//! Nostr client SDK.
//!
//! A multi-relay publish/subscribe client with the application framings the
//! Unicity wallet stack speaks on top of plain Nostr events:
//!
//! - NIP-01 events, filters and the relay wire protocol
//! - NIP-04 sealed envelopes (AES-256-CBC, with transparent gzip for large
//!   payloads) and NIP-44 v2 sealed envelopes (padded ChaCha20 + HMAC)
//! - NIP-17/NIP-59 gift-wrapped private messages behind ephemeral identities
//! - Token-transfer, payment-request and nametag-binding envelopes
//!
//! The [`client::NostrClient`] orchestrates one connection supervisor per
//! relay URL: auto-reconnect with exponential backoff, liveness probing,
//! subscription re-establishment, relay authentication (NIP-42), offline
//! queueing and per-event acknowledgement tracking.

pub mod client;
pub mod config;
pub mod crypto;
pub mod envelopes;
pub mod error;
pub mod keys;
pub mod relays;
pub mod signer;
pub mod transport;
pub mod types;
pub mod util;

pub use client::{listener_fn, NostrClient, SubscriptionListener};
pub use config::ClientOptions;
pub use error::ClientError;
pub use keys::Keys;
pub use relays::types::{ConnectionEvent, ConnectionStatus};
pub use types::filter::Filter;
pub use types::nostr::{Event, EventId, Kind, PublicKey, Template};
