//! Nametag resolution.
//!
//! A resolve is one temporary subscription: track the binding with the
//! greatest `created_at`, settle on EOSE, fall back to `None` on timeout,
//! and unsubscribe on either path. Concurrent resolves are independent.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::client::{NostrClient, SubscriptionListener};
use crate::envelopes::nametag::{
    self, nametag_hash, nametag_to_pubkey_filter, normalize_nametag, pubkey_to_nametag_filter,
    NametagBinding, PhoneNormalizer,
};
use crate::error::ClientError;
use crate::types::filter::Filter;
use crate::types::nostr::{Event, NAMETAG_BINDING};

struct QueryState {
    best: Mutex<Option<(u64, Event)>>,
    eose: Mutex<Option<oneshot::Sender<()>>>,
}

struct BindingQueryListener {
    state: Arc<QueryState>,
    expected_hash: Option<String>,
}

impl SubscriptionListener for BindingQueryListener {
    fn on_event(&self, _subscription_id: &str, event: &Event) {
        if event.kind() != NAMETAG_BINDING {
            return;
        }
        if let Some(hash) = &self.expected_hash {
            if event.tag_value("t") != Some(hash.as_str()) {
                return;
            }
        }
        let mut best = self.state.best.lock();
        let newer = best
            .as_ref()
            .map(|(created_at, _)| event.created_at() > *created_at)
            .unwrap_or(true);
        if newer {
            *best = Some((event.created_at(), event.clone()));
        }
    }

    fn on_end_of_stored_events(&self, _subscription_id: &str) {
        if let Some(tx) = self.state.eose.lock().take() {
            let _ = tx.send(());
        }
    }
}

impl NostrClient {
    /// Resolve a nametag to the binding author's pubkey hex. `None` when no
    /// relay answered within `query_timeout_ms`.
    pub async fn resolve_nametag(&self, nametag: &str) -> Result<Option<String>, ClientError> {
        self.resolve_nametag_with(nametag, None).await
    }

    /// [`NostrClient::resolve_nametag`] with a phone normalizer for
    /// phone-shaped nametags.
    pub async fn resolve_nametag_with(
        &self,
        nametag: &str,
        phone: Option<&dyn PhoneNormalizer>,
    ) -> Result<Option<String>, ClientError> {
        let normalized = normalize_nametag(nametag, phone);
        let hash = nametag_hash(&normalized);
        let event = self
            .query_latest_binding(nametag_to_pubkey_filter(&hash), Some(hash))
            .await?;
        Ok(event.map(|e| e.pubkey().to_hex()))
    }

    /// Reverse lookup: the newest binding authored by `pubkey_hex`.
    pub async fn query_nametag_binding(
        &self,
        pubkey_hex: &str,
    ) -> Result<Option<NametagBinding>, ClientError> {
        let event = self
            .query_latest_binding(pubkey_to_nametag_filter(pubkey_hex), None)
            .await?;
        Ok(event.as_ref().and_then(|e| nametag::parse_binding(e).ok()))
    }

    async fn query_latest_binding(
        &self,
        filter: Filter,
        expected_hash: Option<String>,
    ) -> Result<Option<Event>, ClientError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }

        let (tx, rx) = oneshot::channel();
        let state = Arc::new(QueryState {
            best: Mutex::new(None),
            eose: Mutex::new(Some(tx)),
        });
        let listener = BindingQueryListener {
            state: state.clone(),
            expected_hash,
        };

        let subscription_id = self.subscribe(filter, listener).await?;
        let timeout = Duration::from_millis(self.inner.options.query_timeout_ms);
        let eose = tokio::time::timeout(timeout, rx).await;
        self.unsubscribe(&subscription_id).await;

        match eose {
            Ok(_) => Ok(state.best.lock().take().map(|(_, event)| event)),
            Err(_) if self.inner.closed.load(Ordering::SeqCst) => Err(ClientError::Closed),
            Err(_) => Ok(None),
        }
    }
}
