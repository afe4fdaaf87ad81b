//! Subscription registry types.

use std::sync::Arc;

use crate::types::filter::Filter;
use crate::types::nostr::Event;

/// Callbacks for one subscription. Implementations must tolerate being
/// called from the client's internal tasks; panics are caught and logged,
/// never propagated.
pub trait SubscriptionListener: Send + Sync {
    /// A matching event arrived from some relay.
    fn on_event(&self, subscription_id: &str, event: &Event);

    /// The relay finished replaying stored events.
    fn on_end_of_stored_events(&self, subscription_id: &str) {
        let _ = subscription_id;
    }

    /// The relay ended the subscription, or it failed.
    fn on_error(&self, subscription_id: &str, message: &str) {
        let _ = (subscription_id, message);
    }
}

/// Wrap a plain closure as a listener, for the common case that only cares
/// about events.
pub fn listener_fn<F>(f: F) -> impl SubscriptionListener + 'static
where
    F: Fn(&str, &Event) + Send + Sync + 'static,
{
    struct FnListener<F>(F);

    impl<F> SubscriptionListener for FnListener<F>
    where
        F: Fn(&str, &Event) + Send + Sync,
    {
        fn on_event(&self, subscription_id: &str, event: &Event) {
            (self.0)(subscription_id, event)
        }
    }

    FnListener(f)
}

/// Registry entry: the filter survives socket drops so the subscription can
/// be re-established on every reconnect.
pub(crate) struct Subscription {
    pub filter: Filter,
    pub listener: Arc<dyn SubscriptionListener>,
}
