//! Client configuration surface.

/// Options accepted by [`crate::client::NostrClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Timeout for nametag queries before they resolve to `None`.
    pub query_timeout_ms: u64,
    /// Whether dropped relay connections are re-established automatically.
    pub auto_reconnect: bool,
    /// Base delay of the exponential reconnect backoff.
    pub reconnect_interval_ms: u64,
    /// Upper bound on the reconnect backoff delay.
    pub max_reconnect_interval_ms: u64,
    /// Liveness probe interval. `0` disables the probe entirely.
    pub ping_interval_ms: u64,
    /// Best-effort window for relay `OK` acknowledgements; after it the
    /// publish resolves optimistically with the event id.
    pub publish_ack_timeout_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            query_timeout_ms: 5_000,
            auto_reconnect: true,
            reconnect_interval_ms: 1_000,
            max_reconnect_interval_ms: 30_000,
            ping_interval_ms: 30_000,
            publish_ack_timeout_ms: 5_000,
        }
    }
}
