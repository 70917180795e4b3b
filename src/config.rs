//! Configuration - passed in by the embedding application.

use std::time::Duration;

/// Default message time-to-live on the bridge, in seconds.
pub const DEFAULT_TTL: u64 = 300;

/// Default cap on concurrent connect candidates.
pub const DEFAULT_MAX_CONNECT_CANDIDATES: usize = 16;

/// Transport settings for one [`BridgeClient`](crate::bridge::BridgeClient).
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// TCP/TLS connect timeout. The event stream itself has no read timeout.
    pub connect_timeout: Duration,
    pub user_agent: String,
    /// Buffer between the stream reader and its consumer.
    pub channel_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("tonconnect-rs/{}", env!("CARGO_PKG_VERSION")),
            channel_capacity: 64,
        }
    }
}

impl BridgeConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self { self.connect_timeout = timeout; self }
    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self { self.user_agent = ua.into(); self }
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self { self.channel_capacity = capacity.max(1); self }
}

/// Connector configuration.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub bridge: BridgeConfig,
    pub max_connect_candidates: usize,
    /// Upper bound on waiting for a wallet reply. `None` waits until cancelled.
    pub request_timeout: Option<Duration>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            bridge: BridgeConfig::default(),
            max_connect_candidates: DEFAULT_MAX_CONNECT_CANDIDATES,
            request_timeout: None,
        }
    }
}

impl ConnectorConfig {
    pub fn new() -> Self { Self::default() }
    pub fn with_bridge(mut self, bridge: BridgeConfig) -> Self { self.bridge = bridge; self }
    pub fn with_max_connect_candidates(mut self, max: usize) -> Self { self.max_connect_candidates = max; self }
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self { self.request_timeout = Some(timeout); self }
}

/// Per-message bridge options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOptions {
    /// Seconds the bridge keeps the message. `None` lets the bridge decide.
    pub ttl: Option<u64>,
    pub topic: Option<String>,
}

impl Default for MessageOptions {
    fn default() -> Self {
        Self { ttl: Some(DEFAULT_TTL), topic: None }
    }
}

impl MessageOptions {
    pub fn with_ttl(mut self, ttl: u64) -> Self { self.ttl = Some(ttl); self }
    pub fn without_ttl(mut self) -> Self { self.ttl = None; self }
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self { self.topic = Some(topic.into()); self }

    /// Fill in `topic` if the caller did not set one.
    pub(crate) fn or_topic(mut self, topic: &str) -> Self {
        if self.topic.is_none() {
            self.topic = Some(topic.to_string());
        }
        self
    }
}
