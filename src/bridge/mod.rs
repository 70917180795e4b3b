//! Bridge - HTTP/SSE relay transport
//!
//! The bridge is a store-and-forward relay with two endpoints:
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/events?client_id&last_event_id` | GET | SSE feed of `{from, message}` envelopes |
//! | `/message?client_id&to&ttl&topic` | POST | base64 sealed box as `text/plain` |
//!
//! [`BridgeClient`] owns its `reqwest::Client`; nothing here touches
//! process-wide HTTP defaults.

mod events;
mod sender;

pub use events::{EventSubscription, Inbound};
pub use sender::BridgeErrorResponse;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::config::{BridgeConfig, MessageOptions};
use crate::error::{Error, Result};
use crate::session::ClientId;

/// Inbound envelope carried in an SSE `data` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BridgeMessage {
    /// Sender's client id, hex.
    pub from: String,
    /// Sealed box, standard base64.
    pub message: String,
}

/// Handle to a bridge relay transport. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    http: reqwest::Client,
    config: BridgeConfig,
}

impl BridgeClient {
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(Error::Transport)?;
        Ok(Self { http, config })
    }

    /// Use a caller-built HTTP client (proxies, custom TLS, test servers).
    pub fn with_http(http: reqwest::Client, config: BridgeConfig) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

/// `<bridge>/events?client_id=..[&last_event_id=..]`
pub fn events_url(bridge_url: &str, client_id: &ClientId, last_event_id: u64) -> Result<Url> {
    let mut url = endpoint(bridge_url, "events")?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("client_id", &client_id.to_hex());
        if last_event_id > 0 {
            query.append_pair("last_event_id", &last_event_id.to_string());
        }
    }
    Ok(url)
}

/// `<bridge>/message?client_id=..&to=..[&ttl=..][&topic=..]`
pub fn message_url(
    bridge_url: &str,
    client_id: &ClientId,
    to: &ClientId,
    options: &MessageOptions,
) -> Result<Url> {
    let mut url = endpoint(bridge_url, "message")?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("client_id", &client_id.to_hex());
        query.append_pair("to", &to.to_hex());
        if let Some(ttl) = options.ttl {
            query.append_pair("ttl", &ttl.to_string());
        }
        if let Some(topic) = options.topic.as_deref().filter(|t| !t.is_empty()) {
            query.append_pair("topic", topic);
        }
    }
    Ok(url)
}

fn endpoint(bridge_url: &str, segment: &str) -> Result<Url> {
    let invalid = |reason: String| Error::InvalidUrl { url: bridge_url.to_string(), reason };
    let mut url = Url::parse(bridge_url).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", url.scheme())));
    }
    url.path_segments_mut()
        .map_err(|_| invalid("cannot be a base".into()))?
        .pop_if_empty()
        .push(segment);
    Ok(url)
}
