//! Outbound delivery: one POST per message to the bridge `/message` endpoint.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{message_url, BridgeClient};
use crate::config::MessageOptions;
use crate::envelope;
use crate::error::{Error, Result};
use crate::session::Session;

/// Error body returned by the ton-connect bridge on rejected messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BridgeErrorResponse {
    pub message: String,
    #[serde(rename = "statusCode", default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

const MAX_ERROR_BODY: usize = 256;

impl BridgeClient {
    /// Seal `payload` for the session's peer and post it to the peer's bridge.
    pub async fn send<T: Serialize + ?Sized>(
        &self,
        session: &Session,
        payload: &T,
        options: &MessageOptions,
    ) -> Result<()> {
        let peer = session.peer().ok_or(Error::NotConnected)?;
        let url = message_url(&peer.bridge_url, session.id(), &peer.id, options)?;
        let body = BASE64.encode(envelope::seal(payload, &peer.id, session.keys())?);

        let response = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "text/plain")
            .body(body)
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(delivery_error(status.as_u16(), &text));
        }
        debug!(bridge = %peer.bridge_url, topic = ?options.topic, "Message delivered to bridge");
        Ok(())
    }
}

fn delivery_error(status: u16, body: &str) -> Error {
    let message = match serde_json::from_str::<BridgeErrorResponse>(body) {
        Ok(parsed) => parsed.message,
        Err(_) => {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "empty response".to_string()
            } else {
                trimmed.chars().take(MAX_ERROR_BODY).collect()
            }
        }
    };
    Error::Delivery { status, message }
}
