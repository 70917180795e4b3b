//! Wallet message shapes. Payload bodies stay as `serde_json::Value`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::ClientId;

/// Wallet event names.
pub mod events {
    pub const CONNECT: &str = "connect";
    pub const CONNECT_ERROR: &str = "connect_error";
    pub const DISCONNECT: &str = "disconnect";
}

/// dApp → wallet RPC method names (also used as bridge topics).
pub mod methods {
    pub const SEND_TRANSACTION: &str = "sendTransaction";
    pub const SIGN_DATA: &str = "signData";
    pub const DISCONNECT: &str = "disconnect";
}

/// Anything a wallet sends back: an event (`connect`, `disconnect`, ...) or a
/// reply to a request (`id` + `result`/`error`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WalletMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WalletError>,
}

impl WalletMessage {
    pub fn is_event(&self, name: &str) -> bool {
        self.event.as_deref() == Some(name)
    }

    /// Wallets send ids as numbers or decimal strings.
    pub fn id_u64(&self) -> Option<u64> {
        match self.id.as_ref()? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Error carried either in `error` (replies) or `payload` (`connect_error`).
    pub fn wallet_error(&self) -> Option<WalletError> {
        if let Some(err) = &self.error {
            return Some(err.clone());
        }
        if self.is_event(events::CONNECT_ERROR) {
            return Some(
                self.payload
                    .clone()
                    .and_then(|p| serde_json::from_value(p).ok())
                    .unwrap_or_default(),
            );
        }
        None
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// dApp → wallet request. `params` are JSON strings, `id` a decimal string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletRequest {
    pub method: String,
    pub params: Vec<String>,
    pub id: String,
}

impl WalletRequest {
    pub fn new(method: impl Into<String>, params: Vec<String>, id: u64) -> Self {
        Self { method: method.into(), params, id: id.to_string() }
    }
}

/// Connect candidate: a wallet app and the bridge it listens on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Wallet {
    pub name: String,
    pub bridge_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub universal_url: Option<String>,
}

impl Wallet {
    pub fn new(name: impl Into<String>, bridge_url: impl Into<String>) -> Self {
        Self { name: name.into(), bridge_url: bridge_url.into(), universal_url: None }
    }

    pub fn with_universal_url(mut self, url: impl Into<String>) -> Self {
        self.universal_url = Some(url.into());
        self
    }
}

/// Result of a successful connect handshake.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConnectResponse {
    pub wallet: String,
    pub peer: ClientId,
    pub bridge_url: String,
    pub device: Option<Value>,
    pub items: Vec<Value>,
}

impl ConnectResponse {
    pub(crate) fn from_event(wallet: &Wallet, peer: ClientId, message: &WalletMessage) -> Self {
        let payload = message.payload.as_ref();
        Self {
            wallet: wallet.name.clone(),
            peer,
            bridge_url: wallet.bridge_url.clone(),
            device: payload.and_then(|p| p.get("device")).cloned(),
            items: payload
                .and_then(|p| p.get("items"))
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default(),
        }
    }
}
