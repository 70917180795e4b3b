//! Error taxonomy for the bridge client.
//!
//! Every fallible operation in the crate returns [`Error`]. Storage backends
//! report `anyhow::Error`, which is wrapped in [`Error::Persistence`].

use thiserror::Error;

use crate::session::ClientId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to generate key pair: {0}")]
    KeyGeneration(#[source] rand::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid bridge URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("bridge transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("failed to connect to bridge: {0}")]
    Connect(#[source] reqwest::Error),

    #[error("failed to connect to bridge: unexpected status {status}")]
    ConnectStatus { status: u16 },

    #[error("bridge temporarily unavailable")]
    BridgeUnavailable,

    #[error("bridge closed the event stream")]
    StreamClosed,

    #[error("bridge protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("encryption failed: {0}")]
    Crypto(String),

    #[error("message authentication failed")]
    Authentication,

    #[error("message sender {got} does not match session peer {expected}")]
    PeerMismatch { expected: ClientId, got: ClientId },

    #[error("another connect attempt bound the session first")]
    ConnectSuperseded,

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("session not connected to a wallet")]
    NotConnected,

    #[error("bridge rejected message (status {status}): {message}")]
    Delivery { status: u16, message: String },

    #[error("wallet error {code}: {message}")]
    Wallet { code: i64, message: String },

    #[error("wallet disconnected")]
    WalletDisconnected,

    #[error("timed out waiting for wallet response")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("session storage failed during {operation}: {source}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("too many connect candidates: {got} (max {max})")]
    TooManyCandidates { got: usize, max: usize },

    #[error("all connect attempts failed ({} candidates)", failures.len())]
    AggregateConnect { failures: Vec<(String, Error)> },
}

impl Error {
    /// Transient conditions a caller may retry with its own backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::Connect(_)
                | Error::BridgeUnavailable
                | Error::StreamClosed
                | Error::Timeout
        )
    }
}
