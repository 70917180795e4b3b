//! tonconnect: dApp-side client for the TON Connect bridge protocol.
//!
//! # Architecture
//!
//! ```text
//! Connector (entry point)
//!   │
//!   ├── Storage (caller supplied: get / set)
//!   │
//!   ├── Session (shared, Arc)
//!   │     ├── KeyPair ─────────→ client id = Curve25519 public key
//!   │     ├── Peer ────────────→ wallet id + bridge URL (sticky)
//!   │     └── cursors ─────────→ last_event_id, last_request_id
//!   │
//!   └── BridgeClient (owned reqwest::Client)
//!         ├── subscribe ───────→ GET  /events  (SSE, resumable)
//!         └── send ────────────→ POST /message (base64 NaCl box)
//! ```
//!
//! # Operations
//!
//! | Operation | Method | Persists |
//! |-----------|--------|----------|
//! | acquire | `Connector::acquire(storage, config)` | on create |
//! | connect | `connector.connect(&wallets, &cancel)` | winner only |
//! | send transaction | `connector.send_transaction(&tx, &opts, &cancel)` | yes |
//! | sign data | `connector.sign_data(&data, &opts, &cancel)` | yes |
//! | disconnect | `connector.disconnect(&opts, &cancel)` | yes |
//!
//! # Usage
//!
//! ```ignore
//! use tonconnect::{Connector, ConnectorConfig, MemoryStorage, MessageOptions, Wallet};
//! use tokio_util::sync::CancellationToken;
//!
//! let connector = Connector::acquire(MemoryStorage::new(), ConnectorConfig::default()).await?;
//! let cancel = CancellationToken::new();
//!
//! let wallets = [Wallet::new("tonkeeper", "https://bridge.tonapi.io/bridge")];
//! let connected = connector.connect(&wallets, &cancel).await?;
//!
//! let boc = connector.send_transaction(&tx, &MessageOptions::default(), &cancel).await?;
//! ```

pub mod bridge;
pub mod config;
pub mod connector;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod runtime;
pub mod session;

pub use bridge::{BridgeClient, BridgeMessage, EventSubscription, Inbound};
pub use config::{BridgeConfig, ConnectorConfig, MessageOptions, DEFAULT_TTL};
pub use connector::{Connector, MemoryStorage, Storage};
#[cfg(feature = "file-store")]
pub use connector::FileStorage;
pub use error::{Error, Result};
pub use protocol::{ConnectResponse, Wallet, WalletMessage, WalletRequest};
pub use runtime::install_signal_handlers;
pub use session::{ClientId, EventCursor, KeyPair, Peer, Session, SessionRecord};
