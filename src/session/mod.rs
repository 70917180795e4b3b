//! Session - one dApp identity and its connection state to a single wallet.
//!
//! ```text
//! Session
//!   ├── keys ─────────────→ own Curve25519 pair (id = public half)
//!   ├── peer ─────────────→ wallet id + bridge URL (sticky once bound)
//!   ├── last_event_id ────→ SSE resumption cursor (fetch_max only)
//!   └── last_request_id ──→ next outbound request id
//! ```
//!
//! A `Session` is shared between the event stream consumer and senders, so
//! all mutation goes through `&self`: the counters are atomics and the peer
//! binding sits behind a short-lived `RwLock`.

mod keys;

pub use keys::{ClientId, KeyPair, KEY_LENGTH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};

/// Wallet the session is paired with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: ClientId,
    pub bridge_url: String,
}

pub struct Session {
    keys: KeyPair,
    peer: RwLock<Option<Peer>>,
    last_event_id: EventCursor,
    last_request_id: AtomicU64,
}

impl Session {
    /// Fresh key pair, no peer, both counters at 1.
    pub fn new() -> Result<Self> {
        Ok(Self::from_keys(KeyPair::generate()?))
    }

    pub fn from_keys(keys: KeyPair) -> Self {
        Self {
            keys,
            peer: RwLock::new(None),
            last_event_id: EventCursor::new(1),
            last_request_id: AtomicU64::new(1),
        }
    }

    pub fn id(&self) -> &ClientId {
        self.keys.public()
    }

    pub(crate) fn keys(&self) -> &KeyPair {
        &self.keys
    }

    pub fn peer(&self) -> Option<Peer> {
        self.read_peer().clone()
    }

    pub fn peer_id(&self) -> Option<ClientId> {
        self.read_peer().as_ref().map(|p| p.id)
    }

    pub fn bridge_url(&self) -> Option<String> {
        self.read_peer().as_ref().map(|p| p.bridge_url.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.read_peer().is_some()
    }

    /// Bind the wallet peer. Check-then-set happens under one write lock, so
    /// two racing handshakes cannot both bind.
    pub fn bind_peer(&self, id: ClientId, bridge_url: impl Into<String>) -> Result<()> {
        bind_locked(&mut self.write_peer(), id, bridge_url.into())
    }

    /// Finish a connect handshake: bind the peer and adopt the cursor of the
    /// bridge it connected on, both under the peer lock.
    ///
    /// `prior` is the binding seen when the handshake started. If another
    /// handshake has changed it since, this one lost and nothing is applied.
    pub fn complete_connect(
        &self,
        prior: Option<&Peer>,
        id: ClientId,
        bridge_url: impl Into<String>,
        cursor: u64,
    ) -> Result<()> {
        let mut guard = self.write_peer();
        if guard.as_ref() != prior {
            return Err(Error::ConnectSuperseded);
        }
        bind_locked(&mut guard, id, bridge_url.into())?;
        self.last_event_id.advance(cursor);
        Ok(())
    }

    /// Reject senders other than the bound peer. Unbound sessions accept anyone.
    pub fn check_sender(&self, from: &ClientId) -> Result<()> {
        match self.read_peer().as_ref() {
            Some(peer) if &peer.id != from => Err(Error::PeerMismatch { expected: peer.id, got: *from }),
            _ => Ok(()),
        }
    }

    /// Drop the pairing after a disconnect.
    pub(crate) fn clear_peer(&self) -> Option<Peer> {
        self.write_peer().take()
    }

    pub fn last_event_id(&self) -> u64 {
        self.last_event_id.get()
    }

    /// Advance the stream cursor. Never moves backwards.
    pub fn advance_event_id(&self, id: u64) -> u64 {
        self.last_event_id.advance(id)
    }

    /// The session's own stream cursor, for subscriptions on the peer bridge.
    pub fn event_cursor(&self) -> &EventCursor {
        &self.last_event_id
    }

    pub fn last_request_id(&self) -> u64 {
        self.last_request_id.load(Ordering::Acquire)
    }

    /// Take the current request id and move the counter past it.
    pub fn next_request_id(&self) -> u64 {
        self.last_request_id.fetch_add(1, Ordering::AcqRel)
    }

    /// Point-in-time persisted form (includes the private key).
    pub fn to_record(&self) -> SessionRecord {
        let peer = self.peer();
        SessionRecord {
            id: *self.id(),
            private_key: self.keys.secret_hex(),
            peer_id: peer.as_ref().map(|p| p.id),
            bridge_url: peer.map(|p| p.bridge_url),
            last_event_id: self.last_event_id(),
            last_request_id: self.last_request_id(),
        }
    }

    pub fn from_record(record: SessionRecord) -> Result<Self> {
        let keys = KeyPair::restore(&record.private_key, &record.id)?;
        let peer = match (record.peer_id, record.bridge_url) {
            (Some(id), Some(bridge_url)) => Some(Peer { id, bridge_url }),
            (None, None) => None,
            _ => return Err(Error::InvalidKey("peer id and bridge URL must be stored together".into())),
        };
        Ok(Self {
            keys,
            peer: RwLock::new(peer),
            last_event_id: EventCursor::new(record.last_event_id),
            last_request_id: AtomicU64::new(record.last_request_id),
        })
    }

    // Poisoning only means a panic elsewhere; the Option<Peer> is still whole.
    fn read_peer(&self) -> RwLockReadGuard<'_, Option<Peer>> {
        self.peer.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_peer(&self) -> RwLockWriteGuard<'_, Option<Peer>> {
        self.peer.write().unwrap_or_else(|p| p.into_inner())
    }
}

fn bind_locked(slot: &mut Option<Peer>, id: ClientId, bridge_url: String) -> Result<()> {
    match slot.as_mut() {
        Some(peer) if peer.id != id => Err(Error::PeerMismatch { expected: peer.id, got: id }),
        Some(peer) => {
            peer.bridge_url = bridge_url;
            Ok(())
        }
        None => {
            *slot = Some(Peer { id, bridge_url });
            Ok(())
        }
    }
}

/// Last-seen SSE event id on one bridge. Only ever moves forward.
#[derive(Debug, Default)]
pub struct EventCursor(AtomicU64);

impl EventCursor {
    pub fn new(start: u64) -> Self {
        Self(AtomicU64::new(start))
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Move to `id` if it is ahead; returns the resulting position.
    pub fn advance(&self, id: u64) -> u64 {
        self.0.fetch_max(id, Ordering::AcqRel).max(id)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", self.id())
            .field("peer", &self.peer())
            .field("last_event_id", &self.last_event_id())
            .field("last_request_id", &self.last_request_id())
            .finish_non_exhaustive()
    }
}

/// Storage form of a [`Session`]. Counters are decimal strings.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: ClientId,
    pub private_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge_url: Option<String>,
    #[serde(with = "u64_string")]
    pub last_event_id: u64,
    #[serde(with = "u64_string")]
    pub last_request_id: u64,
}

impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("id", &self.id)
            .field("private_key", &"<redacted>")
            .field("peer_id", &self.peer_id)
            .field("bridge_url", &self.bridge_url)
            .field("last_event_id", &self.last_event_id)
            .field("last_request_id", &self.last_request_id)
            .finish()
    }
}

impl Serialize for Session {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_record().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Session {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let record = SessionRecord::deserialize(deserializer)?;
        Session::from_record(record).map_err(serde::de::Error::custom)
    }
}

mod u64_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Raw::Number(n) => Ok(n),
        }
    }
}
