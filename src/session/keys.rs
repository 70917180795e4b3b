//! Session key pair (Curve25519) and hex client ids.
//!
//! The public half of the key pair is the session's client id on the bridge;
//! wallets are addressed by theirs. Both travel as 64-char lowercase hex.

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::error::{Error, Result};

pub const KEY_LENGTH: usize = 32;

/// Bridge client id: a 32-byte Curve25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId([u8; KEY_LENGTH]);

impl ClientId {
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(value: &str) -> Result<Self> {
        let bytes = hex::decode(value.trim()).map_err(|e| Error::InvalidKey(format!("hex: {e}")))?;
        key_from_slice(&bytes).map(Self)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.to_hex())
    }
}

impl FromStr for ClientId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for ClientId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ClientId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

/// Own key pair. The secret zeroizes on drop and is redacted from `Debug`.
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: ClientId,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS RNG.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; KEY_LENGTH];
        OsRng.try_fill_bytes(&mut bytes).map_err(Error::KeyGeneration)?;
        let pair = Self::from_secret_bytes(bytes);
        bytes.zeroize();
        Ok(pair)
    }

    pub fn from_secret_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = ClientId(*PublicKey::from(&secret).as_bytes());
        Self { secret, public }
    }

    /// Restore from a persisted secret, checking it matches the stored id.
    pub fn restore(secret_hex: &str, expected: &ClientId) -> Result<Self> {
        let mut bytes = hex::decode(secret_hex.trim()).map_err(|_| Error::InvalidKey("private key is not hex".into()))?;
        let key = key_from_slice(&bytes);
        bytes.zeroize();
        let pair = Self::from_secret_bytes(key?);
        if &pair.public != expected {
            return Err(Error::InvalidKey("private key does not match session id".into()));
        }
        Ok(pair)
    }

    pub fn public(&self) -> &ClientId {
        &self.public
    }

    /// Raw secret bytes for the sealing layer. Never log these.
    pub(crate) fn secret_bytes(&self) -> [u8; KEY_LENGTH] {
        self.secret.to_bytes()
    }

    pub(crate) fn secret_hex(&self) -> String {
        let mut bytes = self.secret.to_bytes();
        let encoded = hex::encode(bytes);
        bytes.zeroize();
        encoded
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("secret", &"<redacted>")
            .finish()
    }
}

fn key_from_slice(bytes: &[u8]) -> Result<[u8; KEY_LENGTH]> {
    bytes.try_into().map_err(|_| {
        Error::InvalidKey(format!("expected {KEY_LENGTH} bytes, got {}", bytes.len()))
    })
}
