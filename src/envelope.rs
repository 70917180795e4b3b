//! Envelope codec: JSON payload sealed in a NaCl box.
//!
//! Wire layout is `nonce (24) || box (16-byte MAC + ciphertext)`, the same as
//! libsodium's `crypto_box_easy` with the nonce prepended, which is what
//! wallets on the other side of the bridge expect.

use crypto_box::aead::Aead;
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use rand::{rngs::OsRng, RngCore};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};
use crate::session::{ClientId, KeyPair};

pub const NONCE_LENGTH: usize = 24;
pub const MAC_LENGTH: usize = 16;

/// Serialize and encrypt `payload` for `peer`, authenticated as `own`.
pub fn seal<T: Serialize + ?Sized>(payload: &T, peer: &ClientId, own: &KeyPair) -> Result<Vec<u8>> {
    let plaintext = serde_json::to_vec(payload)?;
    seal_bytes(&plaintext, peer, own)
}

/// Decrypt a box from `peer` and decode it as `T`.
///
/// Authentication failures and decode failures are distinct errors:
/// [`Error::Authentication`] vs [`Error::Serialization`].
pub fn open<T: DeserializeOwned>(ciphertext: &[u8], peer: &ClientId, own: &KeyPair) -> Result<T> {
    let plaintext = open_bytes(ciphertext, peer, own)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

pub fn seal_bytes(plaintext: &[u8], peer: &ClientId, own: &KeyPair) -> Result<Vec<u8>> {
    let mut nonce_bytes = [0u8; NONCE_LENGTH];
    OsRng
        .try_fill_bytes(&mut nonce_bytes)
        .map_err(|e| Error::Crypto(format!("nonce: {e}")))?;
    let nonce = crypto_box::aead::Nonce::<SalsaBox>::from_slice(&nonce_bytes);

    let sealed = salsa_box(peer, own)
        .encrypt(nonce, plaintext)
        .map_err(|_| Error::Crypto("seal failed".into()))?;

    let mut out = Vec::with_capacity(NONCE_LENGTH + sealed.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&sealed);
    Ok(out)
}

pub fn open_bytes(ciphertext: &[u8], peer: &ClientId, own: &KeyPair) -> Result<Vec<u8>> {
    if ciphertext.len() < NONCE_LENGTH + MAC_LENGTH {
        return Err(Error::Authentication);
    }
    let (nonce_bytes, sealed) = ciphertext.split_at(NONCE_LENGTH);
    let nonce = crypto_box::aead::Nonce::<SalsaBox>::from_slice(nonce_bytes);
    salsa_box(peer, own)
        .decrypt(nonce, sealed)
        .map_err(|_| Error::Authentication)
}

fn salsa_box(peer: &ClientId, own: &KeyPair) -> SalsaBox {
    let public = PublicKey::from(*peer.as_bytes());
    let secret = SecretKey::from(own.secret_bytes());
    SalsaBox::new(&public, &secret)
}
