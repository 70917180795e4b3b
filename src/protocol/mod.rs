//! Protocol - wallet exchanges over the bridge
//!
//! | Exchange | Bridge traffic | Session mutation |
//! |----------|----------------|------------------|
//! | `connect` | listen on wallet bridge until `connect` / `connect_error` | binds peer, bridge URL + that bridge's cursor |
//! | `request` | listen on peer bridge, POST request, wait for matching `id` | bumps request id |
//! | `send_transaction` | `request("sendTransaction", [tx])` | bumps request id |
//! | `sign_data` | `request("signData", [data])` | bumps request id |
//! | `disconnect` | POST `disconnect`, no reply expected | clears peer |
//!
//! Every exchange reads the event stream inline (no spawned task), so
//! dropping the future or firing `cancel` closes the HTTP stream.

mod messages;

pub use messages::{
    events, methods, ConnectResponse, Wallet, WalletError, WalletMessage, WalletRequest,
};

use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bridge::{BridgeClient, Inbound};
use crate::config::MessageOptions;
use crate::error::{Error, Result};
use crate::session::{EventCursor, Session};

impl Session {
    /// Wait on `wallet`'s bridge for the wallet's `connect` event and bind it
    /// as this session's peer.
    pub async fn connect(
        &self,
        client: &BridgeClient,
        wallet: &Wallet,
        cancel: &CancellationToken,
    ) -> Result<ConnectResponse> {
        // The candidate bridge gets its own cursor; it only becomes the
        // session's if this handshake is the one that binds.
        let prior = self.peer();
        let cursor = EventCursor::new(self.last_event_id());
        let (tx, mut rx) = mpsc::channel::<Inbound<WalletMessage>>(client.config().channel_capacity);
        let stream = client.subscribe_at(self, &wallet.bridge_url, &cursor, cancel, &tx);

        pump(stream, &mut rx, |inbound| {
            let message = &inbound.payload;
            if message.is_event(events::CONNECT) {
                let url = wallet.bridge_url.clone();
                if let Err(e) = self.complete_connect(prior.as_ref(), inbound.from, url, cursor.get()) {
                    return Some(Err(e));
                }
                info!(wallet = %wallet.name, peer = %inbound.from, "Wallet connected");
                return Some(Ok(ConnectResponse::from_event(wallet, inbound.from, message)));
            }
            if message.is_event(events::CONNECT_ERROR) {
                let err = message.wallet_error().unwrap_or_default();
                return Some(Err(Error::Wallet { code: err.code, message: err.message }));
            }
            debug!(wallet = %wallet.name, event = ?message.event, "Ignoring message before connect");
            None
        })
        .await
    }

    /// Send a request to the bound wallet and wait for the reply with the
    /// same id. The reply's `result` is returned as-is.
    pub async fn request(
        &self,
        client: &BridgeClient,
        method: &str,
        params: Vec<String>,
        options: &MessageOptions,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let bridge_url = self.bridge_url().ok_or(Error::NotConnected)?;
        let id = self.next_request_id();
        let request = WalletRequest::new(method, params, id);
        let options = options.clone().or_topic(method);

        let (tx, mut rx) = mpsc::channel::<Inbound<WalletMessage>>(client.config().channel_capacity);
        let stream = client.subscribe(self, &bridge_url, cancel, &tx);

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            sent = client.send(self, &request, &options) => sent?,
        }
        debug!(method, request_id = id, "Request sent, awaiting wallet reply");

        pump(stream, &mut rx, |inbound| {
            let message = inbound.payload;
            if message.is_event(events::DISCONNECT) {
                return Some(Err(Error::WalletDisconnected));
            }
            if message.id_u64() != Some(id) {
                debug!(request_id = id, got = ?message.id, "Skipping unrelated wallet message");
                return None;
            }
            if let Some(err) = message.wallet_error() {
                return Some(Err(Error::Wallet { code: err.code, message: err.message }));
            }
            Some(Ok(message.result.unwrap_or(Value::Null)))
        })
        .await
    }

    pub async fn send_transaction<T: Serialize + ?Sized>(
        &self,
        client: &BridgeClient,
        transaction: &T,
        options: &MessageOptions,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let params = vec![serde_json::to_string(transaction)?];
        self.request(client, methods::SEND_TRANSACTION, params, options, cancel).await
    }

    pub async fn sign_data<T: Serialize + ?Sized>(
        &self,
        client: &BridgeClient,
        data: &T,
        options: &MessageOptions,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let params = vec![serde_json::to_string(data)?];
        self.request(client, methods::SIGN_DATA, params, options, cancel).await
    }

    /// Tell the wallet we are leaving and drop the pairing. Wallets do not
    /// reply to `disconnect`, so nothing is awaited past delivery.
    pub async fn disconnect(
        &self,
        client: &BridgeClient,
        options: &MessageOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let request = WalletRequest::new(methods::DISCONNECT, Vec::new(), self.next_request_id());
        let options = options.clone().or_topic(methods::DISCONNECT);
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            sent = client.send(self, &request, &options) => sent?,
        }
        if let Some(peer) = self.clear_peer() {
            info!(peer = %peer.id, "Disconnected from wallet");
        }
        Ok(())
    }
}

/// Drive an event stream, handing each delivered message to `handle` until
/// it produces an outcome. Messages queued when the stream ends are still
/// handled before the stream's own result is reported.
async fn pump<R>(
    stream: impl Future<Output = Result<()>>,
    rx: &mut mpsc::Receiver<Inbound<WalletMessage>>,
    mut handle: impl FnMut(Inbound<WalletMessage>) -> Option<Result<R>>,
) -> Result<R> {
    tokio::pin!(stream);
    let ended = loop {
        tokio::select! {
            biased;
            Some(inbound) = rx.recv() => {
                if let Some(outcome) = handle(inbound) {
                    return outcome;
                }
            }
            ended = &mut stream => break ended,
        }
    };
    while let Ok(inbound) = rx.try_recv() {
        if let Some(outcome) = handle(inbound) {
            return outcome;
        }
    }
    ended?;
    Err(Error::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_requires_peer() {
        let client = BridgeClient::new(Default::default()).unwrap();
        let session = Session::new().unwrap();
        let cancel = CancellationToken::new();
        let err = session
            .sign_data(&client, &serde_json::json!({"text": "hi"}), &MessageOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert_eq!(session.last_request_id(), 1);

        let err = session.disconnect(&client, &MessageOptions::default(), &cancel).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_connect_cancelled_before_stream_opens() {
        let client = BridgeClient::new(Default::default()).unwrap();
        let session = Session::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let wallet = Wallet::new("nowhere", "http://127.0.0.1:9");
        let err = session.connect(&client, &wallet, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(!session.is_connected());
    }
}
