//! Resumable SSE subscription to the bridge `/events` feed.
//!
//! Cursor rules: every `message` frame's id is parsed and applied to the
//! stream's cursor *before* the body is looked at, so a reconnect never
//! replays a frame the stream already consumed even if that frame was
//! garbage. A cursor belongs to one bridge; the session's own cursor is only
//! handed to subscriptions on its peer bridge.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::StreamExt;
use reqwest::{header::ACCEPT, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{events_url, BridgeClient, BridgeMessage};
use crate::envelope;
use crate::error::{Error, Result};
use crate::session::{ClientId, EventCursor, Session};

/// A decrypted message delivered by the event stream.
#[derive(Debug, Clone)]
pub struct Inbound<T> {
    pub bridge_url: String,
    pub event_id: u64,
    pub from: ClientId,
    pub payload: T,
}

impl BridgeClient {
    /// Run one subscription until `cancel` fires or the receiver goes away.
    ///
    /// Returns `Ok(())` on cancellation. 503 from the bridge is
    /// [`Error::BridgeUnavailable`]; a frame with a non-numeric id is
    /// [`Error::ProtocolViolation`]. Undecryptable or foreign frames are
    /// dropped and the subscription continues.
    pub async fn subscribe<T: DeserializeOwned>(
        &self,
        session: &Session,
        bridge_url: &str,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<Inbound<T>>,
    ) -> Result<()> {
        self.subscribe_at(session, bridge_url, session.event_cursor(), cancel, tx).await
    }

    /// Like [`subscribe`](Self::subscribe), but resumes from and advances
    /// `cursor` instead of the session's own. Used when the bridge is not
    /// (yet) the session's peer bridge, e.g. one candidate in a connect race.
    pub async fn subscribe_at<T: DeserializeOwned>(
        &self,
        session: &Session,
        bridge_url: &str,
        cursor: &EventCursor,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<Inbound<T>>,
    ) -> Result<()> {
        let url = events_url(bridge_url, session.id(), cursor.get())?;
        debug!(bridge = %bridge_url, cursor = cursor.get(), "Opening event stream");

        let request = self.http.get(url).header(ACCEPT, "text/event-stream").send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            response = request => response.map_err(Error::Connect)?,
        };

        let status = response.status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(Error::BridgeUnavailable);
        }
        if !status.is_success() {
            return Err(Error::ConnectStatus { status: status.as_u16() });
        }
        info!(bridge = %bridge_url, "Event stream connected");

        let mut frames = response.bytes_stream().eventsource();
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                frame = frames.next() => frame,
            };
            let event = match frame {
                Some(Ok(event)) => event,
                Some(Err(EventStreamError::Transport(e))) => return Err(Error::Transport(e)),
                Some(Err(e)) => return Err(Error::ProtocolViolation(format!("malformed SSE stream: {e}"))),
                None => return Err(Error::StreamClosed),
            };
            if !(event.event.is_empty() || event.event == "message") {
                continue;
            }

            let event_id: u64 = event.id.trim().parse().map_err(|_| {
                Error::ProtocolViolation(format!("non-numeric event id {:?}", event.id))
            })?;
            cursor.advance(event_id);

            let (from, payload) = match decode_event::<T>(session, &event.data) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!(bridge = %bridge_url, event_id, error = %e, "Dropping bridge event");
                    continue;
                }
            };

            let inbound = Inbound { bridge_url: bridge_url.to_string(), event_id, from, payload };
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                sent = tx.send(inbound) => {
                    if sent.is_err() {
                        debug!(bridge = %bridge_url, "Event receiver dropped, closing stream");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Spawn [`subscribe`](Self::subscribe) on the runtime and hand back a
    /// receiving handle.
    pub fn listen<T>(&self, session: Arc<Session>, bridge_url: impl Into<String>) -> EventSubscription<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let cancel = CancellationToken::new();
        let client = self.clone();
        let token = cancel.clone();
        let bridge_url = bridge_url.into();
        let task = tokio::spawn(async move { client.subscribe(&session, &bridge_url, &token, &tx).await });
        EventSubscription { rx, cancel, task: Some(task) }
    }
}

/// Envelope → sender check → decrypt → decode.
fn decode_event<T: DeserializeOwned>(session: &Session, data: &str) -> Result<(ClientId, T)> {
    let envelope: BridgeMessage = serde_json::from_str(data)?;
    let from = ClientId::from_hex(&envelope.from)?;
    session.check_sender(&from)?;
    let ciphertext = BASE64
        .decode(envelope.message.trim())
        .map_err(|e| Error::ProtocolViolation(format!("message is not base64: {e}")))?;
    let payload = envelope::open(&ciphertext, &from, session.keys())?;
    Ok((from, payload))
}

/// Running subscription. Dropping it cancels the stream.
pub struct EventSubscription<T> {
    rx: mpsc::Receiver<Inbound<T>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<()>>>,
}

impl<T> EventSubscription<T> {
    /// Next delivered message; `None` once the stream has stopped.
    pub async fn recv(&mut self) -> Option<Inbound<T>> {
        self.rx.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the stream task and return how it ended.
    pub async fn join(mut self) -> Result<()> {
        let Some(task) = self.task.take() else { return Ok(()) };
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(Error::Cancelled),
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }
}

impl<T> Drop for EventSubscription<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::KeyPair;
    use serde_json::{json, Value};

    fn sealed_event(from: &KeyPair, to: &ClientId, payload: &Value) -> String {
        let sealed = envelope::seal(payload, to, from).unwrap();
        serde_json::to_string(&BridgeMessage { from: from.public().to_hex(), message: BASE64.encode(sealed) }).unwrap()
    }

    #[test]
    fn test_decode_event_roundtrip() {
        let session = Session::new().unwrap();
        let wallet = KeyPair::generate().unwrap();
        let data = sealed_event(&wallet, session.id(), &json!({"event": "connect"}));
        let (from, payload): (ClientId, Value) = decode_event(&session, &data).unwrap();
        assert_eq!(&from, wallet.public());
        assert_eq!(payload["event"], "connect");
    }

    #[test]
    fn test_decode_event_rejects_foreign_sender() {
        let session = Session::new().unwrap();
        let wallet = KeyPair::generate().unwrap();
        let other = KeyPair::generate().unwrap();
        session.bind_peer(*wallet.public(), "https://bridge").unwrap();

        let data = sealed_event(&other, session.id(), &json!({"id": 1}));
        let err = decode_event::<Value>(&session, &data).unwrap_err();
        assert!(matches!(err, Error::PeerMismatch { .. }));
    }

    #[test]
    fn test_decode_event_bad_envelope() {
        let session = Session::new().unwrap();
        assert!(matches!(decode_event::<Value>(&session, "{}"), Err(Error::Serialization(_))));
        let data = json!({"from": "00", "message": ""}).to_string();
        assert!(matches!(decode_event::<Value>(&session, &data), Err(Error::InvalidKey(_))));
    }
}
