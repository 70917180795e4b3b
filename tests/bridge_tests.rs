//! Bridge Transport Tests
//!
//! Runs the event stream and the sender against a simulated relay (wiremock).
//!
//! ## Test Categories
//!
//! 1. **Sender** - query string, TTL default, sealed base64 body, relay errors
//! 2. **Event stream** - cursor resumption, ordering, drop-on-malformed
//! 3. **Peer binding** - foreign senders never reach the consumer
//! 4. **Termination** - 503, protocol violations, cancellation

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonconnect::{envelope, BridgeClient, BridgeConfig, BridgeMessage, Error, Inbound, KeyPair, MessageOptions, Session};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client() -> BridgeClient {
    BridgeClient::new(BridgeConfig::default()).expect("client")
}

/// One SSE `message` frame carrying a sealed envelope from `wallet` to `session`.
fn sealed_frame(id: &str, wallet: &KeyPair, session: &Session, payload: &Value) -> String {
    let sealed = envelope::seal(payload, session.id(), wallet).expect("seal");
    let data = serde_json::to_string(&BridgeMessage {
        from: wallet.public().to_hex(),
        message: BASE64.encode(sealed),
    })
    .expect("envelope json");
    raw_frame(id, &data)
}

fn raw_frame(id: &str, data: &str) -> String {
    format!("id: {id}\nevent: message\ndata: {data}\n\n")
}

fn sse(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

/// Run one subscription to completion and collect what it delivered.
async fn drain(
    client: &BridgeClient,
    session: &Session,
    bridge: &str,
) -> (Result<(), Error>, Vec<Inbound<Value>>) {
    let (tx, mut rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let result = client.subscribe(session, bridge, &cancel, &tx).await;
    drop(tx);
    let mut delivered = Vec::new();
    while let Some(inbound) = rx.recv().await {
        delivered.push(inbound);
    }
    (result, delivered)
}

// ============================================================================
// 1. SENDER
// ============================================================================

mod sender_tests {
    use super::*;

    #[tokio::test]
    async fn send_ping_with_default_ttl() {
        let server = MockServer::start().await;
        let session = Session::new().expect("session");
        let wallet = KeyPair::generate().expect("wallet");
        session.bind_peer(*wallet.public(), server.uri()).expect("bind");

        Mock::given(method("POST"))
            .and(path("/message"))
            .and(query_param("client_id", session.id().to_hex()))
            .and(query_param("to", wallet.public().to_hex()))
            .and(query_param("ttl", "300"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client()
            .send(&session, &json!({"op": "ping"}), &MessageOptions::default())
            .await
            .expect("send");

        let requests = server.received_requests().await.expect("recording");
        assert_eq!(requests.len(), 1);
        let body = String::from_utf8(requests[0].body.clone()).expect("utf8");
        assert!(!body.is_empty());
        let sealed = BASE64.decode(body.trim()).expect("base64 body");
        let opened: Value = envelope::open(&sealed, session.id(), &wallet).expect("open");
        assert_eq!(opened, json!({"op": "ping"}));
    }

    #[tokio::test]
    async fn send_passes_topic_and_custom_ttl() {
        let server = MockServer::start().await;
        let session = Session::new().expect("session");
        let wallet = KeyPair::generate().expect("wallet");
        session.bind_peer(*wallet.public(), format!("{}/bridge", server.uri())).expect("bind");

        Mock::given(method("POST"))
            .and(path("/bridge/message"))
            .and(query_param("ttl", "60"))
            .and(query_param("topic", "signData"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let options = MessageOptions::default().with_ttl(60).with_topic("signData");
        client().send(&session, &json!({"x": 1}), &options).await.expect("send");
    }

    #[tokio::test]
    async fn send_reports_relay_error_message() {
        let server = MockServer::start().await;
        let session = Session::new().expect("session");
        let wallet = KeyPair::generate().expect("wallet");
        session.bind_peer(*wallet.public(), server.uri()).expect("bind");

        Mock::given(method("POST"))
            .and(path("/message"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"message": "ttl too large", "statusCode": 400})),
            )
            .mount(&server)
            .await;

        let err = client()
            .send(&session, &json!({"op": "ping"}), &MessageOptions::default())
            .await
            .unwrap_err();
        match err {
            Error::Delivery { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "ttl too large");
            }
            other => panic!("expected delivery error, got {other:?}"),
        }
    }
}

// ============================================================================
// 2. EVENT STREAM
// ============================================================================

mod stream_tests {
    use super::*;

    #[tokio::test]
    async fn cursor_follows_gapped_ids_and_order_is_kept() {
        let server = MockServer::start().await;
        let session = Session::new().expect("session");
        let wallet = KeyPair::generate().expect("wallet");

        let body = [
            sealed_frame("5", &wallet, &session, &json!({"n": 5})),
            sealed_frame("7", &wallet, &session, &json!({"n": 7})),
            sealed_frame("8", &wallet, &session, &json!({"n": 8})),
        ]
        .concat();

        Mock::given(method("GET"))
            .and(path("/events"))
            .and(query_param("client_id", session.id().to_hex()))
            .and(query_param("last_event_id", "1"))
            .respond_with(sse(body))
            .expect(1)
            .mount(&server)
            .await;

        let (result, delivered) = drain(&client(), &session, &server.uri()).await;

        assert!(matches!(result, Err(Error::StreamClosed)));
        assert_eq!(session.last_event_id(), 8);
        let ids: Vec<u64> = delivered.iter().map(|m| m.event_id).collect();
        assert_eq!(ids, vec![5, 7, 8]);
        let ns: Vec<i64> = delivered.iter().map(|m| m.payload["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![5, 7, 8]);
        assert!(delivered.iter().all(|m| &m.from == wallet.public()));
    }

    #[tokio::test]
    async fn undecryptable_events_still_advance_cursor() {
        let server = MockServer::start().await;
        let session = Session::new().expect("session");
        let wallet = KeyPair::generate().expect("wallet");
        let stranger = KeyPair::generate().expect("stranger");

        // Sealed for someone else: valid envelope, fails to open.
        let other_session = Session::new().expect("other");
        let body = [
            sealed_frame("10", &wallet, &session, &json!({"n": 10})),
            raw_frame("11", "not json at all"),
            sealed_frame("12", &stranger, &other_session, &json!({"n": 12})),
            raw_frame("13", r#"{"from":"zz","message":"AAAA"}"#),
            sealed_frame("14", &wallet, &session, &json!({"n": 14})),
        ]
        .concat();

        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(sse(body))
            .mount(&server)
            .await;

        let (result, delivered) = drain(&client(), &session, &server.uri()).await;

        assert!(matches!(result, Err(Error::StreamClosed)));
        assert_eq!(session.last_event_id(), 14);
        let ids: Vec<u64> = delivered.iter().map(|m| m.event_id).collect();
        assert_eq!(ids, vec![10, 14]);
    }

    #[tokio::test]
    async fn resumes_from_stored_cursor() {
        let server = MockServer::start().await;
        let session = Session::new().expect("session");
        session.advance_event_id(41);

        Mock::given(method("GET"))
            .and(path("/events"))
            .and(query_param("last_event_id", "41"))
            .respond_with(sse(String::new()))
            .expect(1)
            .mount(&server)
            .await;

        let (result, delivered) = drain(&client(), &session, &server.uri()).await;
        assert!(matches!(result, Err(Error::StreamClosed)));
        assert!(delivered.is_empty());
    }

    #[tokio::test]
    async fn non_message_events_are_skipped() {
        let server = MockServer::start().await;
        let session = Session::new().expect("session");
        let wallet = KeyPair::generate().expect("wallet");

        let body = format!(
            "event: heartbeat\ndata: ping\n\n{}",
            sealed_frame("3", &wallet, &session, &json!({"n": 3}))
        );
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(sse(body))
            .mount(&server)
            .await;

        let (_, delivered) = drain(&client(), &session, &server.uri()).await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(session.last_event_id(), 3);
    }

    #[tokio::test]
    async fn listen_handle_delivers_and_joins() {
        let server = MockServer::start().await;
        let session = Arc::new(Session::new().expect("session"));
        let wallet = KeyPair::generate().expect("wallet");

        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(sse(sealed_frame("2", &wallet, &session, &json!({"event": "connect"}))))
            .mount(&server)
            .await;

        let mut subscription = client().listen::<Value>(session.clone(), server.uri());
        let first = subscription.recv().await.expect("one event");
        assert_eq!(first.payload["event"], "connect");
        assert!(subscription.recv().await.is_none());
        assert!(matches!(subscription.join().await, Err(Error::StreamClosed)));
        assert_eq!(session.last_event_id(), 2);
    }
}

// ============================================================================
// 3. PEER BINDING
// ============================================================================

mod peer_binding_tests {
    use super::*;

    #[tokio::test]
    async fn bound_session_drops_foreign_sender() {
        let server = MockServer::start().await;
        let session = Session::new().expect("session");
        let wallet = KeyPair::generate().expect("wallet");
        let impostor = KeyPair::generate().expect("impostor");
        session.bind_peer(*wallet.public(), server.uri()).expect("bind");

        // The impostor's box is correctly sealed to this session and would
        // decrypt; it must still be dropped.
        let body = [
            sealed_frame("20", &impostor, &session, &json!({"from": "impostor"})),
            sealed_frame("21", &wallet, &session, &json!({"from": "wallet"})),
        ]
        .concat();
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(sse(body))
            .mount(&server)
            .await;

        let (_, delivered) = drain(&client(), &session, &server.uri()).await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].payload["from"], "wallet");
        assert_eq!(session.last_event_id(), 21);
    }
}

// ============================================================================
// 4. TERMINATION
// ============================================================================

mod termination_tests {
    use super::*;

    #[tokio::test]
    async fn service_unavailable_is_distinguished() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let session = Session::new().expect("session");
        let (result, _) = drain(&client(), &session, &server.uri()).await;
        let err = result.unwrap_err();
        assert!(matches!(err, Error::BridgeUnavailable));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn other_status_is_connect_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let session = Session::new().expect("session");
        let (result, _) = drain(&client(), &session, &server.uri()).await;
        assert!(matches!(result, Err(Error::ConnectStatus { status: 403 })));
    }

    #[tokio::test]
    async fn unreachable_bridge_is_connect_error() {
        let session = Session::new().expect("session");
        let (result, _) = drain(&client(), &session, "http://127.0.0.1:9").await;
        assert!(matches!(result, Err(Error::Connect(_))));
    }

    #[tokio::test]
    async fn non_numeric_event_id_ends_only_this_stream() {
        let server = MockServer::start().await;
        let session = Session::new().expect("session");
        let wallet = KeyPair::generate().expect("wallet");
        let body = [
            sealed_frame("4", &wallet, &session, &json!({"n": 4})),
            sealed_frame("five", &wallet, &session, &json!({"n": 5})),
            sealed_frame("6", &wallet, &session, &json!({"n": 6})),
        ]
        .concat();
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(sse(body))
            .mount(&server)
            .await;

        let (result, delivered) = drain(&client(), &session, &server.uri()).await;
        assert!(matches!(result, Err(Error::ProtocolViolation(_))));
        assert_eq!(delivered.len(), 1);
        assert_eq!(session.last_event_id(), 4);
    }

    #[tokio::test]
    async fn cancellation_is_clean_shutdown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(sse(String::new()).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;

        let session = Session::new().expect("session");
        let client = client();
        let (tx, _rx) = mpsc::channel::<Inbound<Value>>(8);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            client.subscribe(&session, &server.uri(), &cancel, &tx),
        )
        .await
        .expect("cancel must end the subscription");
        assert!(result.is_ok());
    }
}
