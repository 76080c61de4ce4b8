use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, header},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tower::ServiceExt;

use carrier_api::auth::{AppState, AppStateInner};
use carrier_api::routes;
use carrier_db::Database;
use carrier_hub::{Hub, HubConfig};
use carrier_types::{Envelope, MessageKind, PaymentConfirmation};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

struct Server {
    addr: SocketAddr,
    app: Router,
    state: AppState,
}

async fn spawn_server() -> Server {
    spawn_server_with(HubConfig {
        payment_delay: Duration::from_millis(50),
        ..HubConfig::default()
    })
    .await
}

async fn spawn_server_with(config: HubConfig) -> Server {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let hub = Hub::new(db.clone(), config);
    let state: AppState = Arc::new(AppStateInner {
        db,
        hub,
        keys_require_auth: false,
    });
    let app = routes::router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let served = app.clone();
    tokio::spawn(async move {
        axum::serve(listener, served).await.unwrap();
    });

    Server { addr, app, state }
}

async fn register(server: &Server, id: &str) -> String {
    let body = json!({
        "id": id,
        "identity_pub": "aWRlbnRpdHk=",
        "signed_prekey": "c2lnbmVk",
    });
    let request = Request::post("/v1/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = server.app.clone().oneshot(request).await.unwrap();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    body["token"].as_str().unwrap().to_string()
}

async fn connect(server: &Server, token: &str) -> Result<Client, tungstenite::Error> {
    let mut request = format!("ws://{}/ws", server.addr).into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Authorization", format!("Bearer {}", token).parse().unwrap());
    connect_async(request).await.map(|(ws, _)| ws)
}

async fn connect_with_query(server: &Server, token: &str) -> Result<Client, tungstenite::Error> {
    let url = format!("ws://{}/ws?token={}", server.addr, token);
    connect_async(url).await.map(|(ws, _)| ws)
}

fn rejected_status(result: Result<Client, tungstenite::Error>) -> u16 {
    match result {
        Err(tungstenite::Error::Http(response)) => response.status().as_u16(),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("upgrade should have been refused"),
    }
}

async fn wait_online(server: &Server, user: &str) {
    tokio::time::timeout(WAIT, async {
        while !server.state.hub.registry().is_online(user).await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("user never came online");
}

async fn next_envelope(ws: &mut Client) -> Envelope {
    tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return Envelope::from_json(text.as_str()).unwrap(),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                other => panic!("expected a text frame, got {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for a frame")
}

fn text_frame(recipient: &str, body: &str) -> Message {
    let frame = json!({
        "type": "text",
        "recipient": recipient,
        "payload": STANDARD.encode(body),
    });
    Message::text(frame.to_string())
}

#[tokio::test]
async fn upgrade_requires_valid_token() {
    let server = spawn_server().await;
    register(&server, "alice").await;

    let missing = connect_async(format!("ws://{}/ws", server.addr))
        .await
        .map(|(ws, _)| ws);
    assert_eq!(rejected_status(missing), 401);
    assert_eq!(rejected_status(connect(&server, "not-a-token").await), 401);
}

#[tokio::test]
async fn rotated_token_cannot_connect() {
    let server = spawn_server().await;
    let old = register(&server, "alice").await;
    let new = register(&server, "alice").await;

    assert_eq!(rejected_status(connect(&server, &old).await), 401);
    assert!(connect_with_query(&server, &new).await.is_ok());
}

#[tokio::test]
async fn live_message_reaches_online_recipient() {
    let server = spawn_server().await;
    let alice_token = register(&server, "alice").await;
    let bob_token = register(&server, "bob").await;

    let mut alice = connect(&server, &alice_token).await.unwrap();
    let mut bob = connect(&server, &bob_token).await.unwrap();
    wait_online(&server, "alice").await;
    wait_online(&server, "bob").await;

    alice.send(text_frame("bob", "hello bob")).await.unwrap();

    let envelope = next_envelope(&mut bob).await;
    assert_eq!(envelope.kind, MessageKind::Text);
    assert_eq!(envelope.sender_id, "alice");
    assert_eq!(envelope.recipient, "bob");
    assert_eq!(envelope.payload, b"hello bob");
    assert!(!envelope.message_id.is_empty());
    assert!(envelope.timestamp > 0);
}

#[tokio::test]
async fn offline_messages_arrive_on_connect_in_order() {
    let server = spawn_server().await;
    let alice_token = register(&server, "alice").await;
    let bob_token = register(&server, "bob").await;

    let mut alice = connect(&server, &alice_token).await.unwrap();
    for body in ["one", "two", "three"] {
        alice.send(text_frame("bob", body)).await.unwrap();
    }

    tokio::time::timeout(WAIT, async {
        while server.state.db.queued_count_for("bob").unwrap() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("messages were never queued");

    let mut bob = connect(&server, &bob_token).await.unwrap();
    for expected in ["one", "two", "three"] {
        let envelope = next_envelope(&mut bob).await;
        assert_eq!(envelope.sender_id, "alice");
        assert_eq!(envelope.payload, expected.as_bytes());
    }

    wait_online(&server, "bob").await;
    assert_eq!(server.state.db.queued_count_for("bob").unwrap(), 0);
}

#[tokio::test]
async fn payment_is_acknowledged_to_payer() {
    let server = spawn_server().await;
    let alice_token = register(&server, "alice").await;
    let mut alice = connect(&server, &alice_token).await.unwrap();
    wait_online(&server, "alice").await;

    let request = json!({
        "type": "stk_push",
        "phone_number": "254700000000",
        "amount": 100,
        "reference": "INV-1",
        "description": "Order #1",
    });
    let frame = json!({
        "type": "payment",
        "recipient": "",
        "payload": STANDARD.encode(request.to_string()),
    });
    alice.send(Message::text(frame.to_string())).await.unwrap();

    let ack = next_envelope(&mut alice).await;
    assert_eq!(ack.kind, MessageKind::PaymentAck);
    assert_eq!(ack.sender_id, "server");
    assert_eq!(ack.recipient, "alice");

    let confirmation: PaymentConfirmation = serde_json::from_slice(&ack.payload).unwrap();
    assert!(confirmation.success);
    assert_eq!(confirmation.reference, "INV-1");
    assert_eq!(confirmation.amount, 100);
    assert_eq!(confirmation.kind, "payment_confirmation");
}

#[tokio::test]
async fn second_connection_displaces_first() {
    let server = spawn_server().await;
    let alice_token = register(&server, "alice").await;
    let bob_token = register(&server, "bob").await;

    let mut first = connect(&server, &bob_token).await.unwrap();
    wait_online(&server, "bob").await;
    let mut second = connect(&server, &bob_token).await.unwrap();

    // The displaced socket is closed by the server.
    let ended = tokio::time::timeout(WAIT, async {
        loop {
            match first.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Text(text))) => panic!("displaced socket got {}", text.as_str()),
                _ => break,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "displaced socket stayed open");

    let mut alice = connect(&server, &alice_token).await.unwrap();
    alice.send(text_frame("bob", "to the new one")).await.unwrap();

    let envelope = next_envelope(&mut second).await;
    assert_eq!(envelope.payload, b"to the new one");
    assert_eq!(server.state.hub.online_count().await, 2);
}

#[tokio::test]
async fn inbound_frames_flow_while_backlog_drains() {
    let server = spawn_server_with(HubConfig {
        outbound_capacity: 4,
        ..HubConfig::default()
    })
    .await;
    let alice_token = register(&server, "alice").await;
    let bob_token = register(&server, "bob").await;

    // Far more than the buffer and the socket can hold while bob is not reading.
    let backlog = 200;
    let bulk = "x".repeat(64 * 1024);
    let frame = json!({
        "type": "file",
        "recipient": "bob",
        "payload": STANDARD.encode(&bulk),
    })
    .to_string();
    for _ in 0..backlog {
        server.state.hub.process_message("alice", &frame).await;
    }

    let mut alice = connect(&server, &alice_token).await.unwrap();
    wait_online(&server, "alice").await;

    let mut bob = connect(&server, &bob_token).await.unwrap();
    bob.send(text_frame("alice", "still here")).await.unwrap();

    let envelope = next_envelope(&mut alice).await;
    assert_eq!(envelope.sender_id, "bob");
    assert_eq!(envelope.payload, b"still here");

    for _ in 0..backlog {
        let envelope = next_envelope(&mut bob).await;
        assert_eq!(envelope.kind, MessageKind::File);
        assert_eq!(envelope.payload.len(), bulk.len());
    }
}
