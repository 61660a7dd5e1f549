use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use cliphunt_core::net::messages::{ClientMessage, HelloMsg, ServerMessage, WelcomeMsg};
use cliphunt_core::net::protocol::{decode_server_message, encode_client_message};

use cliphunt_server::config::{ServerConfig, StorageBackend, StorageConfig};
use cliphunt_server::storage::{MemoryStore, SnapshotStore};
use cliphunt_server::state::AppState;
use cliphunt_server::{build_app_with_store, resume_active_rooms, shutdown_rooms};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    state: AppState,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server backed by a fresh in-memory store.
    pub async fn new() -> Self {
        Self::with_store(test_config(), Arc::new(MemoryStore::new())).await
    }

    pub async fn from_config(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new())).await
    }

    /// Start a test server on a store the caller keeps, so a second server
    /// can pick up where this one left off.
    pub async fn with_store(config: ServerConfig, store: Arc<dyn SnapshotStore>) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, state) = build_app_with_store(config, store);
        resume_active_rooms(&state).await;

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn ws_url(&self, room_id: &str) -> String {
        format!("ws://{}/rooms/{room_id}/ws", self.addr)
    }

    /// Stop every room actor and abort the server task.
    pub async fn stop(self) {
        shutdown_rooms(&self.state).await;
        self.handle.abort();
        // Let the actors drain their Stop before the store is reused
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        listen_addr: "127.0.0.1:0".into(),
        storage: StorageConfig {
            backend: StorageBackend::Memory,
            retry_backoff_ms: 1,
            ..StorageConfig::default()
        },
        ..ServerConfig::default()
    }
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

pub async fn ws_send(stream: &mut WsStream, msg: &ClientMessage) {
    let encoded = encode_client_message(msg).unwrap();
    stream.send(Message::Text(encoded.into())).await.unwrap();
}

pub async fn ws_send_raw(stream: &mut WsStream, text: &str) {
    stream
        .send(Message::Text(text.to_string().into()))
        .await
        .unwrap();
}

/// Read the next text frame, skipping pings and pongs. Panics on timeout or
/// close.
pub async fn ws_read_text(stream: &mut WsStream) -> String {
    let deadline = Duration::from_secs(5);
    loop {
        let msg = tokio::time::timeout(deadline, stream.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return text.as_str().to_string(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

pub async fn ws_read_server_msg(stream: &mut WsStream) -> ServerMessage {
    let text = ws_read_text(stream).await;
    decode_server_message(&text).unwrap()
}

/// Read frames until one of the given kind arrives.
pub async fn ws_read_until(stream: &mut WsStream, kind: &str) -> ServerMessage {
    loop {
        let msg = ws_read_server_msg(stream).await;
        if msg.kind() == kind {
            return msg;
        }
    }
}

/// Try to read a text frame within `timeout`. Returns None if nothing
/// arrives.
pub async fn ws_try_read(stream: &mut WsStream, timeout: Duration) -> Option<ServerMessage> {
    match tokio::time::timeout(timeout, stream.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => decode_server_message(text.as_str()).ok(),
        _ => None,
    }
}

/// Wait for the server to close the socket and return its close frame.
pub async fn ws_expect_close(stream: &mut WsStream) -> Option<CloseFrame> {
    let deadline = Duration::from_secs(5);
    loop {
        let next = tokio::time::timeout(deadline, stream.next())
            .await
            .expect("timed out waiting for close");
        match next {
            Some(Ok(Message::Close(frame))) => return frame,
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return None,
        }
    }
}

/// Send `hello` and read the caller's `welcome` and the `presence` that
/// follows it.
pub async fn ws_hello(stream: &mut WsStream, token: Option<&str>) -> WelcomeMsg {
    let hello = ClientMessage::Hello(HelloMsg {
        session_token: token.map(str::to_string),
    });
    ws_send(stream, &hello).await;
    let welcome = match ws_read_server_msg(stream).await {
        ServerMessage::Welcome(w) => *w,
        other => panic!("Expected Welcome, got: {other:?}"),
    };
    match ws_read_server_msg(stream).await {
        ServerMessage::Presence(_) => {},
        other => panic!("Expected Presence, got: {other:?}"),
    }
    welcome
}

/// Connect to `room_id` and say hello. Returns the stream and its welcome.
pub async fn join(server: &TestServer, room_id: &str, token: Option<&str>) -> (WsStream, WelcomeMsg) {
    let mut stream = ws_connect(&server.ws_url(room_id)).await;
    let welcome = ws_hello(&mut stream, token).await;
    (stream, welcome)
}
