use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use cliphunt_core::net::protocol::{MAX_ID_LEN, MAX_MESSAGE_SIZE};

use crate::error::AppError;
use crate::rate_limit::TokenBucket;
use crate::room_actor::{CLOSE_INTERNAL, Outbound, RoomCommand};
use crate::session::SocketId;
use crate::state::{AppState, ConnectionGuard};

/// Transport-level cap. Frames between this and [`MAX_MESSAGE_SIZE`] still
/// reach the room and are answered with an error frame.
const MAX_TRANSPORT_MESSAGE: usize = MAX_MESSAGE_SIZE * 4;

/// Room ids are 1..=64 characters of `[A-Za-z0-9_-]`.
pub fn is_valid_room_id(room_id: &str) -> bool {
    !room_id.is_empty()
        && room_id.len() <= MAX_ID_LEN
        && room_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// `GET /rooms/{room_id}/ws`
pub async fn ws_handler(
    Path(room_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    if !is_valid_room_id(&room_id) {
        return Err(AppError::BadRequest("Invalid room id".into()));
    }

    let max_ws = state.config.limits.max_ws_connections;
    let Some(guard) =
        ConnectionGuard::try_acquire(Arc::clone(&state.ws_connection_count), max_ws)
    else {
        tracing::warn!(max = max_ws, "WS connection limit reached");
        return Err(AppError::ServiceUnavailable(
            "Too many connections".into(),
        ));
    };

    Ok(ws
        .max_message_size(MAX_TRANSPORT_MESSAGE)
        .max_frame_size(MAX_TRANSPORT_MESSAGE)
        .on_upgrade(move |socket| handle_socket(socket, state, room_id, guard))
        .into_response())
}

async fn handle_socket(socket: WebSocket, state: AppState, room_id: String, _guard: ConnectionGuard) {
    let (mut ws_sender, ws_receiver) = socket.split();
    let (out_tx, out_rx) = mpsc::channel::<Outbound>(state.config.limits.player_message_buffer);

    let (socket_id, room_tx) = {
        let mut rooms = state.rooms.write().await;
        let socket_id = rooms.next_socket_id();
        (socket_id, rooms.attach(&room_id))
    };

    let Some(room_tx) = connect(&state, &room_id, room_tx, socket_id, out_tx).await else {
        tracing::error!(room_id = %room_id, socket_id, "Room unavailable");
        let _ = ws_sender
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_INTERNAL,
                reason: "room unavailable".into(),
            })))
            .await;
        state.rooms.write().await.detach(&room_id);
        return;
    };
    tracing::info!(room_id = %room_id, socket_id, "Socket connected");

    let mut writer = tokio::spawn(write_loop(ws_sender, out_rx));
    tokio::select! {
        _ = read_loop(ws_receiver, &state, &room_tx, &room_id, socket_id) => {},
        _ = &mut writer => {},
    }

    let _ = room_tx.send(RoomCommand::Disconnect { socket_id }).await;
    state.rooms.write().await.detach(&room_id);
    tracing::info!(room_id = %room_id, socket_id, "Socket disconnected");
}

/// Register the socket with its room actor. If the actor exited between
/// attach and send, it is respawned once.
async fn connect(
    state: &AppState,
    room_id: &str,
    room_tx: mpsc::Sender<RoomCommand>,
    socket_id: SocketId,
    sender: mpsc::Sender<Outbound>,
) -> Option<mpsc::Sender<RoomCommand>> {
    let cmd = RoomCommand::Connect { socket_id, sender };
    let Err(mpsc::error::SendError(cmd)) = room_tx.send(cmd).await else {
        return Some(room_tx);
    };

    let room_tx = state.rooms.write().await.respawn(room_id);
    room_tx.send(cmd).await.ok()?;
    Some(room_tx)
}

async fn write_loop(mut ws_sender: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(frame) = rx.recv().await {
        match frame {
            Outbound::Text(text) => {
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            },
            Outbound::Close { code, reason } => {
                let _ = ws_sender
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                break;
            },
        }
    }
}

async fn read_loop(
    mut ws_receiver: SplitStream<WebSocket>,
    state: &AppState,
    room_tx: &mpsc::Sender<RoomCommand>,
    room_id: &str,
    socket_id: SocketId,
) {
    let limits = &state.config.limits;
    let mut bucket = TokenBucket::new(limits.ws_rate_limit_burst, limits.ws_rate_limit_per_sec);

    while let Some(Ok(msg)) = ws_receiver.next().await {
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            Message::Binary(_) => {
                tracing::debug!(room_id, socket_id, "Ignoring binary frame");
                continue;
            },
            _ => continue,
        };

        // Flood guard: excess frames are dropped before they reach the room
        if !bucket.allow() {
            tracing::warn!(room_id, socket_id, "Rate limited");
            continue;
        }

        let cmd = RoomCommand::Frame {
            socket_id,
            text: text.as_str().to_owned(),
        };
        if room_tx.send(cmd).await.is_err() {
            break;
        }
    }
}
