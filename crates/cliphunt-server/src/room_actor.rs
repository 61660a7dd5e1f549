//! One task per room. The task owns the room state outright; sockets,
//! scheduler wake-ups and storage all go through its inbox, so every
//! mutation runs as one serialized turn.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::Utf8Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;

use cliphunt_core::moderation::Moderation;
use cliphunt_core::net::messages::ServerMessage;
use cliphunt_core::net::protocol::encode_server_message;
use cliphunt_core::room::{RoomSettings, RoomState};
use cliphunt_core::tally::{RandomSource, ThreadRandom};
use cliphunt_core::time::now_ms;

use crate::config::StorageConfig;
use crate::router::{Delivery, MessageRouter, Outcome, Target};
use crate::scheduler::Alarm;
use crate::session::{SessionRegistry, SocketId};
use crate::storage::{PersistenceGateway, SnapshotStore};

/// Close code sent to a socket displaced by a newer one with its token.
pub const CLOSE_REPLACED: u16 = 1000;
/// Server is going away.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// The room could not persist its state and stopped.
pub const CLOSE_INTERNAL: u16 = 1011;

/// Frames queued for one socket's writer.
#[derive(Debug, Clone)]
pub enum Outbound {
    Text(Utf8Bytes),
    Close { code: u16, reason: &'static str },
}

pub enum RoomCommand {
    Connect {
        socket_id: SocketId,
        sender: mpsc::Sender<Outbound>,
    },
    Frame {
        socket_id: SocketId,
        text: String,
    },
    Disconnect {
        socket_id: SocketId,
    },
    Stop,
}

/// Shared dependencies every room actor is built from.
#[derive(Clone)]
pub struct RoomDeps {
    pub store: Arc<dyn SnapshotStore>,
    pub moderation: Arc<dyn Moderation>,
    pub settings: RoomSettings,
    pub storage: StorageConfig,
    pub inbox_capacity: usize,
}

/// What the manager keeps of a spawned actor.
pub struct RoomLink {
    pub tx: mpsc::Sender<RoomCommand>,
    /// Mirrors whether the actor has a wake-up pending.
    pub alarm_armed: Arc<AtomicBool>,
}

/// Spawn the actor for `room_id` with OS randomness.
pub fn spawn_room(room_id: &str, deps: &RoomDeps) -> RoomLink {
    spawn_room_with_rng(room_id, deps, Box::new(ThreadRandom))
}

pub fn spawn_room_with_rng(
    room_id: &str,
    deps: &RoomDeps,
    rng: Box<dyn RandomSource>,
) -> RoomLink {
    let (tx, rx) = mpsc::channel(deps.inbox_capacity);
    let alarm_armed = Arc::new(AtomicBool::new(false));
    let actor = RoomActor {
        room_id: room_id.to_string(),
        room: RoomState::new(deps.settings.clone()),
        sessions: SessionRegistry::new(),
        senders: HashMap::new(),
        router: MessageRouter::new(Arc::clone(&deps.moderation), rng),
        alarm: Alarm::new(),
        gateway: PersistenceGateway::new(Arc::clone(&deps.store), room_id, &deps.storage),
        alarm_armed: Arc::clone(&alarm_armed),
    };
    tokio::spawn(actor.run(rx));
    RoomLink { tx, alarm_armed }
}

/// How a turn ended.
enum Turn {
    Continue,
    Exit,
}

struct RoomActor {
    room_id: String,
    room: RoomState,
    sessions: SessionRegistry,
    senders: HashMap<SocketId, mpsc::Sender<Outbound>>,
    router: MessageRouter,
    alarm: Alarm,
    gateway: PersistenceGateway,
    alarm_armed: Arc<AtomicBool>,
}

impl RoomActor {
    async fn run(mut self, mut inbox: mpsc::Receiver<RoomCommand>) {
        match self.gateway.load().await {
            Ok(Some(room)) => {
                tracing::info!(room_id = %self.room_id, phase = ?room.phase, "Room restored");
                self.room = room;
            },
            Ok(None) => {
                tracing::info!(room_id = %self.room_id, "Room created");
            },
            Err(e) => {
                tracing::error!(room_id = %self.room_id, error = %e, "Failed to load room");
                inbox.close();
                while let Some(cmd) = inbox.recv().await {
                    if let RoomCommand::Connect { sender, .. } = cmd {
                        let _ = sender.try_send(Outbound::Close {
                            code: CLOSE_INTERNAL,
                            reason: "storage failure",
                        });
                    }
                }
                return;
            },
        }
        self.sync_alarm();

        loop {
            let turn = tokio::select! {
                cmd = inbox.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => Turn::Exit,
                },
                _ = self.alarm.wait() => {
                    self.alarm.fire();
                    self.on_alarm().await
                },
            };
            if let Turn::Exit = turn {
                break;
            }
            self.sync_alarm();
        }

        self.alarm_armed.store(false, Ordering::Relaxed);
        tracing::info!(room_id = %self.room_id, "Room actor stopped");
    }

    async fn handle_command(&mut self, cmd: RoomCommand) -> Turn {
        match cmd {
            RoomCommand::Connect { socket_id, sender } => {
                self.sessions.attach(socket_id);
                self.senders.insert(socket_id, sender);
                tracing::debug!(room_id = %self.room_id, socket_id, "Socket attached");
                Turn::Continue
            },
            RoomCommand::Frame { socket_id, text } => {
                let outcome =
                    self.router
                        .handle(&mut self.room, &mut self.sessions, socket_id, &text, now_ms());
                self.apply(socket_id, outcome).await
            },
            RoomCommand::Disconnect { socket_id } => {
                self.senders.remove(&socket_id);
                let outcome =
                    self.router
                        .disconnect(&mut self.room, &mut self.sessions, socket_id, now_ms());
                self.apply(socket_id, outcome).await
            },
            RoomCommand::Stop => {
                self.close_all(CLOSE_GOING_AWAY, "room closed");
                Turn::Exit
            },
        }
    }

    async fn on_alarm(&mut self) -> Turn {
        let step = self.room.tick(self.router.rng(), now_ms());
        for message in &step.broadcasts {
            self.broadcast(message);
        }
        if step.changed {
            return self.persist().await;
        }
        Turn::Continue
    }

    async fn apply(&mut self, caller: SocketId, outcome: Outcome) -> Turn {
        for Delivery { target, message } in &outcome.deliveries {
            match target {
                Target::Caller => self.send_to(caller, message),
                Target::All => self.broadcast(message),
            }
        }

        if let Some(evicted) = &outcome.evicted
            && let Some(sender) = self.senders.remove(&evicted.socket_id)
        {
            let _ = sender.try_send(Outbound::Close {
                code: CLOSE_REPLACED,
                reason: "replaced",
            });
        }

        if outcome.persist {
            return self.persist().await;
        }
        Turn::Continue
    }

    /// Snapshot the room. A write that fails past its retries is fatal:
    /// every socket is closed and the actor stops.
    async fn persist(&mut self) -> Turn {
        match self.gateway.save(&self.room).await {
            Ok(()) => Turn::Continue,
            Err(e) => {
                tracing::error!(
                    room_id = %self.room_id,
                    error = %e,
                    "Snapshot write failed, stopping room"
                );
                self.close_all(CLOSE_INTERNAL, "storage failure");
                Turn::Exit
            },
        }
    }

    fn sync_alarm(&mut self) {
        self.alarm.sync(&self.room, Instant::now());
        self.alarm_armed
            .store(self.alarm.is_armed(), Ordering::Relaxed);
    }

    fn encode(&self, message: &ServerMessage) -> Option<Utf8Bytes> {
        match encode_server_message(message) {
            Ok(text) => Some(Utf8Bytes::from(text)),
            Err(e) => {
                tracing::error!(room_id = %self.room_id, kind = message.kind(), error = %e, "Failed to encode frame");
                None
            },
        }
    }

    fn send_to(&self, socket_id: SocketId, message: &ServerMessage) {
        let Some(sender) = self.senders.get(&socket_id) else {
            return;
        };
        if let Some(text) = self.encode(message) {
            self.push(socket_id, sender, Outbound::Text(text));
        }
    }

    fn broadcast(&self, message: &ServerMessage) {
        let Some(text) = self.encode(message) else {
            return;
        };
        for (socket_id, sender) in &self.senders {
            self.push(*socket_id, sender, Outbound::Text(text.clone()));
        }
    }

    fn push(&self, socket_id: SocketId, sender: &mpsc::Sender<Outbound>, frame: Outbound) {
        match sender.try_send(frame) {
            Ok(()) => {},
            Err(TrySendError::Full(_)) => {
                tracing::debug!(room_id = %self.room_id, socket_id, "Dropped frame for slow socket");
            },
            Err(TrySendError::Closed(_)) => {},
        }
    }

    fn close_all(&mut self, code: u16, reason: &'static str) {
        for (_, sender) in self.senders.drain() {
            let _ = sender.try_send(Outbound::Close { code, reason });
        }
    }
}
