use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::room_actor::{RoomCommand, RoomDeps, RoomLink, spawn_room};
use crate::session::SocketId;
use crate::storage::SnapshotStore;

/// Directory of live room actors, keyed by room id. Actors are spawned on
/// first attach and reaped once empty, quiet and idle.
pub struct RoomManager {
    rooms: HashMap<String, RoomEntry>,
    deps: RoomDeps,
    next_socket_id: SocketId,
}

struct RoomEntry {
    link: RoomLink,
    /// Sockets attached through this manager and not yet detached.
    sockets: usize,
    last_activity: Instant,
}

impl RoomEntry {
    fn spawn(room_id: &str, deps: &RoomDeps) -> Self {
        Self {
            link: spawn_room(room_id, deps),
            sockets: 0,
            last_activity: Instant::now(),
        }
    }
}

impl RoomManager {
    pub fn new(deps: RoomDeps) -> Self {
        Self {
            rooms: HashMap::new(),
            deps,
            next_socket_id: 1,
        }
    }

    pub fn next_socket_id(&mut self) -> SocketId {
        let id = self.next_socket_id;
        self.next_socket_id += 1;
        id
    }

    /// Count a new socket against `room_id`, spawning the actor if needed.
    /// Returns the actor's inbox.
    pub fn attach(&mut self, room_id: &str) -> mpsc::Sender<RoomCommand> {
        let tx = self.respawn(room_id);
        if let Some(entry) = self.rooms.get_mut(room_id) {
            entry.sockets += 1;
            entry.last_activity = Instant::now();
        }
        tx
    }

    /// Inbox of the room's actor, spawning it if missing or replacing it if
    /// it exited. Socket counts carry over.
    pub fn respawn(&mut self, room_id: &str) -> mpsc::Sender<RoomCommand> {
        let entry = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| RoomEntry::spawn(room_id, &self.deps));
        if entry.link.tx.is_closed() {
            tracing::warn!(room_id, "Room actor gone, respawning");
            entry.link = spawn_room(room_id, &self.deps);
        }
        entry.link.tx.clone()
    }

    pub fn detach(&mut self, room_id: &str) {
        if let Some(entry) = self.rooms.get_mut(room_id) {
            entry.sockets = entry.sockets.saturating_sub(1);
            entry.last_activity = Instant::now();
        }
    }

    /// Drop rooms with no sockets and no pending wake-up that have been idle
    /// for at least `max_idle`, and rooms whose actor already exited with
    /// nobody attached. Returns the number removed.
    pub fn reap_idle(&mut self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.rooms.len();
        self.rooms.retain(|room_id, entry| {
            if entry.sockets > 0 {
                return true;
            }
            if entry.link.tx.is_closed() {
                return false;
            }
            let quiet = !entry.link.alarm_armed.load(Ordering::Relaxed);
            if quiet && now.duration_since(entry.last_activity) >= max_idle {
                tracing::info!(room_id = %room_id, "Evicting idle room");
                let _ = entry.link.tx.try_send(RoomCommand::Stop);
                return false;
            }
            true
        });
        before - self.rooms.len()
    }

    /// Ask every actor to close its sockets and stop.
    pub fn stop_all(&mut self) {
        for (_, entry) in self.rooms.drain() {
            let _ = entry.link.tx.try_send(RoomCommand::Stop);
        }
    }

    /// The snapshot store every actor persists to.
    pub fn store(&self) -> Arc<dyn SnapshotStore> {
        Arc::clone(&self.deps.store)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn socket_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |e| e.sockets)
    }
}
