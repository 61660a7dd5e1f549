use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::RwLock;

use cliphunt_core::moderation::{Moderation, WordBlocklist};

use crate::config::ServerConfig;
use crate::room_actor::RoomDeps;
use crate::room_manager::RoomManager;
use crate::storage::{SnapshotStore, store_from_config};

pub type SharedRoomManager = Arc<RwLock<RoomManager>>;

#[derive(Clone)]
pub struct AppState {
    pub rooms: SharedRoomManager,
    pub config: Arc<ServerConfig>,
    pub ws_connection_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let store = store_from_config(&config.storage);
        Self::with_store(config, store)
    }

    /// State backed by an explicit snapshot store.
    pub fn with_store(config: ServerConfig, store: Arc<dyn SnapshotStore>) -> Self {
        let moderation: Arc<dyn Moderation> =
            Arc::new(WordBlocklist::new(config.moderation.blocked_words.iter()));
        let deps = RoomDeps {
            store,
            moderation,
            settings: config.game.to_settings(),
            storage: config.storage.clone(),
            inbox_capacity: config.limits.room_inbox_capacity,
        };
        Self {
            rooms: Arc::new(RwLock::new(RoomManager::new(deps))),
            config: Arc::new(config),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Holds one slot of the global WebSocket connection count; releases it on
/// drop.
pub struct ConnectionGuard {
    count: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    /// Take a slot if fewer than `max` are in use.
    pub fn try_acquire(count: Arc<AtomicUsize>, max: usize) -> Option<Self> {
        count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()?;
        Some(Self { count })
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_enforces_cap_and_releases() {
        let count = Arc::new(AtomicUsize::new(0));
        let a = ConnectionGuard::try_acquire(Arc::clone(&count), 2).unwrap();
        let _b = ConnectionGuard::try_acquire(Arc::clone(&count), 2).unwrap();
        assert!(ConnectionGuard::try_acquire(Arc::clone(&count), 2).is_none());
        assert_eq!(count.load(Ordering::Acquire), 2);

        drop(a);
        assert_eq!(count.load(Ordering::Acquire), 1);
        assert!(ConnectionGuard::try_acquire(Arc::clone(&count), 2).is_some());
    }
}
