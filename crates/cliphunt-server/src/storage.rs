//! Durable room snapshots.
//!
//! A store is a plain key/value map of encoded snapshots, one key per room.
//! [`PersistenceGateway`] sits between a room actor and its store: it
//! encodes snapshots as MessagePack, runs blocking store calls off the
//! async runtime, and retries failed writes with backoff.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cliphunt_core::room::RoomState;
use cliphunt_core::snapshot::RoomSnapshot;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::StorageError;
use crate::scheduler::cadence;

/// Key/value storage of encoded snapshots.
pub trait SnapshotStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Every stored key. Stores that cannot list return nothing.
    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(Vec::new())
    }
}

/// Process-local store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SnapshotStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.keys().cloned().collect())
    }
}

/// One `<key>.msgpack` file per room under `dir`. Writes go to a temp file
/// that is renamed over the old snapshot, so a crash mid-write leaves the
/// previous snapshot intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.msgpack"))
    }
}

impl SnapshotStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match std::fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = self.dir.join(format!("{key}.msgpack.tmp"));
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let dir = match std::fs::read_dir(&self.dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut keys = Vec::new();
        for entry in dir {
            let name = entry?.file_name();
            if let Some(key) = name.to_str().and_then(|n| n.strip_suffix(".msgpack")) {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }
}

/// Build the store selected in config.
pub fn store_from_config(config: &StorageConfig) -> Arc<dyn SnapshotStore> {
    match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::File => Arc::new(FileStore::new(config.dir.clone())),
    }
}

pub fn encode_snapshot(snapshot: &RoomSnapshot) -> Result<Vec<u8>, StorageError> {
    rmp_serde::to_vec_named(snapshot).map_err(|e| StorageError::Serialization(e.to_string()))
}

pub fn decode_snapshot(bytes: &[u8]) -> Result<RoomSnapshot, StorageError> {
    rmp_serde::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Keys of stored rooms whose snapshot still has a countdown running, so
/// they keep advancing after a restart with nobody connected. Snapshots that
/// fail to decode are skipped.
pub async fn rooms_in_progress(
    store: Arc<dyn SnapshotStore>,
) -> Result<Vec<String>, StorageError> {
    tokio::task::spawn_blocking(move || {
        let mut active = Vec::new();
        for key in store.keys()? {
            let Some(bytes) = store.get(&key)? else {
                continue;
            };
            match decode_snapshot(&bytes) {
                Ok(snapshot) => {
                    if cadence(&snapshot.restore()).is_some() {
                        active.push(key);
                    }
                },
                Err(e) => {
                    tracing::warn!(room_id = %key, error = %e, "Skipping unreadable snapshot");
                },
            }
        }
        active.sort();
        Ok(active)
    })
    .await
    .map_err(|e| StorageError::Io(std::io::Error::other(e)))?
}

/// A room's view of the store.
#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn SnapshotStore>,
    room_id: String,
    max_retries: u32,
    backoff: Duration,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn SnapshotStore>, room_id: &str, config: &StorageConfig) -> Self {
        Self {
            store,
            room_id: room_id.to_string(),
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Load and cold-start restore the room, or `None` if it was never saved.
    pub async fn load(&self) -> Result<Option<RoomState>, StorageError> {
        let store = Arc::clone(&self.store);
        let key = self.room_id.clone();
        let bytes = tokio::task::spawn_blocking(move || store.get(&key))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))??;

        match bytes {
            Some(bytes) => Ok(Some(decode_snapshot(&bytes)?.restore())),
            None => Ok(None),
        }
    }

    /// Write the room's snapshot, retrying with doubling backoff. Returns the
    /// last error once retries are exhausted.
    pub async fn save(&self, room: &RoomState) -> Result<(), StorageError> {
        let bytes = Arc::new(encode_snapshot(&RoomSnapshot::from(room))?);
        let mut delay = self.backoff;
        let mut attempt = 0;

        loop {
            let store = Arc::clone(&self.store);
            let key = self.room_id.clone();
            let payload = Arc::clone(&bytes);
            let result = tokio::task::spawn_blocking(move || store.put(&key, &payload))
                .await
                .map_err(|e| StorageError::Io(std::io::Error::other(e)))
                .and_then(|r| r);

            match result {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        room_id = %self.room_id,
                        attempt,
                        error = %e,
                        "Snapshot write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                },
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use cliphunt_core::room::Phase;
    use cliphunt_core::test_helpers::room_with_players;

    /// Fails the first `failures` writes, then delegates to memory.
    struct FlakyStore {
        failures: AtomicU32,
        inner: MemoryStore,
    }

    impl SnapshotStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            self.inner.get(key)
        }

        fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(std::io::Error::other("disk unavailable").into());
            }
            self.inner.put(key, bytes)
        }
    }

    fn fast_config(max_retries: u32) -> StorageConfig {
        StorageConfig {
            backend: StorageBackend::Memory,
            max_retries,
            retry_backoff_ms: 1,
            ..StorageConfig::default()
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cliphunt-{name}-{}", uuid::Uuid::new_v4()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[tokio::test]
    async fn missing_room_loads_as_none() {
        let gateway = PersistenceGateway::new(Arc::new(MemoryStore::new()), "r1", &fast_config(0));
        assert!(gateway.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn saved_room_restores_disconnected() {
        let store = Arc::new(MemoryStore::new());
        let gateway = PersistenceGateway::new(Arc::clone(&store) as Arc<dyn SnapshotStore>, "r1", &fast_config(0));
        let (mut room, ids) = room_with_players(2);
        room.phase = Phase::Hunt;
        gateway.save(&room).await.unwrap();
        assert_eq!(store.len(), 1);

        let restored = gateway.load().await.unwrap().unwrap();
        assert_eq!(restored.phase, Phase::Hunt);
        assert_eq!(restored.players.len(), 2);
        assert!(!restored.is_connected(&ids[0]));
        assert!(restored.host_id.is_none());
    }

    #[tokio::test]
    async fn retries_until_write_succeeds() {
        let store = Arc::new(FlakyStore {
            failures: AtomicU32::new(2),
            inner: MemoryStore::new(),
        });
        let gateway = PersistenceGateway::new(Arc::clone(&store) as Arc<dyn SnapshotStore>, "r1", &fast_config(3));
        let (room, _) = room_with_players(1);
        gateway.save(&room).await.unwrap();
        assert_eq!(store.inner.len(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let store = Arc::new(FlakyStore {
            failures: AtomicU32::new(10),
            inner: MemoryStore::new(),
        });
        let gateway = PersistenceGateway::new(Arc::clone(&store) as Arc<dyn SnapshotStore>, "r1", &fast_config(2));
        let (room, _) = room_with_players(1);
        let err = gateway.save(&room).await.unwrap_err();
        assert!(err.to_string().contains("disk unavailable"));
        // One initial attempt plus two retries
        assert_eq!(store.failures.load(Ordering::SeqCst), 7);
        assert!(store.inner.is_empty());
    }

    #[test]
    fn file_store_round_trips_and_replaces() {
        let dir = temp_dir("file-store");
        let store = FileStore::new(&dir);
        assert!(store.get("room-a").unwrap().is_none());

        store.put("room-a", b"first").unwrap();
        store.put("room-a", b"second").unwrap();
        assert_eq!(store.get("room-a").unwrap().as_deref(), Some(&b"second"[..]));
        assert!(!dir.join("room-a.msgpack.tmp").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn file_store_lists_snapshots_only() {
        let dir = temp_dir("file-keys");
        let store = FileStore::new(&dir);
        assert!(store.keys().unwrap().is_empty());

        store.put("room-a", b"a").unwrap();
        store.put("room-b", b"b").unwrap();
        std::fs::write(dir.join("room-c.msgpack.tmp"), b"partial").unwrap();
        let mut keys = store.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["room-a", "room-b"]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn only_running_rooms_are_in_progress() {
        let store: Arc<dyn SnapshotStore> = Arc::new(MemoryStore::new());
        let config = fast_config(0);
        let (lobby, _) = room_with_players(1);
        let (mut hunt, _) = room_with_players(1);
        hunt.start_hunt();
        let (mut done, _) = room_with_players(1);
        done.phase = Phase::Results;

        for (key, room) in [("lobby", &lobby), ("hunt", &hunt), ("done", &done)] {
            PersistenceGateway::new(Arc::clone(&store), key, &config)
                .save(room)
                .await
                .unwrap();
        }
        store.put("garbage", b"\xff\x00").unwrap();

        assert_eq!(rooms_in_progress(store).await.unwrap(), vec!["hunt"]);
    }

    #[test]
    fn corrupt_snapshot_is_a_serialization_error() {
        let err = decode_snapshot(b"\xff\x00not msgpack").unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }
}
