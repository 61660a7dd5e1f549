pub mod config;
pub mod error;
pub mod rate_limit;
pub mod room_actor;
pub mod room_manager;
pub mod router;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod storage;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;

use config::ServerConfig;
use state::AppState;
use storage::SnapshotStore;

/// Build the Axum router and application state from a config.
pub fn build_app(config: ServerConfig) -> (Router<()>, AppState) {
    let state = AppState::new(config);
    (routes(state.clone()), state)
}

/// Same as [`build_app`] with an explicit snapshot store.
pub fn build_app_with_store(
    config: ServerConfig,
    store: Arc<dyn SnapshotStore>,
) -> (Router<()>, AppState) {
    let state = AppState::with_store(config, store);
    (routes(state.clone()), state)
}

fn routes(state: AppState) -> Router<()> {
    Router::new()
        .route("/rooms/{room_id}/ws", axum::routing::get(ws::ws_handler))
        .with_state(state)
}

/// Background task that periodically evicts idle rooms.
pub fn spawn_idle_reaper(state: AppState) {
    let every = Duration::from_secs(state.config.rooms.idle_check_interval_secs);
    let max_idle = Duration::from_secs(state.config.rooms.idle_timeout_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let removed = state.rooms.write().await.reap_idle(max_idle);
            if removed > 0 {
                tracing::info!(removed, "Reaped idle rooms");
            }
        }
    });
}

/// Spawn actors for stored rooms with a countdown still running, so a
/// restart does not pause them until someone reconnects. Returns how many
/// were resumed.
pub async fn resume_active_rooms(state: &AppState) -> usize {
    let store = state.rooms.read().await.store();
    let room_ids = match storage::rooms_in_progress(store).await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::error!(error = %e, "Failed to scan stored rooms");
            return 0;
        },
    };

    let mut rooms = state.rooms.write().await;
    let mut resumed = 0;
    for room_id in room_ids.iter().filter(|id| ws::is_valid_room_id(id)) {
        rooms.respawn(room_id);
        resumed += 1;
    }
    if resumed > 0 {
        tracing::info!(resumed, "Resumed rooms in progress");
    }
    resumed
}

/// Close every room and its sockets.
pub async fn shutdown_rooms(state: &AppState) {
    state.rooms.write().await.stop_all();
}
