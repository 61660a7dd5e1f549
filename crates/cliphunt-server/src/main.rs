use tracing_subscriber::EnvFilter;

use cliphunt_server::config::ServerConfig;
use cliphunt_server::{build_app, resume_active_rooms, shutdown_rooms, spawn_idle_reaper};

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("CLIPHUNT_LOG_FORMAT").is_ok_and(|f| f == "json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = ServerConfig::load();
    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    let listen_addr = config.listen_addr.clone();
    let (app, state) = build_app(config);
    resume_active_rooms(&state).await;
    spawn_idle_reaper(state.clone());

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%listen_addr, "Failed to bind: {e}");
            std::process::exit(1);
        },
    };
    tracing::info!(%listen_addr, "Cliphunt server listening");

    let shutdown_state = state.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
            shutdown_rooms(&shutdown_state).await;
        })
        .await;
    if let Err(e) = served {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    }
}
