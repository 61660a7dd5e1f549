use std::path::PathBuf;

use serde::Deserialize;

use cliphunt_core::room::RoomSettings;

/// Upper bound for `game.max_time`, in minutes.
pub const MAX_HUNT_MINUTES: u32 = 24 * 60;

/// Top-level server configuration, loaded from `cliphunt.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub limits: LimitsConfig,
    pub rooms: RoomsConfig,
    pub game: GameDefaults,
    pub storage: StorageConfig,
    pub moderation: ModerationConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            limits: LimitsConfig::default(),
            rooms: RoomsConfig::default(),
            game: GameDefaults::default(),
            storage: StorageConfig::default(),
            moderation: ModerationConfig::default(),
        }
    }
}

/// Infrastructure limits (connection caps, buffer sizes, rate limits).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    /// Sustained frames per second accepted from one socket.
    pub ws_rate_limit_per_sec: f64,
    /// Burst size of the per-socket token bucket.
    pub ws_rate_limit_burst: f64,
    /// Outbound frames buffered per socket before sends are dropped.
    pub player_message_buffer: usize,
    /// Commands buffered in a room actor's inbox.
    pub room_inbox_capacity: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 500,
            ws_rate_limit_per_sec: 20.0,
            ws_rate_limit_burst: 40.0,
            player_message_buffer: 256,
            room_inbox_capacity: 1024,
        }
    }
}

/// Room lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    pub idle_timeout_secs: u64,
    pub idle_check_interval_secs: u64,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 600,
            idle_check_interval_secs: 60,
        }
    }
}

/// Settings applied to rooms created by this process.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameDefaults {
    pub default_time: u32,
    pub min_time: u32,
    pub max_time: u32,
    pub vote_threshold: f64,
    pub vote_tick_seconds: u32,
}

impl Default for GameDefaults {
    fn default() -> Self {
        let s = RoomSettings::default();
        Self {
            default_time: s.default_time,
            min_time: s.min_time,
            max_time: s.max_time,
            vote_threshold: s.vote_threshold,
            vote_tick_seconds: s.vote_tick_seconds,
        }
    }
}

impl GameDefaults {
    pub fn to_settings(&self) -> RoomSettings {
        RoomSettings {
            default_time: self.default_time,
            min_time: self.min_time,
            max_time: self.max_time,
            vote_threshold: self.vote_threshold,
            vote_tick_seconds: self.vote_tick_seconds,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

/// Snapshot persistence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory holding one snapshot file per room (file backend).
    pub dir: PathBuf,
    /// Attempts after the first failed write before the room gives up.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub retry_backoff_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            dir: PathBuf::from("data/rooms"),
            max_retries: 3,
            retry_backoff_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    pub blocked_words: Vec<String>,
}

impl ServerConfig {
    /// Check values that would make the server misbehave. Returns the first
    /// problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "listen_addr is not a valid socket address: {}",
                self.listen_addr
            ));
        }

        if self.limits.max_ws_connections == 0 {
            return Err("limits.max_ws_connections must be > 0".into());
        }
        if self.limits.ws_rate_limit_per_sec <= 0.0 {
            return Err("limits.ws_rate_limit_per_sec must be > 0".into());
        }
        if self.limits.ws_rate_limit_burst < 1.0 {
            return Err("limits.ws_rate_limit_burst must be >= 1".into());
        }
        if self.limits.player_message_buffer == 0 {
            return Err("limits.player_message_buffer must be > 0".into());
        }
        if self.limits.room_inbox_capacity == 0 {
            return Err("limits.room_inbox_capacity must be > 0".into());
        }

        if self.rooms.idle_timeout_secs == 0 {
            return Err("rooms.idle_timeout_secs must be > 0".into());
        }
        if self.rooms.idle_check_interval_secs == 0 {
            return Err("rooms.idle_check_interval_secs must be > 0".into());
        }

        let g = &self.game;
        if g.min_time == 0 || g.min_time > g.max_time {
            return Err("game.min_time must be > 0 and <= game.max_time".into());
        }
        if g.max_time > MAX_HUNT_MINUTES {
            return Err(format!("game.max_time must be <= {MAX_HUNT_MINUTES}"));
        }
        if !(g.min_time..=g.max_time).contains(&g.default_time) {
            return Err("game.default_time must lie within [min_time, max_time]".into());
        }
        if !(g.vote_threshold > 0.0 && g.vote_threshold <= 1.0) {
            return Err("game.vote_threshold must be in (0, 1]".into());
        }
        if g.vote_tick_seconds == 0 {
            return Err("game.vote_tick_seconds must be > 0".into());
        }

        if self.storage.backend == StorageBackend::File && self.storage.dir.as_os_str().is_empty()
        {
            return Err("storage.dir must be set for the file backend".into());
        }
        if self.storage.backend == StorageBackend::Memory {
            tracing::warn!("Memory storage backend: room snapshots do not survive a restart");
        }

        Ok(())
    }

    /// Load config from `cliphunt.toml` (or `$CLIPHUNT_CONFIG`) if it exists,
    /// then apply env var overrides.
    pub fn load() -> Self {
        let path = std::env::var("CLIPHUNT_CONFIG")
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "cliphunt.toml".to_string());

        let mut config = match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!(%path, "Loaded configuration");
                    cfg
                },
                Err(e) => {
                    tracing::warn!(%path, "Failed to parse config: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!(%path, "No config file found, using defaults");
                ServerConfig::default()
            },
        };

        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("CLIPHUNT_LISTEN_ADDR")
            && !addr.is_empty()
        {
            self.listen_addr = addr;
        }
        if let Ok(val) = std::env::var("CLIPHUNT_MAX_WS_CONNECTIONS")
            && let Ok(n) = val.parse::<usize>()
        {
            self.limits.max_ws_connections = n;
        }
        if let Ok(val) = std::env::var("CLIPHUNT_WS_RATE_LIMIT")
            && let Ok(n) = val.parse::<f64>()
        {
            self.limits.ws_rate_limit_per_sec = n;
        }
        if let Ok(val) = std::env::var("CLIPHUNT_IDLE_TIMEOUT_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.rooms.idle_timeout_secs = n;
        }
        if let Ok(val) = std::env::var("CLIPHUNT_STORAGE_BACKEND") {
            match val.parse::<StorageBackend>() {
                Ok(backend) => self.storage.backend = backend,
                Err(e) => tracing::warn!("Ignoring CLIPHUNT_STORAGE_BACKEND: {e}"),
            }
        }
        if let Ok(dir) = std::env::var("CLIPHUNT_STORAGE_DIR")
            && !dir.is_empty()
        {
            self.storage.dir = PathBuf::from(dir);
        }
        if let Ok(words) = std::env::var("CLIPHUNT_BLOCKED_WORDS")
            && !words.is_empty()
        {
            self.moderation.blocked_words = words
                .split(',')
                .map(|w| w.trim().to_string())
                .filter(|w| !w.is_empty())
                .collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.listen_addr, "0.0.0.0:8080");
        assert_eq!(cfg.storage.backend, StorageBackend::File);
        assert!(cfg.moderation.blocked_words.is_empty());
        assert_eq!(cfg.game.to_settings(), RoomSettings::default());
    }

    #[test]
    fn validate_accepts_valid_config() {
        assert_eq!(ServerConfig::default().validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_invalid_addr() {
        let cfg = ServerConfig {
            listen_addr: "not-an-address".to_string(),
            ..ServerConfig::default()
        };
        assert!(cfg.validate().unwrap_err().contains("listen_addr"));
    }

    #[test]
    fn validate_rejects_inverted_time_bounds() {
        let mut cfg = ServerConfig::default();
        cfg.game.min_time = 40;
        assert!(cfg.validate().is_err());

        let mut cfg = ServerConfig::default();
        cfg.game.default_time = 60;
        assert!(cfg.validate().unwrap_err().contains("default_time"));
    }

    #[test]
    fn validate_caps_max_time() {
        let mut cfg = ServerConfig::default();
        cfg.game.max_time = MAX_HUNT_MINUTES;
        assert_eq!(cfg.validate(), Ok(()));

        cfg.game.max_time = MAX_HUNT_MINUTES + 1;
        assert!(cfg.validate().unwrap_err().contains("max_time"));
    }

    #[test]
    fn validate_rejects_bad_threshold() {
        let mut cfg = ServerConfig::default();
        cfg.game.vote_threshold = 0.0;
        assert!(cfg.validate().is_err());
        cfg.game.vote_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parse_full_toml() {
        let toml_str = r#"
listen_addr = "127.0.0.1:9090"

[limits]
max_ws_connections = 50
ws_rate_limit_per_sec = 5.0

[rooms]
idle_timeout_secs = 30

[game]
default_time = 8
vote_tick_seconds = 2

[storage]
backend = "memory"
max_retries = 1

[moderation]
blocked_words = ["spoiler"]
"#;
        let cfg: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:9090");
        assert_eq!(cfg.limits.max_ws_connections, 50);
        assert!((cfg.limits.ws_rate_limit_per_sec - 5.0).abs() < f64::EPSILON);
        assert_eq!(cfg.limits.player_message_buffer, 256);
        assert_eq!(cfg.rooms.idle_timeout_secs, 30);
        assert_eq!(cfg.rooms.idle_check_interval_secs, 60);
        assert_eq!(cfg.game.default_time, 8);
        assert_eq!(cfg.game.max_time, 30);
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
        assert_eq!(cfg.storage.max_retries, 1);
        assert_eq!(cfg.moderation.blocked_words, vec!["spoiler".to_string()]);
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn missing_sections_use_defaults() {
        let cfg: ServerConfig = toml::from_str(r#"listen_addr = "0.0.0.0:8080""#).unwrap();
        assert_eq!(cfg.limits.max_ws_connections, 500);
        assert_eq!(cfg.rooms.idle_timeout_secs, 600);
        assert_eq!(cfg.storage.retry_backoff_ms, 50);
    }

    #[test]
    fn storage_backend_parses_case_insensitively() {
        assert_eq!("MEMORY".parse::<StorageBackend>(), Ok(StorageBackend::Memory));
        assert_eq!("file".parse::<StorageBackend>(), Ok(StorageBackend::File));
        assert!("redis".parse::<StorageBackend>().is_err());
    }
}
