use serde::{Deserialize, Serialize};

/// Stable player identity. Minted once per session token and never reused.
pub type PlayerId = String;

/// Maximum display name length in characters.
pub const MAX_NAME_CHARS: usize = 24;

/// A player known to a room. Players are never removed; a disconnected
/// player keeps their slot, name and scoreboard entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub display_name: String,
    pub joined_at: i64,
    pub is_connected: bool,
    #[serde(default)]
    pub last_seen_at: Option<i64>,
}

impl Player {
    pub fn new(id: PlayerId, display_name: String, joined_at: i64) -> Self {
        Self {
            id,
            display_name,
            joined_at,
            is_connected: true,
            last_seen_at: Some(joined_at),
        }
    }
}

/// Player as shown to clients, with the derived host flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSummary {
    pub id: PlayerId,
    pub display_name: String,
    pub joined_at: i64,
    pub is_connected: bool,
    pub is_host: bool,
}

impl PlayerSummary {
    pub fn from_player(player: &Player, host_id: Option<&str>) -> Self {
        Self {
            id: player.id.clone(),
            display_name: player.display_name.clone(),
            joined_at: player.joined_at,
            is_connected: player.is_connected,
            is_host: host_id == Some(player.id.as_str()),
        }
    }
}

/// Name given to a player the first time they say hello.
pub fn default_display_name(known_players: usize) -> String {
    format!("Player {}", known_players + 1)
}

/// Trim a requested display name. Returns `None` when the result is empty,
/// too long, or contains control characters.
pub fn clean_display_name(raw: &str) -> Option<String> {
    let name = raw.trim();
    let len = name.chars().count();
    if len == 0 || len > MAX_NAME_CHARS || name.chars().any(char::is_control) {
        return None;
    }
    Some(name.to_string())
}
