use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::net::messages::{
    CategoriesMsg, DraftsMsg, PresenceMsg, ServerMessage, TimerMsg, WelcomeMsg,
};
use crate::player::{Player, PlayerId, PlayerSummary, default_display_name};
use crate::session::SessionTokens;
use crate::tally::RpsChoice;

pub const MIN_CATEGORIES: usize = 3;
pub const MAX_CATEGORIES: usize = 12;
pub const MAX_CATEGORY_NAME_CHARS: usize = 40;
pub const MAX_CATEGORY_ID_LEN: usize = 40;
pub const MAX_URL_CHARS: usize = 400;
pub const MAX_CHAT_CHARS: usize = 240;
/// Oldest chat messages are dropped beyond this many.
pub const CHAT_HISTORY_LIMIT: usize = 100;
pub const REPORT_LIMIT: usize = 500;

pub const INTERMISSION_SECONDS: u32 = 30;
pub const ROUND_SECONDS: u32 = 20;
/// Round length when nobody submitted for the category.
pub const EMPTY_ROUND_SECONDS: u32 = 3;
pub const TIEBREAK_SECONDS: u32 = 10;

/// Phase of a match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Lobby,
    Hunt,
    Intermission,
    Rounds,
    Results,
}

/// Tunables for a room's hunt timer vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoomSettings {
    /// Hunt length in minutes a fresh lobby starts from.
    pub default_time: u32,
    pub min_time: u32,
    pub max_time: u32,
    /// Fraction of connected players that must agree to move the target.
    pub vote_threshold: f64,
    pub vote_tick_seconds: u32,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            default_time: 10,
            min_time: 5,
            max_time: 30,
            vote_threshold: 0.5,
            vote_tick_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeVote {
    Higher,
    Lower,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub target_minutes: u32,
    #[serde(default)]
    pub hunt_remaining_seconds: Option<u32>,
    #[serde(default)]
    pub intermission_remaining_seconds: Option<u32>,
    /// Live higher/lower intents, one per player.
    #[serde(default)]
    pub time_votes: HashMap<PlayerId, TimeVote>,
}

impl TimerState {
    pub fn from_settings(settings: &RoomSettings) -> Self {
        Self {
            target_minutes: settings.default_time,
            hunt_remaining_seconds: None,
            intermission_remaining_seconds: None,
            time_votes: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
}

/// Category as sent by the host; `id` is kept when it is usable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryInput {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub player_id: PlayerId,
    pub category_id: String,
    pub url: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundEntry {
    /// Equal to the submitting player's id.
    pub id: String,
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundState {
    pub category_id: String,
    pub category_name: String,
    pub entries: Vec<RoundEntry>,
    #[serde(default)]
    pub votes_by_entry_id: HashMap<String, u32>,
    pub remaining_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TieBreakState {
    pub entry_ids: Vec<String>,
    #[serde(default)]
    pub choices_by_entry_id: HashMap<String, RpsChoice>,
    pub remaining_seconds: u32,
    #[serde(default)]
    pub winner_entry_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreboardEntry {
    pub entry_id: String,
    pub display_name: String,
    pub wins: u32,
}

/// How a round's winner was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Votes,
    Tiebreak,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub category_id: String,
    pub category_name: String,
    pub winner_entry_id: String,
    pub winner_name: String,
    pub url: String,
    pub decided_by: Decision,
    pub decided_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResult {
    pub category_id: String,
    pub winner_submission_id: String,
    pub votes_by_submission_id: HashMap<String, u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub player_id: PlayerId,
    pub display_name: String,
    pub message: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub message_id: String,
    pub reporter_id: PlayerId,
    pub created_at: i64,
}

/// Why a category list was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryError {
    Count(usize),
}

impl std::fmt::Display for CategoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Count(n) => write!(
                f,
                "Need between {MIN_CATEGORIES} and {MAX_CATEGORIES} categories (got {n})."
            ),
        }
    }
}

impl std::error::Error for CategoryError {}

/// Authoritative state of one room. Owned by exactly one actor.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomState {
    pub phase: Phase,
    pub settings: RoomSettings,
    pub timer: TimerState,
    pub categories: Vec<Category>,
    pub category_index: usize,
    pub players: HashMap<PlayerId, Player>,
    pub drafts_by_player: HashMap<PlayerId, HashMap<String, String>>,
    pub submissions: HashMap<String, HashMap<PlayerId, Submission>>,
    pub round: Option<RoundState>,
    pub tiebreak: Option<TieBreakState>,
    pub votes_by_player: HashMap<PlayerId, String>,
    pub scoreboard: HashMap<String, ScoreboardEntry>,
    pub history: Vec<HistoryEntry>,
    pub chat: Vec<ChatMessage>,
    pub reports: Vec<Report>,
    pub host_id: Option<PlayerId>,
    pub session_tokens: SessionTokens,
}

impl Default for RoomState {
    fn default() -> Self {
        Self::new(RoomSettings::default())
    }
}

/// Keep `current` while it is set, otherwise hand the role to `candidate`.
pub fn select_host(current: Option<&str>, candidate: &str) -> PlayerId {
    current.unwrap_or(candidate).to_string()
}

pub fn default_categories() -> Vec<Category> {
    [
        ("cutest", "Cutest"),
        ("funniest", "Funniest"),
        ("most-chaotic", "Most Chaotic"),
    ]
    .into_iter()
    .map(|(id, name)| Category {
        id: id.to_string(),
        name: name.to_string(),
    })
    .collect()
}

/// Lowercase slug of `[a-z0-9-]`, at most [`MAX_CATEGORY_ID_LEN`] bytes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.truncate(MAX_CATEGORY_ID_LEN);
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "category".to_string()
    } else {
        slug
    }
}

fn is_valid_category_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_CATEGORY_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Clean a host-supplied category list.
///
/// Names are trimmed and capped, empty and case-insensitively duplicate
/// names are dropped. A supplied id survives when it is a valid slug not
/// already taken; otherwise one is derived from the name. Running the
/// output back through this function returns it unchanged.
pub fn clean_categories(input: &[CategoryInput]) -> Result<Vec<Category>, CategoryError> {
    let mut seen_names = HashSet::new();
    let mut used_ids = HashSet::new();
    let mut cleaned = Vec::new();

    for raw in input {
        let name: String = raw.name.trim().chars().take(MAX_CATEGORY_NAME_CHARS).collect();
        let name = name.trim_end().to_string();
        if name.is_empty() || !seen_names.insert(name.to_lowercase()) {
            continue;
        }

        let id = match raw.id.as_deref().map(str::trim) {
            Some(id) if is_valid_category_id(id) && !used_ids.contains(id) => id.to_string(),
            _ => {
                let base = slugify(&name);
                let mut candidate = base.clone();
                let mut n = 2;
                while used_ids.contains(&candidate) {
                    candidate = format!("{base}-{n}");
                    n += 1;
                }
                candidate
            },
        };
        used_ids.insert(id.clone());
        cleaned.push(Category { id, name });
    }

    if !(MIN_CATEGORIES..=MAX_CATEGORIES).contains(&cleaned.len()) {
        return Err(CategoryError::Count(cleaned.len()));
    }
    Ok(cleaned)
}

impl RoomState {
    pub fn new(settings: RoomSettings) -> Self {
        Self {
            phase: Phase::Lobby,
            timer: TimerState::from_settings(&settings),
            settings,
            categories: default_categories(),
            category_index: 0,
            players: HashMap::new(),
            drafts_by_player: HashMap::new(),
            submissions: HashMap::new(),
            round: None,
            tiebreak: None,
            votes_by_player: HashMap::new(),
            scoreboard: HashMap::new(),
            history: Vec::new(),
            chat: Vec::new(),
            reports: Vec::new(),
            host_id: None,
            session_tokens: SessionTokens::default(),
        }
    }

    /// Sockets never survive a restart: everyone starts disconnected and the
    /// host role is re-elected by the first hello.
    pub fn restore_after_cold_start(&mut self) {
        for player in self.players.values_mut() {
            player.is_connected = false;
        }
        self.host_id = None;
    }

    /// Insert a new player or mark a returning one connected. Returning
    /// players keep their display name and `joined_at`.
    pub fn upsert_player(&mut self, player_id: &str, now: i64) -> bool {
        if let Some(player) = self.players.get_mut(player_id) {
            player.is_connected = true;
            player.last_seen_at = Some(now);
            return false;
        }
        let name = default_display_name(self.players.len());
        self.players.insert(
            player_id.to_string(),
            Player::new(player_id.to_string(), name, now),
        );
        true
    }

    pub fn mark_disconnected(&mut self, player_id: &str, now: i64) {
        if let Some(player) = self.players.get_mut(player_id) {
            player.is_connected = false;
            player.last_seen_at = Some(now);
        }
    }

    pub fn is_connected(&self, player_id: &str) -> bool {
        self.players.get(player_id).is_some_and(|p| p.is_connected)
    }

    pub fn is_host(&self, player_id: &str) -> bool {
        self.host_id.as_deref() == Some(player_id)
    }

    pub fn connected_count(&self) -> usize {
        self.players.values().filter(|p| p.is_connected).count()
    }

    /// Give the host role to `candidate` if nobody connected holds it.
    pub fn ensure_host(&mut self, candidate: &str) {
        let current = self
            .host_id
            .as_deref()
            .filter(|id| self.is_connected(id));
        self.host_id = Some(select_host(current, candidate));
    }

    /// Re-elect the host when the current one is gone: the connected player
    /// who joined earliest wins. Returns true when `host_id` changed.
    pub fn reassign_host(&mut self) -> bool {
        if let Some(host) = self.host_id.as_deref()
            && self.is_connected(host)
        {
            return false;
        }
        let next = self
            .players
            .values()
            .filter(|p| p.is_connected)
            .min_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)))
            .map(|p| p.id.clone());
        let changed = next != self.host_id;
        self.host_id = next;
        changed
    }

    pub fn display_name(&self, player_id: &str) -> Option<&str> {
        self.players.get(player_id).map(|p| p.display_name.as_str())
    }

    pub fn rename_player(&mut self, player_id: &str, name: String) -> bool {
        match self.players.get_mut(player_id) {
            Some(player) if player.display_name != name => {
                player.display_name = name;
                true
            },
            _ => false,
        }
    }

    pub fn has_category(&self, category_id: &str) -> bool {
        self.categories.iter().any(|c| c.id == category_id)
    }

    /// Swap in a cleaned category list, dropping drafts and submissions that
    /// belong to categories no longer present.
    pub fn replace_categories(&mut self, categories: Vec<Category>) -> bool {
        if categories == self.categories {
            return false;
        }
        let keep: HashSet<&str> = categories.iter().map(|c| c.id.as_str()).collect();
        self.submissions.retain(|id, _| keep.contains(id.as_str()));
        for drafts in self.drafts_by_player.values_mut() {
            drafts.retain(|id, _| keep.contains(id.as_str()));
        }
        self.categories = categories;
        true
    }

    /// Store a draft; an empty url clears it.
    pub fn save_draft(&mut self, player_id: &str, category_id: &str, url: &str) {
        let drafts = self.drafts_by_player.entry(player_id.to_string()).or_default();
        if url.is_empty() {
            drafts.remove(category_id);
        } else {
            drafts.insert(category_id.to_string(), url.to_string());
        }
    }

    pub fn drafts_for(&self, player_id: &str) -> HashMap<String, String> {
        self.drafts_by_player.get(player_id).cloned().unwrap_or_default()
    }

    /// Last write wins on url; the original `created_at` is kept.
    pub fn upsert_submission(
        &mut self,
        player_id: &str,
        category_id: &str,
        url: &str,
        now: i64,
    ) -> Submission {
        let by_player = self.submissions.entry(category_id.to_string()).or_default();
        let submission = by_player
            .entry(player_id.to_string())
            .and_modify(|s| {
                s.url = url.to_string();
                s.updated_at = now;
            })
            .or_insert_with(|| Submission {
                player_id: player_id.to_string(),
                category_id: category_id.to_string(),
                url: url.to_string(),
                created_at: now,
                updated_at: now,
            })
            .clone();

        if let Some(drafts) = self.drafts_by_player.get_mut(player_id) {
            drafts.remove(category_id);
        }
        submission
    }

    pub fn submissions_by(&self, player_id: &str) -> Vec<Submission> {
        let mut own: Vec<Submission> = self
            .submissions
            .values()
            .filter_map(|by_player| by_player.get(player_id).cloned())
            .collect();
        own.sort_by(|a, b| a.category_id.cmp(&b.category_id));
        own
    }

    pub fn push_chat(&mut self, message: ChatMessage) {
        self.chat.push(message);
        if self.chat.len() > CHAT_HISTORY_LIMIT {
            let overflow = self.chat.len() - CHAT_HISTORY_LIMIT;
            self.chat.drain(..overflow);
        }
    }

    /// Record a report against an existing chat message. `None` when the
    /// message is unknown or this reporter already reported it.
    pub fn add_report(
        &mut self,
        id: String,
        message_id: &str,
        reporter_id: &str,
        now: i64,
    ) -> Option<Report> {
        if !self.chat.iter().any(|m| m.id == message_id) {
            return None;
        }
        if self
            .reports
            .iter()
            .any(|r| r.message_id == message_id && r.reporter_id == reporter_id)
        {
            return None;
        }
        let report = Report {
            id,
            message_id: message_id.to_string(),
            reporter_id: reporter_id.to_string(),
            created_at: now,
        };
        self.reports.push(report.clone());
        if self.reports.len() > REPORT_LIMIT {
            let overflow = self.reports.len() - REPORT_LIMIT;
            self.reports.drain(..overflow);
        }
        Some(report)
    }

    /// Record or clear (`None`) a lobby time intent.
    pub fn set_time_vote(&mut self, player_id: &str, vote: Option<TimeVote>) -> bool {
        let previous = match vote {
            Some(v) => self.timer.time_votes.insert(player_id.to_string(), v),
            None => self.timer.time_votes.remove(player_id),
        };
        previous != vote
    }

    // ------------------------------------------------------------------
    // Outbound views
    // ------------------------------------------------------------------

    pub fn player_summaries(&self) -> Vec<PlayerSummary> {
        let mut players: Vec<&Player> = self.players.values().collect();
        players.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));
        players
            .into_iter()
            .map(|p| PlayerSummary::from_player(p, self.host_id.as_deref()))
            .collect()
    }

    pub fn scoreboard_sorted(&self) -> Vec<ScoreboardEntry> {
        let mut entries: Vec<ScoreboardEntry> = self.scoreboard.values().cloned().collect();
        entries.sort_by(|a, b| b.wins.cmp(&a.wins).then_with(|| a.entry_id.cmp(&b.entry_id)));
        entries
    }

    pub fn presence_message(&self) -> ServerMessage {
        ServerMessage::Presence(PresenceMsg {
            players: self.player_summaries(),
            host_id: self.host_id.clone(),
        })
    }

    pub fn timer_message(&self) -> ServerMessage {
        ServerMessage::Timer(TimerMsg {
            phase: self.phase,
            timer: self.timer.clone(),
        })
    }

    pub fn categories_message(&self) -> ServerMessage {
        ServerMessage::Categories(CategoriesMsg {
            categories: self.categories.clone(),
            category_index: self.category_index,
        })
    }

    pub fn drafts_message(&self, player_id: &str) -> ServerMessage {
        ServerMessage::Drafts(DraftsMsg {
            drafts: self.drafts_for(player_id),
        })
    }

    /// Everything a (re)connecting player needs, minus other players'
    /// tokens, drafts and unrevealed submissions.
    pub fn welcome_message(&self, player_id: &str, session_token: &str) -> ServerMessage {
        ServerMessage::Welcome(Box::new(WelcomeMsg {
            player_id: player_id.to_string(),
            session_token: session_token.to_string(),
            host_id: self.host_id.clone(),
            phase: self.phase,
            settings: self.settings.clone(),
            timer: self.timer.clone(),
            categories: self.categories.clone(),
            category_index: self.category_index,
            players: self.player_summaries(),
            drafts: self.drafts_for(player_id),
            submissions: self.submissions_by(player_id),
            round: self.round.clone(),
            tiebreak: self.tiebreak.as_ref().map(crate::net::messages::TieBreakView::from_state),
            scoreboard: self.scoreboard_sorted(),
            history: self.history.clone(),
            chat: self.chat.clone(),
        }))
    }
}
