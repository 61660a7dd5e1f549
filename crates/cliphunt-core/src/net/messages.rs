use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::player::{PlayerId, PlayerSummary};
use crate::room::{
    Category, CategoryInput, ChatMessage, HistoryEntry, Phase, RoomSettings, RoundResult,
    RoundState, ScoreboardEntry, Submission, TieBreakState, TimerState,
};
use crate::tally::RpsChoice;

// ============================================================================
// Client -> Server
// ============================================================================

/// Every frame a client may send, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello(HelloMsg),
    UpdateName(UpdateNameMsg),
    Chat(ChatMsg),
    VoteTime(VoteTimeMsg),
    StartHunt,
    ResetMatch,
    UpdateCategories(UpdateCategoriesMsg),
    SaveDraft(SaveDraftMsg),
    SubmitSubmission(SubmitSubmissionMsg),
    VoteSubmission(VoteSubmissionMsg),
    RpsChoice(RpsChoiceMsg),
    Report(ReportMsg),
}

impl ClientMessage {
    /// Wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello(_) => "hello",
            Self::UpdateName(_) => "update_name",
            Self::Chat(_) => "chat",
            Self::VoteTime(_) => "vote_time",
            Self::StartHunt => "start_hunt",
            Self::ResetMatch => "reset_match",
            Self::UpdateCategories(_) => "update_categories",
            Self::SaveDraft(_) => "save_draft",
            Self::SubmitSubmission(_) => "submit_submission",
            Self::VoteSubmission(_) => "vote_submission",
            Self::RpsChoice(_) => "rps_choice",
            Self::Report(_) => "report",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloMsg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNameMsg {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMsg {
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeDirection {
    Higher,
    Lower,
    /// Withdraw any intent.
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTimeMsg {
    pub direction: TimeDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCategoriesMsg {
    pub categories: Vec<CategoryInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveDraftMsg {
    pub category_id: String,
    /// Empty clears the draft.
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitSubmissionMsg {
    pub category_id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteSubmissionMsg {
    pub entry_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpsChoiceMsg {
    pub choice: RpsChoice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMsg {
    pub message_id: String,
}

// ============================================================================
// Server -> Client
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome(Box<WelcomeMsg>),
    Presence(PresenceMsg),
    Chat(ChatMessage),
    Timer(TimerMsg),
    Categories(CategoriesMsg),
    Drafts(DraftsMsg),
    SubmissionSaved(SubmissionSavedMsg),
    RoundStart(RoundStartMsg),
    RoundResult(RoundResultMsg),
    Scoreboard(ScoreboardMsg),
    TiebreakStart(TieBreakMsg),
    TiebreakResult(TieBreakMsg),
    ReportReceived(ReportReceivedMsg),
    Error(ErrorMsg),
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorMsg {
            message: message.into(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome(_) => "welcome",
            Self::Presence(_) => "presence",
            Self::Chat(_) => "chat",
            Self::Timer(_) => "timer",
            Self::Categories(_) => "categories",
            Self::Drafts(_) => "drafts",
            Self::SubmissionSaved(_) => "submission_saved",
            Self::RoundStart(_) => "round_start",
            Self::RoundResult(_) => "round_result",
            Self::Scoreboard(_) => "scoreboard",
            Self::TiebreakStart(_) => "tiebreak_start",
            Self::TiebreakResult(_) => "tiebreak_result",
            Self::ReportReceived(_) => "report_received",
            Self::Error(_) => "error",
        }
    }
}

/// Curated room view for one player. Other players' tokens, drafts and
/// submissions are never included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeMsg {
    pub player_id: PlayerId,
    pub session_token: String,
    pub host_id: Option<PlayerId>,
    pub phase: Phase,
    pub settings: RoomSettings,
    pub timer: TimerState,
    pub categories: Vec<Category>,
    pub category_index: usize,
    pub players: Vec<PlayerSummary>,
    pub drafts: HashMap<String, String>,
    pub submissions: Vec<Submission>,
    pub round: Option<RoundState>,
    pub tiebreak: Option<TieBreakView>,
    pub scoreboard: Vec<ScoreboardEntry>,
    pub history: Vec<HistoryEntry>,
    pub chat: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMsg {
    pub players: Vec<PlayerSummary>,
    pub host_id: Option<PlayerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerMsg {
    pub phase: Phase,
    pub timer: TimerState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoriesMsg {
    pub categories: Vec<Category>,
    pub category_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftsMsg {
    pub drafts: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionSavedMsg {
    pub submission: Submission,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStartMsg {
    pub round: RoundState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResultMsg {
    pub result: RoundResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreboardMsg {
    pub scoreboard: Vec<ScoreboardEntry>,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieBreakMsg {
    pub tiebreak: TieBreakView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportReceivedMsg {
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMsg {
    pub message: String,
}

/// Tiebreak as clients see it. Until a winner exists only the set of entries
/// that have chosen is revealed, not what they chose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TieBreakView {
    pub entry_ids: Vec<String>,
    pub chosen_entry_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices_by_entry_id: Option<HashMap<String, RpsChoice>>,
    pub remaining_seconds: u32,
    pub winner_entry_id: Option<String>,
}

impl TieBreakView {
    pub fn from_state(state: &TieBreakState) -> Self {
        let chosen_entry_ids = state
            .entry_ids
            .iter()
            .filter(|id| state.choices_by_entry_id.contains_key(*id))
            .cloned()
            .collect();
        let choices_by_entry_id = state
            .winner_entry_id
            .is_some()
            .then(|| state.choices_by_entry_id.clone());
        Self {
            entry_ids: state.entry_ids.clone(),
            chosen_entry_ids,
            choices_by_entry_id,
            remaining_seconds: state.remaining_seconds,
            winner_entry_id: state.winner_entry_id.clone(),
        }
    }
}
