use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::player::{Player, PlayerId};
use crate::room::{
    Category, ChatMessage, HistoryEntry, Phase, Report, RoomSettings, RoomState, RoundState,
    ScoreboardEntry, Submission, TieBreakState, TimerState,
};
use crate::session::SessionTokens;

/// Durable form of a room, one record per room id.
///
/// Collections keyed by player are flattened to lists so the record reads
/// the same regardless of map iteration order. Missing fields fall back to
/// their defaults so older records still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub phase: Phase,
    pub settings: RoomSettings,
    pub timer: TimerState,
    pub chat: Vec<ChatMessage>,
    pub players: Vec<Player>,
    pub categories: Vec<Category>,
    pub drafts_by_player: HashMap<PlayerId, HashMap<String, String>>,
    pub submissions: HashMap<String, Vec<Submission>>,
    pub category_index: usize,
    pub round: Option<RoundState>,
    pub tiebreak: Option<TieBreakState>,
    pub votes_by_player: HashMap<PlayerId, String>,
    pub scoreboard: Vec<ScoreboardEntry>,
    pub history: Vec<HistoryEntry>,
    pub host_id: Option<PlayerId>,
    pub session_tokens: SessionTokens,
    pub reports: Vec<Report>,
}

impl Default for RoomSnapshot {
    fn default() -> Self {
        Self::from(&RoomState::default())
    }
}

impl From<&RoomState> for RoomSnapshot {
    fn from(room: &RoomState) -> Self {
        let mut players: Vec<Player> = room.players.values().cloned().collect();
        players.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));

        let submissions = room
            .submissions
            .iter()
            .map(|(category_id, by_player)| {
                let mut list: Vec<Submission> = by_player.values().cloned().collect();
                list.sort_by(|a, b| a.player_id.cmp(&b.player_id));
                (category_id.clone(), list)
            })
            .collect();

        Self {
            phase: room.phase,
            settings: room.settings.clone(),
            timer: room.timer.clone(),
            chat: room.chat.clone(),
            players,
            categories: room.categories.clone(),
            drafts_by_player: room.drafts_by_player.clone(),
            submissions,
            category_index: room.category_index,
            round: room.round.clone(),
            tiebreak: room.tiebreak.clone(),
            votes_by_player: room.votes_by_player.clone(),
            scoreboard: room.scoreboard_sorted(),
            history: room.history.clone(),
            host_id: room.host_id.clone(),
            session_tokens: room.session_tokens.clone(),
            reports: room.reports.clone(),
        }
    }
}

impl RoomSnapshot {
    /// Rebuild the in-memory room exactly as it was saved.
    pub fn into_room(self) -> RoomState {
        let players = self
            .players
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        let submissions = self
            .submissions
            .into_iter()
            .map(|(category_id, list)| {
                let by_player = list
                    .into_iter()
                    .map(|s| (s.player_id.clone(), s))
                    .collect();
                (category_id, by_player)
            })
            .collect();
        let scoreboard = self
            .scoreboard
            .into_iter()
            .map(|e| (e.entry_id.clone(), e))
            .collect();

        RoomState {
            phase: self.phase,
            settings: self.settings,
            timer: self.timer,
            categories: self.categories,
            category_index: self.category_index,
            players,
            drafts_by_player: self.drafts_by_player,
            submissions,
            round: self.round,
            tiebreak: self.tiebreak,
            votes_by_player: self.votes_by_player,
            scoreboard,
            history: self.history,
            chat: self.chat,
            reports: self.reports,
            host_id: self.host_id,
            session_tokens: self.session_tokens,
        }
    }

    /// Rebuild for a fresh process: no socket survived, so every player is
    /// disconnected and the host role is open.
    pub fn restore(self) -> RoomState {
        let mut room = self.into_room();
        room.restore_after_cold_start();
        room
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::Decision;
    use crate::test_helpers::room_with_players;

    #[test]
    fn snapshot_preserves_room() {
        let (mut room, ids) = room_with_players(2);
        room.upsert_submission(&ids[0], "cutest", "https://a", 5);
        room.upsert_submission(&ids[1], "cutest", "https://b", 6);
        room.save_draft(&ids[1], "funniest", "https://d");
        room.session_tokens.resolve(None);
        room.phase = Phase::Rounds;
        room.start_next_round();
        room.conclude_round(&ids[1], Decision::Votes, 7);

        let snapshot = RoomSnapshot::from(&room);
        assert_eq!(snapshot.submissions["cutest"].len(), 2);
        assert_eq!(snapshot.players[0].id, ids[0]);
        assert_eq!(snapshot.into_room(), room);
    }

    #[test]
    fn json_field_names_are_camel_case() {
        let (room, _) = room_with_players(1);
        let value = serde_json::to_value(RoomSnapshot::from(&room)).unwrap();
        for key in ["draftsByPlayer", "categoryIndex", "votesByPlayer", "sessionTokens", "hostId"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn partial_record_loads_with_defaults() {
        let snapshot: RoomSnapshot = serde_json::from_str(r#"{"phase":"hunt"}"#).unwrap();
        let room = snapshot.into_room();
        assert_eq!(room.phase, Phase::Hunt);
        assert_eq!(room.categories.len(), 3);
        assert_eq!(room.settings, RoomSettings::default());
    }

    #[test]
    fn restore_clears_connections_and_host() {
        let (room, ids) = room_with_players(2);
        assert_eq!(room.host_id.as_deref(), Some(ids[0].as_str()));
        let restored = RoomSnapshot::from(&room).restore();
        assert!(restored.host_id.is_none());
        assert_eq!(restored.connected_count(), 0);
        assert_eq!(restored.players.len(), 2);
    }
}
