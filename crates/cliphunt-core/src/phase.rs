//! Phase transitions: `lobby → hunt → intermission → rounds → results`.
//!
//! All functions here mutate a [`RoomState`] in place and return the
//! broadcasts the transition produced. Nothing here knows about sockets,
//! clocks or storage; callers pass `now` and a [`RandomSource`].

use crate::net::messages::{
    RoundResultMsg, RoundStartMsg, ScoreboardMsg, ServerMessage, TieBreakMsg, TieBreakView,
};
use crate::player::PlayerId;
use crate::room::{
    Decision, EMPTY_ROUND_SECONDS, HistoryEntry, INTERMISSION_SECONDS, Phase, ROUND_SECONDS,
    RoomState, RoundEntry, RoundResult, RoundState, ScoreboardEntry, TIEBREAK_SECONDS,
    TieBreakState, TimeVote, TimerState,
};
use crate::tally::{RandomSource, RpsChoice, pick_top_entries, pick_uniform, resolve_rps, tally_votes};

/// Result of advancing the room by one scheduler wake-up.
#[derive(Debug, Default)]
pub struct Step {
    pub broadcasts: Vec<ServerMessage>,
    /// Whether persisted state changed.
    pub changed: bool,
}

impl Step {
    fn unchanged() -> Self {
        Self::default()
    }

    fn changed(broadcasts: Vec<ServerMessage>) -> Self {
        Self {
            broadcasts,
            changed: true,
        }
    }
}

impl RoomState {
    /// Whether a tiebreak is waiting on choices.
    pub fn tiebreak_pending(&self) -> bool {
        self.tiebreak
            .as_ref()
            .is_some_and(|t| t.winner_entry_id.is_none())
    }

    /// Whether ballots are currently accepted.
    pub fn voting_open(&self) -> bool {
        self.phase == Phase::Rounds && self.round.is_some() && self.tiebreak.is_none()
    }

    /// Lobby → hunt. Returns false when not in the lobby.
    pub fn start_hunt(&mut self) -> bool {
        if self.phase != Phase::Lobby {
            return false;
        }
        self.phase = Phase::Hunt;
        self.timer.hunt_remaining_seconds = Some(self.timer.target_minutes.saturating_mul(60));
        self.timer.intermission_remaining_seconds = None;
        self.timer.time_votes.clear();
        true
    }

    /// Move `target_minutes` one step toward the connected players' intents.
    /// Returns true when the target changed.
    pub fn apply_time_votes(&mut self) -> bool {
        let connected = self.connected_count();
        if connected == 0 {
            return false;
        }
        let (mut higher, mut lower) = (0usize, 0usize);
        for (player_id, vote) in &self.timer.time_votes {
            if !self.is_connected(player_id) {
                continue;
            }
            match vote {
                TimeVote::Higher => higher += 1,
                TimeVote::Lower => lower += 1,
            }
        }

        let threshold = self.settings.vote_threshold;
        let current = self.timer.target_minutes;
        let next = if higher as f64 / connected as f64 >= threshold && higher > 0 {
            (current + 1).min(self.settings.max_time)
        } else if lower as f64 / connected as f64 >= threshold && lower > 0 {
            current.saturating_sub(1).max(self.settings.min_time)
        } else {
            current
        };
        self.timer.target_minutes = next;
        next != current
    }

    /// Whether any connected player holds a lobby time intent.
    pub fn has_connected_intent(&self) -> bool {
        self.timer
            .time_votes
            .keys()
            .any(|player_id| self.is_connected(player_id))
    }

    /// Advance by one scheduler wake-up.
    pub fn tick(&mut self, rng: &mut dyn RandomSource, now: i64) -> Step {
        match self.phase {
            Phase::Lobby => {
                if self.apply_time_votes() {
                    Step::changed(vec![self.timer_message()])
                } else {
                    Step::unchanged()
                }
            },
            Phase::Hunt => {
                let remaining = self.timer.hunt_remaining_seconds.unwrap_or(0).saturating_sub(1);
                if remaining == 0 {
                    self.phase = Phase::Intermission;
                    self.timer.hunt_remaining_seconds = None;
                    self.timer.intermission_remaining_seconds = Some(INTERMISSION_SECONDS);
                } else {
                    self.timer.hunt_remaining_seconds = Some(remaining);
                }
                Step::changed(vec![self.timer_message()])
            },
            Phase::Intermission => {
                let remaining = self
                    .timer
                    .intermission_remaining_seconds
                    .unwrap_or(0)
                    .saturating_sub(1);
                if remaining == 0 {
                    self.timer.intermission_remaining_seconds = None;
                    self.phase = Phase::Rounds;
                    let mut broadcasts = vec![self.timer_message()];
                    broadcasts.extend(self.start_next_round());
                    Step::changed(broadcasts)
                } else {
                    self.timer.intermission_remaining_seconds = Some(remaining);
                    Step::changed(vec![self.timer_message()])
                }
            },
            Phase::Rounds => Step::changed(self.tick_rounds(rng, now)),
            Phase::Results => Step::unchanged(),
        }
    }

    fn tick_rounds(&mut self, rng: &mut dyn RandomSource, now: i64) -> Vec<ServerMessage> {
        if self.tiebreak_pending() {
            return self.tick_tiebreak(rng, now);
        }
        let Some(round) = self.round.as_mut() else {
            return self.start_next_round();
        };
        round.remaining_seconds = round.remaining_seconds.saturating_sub(1);
        if round.remaining_seconds == 0 {
            self.finish_round(now)
        } else {
            Vec::new()
        }
    }

    /// Open the round for `categories[category_index]`, or move to results
    /// once every category has been played.
    pub fn start_next_round(&mut self) -> Vec<ServerMessage> {
        self.tiebreak = None;
        self.votes_by_player.clear();

        let Some(category) = self.categories.get(self.category_index).cloned() else {
            self.phase = Phase::Results;
            self.round = None;
            return vec![self.timer_message(), self.scoreboard_message()];
        };
        self.category_index += 1;

        let mut entries: Vec<RoundEntry> = self
            .submissions
            .get(&category.id)
            .map(|by_player| {
                by_player
                    .values()
                    .map(|s| RoundEntry {
                        id: s.player_id.clone(),
                        label: self
                            .display_name(&s.player_id)
                            .unwrap_or(&s.player_id)
                            .to_string(),
                        url: s.url.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by_key(|e| self.players.get(&e.id).map(|p| p.joined_at).unwrap_or(i64::MAX));

        let remaining_seconds = if entries.is_empty() {
            EMPTY_ROUND_SECONDS
        } else {
            ROUND_SECONDS
        };
        let round = RoundState {
            category_id: category.id,
            category_name: category.name,
            entries,
            votes_by_entry_id: Default::default(),
            remaining_seconds,
        };
        tracing::debug!(
            category = %round.category_id,
            entries = round.entries.len(),
            "Round started"
        );
        self.round = Some(round.clone());
        vec![ServerMessage::RoundStart(RoundStartMsg { round })]
    }

    /// Record a ballot. The entry must belong to the open round.
    pub fn cast_vote(&mut self, player_id: &str, entry_id: &str) -> bool {
        if !self.voting_open() {
            return false;
        }
        let exists = self
            .round
            .as_ref()
            .is_some_and(|r| r.entries.iter().any(|e| e.id == entry_id));
        if !exists {
            return false;
        }
        let previous = self
            .votes_by_player
            .insert(player_id.to_string(), entry_id.to_string());
        previous.as_deref() != Some(entry_id)
    }

    /// Close voting: drop the round without votes, conclude with a single
    /// leader, otherwise open a tiebreak among the leaders.
    pub fn finish_round(&mut self, now: i64) -> Vec<ServerMessage> {
        let Some(round) = self.round.as_mut() else {
            return Vec::new();
        };
        let entry_ids: Vec<&String> = round.entries.iter().map(|e| &e.id).collect();
        let counts = tally_votes(
            self.votes_by_player
                .values()
                .filter(|id| entry_ids.contains(id)),
        );
        round.votes_by_entry_id = counts.clone();
        round.remaining_seconds = 0;

        let top = pick_top_entries(&counts);
        match top.len() {
            0 => {
                tracing::debug!(category = %round.category_id, "Round closed without votes");
                self.round = None;
                self.votes_by_player.clear();
                Vec::new()
            },
            1 => {
                let winner = top[0].clone();
                self.conclude_round(&winner, Decision::Votes, now)
            },
            _ => {
                let tiebreak = TieBreakState {
                    entry_ids: top,
                    choices_by_entry_id: Default::default(),
                    remaining_seconds: TIEBREAK_SECONDS,
                    winner_entry_id: None,
                };
                let view = TieBreakView::from_state(&tiebreak);
                self.tiebreak = Some(tiebreak);
                vec![ServerMessage::TiebreakStart(TieBreakMsg { tiebreak: view })]
            },
        }
    }

    /// Record `choice` for the tied entry `player_id` controls and try to
    /// resolve. `None` when the choice is not applicable.
    pub fn record_rps_choice(
        &mut self,
        player_id: &PlayerId,
        choice: RpsChoice,
        rng: &mut dyn RandomSource,
        now: i64,
    ) -> Option<Vec<ServerMessage>> {
        if self.phase != Phase::Rounds || !self.tiebreak_pending() {
            return None;
        }
        let tiebreak = self.tiebreak.as_mut()?;
        if !tiebreak.entry_ids.contains(player_id)
            || tiebreak.choices_by_entry_id.contains_key(player_id)
        {
            return None;
        }
        tiebreak.choices_by_entry_id.insert(player_id.clone(), choice);

        let winner = resolve_rps(&tiebreak.entry_ids, &tiebreak.choices_by_entry_id, rng);
        Some(match winner {
            Some(winner) => self.settle_tiebreak(winner, Decision::Tiebreak, now),
            None => vec![self.tiebreak_result_message()],
        })
    }

    fn tick_tiebreak(&mut self, rng: &mut dyn RandomSource, now: i64) -> Vec<ServerMessage> {
        let Some(tiebreak) = self.tiebreak.as_mut() else {
            return Vec::new();
        };
        tiebreak.remaining_seconds = tiebreak.remaining_seconds.saturating_sub(1);
        if tiebreak.remaining_seconds > 0 {
            return vec![self.tiebreak_result_message()];
        }
        match pick_uniform(&tiebreak.entry_ids, rng) {
            Some(winner) => {
                tracing::debug!(winner = %winner, "Tiebreak timed out, picked at random");
                self.settle_tiebreak(winner, Decision::Timeout, now)
            },
            None => {
                self.tiebreak = None;
                self.round = None;
                Vec::new()
            },
        }
    }

    fn settle_tiebreak(
        &mut self,
        winner: String,
        decided_by: Decision,
        now: i64,
    ) -> Vec<ServerMessage> {
        if let Some(tiebreak) = self.tiebreak.as_mut() {
            tiebreak.winner_entry_id = Some(winner.clone());
        }
        let mut out = vec![self.tiebreak_result_message()];
        out.extend(self.conclude_round(&winner, decided_by, now));
        out
    }

    fn tiebreak_result_message(&self) -> ServerMessage {
        let view = self
            .tiebreak
            .as_ref()
            .map(TieBreakView::from_state)
            .unwrap_or(TieBreakView {
                entry_ids: Vec::new(),
                chosen_entry_ids: Vec::new(),
                choices_by_entry_id: None,
                remaining_seconds: 0,
                winner_entry_id: None,
            });
        ServerMessage::TiebreakResult(TieBreakMsg { tiebreak: view })
    }

    /// Award the round to `winner`: result broadcast, scoreboard and history
    /// update, then clear the round.
    pub fn conclude_round(
        &mut self,
        winner: &str,
        decided_by: Decision,
        now: i64,
    ) -> Vec<ServerMessage> {
        let Some(round) = self.round.take() else {
            return Vec::new();
        };
        self.tiebreak = None;
        self.votes_by_player.clear();

        let entry = round.entries.iter().find(|e| e.id == winner);
        let winner_name = self
            .display_name(winner)
            .map(str::to_string)
            .or_else(|| entry.map(|e| e.label.clone()))
            .unwrap_or_else(|| winner.to_string());

        let score = self
            .scoreboard
            .entry(winner.to_string())
            .or_insert_with(|| ScoreboardEntry {
                entry_id: winner.to_string(),
                display_name: winner_name.clone(),
                wins: 0,
            });
        score.wins += 1;
        score.display_name = winner_name.clone();

        self.history.push(HistoryEntry {
            category_id: round.category_id.clone(),
            category_name: round.category_name.clone(),
            winner_entry_id: winner.to_string(),
            winner_name,
            url: entry.map(|e| e.url.clone()).unwrap_or_default(),
            decided_by,
            decided_at: now,
        });

        tracing::info!(
            category = %round.category_id,
            winner = %winner,
            decided_by = ?decided_by,
            "Round concluded"
        );

        let result = RoundResult {
            category_id: round.category_id,
            winner_submission_id: winner.to_string(),
            votes_by_submission_id: round.votes_by_entry_id,
        };
        vec![
            ServerMessage::RoundResult(RoundResultMsg { result }),
            self.scoreboard_message(),
        ]
    }

    /// Back to the lobby with a clean slate. Players, categories, chat and
    /// session tokens survive.
    pub fn reset_match(&mut self) {
        self.phase = Phase::Lobby;
        self.timer = TimerState::from_settings(&self.settings);
        self.category_index = 0;
        self.round = None;
        self.tiebreak = None;
        self.votes_by_player.clear();
        self.scoreboard.clear();
        self.history.clear();
        self.submissions.clear();
        self.drafts_by_player.clear();
    }

    pub fn scoreboard_message(&self) -> ServerMessage {
        ServerMessage::Scoreboard(ScoreboardMsg {
            scoreboard: self.scoreboard_sorted(),
            history: self.history.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{SequenceRandom, room_with_players};

    fn kinds(msgs: &[ServerMessage]) -> Vec<&'static str> {
        msgs.iter().map(ServerMessage::kind).collect()
    }

    fn into_rounds(room: &mut RoomState) {
        room.phase = Phase::Rounds;
        room.timer.hunt_remaining_seconds = None;
        room.timer.intermission_remaining_seconds = None;
    }

    #[test]
    fn start_hunt_only_from_lobby() {
        let (mut room, _) = room_with_players(2);
        assert!(room.start_hunt());
        assert_eq!(room.phase, Phase::Hunt);
        assert_eq!(room.timer.hunt_remaining_seconds, Some(600));
        assert!(!room.start_hunt());
    }

    #[test]
    fn huge_restored_target_saturates_hunt_timer() {
        let (mut room, _) = room_with_players(1);
        room.settings.max_time = u32::MAX;
        room.timer.target_minutes = u32::MAX;
        assert!(room.start_hunt());
        assert_eq!(room.timer.hunt_remaining_seconds, Some(u32::MAX));
    }

    #[test]
    fn time_votes_move_target_within_bounds() {
        let (mut room, ids) = room_with_players(2);
        room.set_time_vote(&ids[0], Some(TimeVote::Higher));
        assert!(room.apply_time_votes());
        assert_eq!(room.timer.target_minutes, 11);

        room.settings.max_time = 11;
        assert!(!room.apply_time_votes());

        room.set_time_vote(&ids[0], Some(TimeVote::Lower));
        room.set_time_vote(&ids[1], Some(TimeVote::Lower));
        room.settings.min_time = 10;
        assert!(room.apply_time_votes());
        assert!(!room.apply_time_votes());
        assert_eq!(room.timer.target_minutes, 10);
    }

    #[test]
    fn disconnected_intents_do_not_count() {
        let (mut room, ids) = room_with_players(3);
        room.set_time_vote(&ids[2], Some(TimeVote::Higher));
        room.mark_disconnected(&ids[2], 99);
        assert!(!room.has_connected_intent());
        assert!(!room.apply_time_votes());
    }

    #[test]
    fn hunt_runs_into_intermission_then_rounds() {
        let (mut room, _) = room_with_players(1);
        let mut rng = SequenceRandom::new(vec![0]);
        room.start_hunt();
        room.timer.hunt_remaining_seconds = Some(2);

        room.tick(&mut rng, 0);
        assert_eq!(room.timer.hunt_remaining_seconds, Some(1));
        room.tick(&mut rng, 0);
        assert_eq!(room.phase, Phase::Intermission);
        assert_eq!(room.timer.intermission_remaining_seconds, Some(30));

        room.timer.intermission_remaining_seconds = Some(1);
        let step = room.tick(&mut rng, 0);
        assert_eq!(room.phase, Phase::Rounds);
        assert_eq!(kinds(&step.broadcasts), vec!["timer", "round_start"]);
        assert_eq!(room.category_index, 1);
    }

    #[test]
    fn rounds_follow_category_order() {
        let (mut room, ids) = room_with_players(2);
        room.upsert_submission(&ids[0], "funniest", "https://f", 1);
        into_rounds(&mut room);

        for (i, category) in room.categories.clone().iter().enumerate() {
            room.start_next_round();
            assert_eq!(room.category_index, i + 1);
            let round = room.round.as_ref().unwrap();
            assert_eq!(round.category_id, category.id);
            let expected = if category.id == "funniest" { 1 } else { 0 };
            assert_eq!(round.entries.len(), expected);
        }
        let last = room.start_next_round();
        assert_eq!(room.phase, Phase::Results);
        assert_eq!(kinds(&last), vec!["timer", "scoreboard"]);
    }

    #[test]
    fn empty_round_is_short_and_dropped() {
        let (mut room, _) = room_with_players(1);
        let mut rng = SequenceRandom::new(vec![0]);
        into_rounds(&mut room);
        room.start_next_round();
        assert_eq!(room.round.as_ref().unwrap().remaining_seconds, 3);
        for _ in 0..3 {
            room.tick(&mut rng, 0);
        }
        assert!(room.round.is_none());
        assert!(room.history.is_empty());

        // Next wake-up opens the following category
        let step = room.tick(&mut rng, 0);
        assert_eq!(kinds(&step.broadcasts), vec!["round_start"]);
        assert_eq!(room.category_index, 2);
    }

    #[test]
    fn votes_only_for_existing_entries() {
        let (mut room, ids) = room_with_players(2);
        room.upsert_submission(&ids[0], "cutest", "https://a", 1);
        assert!(!room.cast_vote(&ids[1], &ids[0]));
        into_rounds(&mut room);
        room.start_next_round();
        assert!(!room.cast_vote(&ids[1], &ids[1]));
        assert!(room.cast_vote(&ids[1], &ids[0]));
        assert!(!room.cast_vote(&ids[1], &ids[0]));
    }

    #[test]
    fn single_leader_wins_directly() {
        let (mut room, ids) = room_with_players(2);
        let mut rng = SequenceRandom::new(vec![0]);
        room.upsert_submission(&ids[0], "cutest", "https://a", 1);
        room.upsert_submission(&ids[1], "cutest", "https://b", 1);
        into_rounds(&mut room);
        room.start_next_round();
        room.cast_vote(&ids[0], &ids[1]);
        room.cast_vote(&ids[1], &ids[1]);

        let out = room.finish_round(42);
        assert_eq!(kinds(&out), vec!["round_result", "scoreboard"]);
        assert!(room.tiebreak.is_none());
        assert!(room.round.is_none());
        assert_eq!(room.scoreboard[&ids[1]].wins, 1);
        assert_eq!(room.history[0].decided_by, Decision::Votes);
        assert_eq!(room.history[0].url, "https://b");
        match &out[0] {
            ServerMessage::RoundResult(m) => {
                assert_eq!(m.result.winner_submission_id, ids[1]);
                assert_eq!(m.result.votes_by_submission_id[&ids[1]], 2);
            },
            other => panic!("Expected RoundResult, got: {other:?}"),
        }
    }

    #[test]
    fn tie_opens_tiebreak_and_rps_settles_it() {
        let (mut room, ids) = room_with_players(2);
        let mut rng = SequenceRandom::new(vec![0]);
        room.upsert_submission(&ids[0], "cutest", "https://a", 1);
        room.upsert_submission(&ids[1], "cutest", "https://b", 1);
        into_rounds(&mut room);
        room.start_next_round();
        room.cast_vote(&ids[0], &ids[0]);
        room.cast_vote(&ids[1], &ids[1]);

        let out = room.finish_round(0);
        assert_eq!(kinds(&out), vec!["tiebreak_start"]);
        assert!(room.tiebreak_pending());
        assert!(!room.voting_open());

        let first = room
            .record_rps_choice(&ids[0], RpsChoice::Scissors, &mut rng, 0)
            .unwrap();
        assert_eq!(kinds(&first), vec!["tiebreak_result"]);
        // A second choice from the same entry is ignored
        assert!(
            room.record_rps_choice(&ids[0], RpsChoice::Rock, &mut rng, 0)
                .is_none()
        );

        let out = room
            .record_rps_choice(&ids[1], RpsChoice::Rock, &mut rng, 5)
            .unwrap();
        assert_eq!(kinds(&out), vec!["tiebreak_result", "round_result", "scoreboard"]);
        assert_eq!(room.scoreboard[&ids[1]].wins, 1);
        assert_eq!(room.history[0].decided_by, Decision::Tiebreak);
        assert!(room.tiebreak.is_none());
    }

    #[test]
    fn outsiders_cannot_choose() {
        let (mut room, ids) = room_with_players(3);
        let mut rng = SequenceRandom::new(vec![0]);
        room.upsert_submission(&ids[0], "cutest", "https://a", 1);
        room.upsert_submission(&ids[1], "cutest", "https://b", 1);
        into_rounds(&mut room);
        room.start_next_round();
        room.cast_vote(&ids[0], &ids[0]);
        room.cast_vote(&ids[1], &ids[1]);
        room.finish_round(0);
        assert!(
            room.record_rps_choice(&ids[2], RpsChoice::Rock, &mut rng, 0)
                .is_none()
        );
    }

    #[test]
    fn tiebreak_timeout_picks_at_random() {
        let (mut room, ids) = room_with_players(2);
        let mut rng = SequenceRandom::new(vec![1]);
        room.upsert_submission(&ids[0], "cutest", "https://a", 1);
        room.upsert_submission(&ids[1], "cutest", "https://b", 1);
        into_rounds(&mut room);
        room.start_next_round();
        room.cast_vote(&ids[0], &ids[0]);
        room.cast_vote(&ids[1], &ids[1]);
        room.finish_round(0);

        for _ in 0..(TIEBREAK_SECONDS - 1) {
            let step = room.tick(&mut rng, 0);
            assert_eq!(kinds(&step.broadcasts), vec!["tiebreak_result"]);
        }
        let step = room.tick(&mut rng, 0);
        assert_eq!(
            kinds(&step.broadcasts),
            vec!["tiebreak_result", "round_result", "scoreboard"]
        );
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(room.history[0].winner_entry_id, sorted[1]);
        assert_eq!(room.history[0].decided_by, Decision::Timeout);
    }

    #[test]
    fn scoreboard_name_refreshes_on_win() {
        let (mut room, ids) = room_with_players(1);
        room.upsert_submission(&ids[0], "cutest", "https://a", 1);
        room.upsert_submission(&ids[0], "funniest", "https://b", 1);
        into_rounds(&mut room);

        room.start_next_round();
        room.conclude_round(&ids[0], Decision::Votes, 1);
        room.rename_player(&ids[0], "Renamed".into());
        assert_eq!(room.scoreboard[&ids[0]].display_name, "Player 1");

        room.start_next_round();
        room.conclude_round(&ids[0], Decision::Votes, 2);
        let entry = &room.scoreboard[&ids[0]];
        assert_eq!(entry.wins, 2);
        assert_eq!(entry.display_name, "Renamed");
    }

    #[test]
    fn reset_returns_to_clean_lobby() {
        let (mut room, ids) = room_with_players(2);
        room.upsert_submission(&ids[0], "cutest", "https://a", 1);
        room.save_draft(&ids[1], "cutest", "https://d");
        into_rounds(&mut room);
        room.start_next_round();
        room.conclude_round(&ids[0], Decision::Votes, 1);
        room.phase = Phase::Results;
        room.timer.target_minutes = 20;

        room.reset_match();
        assert_eq!(room.phase, Phase::Lobby);
        assert_eq!(room.category_index, 0);
        assert_eq!(room.timer.target_minutes, 10);
        assert!(room.scoreboard.is_empty());
        assert!(room.history.is_empty());
        assert!(room.submissions.is_empty());
        assert!(room.drafts_by_player.is_empty());
        assert_eq!(room.players.len(), 2);
    }

    #[test]
    fn results_phase_is_quiet() {
        let (mut room, _) = room_with_players(1);
        room.phase = Phase::Results;
        let step = room.tick(&mut SequenceRandom::new(vec![0]), 0);
        assert!(!step.changed);
        assert!(step.broadcasts.is_empty());
    }
}
