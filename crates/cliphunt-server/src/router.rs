//! Inbound frame handling for one room.
//!
//! The router is synchronous: the actor hands it the room, the session
//! registry, the raw frame and the current time, and gets back the frames
//! to deliver. Handlers validate before they mutate, so a rejected frame
//! never leaves partial state behind.

use std::sync::Arc;

use uuid::Uuid;

use cliphunt_core::moderation::Moderation;
use cliphunt_core::net::messages::{
    ClientMessage, HelloMsg, ReportReceivedMsg, ServerMessage, SubmissionSavedMsg, TimeDirection,
};
use cliphunt_core::net::protocol::decode_client_message;
use cliphunt_core::player::{PlayerId, clean_display_name};
use cliphunt_core::room::{ChatMessage, Phase, RoomState, TimeVote, clean_categories};
use cliphunt_core::tally::RandomSource;

use crate::error::RouteError;
use crate::rate_limit::Action;
use crate::session::{Session, SessionRegistry, SocketId};

/// Who receives a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Caller,
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub target: Target,
    pub message: ServerMessage,
}

/// Everything one turn produced.
#[derive(Debug, Default)]
pub struct Outcome {
    pub deliveries: Vec<Delivery>,
    /// The room changed and must be snapshotted before the next turn.
    pub persist: bool,
    /// Session displaced by this turn's `hello`; its socket gets closed.
    pub evicted: Option<Session>,
}

impl Outcome {
    fn caller(mut self, message: ServerMessage) -> Self {
        self.deliveries.push(Delivery {
            target: Target::Caller,
            message,
        });
        self
    }

    fn all(mut self, message: ServerMessage) -> Self {
        self.deliveries.push(Delivery {
            target: Target::All,
            message,
        });
        self
    }

    fn all_of(mut self, messages: impl IntoIterator<Item = ServerMessage>) -> Self {
        self.deliveries.extend(messages.into_iter().map(|message| Delivery {
            target: Target::All,
            message,
        }));
        self
    }

    fn persisted(mut self) -> Self {
        self.persist = true;
        self
    }
}

type Handled = Result<Outcome, RouteError>;

pub struct MessageRouter {
    moderation: Arc<dyn Moderation>,
    rng: Box<dyn RandomSource>,
}

impl MessageRouter {
    pub fn new(moderation: Arc<dyn Moderation>, rng: Box<dyn RandomSource>) -> Self {
        Self { moderation, rng }
    }

    /// Random source shared with scheduler ticks.
    pub fn rng(&mut self) -> &mut dyn RandomSource {
        self.rng.as_mut()
    }

    /// Handle one inbound text frame from `socket_id`.
    pub fn handle(
        &mut self,
        room: &mut RoomState,
        sessions: &mut SessionRegistry,
        socket_id: SocketId,
        raw: &str,
        now: i64,
    ) -> Outcome {
        match self.dispatch(room, sessions, socket_id, raw, now) {
            Ok(outcome) => outcome,
            Err(err) => match err.client_message() {
                Some(text) => {
                    tracing::debug!(socket_id, error = %err, "Frame rejected");
                    Outcome::default().caller(ServerMessage::error(text))
                },
                None => {
                    tracing::debug!(socket_id, reason = %err, "Frame dropped");
                    Outcome::default()
                },
            },
        }
    }

    fn dispatch(
        &mut self,
        room: &mut RoomState,
        sessions: &mut SessionRegistry,
        socket_id: SocketId,
        raw: &str,
        now: i64,
    ) -> Handled {
        let msg = decode_client_message(raw).map_err(|e| RouteError::Invalid(e.to_string()))?;

        if let ClientMessage::Hello(hello) = msg {
            return self.hello(room, sessions, socket_id, hello, now);
        }

        let player_id = sessions
            .get(socket_id)
            .and_then(|s| s.player_id.clone())
            .ok_or(RouteError::NotAuthenticated)?;
        tracing::trace!(socket_id, player_id = %player_id, kind = msg.kind(), "Dispatching");

        match msg {
            ClientMessage::Hello(_) => Err(RouteError::Ignored("hello already handled")),
            ClientMessage::UpdateName(m) => self.update_name(room, &player_id, &m.name),
            ClientMessage::Chat(m) => self.chat(room, sessions, socket_id, &player_id, &m.message, now),
            ClientMessage::VoteTime(m) => {
                vote_time(room, sessions, socket_id, &player_id, m.direction, now)
            },
            ClientMessage::StartHunt => {
                require_host(room, &player_id)?;
                if !room.start_hunt() {
                    return Err(RouteError::Ignored("hunt can only start from the lobby"));
                }
                tracing::info!(player_id = %player_id, "Hunt started");
                Ok(Outcome::default().all(room.timer_message()).persisted())
            },
            ClientMessage::ResetMatch => {
                require_host(room, &player_id)?;
                room.reset_match();
                tracing::info!(player_id = %player_id, "Match reset");
                Ok(Outcome::default()
                    .all(room.timer_message())
                    .all(room.scoreboard_message())
                    .persisted())
            },
            ClientMessage::UpdateCategories(m) => {
                require_host(room, &player_id)?;
                if room.phase != Phase::Lobby {
                    return Err(RouteError::Ignored("categories are fixed after the lobby"));
                }
                let cleaned =
                    clean_categories(&m.categories).map_err(|e| RouteError::Rejected(e.to_string()))?;
                let changed = room.replace_categories(cleaned);
                let outcome = Outcome::default().all(room.categories_message());
                Ok(if changed { outcome.persisted() } else { outcome })
            },
            ClientMessage::SaveDraft(m) => {
                if !matches!(room.phase, Phase::Lobby | Phase::Hunt) {
                    return Err(RouteError::Ignored("drafts are closed"));
                }
                if !room.has_category(&m.category_id) {
                    return Err(RouteError::Ignored("unknown category"));
                }
                room.save_draft(&player_id, &m.category_id, m.url.trim());
                Ok(Outcome::default()
                    .caller(room.drafts_message(&player_id))
                    .persisted())
            },
            ClientMessage::SubmitSubmission(m) => {
                if room.phase != Phase::Hunt {
                    return Err(RouteError::Ignored("submissions are closed"));
                }
                if !room.has_category(&m.category_id) {
                    return Err(RouteError::Ignored("unknown category"));
                }
                let submission =
                    room.upsert_submission(&player_id, &m.category_id, m.url.trim(), now);
                Ok(Outcome::default()
                    .caller(ServerMessage::SubmissionSaved(SubmissionSavedMsg { submission }))
                    .persisted())
            },
            ClientMessage::VoteSubmission(m) => {
                let session = session_mut(sessions, socket_id)?;
                if !session.cooldowns.ready(Action::Vote, now) {
                    return Err(RouteError::Ignored("vote cooldown"));
                }
                if !room.voting_open() {
                    return Err(RouteError::Ignored("voting is closed"));
                }
                if !room.round.as_ref().is_some_and(|r| r.entries.iter().any(|e| e.id == m.entry_id)) {
                    return Err(RouteError::Ignored("unknown entry"));
                }
                session.cooldowns.stamp(Action::Vote, now);
                let changed = room.cast_vote(&player_id, &m.entry_id);
                // Ballots stay hidden until the round result
                Ok(if changed {
                    Outcome::default().persisted()
                } else {
                    Outcome::default()
                })
            },
            ClientMessage::RpsChoice(m) => {
                let broadcasts = room
                    .record_rps_choice(&player_id, m.choice, self.rng.as_mut(), now)
                    .ok_or(RouteError::Ignored("no tiebreak choice expected"))?;
                Ok(Outcome::default().all_of(broadcasts).persisted())
            },
            ClientMessage::Report(m) => {
                let session = session_mut(sessions, socket_id)?;
                if !session.cooldowns.ready(Action::Report, now) {
                    return Err(RouteError::Ignored("report cooldown"));
                }
                let report_id = Uuid::new_v4().to_string();
                let report = room
                    .add_report(report_id, &m.message_id, &player_id, now)
                    .ok_or(RouteError::Ignored("unknown or already reported message"))?;
                session.cooldowns.stamp(Action::Report, now);
                tracing::info!(
                    player_id = %player_id,
                    message_id = %report.message_id,
                    "Chat message reported"
                );
                Ok(Outcome::default()
                    .caller(ServerMessage::ReportReceived(ReportReceivedMsg {
                        message_id: report.message_id,
                    }))
                    .persisted())
            },
        }
    }

    fn hello(
        &mut self,
        room: &mut RoomState,
        sessions: &mut SessionRegistry,
        socket_id: SocketId,
        hello: HelloMsg,
        now: i64,
    ) -> Handled {
        let session = sessions
            .get(socket_id)
            .ok_or(RouteError::Ignored("socket not attached"))?;

        // Already identified: just repeat the welcome
        if let (Some(player_id), Some(token)) = (&session.player_id, &session.token) {
            return Ok(Outcome::default().caller(room.welcome_message(player_id, token)));
        }

        let resolution = room.session_tokens.resolve(hello.session_token.as_deref());
        let evicted = sessions.bind_socket(&resolution.token, socket_id, &resolution.player_id);
        let is_new_player = room.upsert_player(&resolution.player_id, now);
        room.ensure_host(&resolution.player_id);

        tracing::info!(
            socket_id,
            player_id = %resolution.player_id,
            new_token = resolution.is_new,
            new_player = is_new_player,
            replaced = ?evicted.as_ref().map(|s| s.socket_id),
            "Player said hello"
        );

        let mut outcome = Outcome::default()
            .caller(room.welcome_message(&resolution.player_id, &resolution.token))
            .all(room.presence_message())
            .persisted();
        outcome.evicted = evicted;
        Ok(outcome)
    }

    fn update_name(&self, room: &mut RoomState, player_id: &PlayerId, raw: &str) -> Handled {
        let name = clean_display_name(raw)
            .ok_or_else(|| RouteError::Invalid("Name must be 1-24 characters.".to_string()))?;
        if self.moderation.is_blocked(&name) {
            return Err(RouteError::Blocked);
        }
        if !room.rename_player(player_id, name) {
            return Err(RouteError::Ignored("name unchanged"));
        }
        Ok(Outcome::default().all(room.presence_message()).persisted())
    }

    fn chat(
        &self,
        room: &mut RoomState,
        sessions: &mut SessionRegistry,
        socket_id: SocketId,
        player_id: &PlayerId,
        raw: &str,
        now: i64,
    ) -> Handled {
        let session = session_mut(sessions, socket_id)?;
        if !session.cooldowns.ready(Action::Chat, now) {
            return Err(RouteError::SlowDown);
        }
        let text = raw.trim();
        if self.moderation.is_blocked(text) {
            return Err(RouteError::Blocked);
        }
        session.cooldowns.stamp(Action::Chat, now);

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            player_id: player_id.clone(),
            display_name: room.display_name(player_id).unwrap_or_default().to_string(),
            message: text.to_string(),
            created_at: now,
        };
        room.push_chat(message.clone());
        Ok(Outcome::default()
            .all(ServerMessage::Chat(message))
            .persisted())
    }

    /// A socket went away. The player is marked offline once no other socket
    /// holds their session, and the host role moves on if it was theirs.
    pub fn disconnect(
        &mut self,
        room: &mut RoomState,
        sessions: &mut SessionRegistry,
        socket_id: SocketId,
        now: i64,
    ) -> Outcome {
        let Some(session) = sessions.detach(socket_id) else {
            return Outcome::default();
        };
        let Some(player_id) = session.player_id else {
            return Outcome::default();
        };
        if sessions.has_live_socket(&player_id) {
            return Outcome::default();
        }

        room.mark_disconnected(&player_id, now);
        if room.reassign_host() {
            tracing::info!(
                previous = %player_id,
                host = ?room.host_id,
                "Host reassigned"
            );
        }
        tracing::info!(socket_id, player_id = %player_id, "Player disconnected");
        Outcome::default().all(room.presence_message()).persisted()
    }
}

fn require_host(room: &RoomState, player_id: &str) -> Result<(), RouteError> {
    if room.is_host(player_id) {
        Ok(())
    } else {
        Err(RouteError::Ignored("host-only action"))
    }
}

fn session_mut(sessions: &mut SessionRegistry, socket_id: SocketId) -> Result<&mut Session, RouteError> {
    sessions
        .get_mut(socket_id)
        .ok_or(RouteError::Ignored("socket not attached"))
}

fn vote_time(
    room: &mut RoomState,
    sessions: &mut SessionRegistry,
    socket_id: SocketId,
    player_id: &PlayerId,
    direction: TimeDirection,
    now: i64,
) -> Handled {
    if room.phase != Phase::Lobby {
        return Err(RouteError::Ignored("time votes only in the lobby"));
    }
    let session = session_mut(sessions, socket_id)?;
    if !session.cooldowns.ready(Action::Vote, now) {
        return Err(RouteError::Ignored("vote cooldown"));
    }
    session.cooldowns.stamp(Action::Vote, now);

    let vote = match direction {
        TimeDirection::Higher => Some(TimeVote::Higher),
        TimeDirection::Lower => Some(TimeVote::Lower),
        TimeDirection::Neutral => None,
    };
    if !room.set_time_vote(player_id, vote) {
        return Ok(Outcome::default());
    }
    Ok(Outcome::default().all(room.timer_message()).persisted())
}
