use std::time::Duration;

use tokio::time::Instant;

use cliphunt_core::room::{Phase, RoomState};

/// How often a room in its current state needs a wake-up, or `None` when
/// nothing happens without client input.
pub fn cadence(room: &RoomState) -> Option<Duration> {
    match room.phase {
        Phase::Lobby if room.has_connected_intent() => Some(Duration::from_secs(u64::from(
            room.settings.vote_tick_seconds.max(1),
        ))),
        Phase::Lobby | Phase::Results => None,
        Phase::Hunt | Phase::Intermission | Phase::Rounds => Some(Duration::from_secs(1)),
    }
}

/// The room's single pending wake-up.
///
/// Re-synced after every turn. An armed deadline is kept as long as the
/// cadence still asks for one, so a stream of client frames cannot keep
/// pushing the next tick back.
#[derive(Debug, Default)]
pub struct Alarm {
    deadline: Option<Instant>,
}

impl Alarm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Consume the deadline after it fired.
    pub fn fire(&mut self) {
        self.deadline = None;
    }

    /// Bring the deadline in line with the room's cadence.
    pub fn sync(&mut self, room: &RoomState, now: Instant) {
        match cadence(room) {
            None => self.deadline = None,
            Some(every) => {
                let latest = now + every;
                self.deadline = Some(match self.deadline {
                    Some(at) if at <= latest => at,
                    _ => latest,
                });
            },
        }
    }

    /// Resolve when the deadline passes; never resolves while disarmed.
    pub async fn wait(&self) {
        match self.deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }
}
