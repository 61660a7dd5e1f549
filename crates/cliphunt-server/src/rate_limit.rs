use tokio::time::Instant;

/// Actions throttled per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Chat,
    /// `vote_time` and `vote_submission` share one window.
    Vote,
    Report,
}

impl Action {
    pub const fn cooldown_ms(self) -> i64 {
        match self {
            Self::Chat => 800,
            Self::Vote => 400,
            Self::Report => 3000,
        }
    }
}

/// Last accepted time per throttled action, in epoch milliseconds.
#[derive(Debug, Clone, Default)]
pub struct Cooldowns {
    pub last_chat_at: Option<i64>,
    pub last_vote_at: Option<i64>,
    pub last_report_at: Option<i64>,
}

impl Cooldowns {
    fn slot(&mut self, action: Action) -> &mut Option<i64> {
        match action {
            Action::Chat => &mut self.last_chat_at,
            Action::Vote => &mut self.last_vote_at,
            Action::Report => &mut self.last_report_at,
        }
    }

    /// Whether `action` is allowed at `now`. Does not record anything.
    pub fn ready(&self, action: Action, now: i64) -> bool {
        let last = match action {
            Action::Chat => self.last_chat_at,
            Action::Vote => self.last_vote_at,
            Action::Report => self.last_report_at,
        };
        last.is_none_or(|last| now - last >= action.cooldown_ms())
    }

    pub fn stamp(&mut self, action: Action, now: i64) {
        *self.slot(action) = Some(now);
    }
}

/// Per-connection flood guard (token bucket), checked before a frame ever
/// reaches the room.
pub struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
}

impl TokenBucket {
    pub fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            tokens: max_tokens,
            last_refill: Instant::now(),
            max_tokens,
            refill_rate,
        }
    }

    /// Returns true if the frame is allowed; false if rate-limited.
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
