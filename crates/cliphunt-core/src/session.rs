use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::player::PlayerId;

/// Maximum accepted length of a client-supplied session token.
pub const MAX_TOKEN_LEN: usize = 128;

/// Persisted token → player mapping. Entries are only ever added, so a token
/// keeps resolving to the same player for the lifetime of the room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionTokens(HashMap<String, PlayerId>);

/// Outcome of resolving a hello handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub player_id: PlayerId,
    pub token: String,
    pub is_new: bool,
}

impl SessionTokens {
    /// Resolve `token` to its player, or mint a fresh player and token.
    /// Unknown tokens are treated like no token at all.
    pub fn resolve(&mut self, token: Option<&str>) -> Resolution {
        if let Some(token) = token
            && let Some(player_id) = self.0.get(token)
        {
            return Resolution {
                player_id: player_id.clone(),
                token: token.to_string(),
                is_new: false,
            };
        }

        let player_id = Uuid::new_v4().simple().to_string();
        let token = generate_session_token();
        self.0.insert(token.clone(), player_id.clone());
        Resolution {
            player_id,
            token,
            is_new: true,
        }
    }

    pub fn player_for(&self, token: &str) -> Option<&PlayerId> {
        self.0.get(token)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<HashMap<String, PlayerId>> for SessionTokens {
    fn from(map: HashMap<String, PlayerId>) -> Self {
        Self(map)
    }
}

fn generate_session_token() -> String {
    // Two v4 UUIDs give 244 random bits from the OS generator.
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_hello_mints_identity() {
        let mut tokens = SessionTokens::default();
        let r = tokens.resolve(None);
        assert!(r.is_new);
        assert_eq!(r.token.len(), 64);
        assert_eq!(tokens.player_for(&r.token), Some(&r.player_id));
    }

    #[test]
    fn known_token_resolves_to_same_player() {
        let mut tokens = SessionTokens::default();
        let first = tokens.resolve(None);
        for _ in 0..3 {
            let again = tokens.resolve(Some(&first.token));
            assert!(!again.is_new);
            assert_eq!(again.player_id, first.player_id);
            assert_eq!(again.token, first.token);
        }
        assert_eq!(tokens.len(), 1);
    }

    #[test]
    fn unknown_token_mints_new_pair() {
        let mut tokens = SessionTokens::default();
        let r = tokens.resolve(Some("forged"));
        assert!(r.is_new);
        assert_ne!(r.token, "forged");
        assert!(tokens.player_for("forged").is_none());
    }

    #[test]
    fn distinct_hellos_get_distinct_players() {
        let mut tokens = SessionTokens::default();
        let a = tokens.resolve(None);
        let b = tokens.resolve(None);
        assert_ne!(a.player_id, b.player_id);
        assert_ne!(a.token, b.token);
    }
}
