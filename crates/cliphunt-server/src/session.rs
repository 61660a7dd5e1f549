use std::collections::HashMap;

use cliphunt_core::player::PlayerId;

use crate::rate_limit::Cooldowns;

/// Process-unique id of one WebSocket connection.
pub type SocketId = u64;

/// Per-connection state. Never persisted.
#[derive(Debug, Clone)]
pub struct Session {
    pub socket_id: SocketId,
    pub player_id: Option<PlayerId>,
    pub token: Option<String>,
    pub cooldowns: Cooldowns,
    /// Set on a session evicted by a newer socket with the same token.
    pub replaced_by_new: bool,
}

impl Session {
    fn new(socket_id: SocketId) -> Self {
        Self {
            socket_id,
            player_id: None,
            token: None,
            cooldowns: Cooldowns::default(),
            replaced_by_new: false,
        }
    }
}

/// Live sessions of one room, indexed both ways: `socket → session` and
/// `token → socket`. Both maps are updated together on every change.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SocketId, Session>,
    sockets_by_token: HashMap<String, SocketId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an unauthenticated session for a freshly attached socket.
    pub fn attach(&mut self, socket_id: SocketId) {
        self.sessions
            .entry(socket_id)
            .or_insert_with(|| Session::new(socket_id));
    }

    /// Drop the socket's session and, if it still holds its token, the
    /// token binding.
    pub fn detach(&mut self, socket_id: SocketId) -> Option<Session> {
        let session = self.sessions.remove(&socket_id)?;
        if let Some(token) = &session.token
            && self.sockets_by_token.get(token) == Some(&socket_id)
        {
            self.sockets_by_token.remove(token);
        }
        Some(session)
    }

    /// Make `socket_id` the sole holder of `token`. Returns the session that
    /// held it before, marked replaced and already removed; the caller
    /// closes its socket.
    pub fn bind_socket(
        &mut self,
        token: &str,
        socket_id: SocketId,
        player_id: &PlayerId,
    ) -> Option<Session> {
        if let Some(session) = self.sessions.get_mut(&socket_id) {
            session.player_id = Some(player_id.clone());
            session.token = Some(token.to_string());
        }

        let previous = self.sockets_by_token.insert(token.to_string(), socket_id)?;
        if previous == socket_id {
            return None;
        }
        let mut old = self.sessions.remove(&previous)?;
        old.replaced_by_new = true;
        tracing::debug!(
            socket_id = previous,
            replaced_by = socket_id,
            "Session replaced by newer socket"
        );
        Some(old)
    }

    pub fn get(&self, socket_id: SocketId) -> Option<&Session> {
        self.sessions.get(&socket_id)
    }

    pub fn get_mut(&mut self, socket_id: SocketId) -> Option<&mut Session> {
        self.sessions.get_mut(&socket_id)
    }

    /// Socket currently bound to `token`.
    pub fn socket_for_token(&self, token: &str) -> Option<SocketId> {
        self.sockets_by_token.get(token).copied()
    }

    /// Whether any live socket is authenticated as `player_id`.
    pub fn has_live_socket(&self, player_id: &str) -> bool {
        self.sessions
            .values()
            .any(|s| s.player_id.as_deref() == Some(player_id))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
