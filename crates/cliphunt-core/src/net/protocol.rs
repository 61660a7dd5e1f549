use crate::player::MAX_NAME_CHARS;
use crate::room::{MAX_CATEGORIES, MAX_CATEGORY_ID_LEN, MAX_CHAT_CHARS, MAX_URL_CHARS};
use crate::session::MAX_TOKEN_LEN;

use super::messages::{ClientMessage, ServerMessage};

/// Maximum inbound frame size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024; // 16 KiB

/// Longest raw category list accepted before cleaning.
pub const MAX_RAW_CATEGORIES: usize = MAX_CATEGORIES * 4;

/// Upper bound for opaque ids sent by clients (entries, chat messages).
pub const MAX_ID_LEN: usize = 64;

#[derive(Debug)]
pub enum ProtocolError {
    EmptyMessage,
    PayloadTooLarge(usize),
    SerializeError(String),
    DeserializeError(String),
    /// Parsed, but a field is outside its allowed range.
    Invalid(&'static str),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::PayloadTooLarge(size) => {
                write!(
                    f,
                    "payload too large: {size} bytes (max {MAX_MESSAGE_SIZE})"
                )
            },
            Self::SerializeError(e) => write!(f, "serialize error: {e}"),
            Self::DeserializeError(e) => write!(f, "invalid message: {e}"),
            Self::Invalid(reason) => write!(f, "invalid message: {reason}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Parse and validate one inbound text frame.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(text.len()));
    }
    if text.trim().is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    let msg: ClientMessage =
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializeError(e.to_string()))?;
    validate(&msg)?;
    Ok(msg)
}

pub fn encode_client_message(msg: &ClientMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::SerializeError(e.to_string()))
}

pub fn encode_server_message(msg: &ServerMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::SerializeError(e.to_string()))
}

pub fn decode_server_message(text: &str) -> Result<ServerMessage, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}

fn char_len_within(s: &str, min: usize, max: usize) -> bool {
    let len = s.chars().count();
    (min..=max).contains(&len)
}

fn check(ok: bool, reason: &'static str) -> Result<(), ProtocolError> {
    if ok {
        Ok(())
    } else {
        Err(ProtocolError::Invalid(reason))
    }
}

/// Length and range constraints that serde cannot express.
fn validate(msg: &ClientMessage) -> Result<(), ProtocolError> {
    match msg {
        ClientMessage::Hello(m) => {
            if let Some(token) = &m.session_token {
                check(token.len() <= MAX_TOKEN_LEN, "sessionToken too long")?;
            }
        },
        ClientMessage::UpdateName(m) => {
            check(char_len_within(m.name.trim(), 1, MAX_NAME_CHARS), "name must be 1-24 characters")?;
        },
        ClientMessage::Chat(m) => {
            check(
                char_len_within(m.message.trim(), 1, MAX_CHAT_CHARS),
                "message must be 1-240 characters",
            )?;
        },
        ClientMessage::UpdateCategories(m) => {
            check(m.categories.len() <= MAX_RAW_CATEGORIES, "too many categories")?;
            for c in &m.categories {
                check(c.name.len() <= 256, "category name too long")?;
                if let Some(id) = &c.id {
                    check(id.len() <= 256, "category id too long")?;
                }
            }
        },
        ClientMessage::SaveDraft(m) => {
            check(char_len_within(&m.category_id, 1, MAX_CATEGORY_ID_LEN), "bad categoryId")?;
            check(char_len_within(&m.url, 0, MAX_URL_CHARS), "url too long")?;
        },
        ClientMessage::SubmitSubmission(m) => {
            check(char_len_within(&m.category_id, 1, MAX_CATEGORY_ID_LEN), "bad categoryId")?;
            check(
                char_len_within(m.url.trim(), 1, MAX_URL_CHARS),
                "url must be 1-400 characters",
            )?;
        },
        ClientMessage::VoteSubmission(m) => {
            check(char_len_within(&m.entry_id, 1, MAX_ID_LEN), "bad entryId")?;
        },
        ClientMessage::Report(m) => {
            check(char_len_within(&m.message_id, 1, MAX_ID_LEN), "bad messageId")?;
        },
        ClientMessage::VoteTime(_)
        | ClientMessage::StartHunt
        | ClientMessage::ResetMatch
        | ClientMessage::RpsChoice(_) => {},
    }
    Ok(())
}
