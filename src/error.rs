//! Reason codes reported to clients
//!
//! Every rejected action is answered with exactly one of these codes, sent
//! only to the connection that caused it. None of them ends a session.

use serde::Serialize;
use thiserror::Error;

use crate::{names, session_id, watcher};

/// Recoverable failures, serialized as camelCase reason codes
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Error {
    /// No live session has the requested ID
    #[error("session not found")]
    SessionNotFound,
    /// Another player in the session already uses the name
    #[error("name already in-use")]
    NameTaken,
    /// The action is reserved for a different role this round
    #[error("not your turn")]
    NotYourTurn,
    /// The action needs a round in progress
    #[error("no round in progress")]
    RoundNotActive,
    /// The player already guessed the word this round
    #[error("already guessed this round")]
    AlreadyGuessed,
    /// The player is sending messages too quickly
    #[error("too many messages")]
    RateLimited,
    /// The name is empty, too long or inappropriate
    #[error("invalid name")]
    InvalidName,
    /// The session has reached its player limit
    #[error("session is full")]
    SessionFull,
    /// The connection is not bound to the session the action names
    #[error("not in this session")]
    NotInSession,
    /// The connection already belongs to a session
    #[error("already in a session")]
    AlreadyInSession,
    /// The message would reveal the secret word
    #[error("message reveals the word")]
    RevealsWord,
    /// Too few players are connected to start a round
    #[error("not enough players")]
    NotEnoughPlayers,
    /// The payload could not be understood
    #[error("malformed message")]
    Malformed,
}

impl From<names::Error> for Error {
    fn from(error: names::Error) -> Self {
        match error {
            names::Error::Used => Self::NameTaken,
            names::Error::Empty | names::Error::TooLong | names::Error::Sinful => {
                Self::InvalidName
            }
        }
    }
}

impl From<watcher::Error> for Error {
    fn from(error: watcher::Error) -> Self {
        match error {
            watcher::Error::MaximumPlayers => Self::SessionFull,
        }
    }
}

impl From<session_id::ParseError> for Error {
    fn from(_: session_id::ParseError) -> Self {
        Self::SessionNotFound
    }
}
