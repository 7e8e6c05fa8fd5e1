//! Session registry
//!
//! Maps session IDs to running sessions. The map is the only structure
//! shared by every connection; the sessions themselves are owned by their
//! own tasks and reached through [`SessionHandle`]s.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use tracing::info;

use crate::{
    config::Options,
    error::Error,
    game::{Game, IncomingMessage},
    names,
    runner::{self, SessionHandle},
    session::Tunnel,
    session_id::SessionId,
    watcher::Id,
    word_bank::WordBank,
};

/// All live sessions
#[derive(Debug)]
pub struct Registry<T> {
    sessions: DashMap<SessionId, SessionHandle<T>>,
    options: Options,
    bank: Arc<WordBank>,
}

impl<T: Tunnel + Clone + Send + Sync + 'static> Registry<T> {
    /// Creates an empty registry whose sessions share `bank`
    pub fn new(options: Options, bank: Arc<WordBank>) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            options,
            bank,
        })
    }

    /// Starts a new session with the requester as its first player
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidName` for an unusable name; no session is
    /// created in that case.
    pub async fn create(
        self: &Arc<Self>,
        player: Id,
        connection: Id,
        player_name: &str,
        tunnel: T,
    ) -> Result<SessionHandle<T>, Error> {
        names::clean_name(player_name)?;

        let handle = loop {
            let session_id = SessionId::new();
            if let Entry::Vacant(entry) = self.sessions.entry(session_id) {
                let game = Game::new(session_id, self.options, Arc::clone(&self.bank));
                let handle = runner::spawn(game, Arc::clone(self), self.options.idle_timeout);
                entry.insert(handle.clone());
                break handle;
            }
        };

        info!(session = %handle.session_id(), sessions = self.len(), "session created");

        if let Err(e) = handle
            .join(player, connection, player_name, true, tunnel)
            .await
        {
            handle.shutdown().await;
            return Err(e);
        }

        Ok(handle)
    }

    /// Adds a player to an existing session
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionNotFound` for an unknown ID, or the session's
    /// rejection (`NameTaken`, `InvalidName`, `SessionFull`).
    pub async fn join(
        &self,
        session_id: SessionId,
        player: Id,
        connection: Id,
        player_name: &str,
        tunnel: T,
    ) -> Result<SessionHandle<T>, Error> {
        let handle = self.get(session_id).ok_or(Error::SessionNotFound)?;
        handle
            .join(player, connection, player_name, false, tunnel)
            .await?;
        Ok(handle)
    }

    /// Rebinds a dropped player of a session to a new connection
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionNotFound` for an unknown ID and
    /// `Error::NotInSession` when the player's seat is gone.
    pub async fn resume(
        &self,
        session_id: SessionId,
        player: Id,
        connection: Id,
        tunnel: T,
    ) -> Result<SessionHandle<T>, Error> {
        let handle = self.get(session_id).ok_or(Error::SessionNotFound)?;
        handle.resume(player, connection, tunnel).await?;
        Ok(handle)
    }

    /// Removes a player from a session
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionNotFound` for an unknown ID.
    pub async fn remove(&self, session_id: SessionId, player: Id) -> Result<(), Error> {
        let handle = self.get(session_id).ok_or(Error::SessionNotFound)?;
        handle.send(player, IncomingMessage::LeaveGame).await
    }

    /// Looks up a live session
    pub fn get(&self, session_id: SessionId) -> Option<SessionHandle<T>> {
        self.sessions
            .get(&session_id)
            .map(|handle| handle.clone())
            .filter(|handle| !handle.is_closed())
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is running
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Forgets a session; called by the session itself when it stops
    pub fn destroy(&self, session_id: SessionId) -> bool {
        let removed = self.sessions.remove(&session_id).is_some();
        if removed {
            info!(session = %session_id, sessions = self.len(), "session destroyed");
        }
        removed
    }
}
