//! Outbound channel to a single player
//!
//! The game logic never touches sockets. It reaches players through a
//! [`Tunnel`], which the server implements on top of WebSocket connections
//! and the tests implement with an in-memory recorder.

use super::{SyncMessage, UpdateMessage};

/// Trait for sending messages to one connected player
pub trait Tunnel {
    /// Sends an incremental update, such as a stroke or a score change
    fn send_message(&self, message: &UpdateMessage);

    /// Sends a full snapshot of the session
    ///
    /// Used when a player creates, joins or resumes a session.
    fn send_state(&self, state: &SyncMessage);

    /// Closes the channel; nothing more will be sent through it
    fn close(self);
}
