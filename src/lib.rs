//! # Drawguess
//!
//! Authoritative server for multiplayer draw-and-guess sessions. One player
//! draws a secret word while everyone else races to guess it; the server
//! owns every decision (turn order, the word, correctness and scores) and
//! relays strokes, chat and round transitions to the members of each
//! session.
//!
//! The pieces, from the inside out:
//!
//! * [`word_bank`] - the shared word list and per-session recent-word memory
//! * [`game`] - the session state machine, free of any runtime
//! * [`runner`] - one task per session that serializes every mutation
//! * [`registry`] - the concurrent map from session IDs to running sessions
//! * [`gateway`] - binds connections to players and routes inbound frames
//! * [`ws`] - the WebSocket transport used by the server binary

#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::ignored_unit_patterns)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::wildcard_imports)]
#![allow(clippy::missing_errors_doc)]
use serde::Serialize;

pub mod canvas;
pub mod config;
pub mod constants;
pub mod error;
pub mod game;
pub mod gateway;
pub mod leaderboard;
pub mod names;
pub mod rate_limit;
pub mod registry;
pub mod runner;
pub mod session;
pub mod session_id;
pub mod watcher;
pub mod word_bank;
pub mod ws;

/// Full-state messages sent to a single player
///
/// Serialized without a wrapper, so clients only ever see the inner event.
#[derive(Debug, Serialize, Clone, derive_more::From)]
#[serde(untagged)]
pub enum SyncMessage {
    /// Session snapshots
    Game(game::SyncMessage),
}

impl SyncMessage {
    /// Converts the sync message to a JSON string for transmission
    ///
    /// # Panics
    ///
    /// This method panics if serialization fails, which should never happen
    /// with the default JSON serializer for well-formed data.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }
}

/// Incremental updates sent to session members
#[derive(Debug, Serialize, Clone, derive_more::From)]
#[serde(untagged)]
pub enum UpdateMessage {
    /// Round, chat, score and membership events
    Game(game::UpdateMessage),
    /// Relayed drawing
    Canvas(canvas::UpdateMessage),
}

impl UpdateMessage {
    /// Converts the update message to a JSON string for transmission
    ///
    /// # Panics
    ///
    /// This method panics if serialization fails, which should never happen
    /// with the default JSON serializer for well-formed data.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }
}
