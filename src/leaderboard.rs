//! Scores and per-round awards
//!
//! The leaderboard is the single authority on points within a session.
//! Awards made during a round accumulate in the running round and are
//! merged when the round finishes, so each `roundEnded` can say what
//! everyone earned that round as well as in total.

use std::collections::HashMap;

use itertools::Itertools;
use serde::Serialize;

use super::watcher::Id;

/// A player's standing as sent to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreMessage {
    /// Display name of the player
    pub player_name: String,
    /// Total points in this session
    pub score: u64,
}

/// Points a player earned in one round
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundAward {
    /// Display name of the player
    pub player_name: String,
    /// Points earned that round
    pub points: u64,
}

/// Tracks scores for a game session
#[derive(Debug, Default, Clone)]
pub struct Leaderboard {
    /// Cumulative points of every player
    totals: HashMap<Id, u64>,
    /// Awards made in the running round, in the order they were made
    current: Vec<(Id, u64)>,
}

impl Leaderboard {
    /// Registers a player with a score of zero
    ///
    /// Registering a player who already has points keeps them.
    pub fn add_player(&mut self, id: Id) {
        self.totals.entry(id).or_insert(0);
    }

    /// Adds points to a player in the running round
    pub fn award(&mut self, id: Id, points: u64) {
        *self.totals.entry(id).or_insert(0) += points;
        self.current.push((id, points));
    }

    /// Closes the running round and returns its awards merged per player
    ///
    /// Players who earned nothing are left out. The result is ordered by
    /// points, highest first.
    pub fn finish_round(&mut self) -> Vec<(Id, u64)> {
        std::mem::take(&mut self.current)
            .into_iter()
            .sorted_by_key(|(id, _)| *id)
            .coalesce(|(id1, points1), (id2, points2)| {
                if id1 == id2 {
                    Ok((id1, points1 + points2))
                } else {
                    Err(((id1, points1), (id2, points2)))
                }
            })
            .filter(|(_, points)| *points > 0)
            .sorted_by_key(|(_, points)| std::cmp::Reverse(*points))
            .collect_vec()
    }

    /// Forgets a player's score
    pub fn remove(&mut self, id: Id) {
        self.totals.remove(&id);
        self.current.retain(|(player, _)| *player != id);
    }

    /// Current total of a player, zero for unknown players
    pub fn score(&self, id: Id) -> u64 {
        self.totals.get(&id).copied().unwrap_or_default()
    }

    /// Totals for the given players, in the order given
    pub fn scores<'a, I: IntoIterator<Item = &'a Id>>(&self, players: I) -> Vec<(Id, u64)> {
        players
            .into_iter()
            .map(|id| (*id, self.score(*id)))
            .collect()
    }
}
