//! Session membership and message fan-out
//!
//! This module tracks the players of one session in turn order, whether each
//! of them is currently connected, and whose turn it is to draw. It also
//! provides the helpers that send messages to one member or broadcast them
//! to the whole session through a [`Tunnel`].

use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    str::FromStr,
};

use enum_map::{Enum, EnumMap};
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;
use uuid::Uuid;

use super::{SyncMessage, UpdateMessage, session::Tunnel};

/// A unique identifier for players and connections
///
/// A player keeps its ID for the whole session, including across a
/// reconnect, so the ID doubles as the token used to resume a seat.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub struct Id(Uuid);

impl Id {
    /// Creates a new random ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Id {
    /// Creates a new random ID (same as `new()`)
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Id {
    /// Formats the ID as a UUID string
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Id {
    type Err = uuid::Error;

    /// Parses an ID from a UUID string
    ///
    /// # Errors
    ///
    /// Returns a `uuid::Error` if the string is not a valid UUID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// Whether a member currently has a live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum, Serialize, Deserialize)]
pub enum Presence {
    /// The member's connection is up
    Connected,
    /// The member dropped and is inside the reconnect grace period
    Disconnected,
}

/// Errors that can occur when managing watchers
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The session has reached the maximum number of allowed players
    #[error("maximum number of players reached")]
    MaximumPlayers,
}

/// Manages all members of a game session
///
/// Insertion order is turn order. The drawer is tracked as a position in
/// that order, so removing a member never loses track of whose turn is next.
#[derive(Debug)]
pub struct Watchers {
    /// Members in the order they joined
    order: Vec<Id>,
    /// Presence of each member
    mapping: HashMap<Id, Presence>,
    /// Members grouped by presence for quick counting
    reverse_mapping: EnumMap<Presence, HashSet<Id>>,
    /// Position in `order` of the most recent drawer
    last_turn: Option<usize>,
    /// Maximum number of members
    capacity: usize,
}

impl Watchers {
    /// Creates an empty membership list holding at most `capacity` members
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            order: Vec::new(),
            mapping: HashMap::new(),
            reverse_mapping: EnumMap::default(),
            last_turn: None,
            capacity: capacity.min(crate::constants::session::MAX_PLAYER_COUNT),
        }
    }

    /// Adds a connected member at the end of the turn order
    ///
    /// Adding an existing member only marks it connected.
    ///
    /// # Errors
    ///
    /// Returns `Error::MaximumPlayers` if the session is full.
    pub fn add_watcher(&mut self, watcher_id: Id) -> Result<(), Error> {
        if self.mapping.contains_key(&watcher_id) {
            self.set_presence(watcher_id, Presence::Connected);
            return Ok(());
        }

        if self.order.len() >= self.capacity {
            return Err(Error::MaximumPlayers);
        }

        self.order.push(watcher_id);
        self.mapping.insert(watcher_id, Presence::Connected);
        self.reverse_mapping[Presence::Connected].insert(watcher_id);

        Ok(())
    }

    /// Removes a member, keeping the turn pointer on the same next player
    ///
    /// Returns `false` if the ID was not a member.
    pub fn remove_watcher(&mut self, watcher_id: Id) -> bool {
        let Some(presence) = self.mapping.remove(&watcher_id) else {
            return false;
        };
        self.reverse_mapping[presence].remove(&watcher_id);

        if let Some(index) = self.order.iter().position(|id| *id == watcher_id) {
            self.order.remove(index);
            self.last_turn = match self.last_turn {
                _ if self.order.is_empty() => None,
                Some(turn) if turn > index => Some(turn - 1),
                Some(turn) if turn == index => index.checked_sub(1),
                other => other,
            };
        }

        true
    }

    /// Updates whether a member is connected
    pub fn set_presence(&mut self, watcher_id: Id, presence: Presence) {
        let Some(old) = self.mapping.get_mut(&watcher_id) else {
            return;
        };
        if *old != presence {
            self.reverse_mapping[*old].remove(&watcher_id);
            self.reverse_mapping[presence].insert(watcher_id);
            *old = presence;
        }
    }

    /// Gets the presence of a member, or `None` for strangers
    pub fn presence(&self, watcher_id: Id) -> Option<Presence> {
        self.mapping.get(&watcher_id).copied()
    }

    /// Checks if an ID belongs to the session
    pub fn has_watcher(&self, watcher_id: Id) -> bool {
        self.mapping.contains_key(&watcher_id)
    }

    /// Checks if a member is currently connected
    pub fn is_connected(&self, watcher_id: Id) -> bool {
        self.presence(watcher_id) == Some(Presence::Connected)
    }

    /// Counts the members with the given presence
    pub fn specific_count(&self, filter: Presence) -> usize {
        self.reverse_mapping[filter].len()
    }

    /// Total number of members, connected or not
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the session has no members left
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Members in turn order
    pub fn turn_order(&self) -> &[Id] {
        &self.order
    }

    /// Connected members in turn order
    pub fn connected(&self) -> impl Iterator<Item = Id> + '_ {
        self.order
            .iter()
            .copied()
            .filter(|id| self.is_connected(*id))
    }

    /// Moves the turn to the next connected member and returns it
    ///
    /// The search wraps around the turn order and skips disconnected
    /// members. Returns `None` when nobody is connected.
    pub fn advance_turn(&mut self) -> Option<Id> {
        let count = self.order.len();
        let start = self.last_turn.map_or(0, |turn| turn + 1);

        let index = (0..count)
            .map(|offset| (start + offset) % count)
            .find(|index| self.is_connected(self.order[*index]))?;

        self.last_turn = Some(index);
        Some(self.order[index])
    }

    /// Closes the tunnel of a member, if it has one
    pub fn remove_watcher_session<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        watcher_id: Id,
        tunnel_finder: F,
    ) {
        if let Some(x) = tunnel_finder(watcher_id) {
            x.close();
        }
    }

    /// Sends an update message to a specific member
    pub fn send_message<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &UpdateMessage,
        watcher_id: Id,
        tunnel_finder: F,
    ) {
        let Some(session) = tunnel_finder(watcher_id) else {
            return;
        };

        session.send_message(message);
    }

    /// Sends a state synchronization message to a specific member
    pub fn send_state<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &SyncMessage,
        watcher_id: Id,
        tunnel_finder: F,
    ) {
        let Some(session) = tunnel_finder(watcher_id) else {
            return;
        };

        session.send_state(message);
    }

    /// Sends personalized messages to every member using a sender function
    ///
    /// The sender is called once per member with a live tunnel and may
    /// return `None` to skip that member.
    pub fn announce_with<S, T: Tunnel, F: Fn(Id) -> Option<T>>(&self, sender: S, tunnel_finder: F)
    where
        S: Fn(Id) -> Option<UpdateMessage>,
    {
        for watcher in &self.order {
            let Some(session) = tunnel_finder(*watcher) else {
                continue;
            };
            let Some(message) = sender(*watcher) else {
                continue;
            };

            session.send_message(&message);
        }
    }

    /// Broadcasts an update message to every member
    pub fn announce<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &UpdateMessage,
        tunnel_finder: F,
    ) {
        self.announce_with(|_| Some(message.to_owned()), tunnel_finder);
    }

    /// Broadcasts an update message to every member but one
    pub fn announce_except<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &UpdateMessage,
        except: Id,
        tunnel_finder: F,
    ) {
        self.announce_with(
            |id| (id != except).then(|| message.to_owned()),
            tunnel_finder,
        );
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::game;

    #[derive(Clone, Default)]
    struct MockTunnel {
        messages: Arc<Mutex<Vec<String>>>,
        closed: Arc<Mutex<bool>>,
    }

    impl Tunnel for MockTunnel {
        fn send_message(&self, message: &UpdateMessage) {
            self.messages.lock().unwrap().push(message.to_message());
        }

        fn send_state(&self, state: &SyncMessage) {
            self.messages.lock().unwrap().push(state.to_message());
        }

        fn close(self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    fn watchers_with(count: usize) -> (Watchers, Vec<Id>) {
        let mut watchers = Watchers::with_capacity(16);
        let ids: Vec<Id> = (0..count).map(|_| Id::new()).collect();
        for id in &ids {
            watchers.add_watcher(*id).unwrap();
        }
        (watchers, ids)
    }

    #[test]
    fn test_id_round_trips_through_string() {
        let id = Id::new();
        assert_eq!(Id::from_str(&id.to_string()).unwrap(), id);
        assert!(Id::from_str("not-a-uuid").is_err());
    }

    #[test]
    fn test_add_watcher_respects_capacity() {
        let mut watchers = Watchers::with_capacity(2);
        assert!(watchers.add_watcher(Id::new()).is_ok());
        assert!(watchers.add_watcher(Id::new()).is_ok());
        assert_eq!(
            watchers.add_watcher(Id::new()),
            Err(Error::MaximumPlayers)
        );
        assert_eq!(watchers.len(), 2);
    }

    #[test]
    fn test_presence_counts() {
        let (mut watchers, ids) = watchers_with(3);
        assert_eq!(watchers.specific_count(Presence::Connected), 3);

        watchers.set_presence(ids[1], Presence::Disconnected);
        assert_eq!(watchers.specific_count(Presence::Connected), 2);
        assert_eq!(watchers.specific_count(Presence::Disconnected), 1);
        assert!(!watchers.is_connected(ids[1]));

        watchers.add_watcher(ids[1]).unwrap();
        assert!(watchers.is_connected(ids[1]));
        assert_eq!(watchers.len(), 3);
    }

    #[test]
    fn test_advance_turn_round_robin() {
        let (mut watchers, ids) = watchers_with(3);

        assert_eq!(watchers.advance_turn(), Some(ids[0]));
        assert_eq!(watchers.advance_turn(), Some(ids[1]));
        assert_eq!(watchers.advance_turn(), Some(ids[2]));
        assert_eq!(watchers.advance_turn(), Some(ids[0]));
    }

    #[test]
    fn test_advance_turn_skips_disconnected() {
        let (mut watchers, ids) = watchers_with(3);
        watchers.set_presence(ids[1], Presence::Disconnected);

        assert_eq!(watchers.advance_turn(), Some(ids[0]));
        assert_eq!(watchers.advance_turn(), Some(ids[2]));
        assert_eq!(watchers.advance_turn(), Some(ids[0]));
    }

    #[test]
    fn test_advance_turn_nobody_connected() {
        let (mut watchers, ids) = watchers_with(2);
        for id in &ids {
            watchers.set_presence(*id, Presence::Disconnected);
        }
        assert_eq!(watchers.advance_turn(), None);

        let mut empty = Watchers::with_capacity(4);
        assert_eq!(empty.advance_turn(), None);
    }

    #[test]
    fn test_removing_current_drawer_passes_turn_to_next() {
        let (mut watchers, ids) = watchers_with(3);
        assert_eq!(watchers.advance_turn(), Some(ids[0]));
        assert_eq!(watchers.advance_turn(), Some(ids[1]));

        assert!(watchers.remove_watcher(ids[1]));
        assert_eq!(watchers.advance_turn(), Some(ids[2]));
    }

    #[test]
    fn test_removing_first_drawer_passes_turn_to_next() {
        let (mut watchers, ids) = watchers_with(3);
        assert_eq!(watchers.advance_turn(), Some(ids[0]));

        watchers.remove_watcher(ids[0]);
        assert_eq!(watchers.advance_turn(), Some(ids[1]));
    }

    #[test]
    fn test_removing_earlier_member_keeps_turn() {
        let (mut watchers, ids) = watchers_with(4);
        watchers.advance_turn();
        watchers.advance_turn();
        assert_eq!(watchers.advance_turn(), Some(ids[2]));

        watchers.remove_watcher(ids[0]);
        assert_eq!(watchers.advance_turn(), Some(ids[3]));
        assert_eq!(watchers.advance_turn(), Some(ids[1]));
    }

    #[test]
    fn test_remove_unknown_watcher() {
        let (mut watchers, _) = watchers_with(1);
        assert!(!watchers.remove_watcher(Id::new()));
        assert_eq!(watchers.len(), 1);
    }

    #[test]
    fn test_announce_except_skips_one_member() {
        let (watchers, ids) = watchers_with(3);
        let tunnels: HashMap<Id, MockTunnel> =
            ids.iter().map(|id| (*id, MockTunnel::default())).collect();
        let finder = |id: Id| tunnels.get(&id).cloned();

        let message: UpdateMessage = game::UpdateMessage::ScoreUpdate {
            scores: Vec::new(),
        }
        .into();
        watchers.announce_except(&message, ids[0], finder);

        assert!(tunnels[&ids[0]].messages.lock().unwrap().is_empty());
        assert_eq!(tunnels[&ids[1]].messages.lock().unwrap().len(), 1);
        assert_eq!(tunnels[&ids[2]].messages.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_send_to_member_without_tunnel_is_dropped() {
        let (watchers, ids) = watchers_with(1);
        let message: UpdateMessage = game::UpdateMessage::ScoreUpdate {
            scores: Vec::new(),
        }
        .into();
        watchers.send_message(&message, ids[0], |_| None::<MockTunnel>);
    }

    #[test]
    fn test_remove_watcher_session_closes_tunnel() {
        let (watchers, ids) = watchers_with(1);
        let tunnel = MockTunnel::default();
        watchers.remove_watcher_session(ids[0], |_| Some(tunnel.clone()));
        assert!(*tunnel.closed.lock().unwrap());
    }
}
