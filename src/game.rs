//! Core game logic and state management
//!
//! This module contains the session state machine: who is playing, whose
//! turn it is to draw, what the secret word is, who has guessed it and how
//! many points everyone has. Every mutation arrives through a `&mut self`
//! method, so the caller decides how calls are serialized. Outbound traffic
//! goes through a tunnel finder and timed follow-ups through a scheduler
//! callback, which keeps this module free of any runtime.

use std::{collections::HashMap, fmt::Debug, sync::Arc};

use garde::Validate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use tracing::{debug, info, warn};
use web_time::{Duration, Instant};

use super::{
    canvas::{self, Stroke, StrokeHistory},
    config::Options,
    constants::chat,
    error::Error,
    leaderboard::{Leaderboard, RoundAward, ScoreMessage},
    names::Names,
    rate_limit::TokenBucket,
    session::Tunnel,
    session_id::SessionId,
    watcher::{Id, Presence, Watchers},
    word_bank::{self, Hint, RecentWords, WordBank},
};

/// A round in progress
#[derive(Debug, Clone)]
pub struct Round {
    /// Round number, starting at 1
    number: u64,
    /// The player drawing this round
    drawer: Id,
    /// The secret word
    word: String,
    /// Players who guessed correctly, in the order they did
    guessed: Vec<Id>,
    /// When guessing closes
    deadline: Instant,
}

impl Round {
    /// Round number, starting at 1
    pub fn number(&self) -> u64 {
        self.number
    }

    /// The player drawing this round
    pub fn drawer(&self) -> Id {
        self.drawer
    }

    /// Players who guessed correctly, in the order they did
    pub fn guessed(&self) -> &[Id] {
        &self.guessed
    }
}

/// Represents the current phase of the session
#[derive(Debug, Clone)]
pub enum State {
    /// No round is running; waiting for enough players
    Lobby,
    /// A drawer is assigned and guessing is open
    RoundActive(Round),
    /// The word has been revealed and the next turn is pending
    RoundEnding {
        /// Number of the round that just ended
        round: u64,
        /// Who drew it
        drawer: Id,
        /// The revealed word
        word: String,
    },
}

/// Timed events a session asks its runner to deliver later
///
/// Every alarm carries enough context to tell whether it is still relevant
/// when it fires; stale alarms are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlarmMessage {
    /// Guessing time for a round is over
    RoundDeadline {
        /// Round the deadline belongs to
        round: u64,
    },
    /// The pause after a round is over
    NextRound {
        /// Round that ended
        round: u64,
    },
    /// A disconnected player did not come back in time
    GraceExpired {
        /// The player who dropped
        player: Id,
        /// Which disconnect this alarm belongs to
        serial: u64,
    },
    /// The session stayed without connected players for too long
    EmptySessionExpired {
        /// Presence serial at the time the session emptied
        serial: u64,
    },
}

/// Messages sent by bound players
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub enum IncomingMessage {
    /// A point of the drawer's path
    Stroke(Stroke),
    /// The drawer wipes the canvas
    ClearCanvas,
    /// Free text; from a guesser during a round it counts as a guess
    ChatMessage {
        /// The message
        text: String,
    },
    /// An explicit guess
    Guess {
        /// The guessed word
        text: String,
    },
    /// Starts the first round when automatic start is off
    StartGame,
    /// The player quits the session
    LeaveGame,
}

/// A member of the session as listed to clients
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerMessage {
    /// Display name
    pub player_name: String,
    /// Whether the player currently has a live connection
    pub connected: bool,
}

/// Round state as seen by one particular player
#[serde_with::serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundMessage {
    /// Round number
    pub number: u64,
    /// Name of the drawer
    pub drawer_name: String,
    /// Hint for non-drawers while the round is running
    pub word_hint: Option<Hint>,
    /// Whether the recipient is the drawer
    pub is_you_drawing: bool,
    /// The word, for the drawer or once revealed
    pub secret_word: Option<String>,
    /// Guessing time left
    #[serde_as(as = "Option<serde_with::DurationMilliSeconds<u64>>")]
    pub remaining: Option<Duration>,
    /// Whether the word has already been revealed
    pub ended: bool,
}

/// Everything a client needs to render the session from scratch
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// The session's ID
    pub session_id: SessionId,
    /// The recipient's own ID, which is also its reconnect token
    pub player_id: Id,
    /// Members in turn order
    pub players: Vec<PlayerMessage>,
    /// Totals in turn order
    pub scores: Vec<ScoreMessage>,
    /// The current or last round, if any
    pub round: Option<RoundMessage>,
    /// Strokes drawn so far this round
    pub strokes: Vec<Stroke>,
}

/// Update messages broadcast to session members
#[serde_with::serde_as]
#[skip_serializing_none]
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub enum UpdateMessage {
    /// A new round started
    #[serde(rename_all = "camelCase")]
    TurnChange {
        /// Round number
        round: u64,
        /// Name of the drawer
        drawer_name: String,
        /// What non-drawers know about the word
        word_hint: Hint,
        /// Whether the recipient is the drawer
        is_you_drawing: bool,
        /// The word, only in the drawer's copy
        secret_word: Option<String>,
        /// Guessing time
        #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
        duration: Duration,
    },
    /// A chat line or a wrong guess
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        /// Author
        player_name: String,
        /// Text as sent
        text: String,
    },
    /// Someone guessed the word
    #[serde(rename_all = "camelCase")]
    CorrectGuess {
        /// Who guessed
        player_name: String,
        /// Points the guesser earned
        points_awarded: u64,
    },
    /// Totals changed
    ScoreUpdate {
        /// Totals in turn order
        scores: Vec<ScoreMessage>,
    },
    /// The word is revealed
    RoundEnded {
        /// Round number
        round: u64,
        /// The secret word
        word: String,
        /// Totals in turn order
        scores: Vec<ScoreMessage>,
        /// What each player earned this round
        awards: Vec<RoundAward>,
    },
    /// A player joined or came back
    #[serde(rename_all = "camelCase")]
    PlayerConnected {
        /// Who connected
        player_name: String,
    },
    /// A player's connection dropped; the seat is kept for a while
    #[serde(rename_all = "camelCase")]
    PlayerDisconnected {
        /// Who dropped
        player_name: String,
    },
    /// A player left for good
    #[serde(rename_all = "camelCase")]
    PlayerLeft {
        /// Who left
        player_name: String,
    },
    /// The recipient's last action was rejected
    #[serde(rename_all = "camelCase")]
    ErrorNotice {
        /// Why
        reason_code: Error,
    },
}

/// Full state sent to a single player
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub enum SyncMessage {
    /// Reply to the creator of a session
    GameCreated(Snapshot),
    /// Reply to a player who joined or resumed
    GameJoined(Snapshot),
}

/// One game session
pub struct Game {
    /// ID players use to reach this session
    session_id: SessionId,
    /// Tuning for this session
    options: Options,
    /// Shared word list
    bank: Arc<WordBank>,
    /// Words this session drew recently
    recent_words: RecentWords,
    /// Random source for word picks
    rng: fastrand::Rng,
    /// Members, presence and turn order
    pub watchers: Watchers,
    /// Display names
    names: Names,
    /// Scores
    pub leaderboard: Leaderboard,
    /// Current phase
    pub state: State,
    /// Strokes of the running round
    strokes: StrokeHistory,
    /// Chat and guess throttles
    limiters: HashMap<Id, TokenBucket>,
    /// Pending disconnect serial of each dropped player
    disconnects: HashMap<Id, u64>,
    /// Source of disconnect serials
    next_serial: u64,
    /// Bumped whenever someone connects
    presence_serial: u64,
    /// Number of the last round started
    round_number: u64,
    /// Set once the session should shut down
    finished: bool,
}

impl Debug for Game {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Game")
            .field("session_id", &self.session_id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Game {
    /// Creates an empty session in the lobby
    pub fn new(session_id: SessionId, options: Options, bank: Arc<WordBank>) -> Self {
        Self {
            session_id,
            options,
            bank,
            recent_words: RecentWords::new(options.recent_word_window),
            rng: fastrand::Rng::new(),
            watchers: Watchers::with_capacity(options.max_players),
            names: Names::default(),
            leaderboard: Leaderboard::default(),
            state: State::Lobby,
            strokes: StrokeHistory::default(),
            limiters: HashMap::new(),
            disconnects: HashMap::new(),
            next_serial: 0,
            presence_serial: 0,
            round_number: 0,
            finished: false,
        }
    }

    /// Replaces the random source used for word picks
    #[must_use]
    pub fn with_rng(mut self, rng: fastrand::Rng) -> Self {
        self.rng = rng;
        self
    }

    /// The session's ID
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Whether the session has asked to be shut down
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of the running round, if guessing is open
    pub fn active_round(&self) -> Option<u64> {
        match &self.state {
            State::RoundActive(round) => Some(round.number),
            _ => None,
        }
    }

    /// Display name of a member
    pub fn name(&self, id: Id) -> Option<&str> {
        self.names.get_name(&id)
    }

    fn name_or_default(&self, id: Id) -> String {
        self.names.get_name(&id).unwrap_or_default().to_owned()
    }

    fn scores_message(&self) -> Vec<ScoreMessage> {
        self.leaderboard
            .scores(self.watchers.turn_order())
            .into_iter()
            .map(|(id, score)| ScoreMessage {
                player_name: self.name_or_default(id),
                score,
            })
            .collect_vec()
    }

    fn round_message(&self, watcher_id: Id) -> Option<RoundMessage> {
        match &self.state {
            State::Lobby => None,
            State::RoundActive(round) => {
                let is_you_drawing = round.drawer == watcher_id;
                Some(RoundMessage {
                    number: round.number,
                    drawer_name: self.name_or_default(round.drawer),
                    word_hint: Some(Hint::new(&round.word, self.options.hint)),
                    is_you_drawing,
                    secret_word: is_you_drawing.then(|| round.word.clone()),
                    remaining: Some(round.deadline.saturating_duration_since(Instant::now())),
                    ended: false,
                })
            }
            State::RoundEnding {
                round,
                drawer,
                word,
            } => Some(RoundMessage {
                number: *round,
                drawer_name: self.name_or_default(*drawer),
                word_hint: None,
                is_you_drawing: false,
                secret_word: Some(word.clone()),
                remaining: None,
                ended: true,
            }),
        }
    }

    /// Builds the full view of the session for one member
    pub fn snapshot(&self, watcher_id: Id) -> Snapshot {
        Snapshot {
            session_id: self.session_id,
            player_id: watcher_id,
            players: self
                .watchers
                .turn_order()
                .iter()
                .map(|id| PlayerMessage {
                    player_name: self.name_or_default(*id),
                    connected: self.watchers.is_connected(*id),
                })
                .collect_vec(),
            scores: self.scores_message(),
            round: self.round_message(watcher_id),
            strokes: match self.state {
                State::RoundActive(_) => self.strokes.strokes().to_vec(),
                _ => Vec::new(),
            },
        }
    }

    /// Adds a new player and sends them the current state
    ///
    /// The creator of the session gets `gameCreated`, everyone else
    /// `gameJoined`. If the lobby now has enough connected players and
    /// automatic start is on, the first round starts.
    ///
    /// # Errors
    ///
    /// Returns `Error::NameTaken` or `Error::InvalidName` when the name is
    /// rejected and `Error::SessionFull` when there is no seat left. The
    /// session is unchanged in every error case.
    pub fn add_player<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(AlarmMessage, Duration),
    >(
        &mut self,
        watcher_id: Id,
        name: &str,
        created: bool,
        mut schedule_message: S,
        tunnel_finder: F,
    ) -> Result<(), Error> {
        if self.watchers.has_watcher(watcher_id) {
            return Err(Error::AlreadyInSession);
        }

        let name = self.names.set_name(watcher_id, name)?;
        if let Err(e) = self.watchers.add_watcher(watcher_id) {
            self.names.remove(&watcher_id);
            return Err(e.into());
        }

        self.leaderboard.add_player(watcher_id);
        self.limiters.insert(
            watcher_id,
            TokenBucket::new(self.options.rate_limit, Instant::now()),
        );
        self.presence_serial += 1;

        debug!(session = %self.session_id, player = %watcher_id, %name, "player joined");

        let snapshot = self.snapshot(watcher_id);
        let reply = if created {
            SyncMessage::GameCreated(snapshot)
        } else {
            SyncMessage::GameJoined(snapshot)
        };
        self.watchers
            .send_state(&reply.into(), watcher_id, &tunnel_finder);
        self.watchers.announce_except(
            &UpdateMessage::PlayerConnected { player_name: name }.into(),
            watcher_id,
            &tunnel_finder,
        );

        self.maybe_start(&mut schedule_message, &tunnel_finder);

        Ok(())
    }

    /// Marks a dropped player as connected again and resends the state
    ///
    /// # Errors
    ///
    /// Returns `Error::NotInSession` if the player is not a member, which
    /// includes players whose grace period already ran out.
    pub fn reconnect<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        watcher_id: Id,
        mut schedule_message: S,
        tunnel_finder: F,
    ) -> Result<(), Error> {
        if !self.watchers.has_watcher(watcher_id) {
            return Err(Error::NotInSession);
        }

        self.disconnects.remove(&watcher_id);
        let was_connected = self.watchers.is_connected(watcher_id);
        self.watchers.set_presence(watcher_id, Presence::Connected);
        self.presence_serial += 1;

        debug!(session = %self.session_id, player = %watcher_id, "player resumed");

        self.watchers.send_state(
            &SyncMessage::GameJoined(self.snapshot(watcher_id)).into(),
            watcher_id,
            &tunnel_finder,
        );
        if !was_connected {
            self.watchers.announce_except(
                &UpdateMessage::PlayerConnected {
                    player_name: self.name_or_default(watcher_id),
                }
                .into(),
                watcher_id,
                &tunnel_finder,
            );
        }

        self.maybe_start(&mut schedule_message, &tunnel_finder);

        Ok(())
    }

    /// Keeps a dropped player's seat until the disconnect grace period ends
    pub fn disconnect<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        watcher_id: Id,
        mut schedule_message: S,
        tunnel_finder: F,
    ) {
        if !self.watchers.is_connected(watcher_id) {
            return;
        }

        self.watchers.set_presence(watcher_id, Presence::Disconnected);
        self.next_serial += 1;
        let serial = self.next_serial;
        self.disconnects.insert(watcher_id, serial);
        schedule_message(
            AlarmMessage::GraceExpired {
                player: watcher_id,
                serial,
            },
            self.options.disconnect_grace,
        );

        debug!(session = %self.session_id, player = %watcher_id, "player disconnected");

        self.watchers.announce(
            &UpdateMessage::PlayerDisconnected {
                player_name: self.name_or_default(watcher_id),
            }
            .into(),
            &tunnel_finder,
        );

        self.after_departure(&mut schedule_message, &tunnel_finder);
    }

    /// Removes a player for good
    ///
    /// If the player was drawing, the round ends at once without further
    /// scoring.
    pub fn remove_player<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(AlarmMessage, Duration),
    >(
        &mut self,
        watcher_id: Id,
        mut schedule_message: S,
        tunnel_finder: F,
    ) {
        if !self.watchers.remove_watcher(watcher_id) {
            return;
        }

        let name = self.names.remove(&watcher_id).unwrap_or_default();
        self.leaderboard.remove(watcher_id);
        self.limiters.remove(&watcher_id);
        self.disconnects.remove(&watcher_id);

        debug!(session = %self.session_id, player = %watcher_id, "player left");

        self.watchers.announce(
            &UpdateMessage::PlayerLeft { player_name: name }.into(),
            &tunnel_finder,
        );

        let drawer_left = match &mut self.state {
            State::RoundActive(round) => {
                round.guessed.retain(|id| *id != watcher_id);
                round.drawer == watcher_id
            }
            _ => false,
        };

        if drawer_left {
            self.end_round(&mut schedule_message, &tunnel_finder);
        } else {
            self.after_departure(&mut schedule_message, &tunnel_finder);
        }
    }

    /// Follow-up checks when a player stops counting as connected
    fn after_departure<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        mut schedule_message: S,
        tunnel_finder: F,
    ) {
        if self.watchers.specific_count(Presence::Connected) == 0 {
            schedule_message(
                AlarmMessage::EmptySessionExpired {
                    serial: self.presence_serial,
                },
                self.options.empty_session_grace,
            );
        }

        if self.everyone_guessed() {
            self.end_round(&mut schedule_message, &tunnel_finder);
        }
    }

    fn maybe_start<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        schedule_message: S,
        tunnel_finder: F,
    ) {
        if self.options.auto_start
            && matches!(self.state, State::Lobby)
            && self.watchers.specific_count(Presence::Connected) >= self.options.min_players
        {
            self.start_round(schedule_message, tunnel_finder);
        }
    }

    /// Starts the next turn
    ///
    /// Only valid from the lobby or right after a round ended. The next
    /// connected player in turn order draws a freshly picked word, and every
    /// member is told about it: the drawer sees the word, everyone else only
    /// the hint. With too few connected players the session returns to the
    /// lobby instead.
    pub fn start_round<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(AlarmMessage, Duration),
    >(
        &mut self,
        mut schedule_message: S,
        tunnel_finder: F,
    ) {
        if matches!(self.state, State::RoundActive(_)) {
            return;
        }

        if self.watchers.specific_count(Presence::Connected) < self.options.min_players {
            if !matches!(self.state, State::Lobby) {
                debug!(session = %self.session_id, "back to lobby");
            }
            self.state = State::Lobby;
            return;
        }

        let Some(drawer) = self.watchers.advance_turn() else {
            self.state = State::Lobby;
            return;
        };

        let word = self.bank.pick(&mut self.rng, &mut self.recent_words);
        self.round_number += 1;
        self.strokes.clear();

        let duration = self.options.round_duration;
        let round = Round {
            number: self.round_number,
            drawer,
            word,
            guessed: Vec::new(),
            deadline: Instant::now() + duration,
        };

        debug!(session = %self.session_id, round = round.number, %drawer, "round started");

        let drawer_name = self.name_or_default(drawer);
        let hint = Hint::new(&round.word, self.options.hint);
        self.watchers.announce_with(
            |id| {
                Some(
                    UpdateMessage::TurnChange {
                        round: round.number,
                        drawer_name: drawer_name.clone(),
                        word_hint: hint.clone(),
                        is_you_drawing: id == drawer,
                        secret_word: (id == drawer).then(|| round.word.clone()),
                        duration,
                    }
                    .into(),
                )
            },
            &tunnel_finder,
        );

        schedule_message(
            AlarmMessage::RoundDeadline {
                round: round.number,
            },
            duration,
        );

        self.state = State::RoundActive(round);
    }

    /// Reveals the word and schedules the next turn
    fn end_round<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        mut schedule_message: S,
        tunnel_finder: F,
    ) {
        if !matches!(self.state, State::RoundActive(_)) {
            return;
        }
        let State::RoundActive(round) = std::mem::replace(&mut self.state, State::Lobby) else {
            return;
        };

        debug!(session = %self.session_id, round = round.number, "round ended");

        let finished = self.leaderboard.finish_round();
        let awards = finished
            .into_iter()
            .map(|(id, points)| RoundAward {
                player_name: self.name_or_default(id),
                points,
            })
            .collect_vec();

        self.watchers.announce(
            &UpdateMessage::RoundEnded {
                round: round.number,
                word: round.word.clone(),
                scores: self.scores_message(),
                awards,
            }
            .into(),
            &tunnel_finder,
        );

        self.strokes.clear();
        self.state = State::RoundEnding {
            round: round.number,
            drawer: round.drawer,
            word: round.word,
        };

        schedule_message(
            AlarmMessage::NextRound {
                round: round.number,
            },
            self.options.round_end_pause,
        );
    }

    fn everyone_guessed(&self) -> bool {
        let State::RoundActive(round) = &self.state else {
            return false;
        };
        self.watchers
            .connected()
            .filter(|id| *id != round.drawer)
            .all(|id| round.guessed.contains(&id))
    }

    fn throttle(&mut self, watcher_id: Id) -> Result<(), Error> {
        match self.limiters.get_mut(&watcher_id) {
            Some(limiter) => {
                if limiter.try_acquire(Instant::now()) {
                    Ok(())
                } else {
                    Err(Error::RateLimited)
                }
            }
            None => Ok(()),
        }
    }

    /// Checks a guess against the secret word
    ///
    /// A correct guess scores for the guesser and the drawer. A wrong guess
    /// is shown to everyone as ordinary chat.
    ///
    /// # Errors
    ///
    /// * `Error::RoundNotActive` - No round is running
    /// * `Error::NotYourTurn` - The sender is drawing
    /// * `Error::AlreadyGuessed` - The sender already found the word
    /// * `Error::Malformed` - The text is too long
    pub fn submit_guess<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(AlarmMessage, Duration),
    >(
        &mut self,
        watcher_id: Id,
        text: &str,
        mut schedule_message: S,
        tunnel_finder: F,
    ) -> Result<(), Error> {
        let points = self.options.points;
        let State::RoundActive(round) = &mut self.state else {
            return Err(Error::RoundNotActive);
        };
        if round.drawer == watcher_id {
            return Err(Error::NotYourTurn);
        }
        if round.guessed.contains(&watcher_id) {
            return Err(Error::AlreadyGuessed);
        }
        if text.chars().count() > chat::MAX_LENGTH {
            return Err(Error::Malformed);
        }
        if text.trim().is_empty() {
            return Ok(());
        }

        if word_bank::normalize(text) != word_bank::normalize(&round.word) {
            let message = UpdateMessage::ChatMessage {
                player_name: self.name_or_default(watcher_id),
                text: text.to_owned(),
            };
            self.watchers.announce(&message.into(), &tunnel_finder);
            return Ok(());
        }

        let awarded = if round.guessed.is_empty() {
            points.first_guess
        } else {
            points.later_guess
        };
        round.guessed.push(watcher_id);
        let drawer = round.drawer;
        let number = round.number;

        self.leaderboard.award(watcher_id, awarded);
        self.leaderboard.award(drawer, points.drawer_per_guesser);

        debug!(session = %self.session_id, round = number, player = %watcher_id, awarded, "correct guess");

        self.watchers.announce(
            &UpdateMessage::CorrectGuess {
                player_name: self.name_or_default(watcher_id),
                points_awarded: awarded,
            }
            .into(),
            &tunnel_finder,
        );
        self.watchers.announce(
            &UpdateMessage::ScoreUpdate {
                scores: self.scores_message(),
            }
            .into(),
            &tunnel_finder,
        );

        if self.everyone_guessed() {
            self.end_round(&mut schedule_message, &tunnel_finder);
        }

        Ok(())
    }

    /// Relays a chat line
    ///
    /// During a round, chat from a player who may still guess is treated as
    /// a guess. Chat that would give the word away from anyone else is
    /// dropped.
    ///
    /// # Errors
    ///
    /// * `Error::RevealsWord` - The drawer or a finished guesser named the word
    /// * `Error::Malformed` - The text is too long
    pub fn submit_chat<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        watcher_id: Id,
        text: &str,
        schedule_message: S,
        tunnel_finder: F,
    ) -> Result<(), Error> {
        if text.chars().count() > chat::MAX_LENGTH {
            return Err(Error::Malformed);
        }
        if text.trim().is_empty() {
            return Ok(());
        }

        if let State::RoundActive(round) = &self.state {
            if round.drawer != watcher_id && !round.guessed.contains(&watcher_id) {
                return self.submit_guess(watcher_id, text, schedule_message, tunnel_finder);
            }
            if reveals(text, &round.word) {
                return Err(Error::RevealsWord);
            }
        }

        self.watchers.announce(
            &UpdateMessage::ChatMessage {
                player_name: self.name_or_default(watcher_id),
                text: text.to_owned(),
            }
            .into(),
            &tunnel_finder,
        );

        Ok(())
    }

    fn drawer_check(&self, watcher_id: Id) -> Result<(), Error> {
        match &self.state {
            State::RoundActive(round) if round.drawer == watcher_id => Ok(()),
            State::RoundActive(_) => Err(Error::NotYourTurn),
            _ => Err(Error::RoundNotActive),
        }
    }

    /// Buffers a stroke from the drawer and relays it to everyone else
    ///
    /// # Errors
    ///
    /// Returns `Error::RoundNotActive`, `Error::NotYourTurn` for anyone but
    /// the drawer, or `Error::Malformed` for an out-of-bounds stroke.
    pub fn submit_stroke<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        watcher_id: Id,
        stroke: Stroke,
        tunnel_finder: F,
    ) -> Result<(), Error> {
        self.drawer_check(watcher_id)?;
        stroke.validate().map_err(|_| Error::Malformed)?;

        self.strokes.push(stroke.clone());
        self.watchers.announce_except(
            &canvas::UpdateMessage::Stroke(stroke).into(),
            watcher_id,
            tunnel_finder,
        );

        Ok(())
    }

    /// Wipes the canvas for everyone but the drawer
    ///
    /// # Errors
    ///
    /// Same as [`Game::submit_stroke`], minus the validation.
    pub fn clear_canvas<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        watcher_id: Id,
        tunnel_finder: F,
    ) -> Result<(), Error> {
        self.drawer_check(watcher_id)?;

        self.strokes.clear();
        self.watchers.announce_except(
            &canvas::UpdateMessage::ClearCanvas.into(),
            watcher_id,
            tunnel_finder,
        );

        Ok(())
    }

    fn request_start<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        schedule_message: S,
        tunnel_finder: F,
    ) -> Result<(), Error> {
        if !matches!(self.state, State::Lobby) {
            return Ok(());
        }
        if self.watchers.specific_count(Presence::Connected) < self.options.min_players {
            return Err(Error::NotEnoughPlayers);
        }
        self.start_round(schedule_message, tunnel_finder);
        Ok(())
    }

    fn handle_message<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        watcher_id: Id,
        message: IncomingMessage,
        mut schedule_message: S,
        tunnel_finder: F,
    ) -> Result<(), Error> {
        match message {
            IncomingMessage::Stroke(stroke) => {
                self.submit_stroke(watcher_id, stroke, tunnel_finder)
            }
            IncomingMessage::ClearCanvas => self.clear_canvas(watcher_id, tunnel_finder),
            IncomingMessage::ChatMessage { text } => {
                self.throttle(watcher_id)?;
                self.submit_chat(watcher_id, &text, schedule_message, tunnel_finder)
            }
            IncomingMessage::Guess { text } => {
                self.throttle(watcher_id)?;
                self.submit_guess(watcher_id, &text, schedule_message, tunnel_finder)
            }
            IncomingMessage::StartGame => self.request_start(schedule_message, tunnel_finder),
            IncomingMessage::LeaveGame => {
                self.remove_player(watcher_id, &mut schedule_message, tunnel_finder);
                Ok(())
            }
        }
    }

    /// Handles a message from a member
    ///
    /// Rejected actions never touch the session; the sender alone receives
    /// an `errorNotice` with the reason.
    pub fn receive_message<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(AlarmMessage, Duration),
    >(
        &mut self,
        watcher_id: Id,
        message: IncomingMessage,
        schedule_message: S,
        tunnel_finder: F,
    ) {
        if !self.watchers.has_watcher(watcher_id) {
            return;
        }

        if let Err(error) =
            self.handle_message(watcher_id, message, schedule_message, &tunnel_finder)
        {
            warn!(session = %self.session_id, player = %watcher_id, %error, "action rejected");
            self.watchers.send_message(
                &UpdateMessage::ErrorNotice {
                    reason_code: error,
                }
                .into(),
                watcher_id,
                tunnel_finder,
            );
        }
    }

    /// Handles an alarm scheduled earlier
    ///
    /// Alarms that no longer match the session's state are ignored.
    pub fn receive_alarm<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(AlarmMessage, Duration),
    >(
        &mut self,
        message: AlarmMessage,
        schedule_message: S,
        tunnel_finder: F,
    ) {
        match message {
            AlarmMessage::RoundDeadline { round } => {
                if self.active_round() == Some(round) {
                    self.end_round(schedule_message, tunnel_finder);
                }
            }
            AlarmMessage::NextRound { round } => {
                if matches!(self.state, State::RoundEnding { round: ended, .. } if ended == round)
                {
                    self.start_round(schedule_message, tunnel_finder);
                }
            }
            AlarmMessage::GraceExpired { player, serial } => {
                if self.disconnects.get(&player) == Some(&serial) {
                    self.remove_player(player, schedule_message, tunnel_finder);
                }
            }
            AlarmMessage::EmptySessionExpired { serial } => {
                if serial == self.presence_serial
                    && self.watchers.specific_count(Presence::Connected) == 0
                {
                    info!(session = %self.session_id, "session empty");
                    self.finished = true;
                }
            }
        }
    }

    /// Closes every member's tunnel and marks the session finished
    pub fn mark_as_done<T: Tunnel, F: Fn(Id) -> Option<T>>(&mut self, tunnel_finder: F) {
        self.finished = true;
        for id in self.watchers.turn_order() {
            self.watchers.remove_watcher_session(*id, &tunnel_finder);
        }
    }
}

/// Whether `text` contains `word` as a whole word, ignoring case and spacing
fn reveals(text: &str, word: &str) -> bool {
    let text = word_bank::normalize(text);
    let word = word_bank::normalize(word);
    if word.is_empty() {
        return false;
    }
    text.match_indices(&word).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + word.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
