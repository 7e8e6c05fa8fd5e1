//! Per-session task
//!
//! Each session is owned by exactly one tokio task. Everything that mutates
//! the session (player actions, joins, disconnects and timer alarms) is a
//! [`Command`] on that task's queue and is applied in arrival order, so the
//! game logic never needs a lock and sessions never block each other.

use std::{collections::HashMap, sync::Arc};

use derive_where::derive_where;
use tokio::{
    sync::{mpsc, oneshot},
    task::AbortHandle,
    time::{Instant, sleep_until},
};
use tracing::{debug, info};
use web_time::Duration;

use crate::{
    error::Error,
    game::{AlarmMessage, Game, IncomingMessage},
    registry::Registry,
    session::Tunnel,
    session_id::SessionId,
    watcher::Id,
};

/// Commands queued before a session starts dropping senders
const QUEUE_CAPACITY: usize = 256;

/// Work items processed by a session task
#[derive(Debug)]
pub enum Command<T> {
    /// Seat a new player
    Join {
        /// The new player's ID
        player: Id,
        /// Connection the player is using
        connection: Id,
        /// Requested display name
        name: String,
        /// Whether the player is creating the session
        created: bool,
        /// Channel to the player
        tunnel: T,
        /// Outcome of the join
        reply: oneshot::Sender<Result<(), Error>>,
    },
    /// Rebind a dropped player to a new connection
    Resume {
        /// The returning player
        player: Id,
        /// The new connection
        connection: Id,
        /// Channel to the player
        tunnel: T,
        /// Outcome of the resume
        reply: oneshot::Sender<Result<(), Error>>,
    },
    /// An action from a seated player
    Message {
        /// Sender
        player: Id,
        /// What they did
        message: IncomingMessage,
    },
    /// A player's connection dropped
    Disconnect {
        /// The player
        player: Id,
        /// The connection that dropped
        connection: Id,
    },
    /// A timer fired
    Alarm(AlarmMessage),
    /// Stop the session now
    Shutdown,
}

/// Cheap, cloneable address of a running session
#[derive_where(Clone, Debug)]
pub struct SessionHandle<T> {
    session_id: SessionId,
    commands: mpsc::Sender<Command<T>>,
}

impl<T> SessionHandle<T> {
    /// The session's ID
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Whether the session task has stopped
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<(), Error>>) -> Command<T>,
    ) -> Result<(), Error> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| Error::SessionNotFound)?;
        response.await.map_err(|_| Error::SessionNotFound)?
    }

    /// Seats a new player and waits for the outcome
    ///
    /// # Errors
    ///
    /// Returns the game's rejection, or `Error::SessionNotFound` if the
    /// session stopped.
    pub async fn join(
        &self,
        player: Id,
        connection: Id,
        name: &str,
        created: bool,
        tunnel: T,
    ) -> Result<(), Error> {
        self.request(|reply| Command::Join {
            player,
            connection,
            name: name.to_owned(),
            created,
            tunnel,
            reply,
        })
        .await
    }

    /// Rebinds a dropped player and waits for the outcome
    ///
    /// # Errors
    ///
    /// Returns `Error::NotInSession` for unknown players, or
    /// `Error::SessionNotFound` if the session stopped.
    pub async fn resume(&self, player: Id, connection: Id, tunnel: T) -> Result<(), Error> {
        self.request(|reply| Command::Resume {
            player,
            connection,
            tunnel,
            reply,
        })
        .await
    }

    /// Queues an action from a seated player
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionNotFound` if the session stopped.
    pub async fn send(&self, player: Id, message: IncomingMessage) -> Result<(), Error> {
        self.commands
            .send(Command::Message { player, message })
            .await
            .map_err(|_| Error::SessionNotFound)
    }

    /// Reports a dropped connection
    pub async fn disconnect(&self, player: Id, connection: Id) {
        let _ = self
            .commands
            .send(Command::Disconnect { player, connection })
            .await;
    }

    /// Asks the session to stop
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

/// A player's current connection
struct Seat<T> {
    connection: Id,
    tunnel: T,
}

struct Runner<T> {
    game: Game,
    seats: HashMap<Id, Seat<T>>,
    commands: mpsc::Receiver<Command<T>>,
    alarms: mpsc::Sender<Command<T>>,
    deadline: Option<(u64, AbortHandle)>,
    idle_timeout: Duration,
    registry: Arc<Registry<T>>,
}

/// Starts the task that owns `game` and returns its handle
pub fn spawn<T: Tunnel + Clone + Send + Sync + 'static>(
    game: Game,
    registry: Arc<Registry<T>>,
    idle_timeout: Duration,
) -> SessionHandle<T> {
    let (commands, receiver) = mpsc::channel(QUEUE_CAPACITY);
    let handle = SessionHandle {
        session_id: game.session_id(),
        commands: commands.clone(),
    };

    let runner = Runner {
        game,
        seats: HashMap::new(),
        commands: receiver,
        alarms: commands,
        deadline: None,
        idle_timeout,
        registry,
    };
    tokio::spawn(runner.run());

    handle
}

impl<T: Tunnel + Clone + Send + Sync + 'static> Runner<T> {
    async fn run(mut self) {
        let idle = sleep_until(Instant::now() + self.idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    if !matches!(command, Command::Alarm(_) | Command::Disconnect { .. }) {
                        idle.as_mut().reset(Instant::now() + self.idle_timeout);
                    }
                    if !self.handle(command) {
                        break;
                    }
                }
                () = &mut idle => {
                    info!(session = %self.game.session_id(), "session idle");
                    break;
                }
            }

            if self.game.is_finished() {
                break;
            }
        }

        if let Some((_, handle)) = self.deadline.take() {
            handle.abort();
        }
        let seats = &self.seats;
        self.game
            .mark_as_done(|id| seats.get(&id).map(|seat| seat.tunnel.clone()));
        self.registry.destroy(self.game.session_id());
    }

    fn handle(&mut self, command: Command<T>) -> bool {
        let mut scheduled: Vec<(AlarmMessage, Duration)> = Vec::new();
        let schedule_message =
            |alarm: AlarmMessage, duration: Duration| scheduled.push((alarm, duration));
        let seats = &mut self.seats;

        match command {
            Command::Join {
                player,
                connection,
                name,
                created,
                tunnel,
                reply,
            } => {
                seats.insert(player, Seat { connection, tunnel });
                let seats = &*seats;
                let result = self.game.add_player(
                    player,
                    &name,
                    created,
                    schedule_message,
                    |id| seats.get(&id).map(|seat| seat.tunnel.clone()),
                );
                if result.is_err() {
                    self.seats.remove(&player);
                }
                let _ = reply.send(result);
            }
            Command::Resume {
                player,
                connection,
                tunnel,
                reply,
            } => {
                if !self.game.watchers.has_watcher(player) {
                    let _ = reply.send(Err(Error::NotInSession));
                    return true;
                }
                if let Some(previous) = seats.insert(player, Seat { connection, tunnel }) {
                    debug!(player = %player, "replacing connection");
                    previous.tunnel.close();
                }
                let seats = &*seats;
                let result = self.game.reconnect(player, schedule_message, |id| {
                    seats.get(&id).map(|seat| seat.tunnel.clone())
                });
                let _ = reply.send(result);
            }
            Command::Message { player, message } => {
                let leaving = matches!(message, IncomingMessage::LeaveGame);
                let seats_ref = &*seats;
                self.game
                    .receive_message(player, message, schedule_message, |id| {
                        seats_ref.get(&id).map(|seat| seat.tunnel.clone())
                    });
                if leaving {
                    self.seats.remove(&player);
                }
            }
            Command::Disconnect { player, connection } => {
                if seats
                    .get(&player)
                    .is_none_or(|seat| seat.connection != connection)
                {
                    return true;
                }
                seats.remove(&player);
                let seats = &*seats;
                self.game.disconnect(player, schedule_message, |id| {
                    seats.get(&id).map(|seat| seat.tunnel.clone())
                });
            }
            Command::Alarm(alarm) => {
                let seats = &*seats;
                self.game.receive_alarm(alarm, schedule_message, |id| {
                    seats.get(&id).map(|seat| seat.tunnel.clone())
                });
            }
            Command::Shutdown => return false,
        }

        self.schedule(scheduled);
        self.cancel_stale_deadline();
        true
    }

    fn schedule(&mut self, scheduled: Vec<(AlarmMessage, Duration)>) {
        for (alarm, duration) in scheduled {
            let alarms = self.alarms.clone();
            let task = tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                let _ = alarms.send(Command::Alarm(alarm)).await;
            });
            if let AlarmMessage::RoundDeadline { round } = alarm {
                if let Some((_, previous)) = self.deadline.replace((round, task.abort_handle())) {
                    previous.abort();
                }
            }
        }
    }

    fn cancel_stale_deadline(&mut self) {
        let stale = self
            .deadline
            .as_ref()
            .is_some_and(|(round, _)| self.game.active_round() != Some(*round));
        if stale {
            if let Some((round, handle)) = self.deadline.take() {
                debug!(session = %self.game.session_id(), round, "deadline cancelled");
                handle.abort();
            }
        }
    }
}
