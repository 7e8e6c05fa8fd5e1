//! Connection routing
//!
//! The gateway owns the mapping from live connections to the (session,
//! player) pair each one is bound to. It decodes inbound frames, handles the
//! events that create or attach a binding, and forwards everything else to
//! the bound session's queue. Rejections are answered on the originating
//! connection only.

use std::{str::FromStr, sync::Arc};

use dashmap::DashMap;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    error::Error,
    game::{self, IncomingMessage},
    registry::Registry,
    runner::SessionHandle,
    session::Tunnel,
    session_id::SessionId,
    watcher::Id,
};

/// One inbound frame
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Session the client believes it is talking to
    #[serde(default)]
    pub session_id: Option<String>,
    /// What the client wants
    pub event: Event,
}

/// Inbound events
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Event {
    /// Start a new session
    #[serde(rename_all = "camelCase")]
    CreateGame {
        /// Requested display name
        player_name: String,
    },
    /// Enter an existing session
    #[serde(rename_all = "camelCase")]
    JoinGame {
        /// Session to join
        session_id: String,
        /// Requested display name
        player_name: String,
    },
    /// Take a dropped seat back
    #[serde(rename_all = "camelCase")]
    ResumeGame {
        /// Session the seat belongs to
        session_id: String,
        /// Token handed out on create or join
        player_id: Id,
    },
    /// Anything addressed to the bound session
    #[serde(untagged)]
    Session(IncomingMessage),
    /// A payload-less session event written with an empty object
    #[serde(untagged)]
    Signal(Signal),
}

/// Payload-less session events in their object form, e.g. `{"leaveGame": {}}`
///
/// The bare string form (`"leaveGame"`) decodes straight into
/// [`IncomingMessage`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Signal {
    /// See [`IncomingMessage::ClearCanvas`]
    ClearCanvas {},
    /// See [`IncomingMessage::StartGame`]
    StartGame {},
    /// See [`IncomingMessage::LeaveGame`]
    LeaveGame {},
}

impl From<Signal> for IncomingMessage {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::ClearCanvas {} => Self::ClearCanvas,
            Signal::StartGame {} => Self::StartGame,
            Signal::LeaveGame {} => Self::LeaveGame,
        }
    }
}

#[derive(Debug, Clone)]
struct Binding<T> {
    player: Id,
    session: SessionHandle<T>,
}

#[derive(Debug)]
struct Connection<T> {
    tunnel: T,
    binding: Option<Binding<T>>,
}

/// Routes frames between connections and sessions
#[derive(Debug)]
pub struct Gateway<T> {
    registry: Arc<Registry<T>>,
    connections: DashMap<Id, Connection<T>>,
}

impl<T: Tunnel + Clone + Send + Sync + 'static> Gateway<T> {
    /// Creates a gateway in front of `registry`
    pub fn new(registry: Arc<Registry<T>>) -> Self {
        Self {
            registry,
            connections: DashMap::new(),
        }
    }

    /// The sessions behind this gateway
    pub fn registry(&self) -> &Arc<Registry<T>> {
        &self.registry
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Registers a new, unbound connection
    pub fn connect(&self, tunnel: T) -> Id {
        let connection = Id::new();
        self.connections.insert(
            connection,
            Connection {
                tunnel,
                binding: None,
            },
        );
        debug!(%connection, "connection opened");
        connection
    }

    fn lookup(&self, connection: Id) -> Option<(T, Option<Binding<T>>)> {
        self.connections
            .get(&connection)
            .map(|entry| (entry.tunnel.clone(), entry.binding.clone()))
    }

    fn bind(&self, connection: Id, binding: Option<Binding<T>>) {
        if let Some(mut entry) = self.connections.get_mut(&connection) {
            entry.binding = binding;
        }
    }

    /// Handles one text frame from a connection
    pub async fn receive(&self, connection: Id, text: &str) {
        let Some((tunnel, binding)) = self.lookup(connection) else {
            return;
        };

        let envelope = match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(%connection, %error, "malformed frame");
                notify(&tunnel, Error::Malformed);
                return;
            }
        };

        if let Err(error) = self
            .dispatch(connection, &tunnel, binding, envelope)
            .await
        {
            debug!(%connection, %error, "request rejected");
            notify(&tunnel, error);
        }
    }

    async fn dispatch(
        &self,
        connection: Id,
        tunnel: &T,
        binding: Option<Binding<T>>,
        envelope: Envelope,
    ) -> Result<(), Error> {
        match envelope.event {
            Event::CreateGame { player_name } => {
                if binding.is_some() {
                    return Err(Error::AlreadyInSession);
                }
                let player = Id::new();
                let session = self
                    .registry
                    .create(player, connection, &player_name, tunnel.clone())
                    .await?;
                self.bind(connection, Some(Binding { player, session }));
            }
            Event::JoinGame {
                session_id,
                player_name,
            } => {
                if binding.is_some() {
                    return Err(Error::AlreadyInSession);
                }
                let session_id = SessionId::from_str(&session_id)?;
                let player = Id::new();
                let session = self
                    .registry
                    .join(session_id, player, connection, &player_name, tunnel.clone())
                    .await?;
                self.bind(connection, Some(Binding { player, session }));
            }
            Event::ResumeGame {
                session_id,
                player_id,
            } => {
                if binding.is_some() {
                    return Err(Error::AlreadyInSession);
                }
                let session_id = SessionId::from_str(&session_id)?;
                let session = self
                    .registry
                    .resume(session_id, player_id, connection, tunnel.clone())
                    .await?;
                self.bind(
                    connection,
                    Some(Binding {
                        player: player_id,
                        session,
                    }),
                );
            }
            Event::Session(message) => {
                self.forward(connection, binding, envelope.session_id, message)
                    .await?;
            }
            Event::Signal(signal) => {
                self.forward(connection, binding, envelope.session_id, signal.into())
                    .await?;
            }
        }

        Ok(())
    }

    async fn forward(
        &self,
        connection: Id,
        binding: Option<Binding<T>>,
        named: Option<String>,
        message: IncomingMessage,
    ) -> Result<(), Error> {
        let Some(Binding { player, session }) = binding else {
            return Err(Error::NotInSession);
        };
        if let Some(named) = named {
            if SessionId::from_str(&named).ok() != Some(session.session_id()) {
                return Err(Error::NotInSession);
            }
        }

        let leaving = matches!(message, IncomingMessage::LeaveGame);
        if let Err(error) = session.send(player, message).await {
            self.bind(connection, None);
            return Err(error);
        }
        if leaving {
            self.bind(connection, None);
        }

        Ok(())
    }

    /// Forgets a closed connection
    ///
    /// A bound player keeps their seat for the session's disconnect grace
    /// period and may resume from another connection.
    pub async fn disconnect(&self, connection: Id) {
        let Some((_, entry)) = self.connections.remove(&connection) else {
            return;
        };
        debug!(%connection, "connection closed");
        if let Some(Binding { player, session }) = entry.binding {
            session.disconnect(player, connection).await;
        }
    }
}

fn notify<T: Tunnel>(tunnel: &T, reason_code: Error) {
    tunnel.send_message(&game::UpdateMessage::ErrorNotice { reason_code }.into());
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Mutex;

    use serde_json::{Value, json};
    use web_time::Duration;

    use super::*;
    use crate::{SyncMessage, UpdateMessage, config::Options, word_bank::WordBank};

    #[derive(Debug, Clone, Default)]
    struct MockTunnel {
        messages: Arc<Mutex<Vec<String>>>,
    }

    impl MockTunnel {
        fn take(&self) -> Vec<Value> {
            std::mem::take(&mut *self.messages.lock().unwrap())
                .iter()
                .map(|message| serde_json::from_str(message).unwrap())
                .collect()
        }

        fn take_events(&self, event: &str) -> Vec<Value> {
            self.take()
                .into_iter()
                .filter_map(|message| message.get(event).cloned())
                .collect()
        }
    }

    impl Tunnel for MockTunnel {
        fn send_message(&self, message: &UpdateMessage) {
            self.messages.lock().unwrap().push(message.to_message());
        }

        fn send_state(&self, state: &SyncMessage) {
            self.messages.lock().unwrap().push(state.to_message());
        }

        fn close(self) {}
    }

    struct Client {
        connection: Id,
        tunnel: MockTunnel,
    }

    fn gateway(options: Options) -> Gateway<MockTunnel> {
        let bank = Arc::new(WordBank::new(["Star", "Moon"]).unwrap());
        Gateway::new(Registry::new(options, bank))
    }

    fn client(gateway: &Gateway<MockTunnel>) -> Client {
        let tunnel = MockTunnel::default();
        Client {
            connection: gateway.connect(tunnel.clone()),
            tunnel,
        }
    }

    async fn send(gateway: &Gateway<MockTunnel>, client: &Client, frame: Value) {
        gateway.receive(client.connection, &frame.to_string()).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    async fn create(gateway: &Gateway<MockTunnel>, client: &Client, name: &str) -> Value {
        send(
            gateway,
            client,
            json!({"event": {"createGame": {"playerName": name}}}),
        )
        .await;
        client.tunnel.take_events("gameCreated").remove(0)
    }

    async fn join(
        gateway: &Gateway<MockTunnel>,
        client: &Client,
        session_id: &Value,
        name: &str,
    ) -> Vec<Value> {
        send(
            gateway,
            client,
            json!({"event": {"joinGame": {"sessionId": session_id, "playerName": name}}}),
        )
        .await;
        client.tunnel.take()
    }

    fn reason(messages: &[Value]) -> Option<&str> {
        messages
            .iter()
            .find_map(|message| message.get("errorNotice"))
            .and_then(|notice| notice["reasonCode"].as_str())
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_then_join_starts_round() {
        let gateway = gateway(Options::default());
        let a = client(&gateway);
        let b = client(&gateway);

        let created = create(&gateway, &a, "A").await;
        let session_id = created["sessionId"].clone();

        let messages = join(&gateway, &b, &session_id, "B").await;
        assert!(messages.iter().any(|m| m.get("gameJoined").is_some()));
        let turn = messages
            .iter()
            .find_map(|m| m.get("turnChange"))
            .unwrap();
        assert_eq!(turn["drawerName"], "A");
        assert!(turn.get("secretWord").is_none());

        let messages = a.tunnel.take();
        assert_eq!(messages[0]["playerConnected"]["playerName"], "B");
        assert!(messages[1]["turnChange"]["secretWord"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frames_get_notice() {
        let gateway = gateway(Options::default());
        let a = client(&gateway);

        gateway.receive(a.connection, "not json").await;
        assert_eq!(reason(&a.tunnel.take()), Some("malformed"));

        send(&gateway, &a, json!({"event": {"danceParty": {}}})).await;
        assert_eq!(reason(&a.tunnel.take()), Some("malformed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_events_need_binding() {
        let gateway = gateway(Options::default());
        let a = client(&gateway);

        send(&gateway, &a, json!({"event": {"guess": {"text": "star"}}})).await;
        assert_eq!(reason(&a.tunnel.take()), Some("notInSession"));

        send(&gateway, &a, json!({"event": "leaveGame"})).await;
        assert_eq!(reason(&a.tunnel.take()), Some("notInSession"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bound_connection_cannot_create_again() {
        let gateway = gateway(Options::default());
        let a = client(&gateway);
        create(&gateway, &a, "A").await;

        send(
            &gateway,
            &a,
            json!({"event": {"createGame": {"playerName": "A"}}}),
        )
        .await;
        assert_eq!(reason(&a.tunnel.take()), Some("alreadyInSession"));
        assert_eq!(gateway.registry().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_unknown_session() {
        let gateway = gateway(Options::default());
        let a = client(&gateway);

        let messages = join(&gateway, &a, &json!("000000000000"), "A").await;
        assert_eq!(reason(&messages), Some("sessionNotFound"));

        let messages = join(&gateway, &a, &json!("nonsense"), "A").await;
        assert_eq!(reason(&messages), Some("sessionNotFound"));
        assert!(gateway.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_with_taken_name() {
        let gateway = gateway(Options::default());
        let a = client(&gateway);
        let b = client(&gateway);
        let created = create(&gateway, &a, "A").await;

        let messages = join(&gateway, &b, &created["sessionId"], "A").await;
        assert_eq!(reason(&messages), Some("nameTaken"));

        let messages = join(&gateway, &b, &created["sessionId"], "B").await;
        assert!(messages.iter().any(|m| m.get("gameJoined").is_some()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_for_other_session_is_rejected() {
        let gateway = gateway(Options::default());
        let a = client(&gateway);
        let b = client(&gateway);
        let first = create(&gateway, &a, "A").await;
        let second = create(&gateway, &b, "B").await;

        send(
            &gateway,
            &a,
            json!({"sessionId": second["sessionId"], "event": {"chatMessage": {"text": "hi"}}}),
        )
        .await;
        assert_eq!(reason(&a.tunnel.take()), Some("notInSession"));
        assert!(b.tunnel.take().is_empty());

        send(
            &gateway,
            &a,
            json!({"sessionId": first["sessionId"], "event": {"chatMessage": {"text": "hi"}}}),
        )
        .await;
        assert_eq!(a.tunnel.take_events("chatMessage").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strokes_reach_everyone_but_drawer() {
        let gateway = gateway(Options::default());
        let a = client(&gateway);
        let b = client(&gateway);
        let c = client(&gateway);
        let created = create(&gateway, &a, "A").await;
        join(&gateway, &b, &created["sessionId"], "B").await;
        join(&gateway, &c, &created["sessionId"], "C").await;
        a.tunnel.take();
        b.tunnel.take();

        send(
            &gateway,
            &a,
            json!({"event": {"stroke": {"x": 10.0, "y": 20.0, "color": "#ff0000", "begin": true}}}),
        )
        .await;
        assert!(a.tunnel.take().is_empty());
        assert_eq!(b.tunnel.take_events("stroke")[0]["color"], "#ff0000");
        assert_eq!(c.tunnel.take_events("stroke").len(), 1);

        send(&gateway, &a, json!({"event": "clearCanvas"})).await;
        assert_eq!(b.tunnel.take(), vec![json!("clearCanvas")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guess_scores_and_next_round() {
        let options = Options::default();
        let gateway = gateway(options);
        let a = client(&gateway);
        let b = client(&gateway);
        let created = create(&gateway, &a, "A").await;
        join(&gateway, &b, &created["sessionId"], "B").await;

        let word = a.tunnel.take_events("turnChange")[0]["secretWord"]
            .as_str()
            .unwrap()
            .to_lowercase();
        send(&gateway, &b, json!({"event": {"guess": {"text": word}}})).await;

        let messages = b.tunnel.take();
        assert_eq!(messages[0]["correctGuess"]["pointsAwarded"], 10);
        let ended = messages
            .iter()
            .find_map(|m| m.get("roundEnded"))
            .unwrap();
        assert_eq!(ended["scores"][0]["score"], 2);
        assert_eq!(ended["scores"][1]["score"], 10);

        tokio::time::sleep(options.round_end_pause).await;
        let turn = b.tunnel.take_events("turnChange");
        assert_eq!(turn[0]["isYouDrawing"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_unbinds_connection() {
        let gateway = gateway(Options::default());
        let a = client(&gateway);
        let b = client(&gateway);
        let created = create(&gateway, &a, "A").await;
        join(&gateway, &b, &created["sessionId"], "B").await;
        a.tunnel.take();

        send(&gateway, &b, json!({"event": "leaveGame"})).await;
        assert_eq!(a.tunnel.take_events("playerLeft")[0]["playerName"], "B");

        send(&gateway, &b, json!({"event": {"chatMessage": {"text": "hi"}}})).await;
        assert_eq!(reason(&b.tunnel.take()), Some("notInSession"));

        let messages = join(&gateway, &b, &created["sessionId"], "B").await;
        assert!(messages.iter().any(|m| m.get("gameJoined").is_some()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_after_dropped_connection() {
        let gateway = gateway(Options::default());
        let a = client(&gateway);
        let b = client(&gateway);
        let created = create(&gateway, &a, "A").await;
        let messages = join(&gateway, &b, &created["sessionId"], "B").await;
        let player_id = messages
            .iter()
            .find_map(|m| m.get("gameJoined"))
            .unwrap()["playerId"]
            .clone();

        gateway.disconnect(b.connection).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(
            a.tunnel.take_events("playerDisconnected")[0]["playerName"],
            "B"
        );

        let back = client(&gateway);
        send(
            &gateway,
            &back,
            json!({"event": {"resumeGame": {"sessionId": created["sessionId"], "playerId": player_id}}}),
        )
        .await;
        let joined = back.tunnel.take_events("gameJoined");
        assert_eq!(joined[0]["playerId"], player_id);
        assert_eq!(joined[0]["players"][1]["connected"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_after_grace_fails() {
        let options = Options::default();
        let gateway = gateway(options);
        let a = client(&gateway);
        let b = client(&gateway);
        let created = create(&gateway, &a, "A").await;
        let messages = join(&gateway, &b, &created["sessionId"], "B").await;
        let player_id = messages
            .iter()
            .find_map(|m| m.get("gameJoined"))
            .unwrap()["playerId"]
            .clone();

        gateway.disconnect(b.connection).await;
        tokio::time::sleep(options.disconnect_grace + Duration::from_secs(1)).await;
        assert_eq!(a.tunnel.take_events("playerLeft")[0]["playerName"], "B");

        let back = client(&gateway);
        send(
            &gateway,
            &back,
            json!({"event": {"resumeGame": {"sessionId": created["sessionId"], "playerId": player_id}}}),
        )
        .await;
        assert_eq!(reason(&back.tunnel.take()), Some("notInSession"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_rejects_join() {
        let options = Options {
            auto_start: false,
            ..Options::default()
        };
        let gateway = gateway(options);
        let a = client(&gateway);
        let created = create(&gateway, &a, "A").await;

        tokio::time::sleep(options.idle_timeout + Duration::from_secs(1)).await;

        send(&gateway, &a, json!({"event": {"chatMessage": {"text": "hi"}}})).await;
        assert_eq!(reason(&a.tunnel.take()), Some("sessionNotFound"));

        let b = client(&gateway);
        let messages = join(&gateway, &b, &created["sessionId"], "B").await;
        assert_eq!(reason(&messages), Some("sessionNotFound"));
    }

    fn decode(event: Value) -> IncomingMessage {
        let envelope: Envelope =
            serde_json::from_value(json!({ "event": event })).unwrap();
        match envelope.event {
            Event::Session(message) => message,
            Event::Signal(signal) => signal.into(),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_payloadless_events_accept_both_forms() {
        for name in ["clearCanvas", "startGame", "leaveGame"] {
            let bare = decode(json!(name));
            let object = decode(Value::Object(serde_json::Map::from_iter([(
                name.to_string(),
                json!({}),
            )])));
            assert_eq!(
                std::mem::discriminant(&bare),
                std::mem::discriminant(&object),
                "{name}"
            );
        }
        assert!(matches!(
            decode(json!({"leaveGame": {}})),
            IncomingMessage::LeaveGame
        ));
        assert!(matches!(
            decode(json!({"clearCanvas": {}})),
            IncomingMessage::ClearCanvas
        ));
        assert!(matches!(
            decode(json!({"startGame": {}})),
            IncomingMessage::StartGame
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_object_form_events_reach_session() {
        let options = Options {
            auto_start: false,
            ..Options::default()
        };
        let gateway = gateway(options);
        let a = client(&gateway);
        let b = client(&gateway);
        let created = create(&gateway, &a, "A").await;
        join(&gateway, &b, &created["sessionId"], "B").await;
        a.tunnel.take();

        send(&gateway, &a, json!({"event": {"startGame": {}}})).await;
        assert_eq!(a.tunnel.take_events("turnChange")[0]["isYouDrawing"], true);
        b.tunnel.take();

        send(&gateway, &a, json!({"event": {"clearCanvas": {}}})).await;
        assert_eq!(b.tunnel.take(), vec![json!("clearCanvas")]);

        send(&gateway, &b, json!({"event": {"leaveGame": {}}})).await;
        assert_eq!(a.tunnel.take_events("playerLeft")[0]["playerName"], "B");
        send(&gateway, &b, json!({"event": {"chatMessage": {"text": "hi"}}})).await;
        assert_eq!(reason(&b.tunnel.take()), Some("notInSession"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_forgets_connection() {
        let gateway = gateway(Options::default());
        let a = client(&gateway);
        assert_eq!(gateway.connection_count(), 1);

        gateway.disconnect(a.connection).await;
        assert_eq!(gateway.connection_count(), 0);

        gateway.receive(a.connection, "{}").await;
        assert!(a.tunnel.take().is_empty());
    }
}
