//! WebSocket transport
//!
//! Each socket gets a writer task fed by an unbounded channel, so sessions
//! never wait on a slow client. Every text frame is one inbound envelope and
//! every outbound event is one text frame.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{SyncMessage, UpdateMessage, gateway::Gateway, session::Tunnel};

/// Path of the WebSocket endpoint
pub const PATH: &str = "/ws";

/// Outbound half of one WebSocket connection
#[derive(Debug, Clone)]
pub struct WsTunnel {
    sender: mpsc::UnboundedSender<Message>,
}

impl WsTunnel {
    /// Wraps the channel drained by a socket's writer task
    pub fn new(sender: mpsc::UnboundedSender<Message>) -> Self {
        Self { sender }
    }
}

impl Tunnel for WsTunnel {
    fn send_message(&self, message: &UpdateMessage) {
        let _ = self.sender.send(Message::Text(message.to_message()));
    }

    fn send_state(&self, state: &SyncMessage) {
        let _ = self.sender.send(Message::Text(state.to_message()));
    }

    fn close(self) {
        let _ = self.sender.send(Message::Close(None));
    }
}

/// Builds the router serving the game endpoint
pub fn router(gateway: Arc<Gateway<WsTunnel>>) -> Router {
    Router::new()
        .route(PATH, get(ws_handler))
        .with_state(gateway)
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(gateway): State<Arc<Gateway<WsTunnel>>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, gateway))
}

async fn handle_socket(socket: WebSocket, gateway: Arc<Gateway<WsTunnel>>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let connection = gateway.connect(WsTunnel::new(tx));

    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => gateway.receive(connection, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(error) => {
                warn!(%connection, %error, "websocket error");
                break;
            }
        }
    }

    debug!(%connection, "socket closed");
    gateway.disconnect(connection).await;
    send_task.abort();
}
