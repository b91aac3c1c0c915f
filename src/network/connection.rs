//! Client Connection
//!
//! Per-client message handling, independent of the transport. A transport
//! feeds incoming text frames to [`Connection::handle_text`] and writes
//! whatever arrives on the outbound channel back to the client. Once the
//! client holds a seat, its observer stream is forwarded to the same
//! channel.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::game::command::Command;
use crate::game::state::PlayerId;
use crate::game::variant::GameVariant;
use crate::network::manager::SessionManager;
use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage};
use crate::network::session::{short_id, SessionError, SessionHandle, SessionId};

struct Seat {
    handle: SessionHandle,
    player: PlayerId,
    forwarder: JoinHandle<()>,
}

/// One client's view of the server.
pub struct Connection {
    manager: Arc<SessionManager>,
    outbound: mpsc::Sender<ServerMessage>,
    seat: Option<Seat>,
}

impl Connection {
    /// Create a connection that replies on `outbound`.
    pub fn new(manager: Arc<SessionManager>, outbound: mpsc::Sender<ServerMessage>) -> Self {
        Self { manager, outbound, seat: None }
    }

    /// Identity and session of the held seat.
    pub fn seated(&self) -> Option<(&PlayerId, SessionId)> {
        self.seat.as_ref().map(|s| (&s.player, s.handle.id()))
    }

    async fn reply(&self, message: ServerMessage) {
        if self.outbound.send(message).await.is_err() {
            debug!("Client outbound closed");
        }
    }

    async fn reply_error(&self, err: &SessionError) {
        self.reply(ServerMessage::error(err.code(), err.to_string())).await;
    }

    /// Parse and handle one text frame.
    pub async fn handle_text(&mut self, text: &str) {
        match ClientMessage::from_json(text) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => {
                debug!(error = %e, "Unparseable client message");
                self.reply(ServerMessage::error(ErrorCode::InvalidMessage, e.to_string())).await;
            }
        }
    }

    /// Handle one client message.
    pub async fn handle_message(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::Join { identity, display_name, variant } => {
                self.handle_join(PlayerId::new(identity), display_name, variant.map(|v| *v)).await;
            }
            ClientMessage::Submit { command } => self.handle_submit(command).await,
            ClientMessage::Leave => self.handle_leave().await,
            ClientMessage::Ping { timestamp } => {
                let server_tick = match &self.seat {
                    Some(seat) => seat.handle.info().await.map(|i| i.tick).unwrap_or(0),
                    None => 0,
                };
                self.reply(ServerMessage::Pong { timestamp, server_tick }).await;
            }
        }
    }

    async fn handle_join(&mut self, player: PlayerId, display_name: String, variant: Option<GameVariant>) {
        if self.seat.is_some() {
            self.reply(ServerMessage::error(ErrorCode::AlreadyJoined, "connection already holds a seat")).await;
            return;
        }

        let receipt = match self.manager.join(player.clone(), &display_name, variant).await {
            Ok(receipt) => receipt,
            Err(err) => return self.reply_error(&err).await,
        };
        let handle = match self.manager.handle(&receipt.session).await {
            Ok(handle) => handle,
            Err(err) => return self.reply_error(&err).await,
        };
        let mut stream = match handle.observe(Some(player.clone())).await {
            Ok(stream) => stream,
            Err(err) => return self.reply_error(&err).await,
        };

        self.reply(ServerMessage::Joined {
            session: hex::encode(receipt.session),
            player: player.clone(),
            entity: receipt.entity,
            reconnected: receipt.reconnected,
        })
        .await;

        let outbound = self.outbound.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(message) = stream.recv().await {
                if outbound.send(message).await.is_err() {
                    break;
                }
            }
        });

        info!(session = %short_id(&receipt.session), player = %player, "Client seated");
        self.seat = Some(Seat { handle, player, forwarder });
    }

    async fn handle_submit(&mut self, command: Command) {
        let Some(seat) = &self.seat else {
            self.reply(ServerMessage::error(ErrorCode::NotJoined, "join a session first")).await;
            return;
        };
        match seat.handle.submit(seat.player.clone(), command.clone()).await {
            Ok(_) => {}
            Err(SessionError::Rejected(reason)) => self.reply(ServerMessage::rejected(&command, reason)).await,
            Err(err) => self.reply_error(&err).await,
        }
    }

    async fn handle_leave(&mut self) {
        let Some(seat) = self.seat.take() else {
            return;
        };
        seat.forwarder.abort();
        let _ = seat.handle.leave(seat.player).await;
    }

    /// Transport lost. The seat is held for the session's reconnect grace.
    pub async fn close(&mut self) {
        let Some(seat) = self.seat.take() else {
            return;
        };
        seat.forwarder.abort();
        let _ = seat.handle.disconnect(seat.player).await;
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::game::state::SessionPhase;

    fn connect(manager: &Arc<SessionManager>) -> (Connection, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(512);
        (Connection::new(manager.clone(), tx), rx)
    }

    async fn next(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(message)) => message,
            other => panic!("no message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_join_then_snapshot() {
        let manager = Arc::new(SessionManager::default());
        let (mut conn, mut rx) = connect(&manager);

        conn.handle_text(r#"{"type":"join","identity":"a","display_name":"A","variant":{"name":"duel","rules":{"max_occupants":2}}}"#)
            .await;

        let ServerMessage::Joined { session, player, entity, reconnected } = next(&mut rx).await else {
            panic!("expected joined");
        };
        assert_eq!(player, PlayerId::new("a"));
        assert!(entity.is_some());
        assert!(!reconnected);
        let (_, id) = conn.seated().unwrap();
        assert_eq!(session, hex::encode(id));

        assert!(matches!(next(&mut rx).await, ServerMessage::Snapshot { .. }));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_client_joins_running_session() {
        let manager = Arc::new(SessionManager::default());
        let (mut a, _a_rx) = connect(&manager);
        let (mut b, mut b_rx) = connect(&manager);

        a.handle_message(ClientMessage::Join {
            identity: "a".into(),
            display_name: "A".into(),
            variant: Some(Box::new(GameVariant::racing())),
        })
        .await;
        b.handle_message(ClientMessage::Join { identity: "b".into(), display_name: "B".into(), variant: None }).await;

        assert!(matches!(next(&mut b_rx).await, ServerMessage::Joined { .. }));
        assert_eq!(a.seated().map(|s| s.1), b.seated().map(|s| s.1));

        let (_, id) = b.seated().unwrap();
        loop {
            if manager.info(&id).await.unwrap().phase == SessionPhase::Playing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_errors_are_reported() {
        let manager = Arc::new(SessionManager::default());
        let (mut conn, mut rx) = connect(&manager);

        conn.handle_text("{not json").await;
        assert!(matches!(next(&mut rx).await, ServerMessage::Error(e) if e.code == ErrorCode::InvalidMessage));

        conn.handle_message(ClientMessage::Submit { command: Command::Fire }).await;
        assert!(matches!(next(&mut rx).await, ServerMessage::Error(e) if e.code == ErrorCode::NotJoined));

        conn.handle_message(ClientMessage::Join { identity: "a".into(), display_name: "A".into(), variant: None }).await;
        assert!(matches!(next(&mut rx).await, ServerMessage::Error(e) if e.code == ErrorCode::SessionFull));

        let mut broken = GameVariant::slicer();
        broken.rules.min_occupants = 0;
        conn.handle_message(ClientMessage::Join {
            identity: "a".into(),
            display_name: "A".into(),
            variant: Some(Box::new(broken)),
        })
        .await;
        assert!(matches!(next(&mut rx).await, ServerMessage::Error(e) if e.code == ErrorCode::InvalidConfig));
    }

    #[tokio::test]
    async fn test_rejected_submit_and_ping() {
        let manager = Arc::new(SessionManager::default());
        let (mut conn, mut rx) = connect(&manager);
        conn.handle_message(ClientMessage::Join {
            identity: "a".into(),
            display_name: "A".into(),
            variant: Some(Box::new(GameVariant::racing())),
        })
        .await;
        assert!(matches!(next(&mut rx).await, ServerMessage::Joined { .. }));

        // Racing needs two occupants; steering while waiting is refused
        conn.handle_message(ClientMessage::Submit { command: Command::Steer { throttle: 1.0, steering: 0.0 } }).await;
        let rejected = loop {
            match next(&mut rx).await {
                ServerMessage::Rejected { command, category, .. } => break (command, category),
                _ => continue,
            }
        };
        assert_eq!(rejected.0, "steer");

        conn.handle_message(ClientMessage::Ping { timestamp: 42 }).await;
        let pong = loop {
            if let ServerMessage::Pong { timestamp, .. } = next(&mut rx).await {
                break timestamp;
            }
        };
        assert_eq!(pong, 42);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_close_holds_seat_and_leave_releases() {
        let manager = Arc::new(SessionManager::default());
        let (mut a, mut a_rx) = connect(&manager);
        a.handle_message(ClientMessage::Join {
            identity: "a".into(),
            display_name: "A".into(),
            variant: Some(Box::new(GameVariant::slicer())),
        })
        .await;
        assert!(matches!(next(&mut a_rx).await, ServerMessage::Joined { .. }));
        let (_, id) = a.seated().unwrap();

        a.close().await;
        assert!(a.seated().is_none());

        // Same identity on a new connection resumes the seat
        let (mut again, mut again_rx) = connect(&manager);
        let joined = loop {
            again.handle_message(ClientMessage::Join { identity: "a".into(), display_name: "A".into(), variant: None }).await;
            match next(&mut again_rx).await {
                ServerMessage::Joined { reconnected, .. } => break reconnected,
                _ => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        };
        assert!(joined);

        again.handle_message(ClientMessage::Leave).await;
        assert!(again.seated().is_none());
        loop {
            if manager.info(&id).await.unwrap().occupants == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        manager.shutdown().await;
    }
}
