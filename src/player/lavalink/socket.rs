use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::{
    self,
    client::IntoClientRequest,
    http::HeaderValue,
    protocol::Message,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::backoff::Backoff;
use crate::{
    common::{TransportError, types::UserId},
    configs::LavalinkConfig,
    player::{EngineEvent, PlayerEvent},
    protocol::IncomingMessage,
};

enum SocketOutcome {
    Shutdown,
    Reconnect,
}

/// Event stream from the engine. Commands go over REST; this side only listens.
pub(super) struct NodeSocket {
    pub(super) config: LavalinkConfig,
    pub(super) user_id: UserId,
    pub(super) session: Arc<watch::Sender<Option<String>>>,
    pub(super) events: flume::Sender<EngineEvent>,
    pub(super) cancel: CancellationToken,
}

impl NodeSocket {
    pub(super) async fn run(self) {
        let mut backoff = Backoff::new(self.config.max_reconnect_attempts);

        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            match self.connect(&mut backoff).await {
                Ok(SocketOutcome::Shutdown) => {
                    debug!("Engine socket shutting down");
                    self.session.send_replace(None);
                    return;
                }
                Ok(SocketOutcome::Reconnect) => {}
                Err(e) => warn!("Engine socket error: {}", e),
            }

            self.session.send_replace(None);
            if backoff.is_exhausted() {
                error!(
                    "Engine unreachable after {} attempts; giving up",
                    self.config.max_reconnect_attempts
                );
                return;
            }

            let delay = backoff.next();
            info!("Reconnecting to engine in {:?}", delay);
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn connect(&self, backoff: &mut Backoff) -> Result<SocketOutcome, TransportError> {
        let url = self.config.websocket_url();
        debug!("Connecting to engine websocket: {}", url);

        let mut request = url.into_client_request()?;
        let headers = request.headers_mut();
        headers.insert("Authorization", header(&self.config.password)?);
        headers.insert("User-Id", header(&self.user_id.to_string())?);
        headers.insert("Client-Name", header(&self.config.client_name)?);

        let (mut ws, _) = tokio_tungstenite::connect_async(request).await?;

        loop {
            let msg = tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = ws.close(None).await;
                    return Ok(SocketOutcome::Shutdown);
                }
                msg = ws.next() => msg,
            };

            let msg = match msg {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    debug!("Engine websocket stream ended");
                    return Ok(SocketOutcome::Reconnect);
                }
            };

            match msg {
                Message::Text(text) => {
                    if let Some(outcome) = self.handle_text(text.as_str(), backoff) {
                        return Ok(outcome);
                    }
                }
                Message::Close(frame) => {
                    let (code, reason) = frame
                        .map(|cf| (u16::from(cf.code), cf.reason.to_string()))
                        .unwrap_or((1000, "No reason".into()));
                    info!("Engine websocket closed: code={}, reason='{}'", code, reason);
                    return Ok(SocketOutcome::Reconnect);
                }
                _ => {}
            }
        }
    }

    fn handle_text(&self, text: &str, backoff: &mut Backoff) -> Option<SocketOutcome> {
        let msg = match serde_json::from_str::<IncomingMessage>(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Skipping undecodable engine message: {}", e);
                return None;
            }
        };

        match msg {
            IncomingMessage::Ready {
                resumed,
                session_id,
            } => {
                info!("Engine ready: session={} resumed={}", session_id, resumed);
                backoff.reset();
                self.session.send_replace(Some(session_id));
                if !resumed {
                    return self.forward(EngineEvent::SessionReset);
                }
            }
            IncomingMessage::PlayerUpdate { guild_id, state } => {
                trace!(
                    "[{}] Player update: position={}ms connected={} ping={}",
                    guild_id, state.position, state.connected, state.ping
                );
            }
            IncomingMessage::Stats(_) => {}
            IncomingMessage::Event(event) => {
                return self.forward(EngineEvent::Player(PlayerEvent::from(event)));
            }
        }
        None
    }

    fn forward(&self, event: EngineEvent) -> Option<SocketOutcome> {
        if self.events.send(event).is_err() {
            debug!("Engine event receiver dropped");
            return Some(SocketOutcome::Shutdown);
        }
        None
    }
}

fn header(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value)
        .map_err(|e| TransportError::WebSocket(tungstenite::Error::HttpFormat(e.into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::PlayerEventKind;

    fn socket() -> (NodeSocket, flume::Receiver<EngineEvent>) {
        let (events, rx) = flume::unbounded();
        let (session, _) = watch::channel(None);
        let socket = NodeSocket {
            config: LavalinkConfig::default(),
            user_id: UserId(1),
            session: Arc::new(session),
            events,
            cancel: CancellationToken::new(),
        };
        (socket, rx)
    }

    #[test]
    fn test_fresh_session_resets_players() {
        let (socket, rx) = socket();
        let mut backoff = Backoff::new(3);

        let outcome = socket.handle_text(
            r#"{"op":"ready","resumed":false,"sessionId":"fresh"}"#,
            &mut backoff,
        );

        assert!(outcome.is_none());
        assert_eq!(socket.session.borrow().as_deref(), Some("fresh"));
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::SessionReset);
    }

    #[test]
    fn test_resumed_session_keeps_players() {
        let (socket, rx) = socket();
        let mut backoff = Backoff::new(3);

        socket.handle_text(
            r#"{"op":"ready","resumed":true,"sessionId":"kept"}"#,
            &mut backoff,
        );

        assert_eq!(socket.session.borrow().as_deref(), Some("kept"));
        assert!(rx.is_empty());
    }

    #[test]
    fn test_player_events_are_forwarded() {
        let (socket, rx) = socket();
        let mut backoff = Backoff::new(3);

        socket.handle_text(
            r#"{"op":"event","type":"WebSocketClosedEvent","guildId":"7","code":4006,"reason":"Session no longer valid","byRemote":true}"#,
            &mut backoff,
        );

        let EngineEvent::Player(event) = rx.try_recv().unwrap() else {
            panic!("expected a player event");
        };
        assert_eq!(event.guild_id, crate::common::types::GuildId(7));
        assert!(matches!(event.kind, PlayerEventKind::VoiceClosed { code: 4006, .. }));
    }

    #[test]
    fn test_dropped_receiver_stops_the_socket() {
        let (socket, rx) = socket();
        drop(rx);
        let mut backoff = Backoff::new(3);

        let outcome = socket.handle_text(
            r#"{"op":"ready","resumed":false,"sessionId":"fresh"}"#,
            &mut backoff,
        );
        assert!(matches!(outcome, Some(SocketOutcome::Shutdown)));
    }
}
