//! Lavalink v4 binding: REST for commands, a websocket for events.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    common::{
        TransportError,
        types::{GuildId, UserId},
    },
    configs::LavalinkConfig,
    playback::Playing,
    player::{EngineEvent, LoadOutcome, PlayerNode, VoiceCredentials, handle_user_data},
    protocol::{PlayerUpdate, UpdateTrack, VoicePayload},
};

mod backoff;
mod rest;
mod socket;

use self::{rest::RestClient, socket::NodeSocket};

pub struct LavalinkNode {
    config: LavalinkConfig,
    user_id: UserId,
    rest: RestClient,
    /// Engine session id, present while the websocket is up.
    session: Arc<watch::Sender<Option<String>>>,
}

impl LavalinkNode {
    pub fn new(config: LavalinkConfig, user_id: UserId) -> Self {
        let rest = RestClient::new(&config);
        let (session, _) = watch::channel(None);
        Self {
            config,
            user_id,
            rest,
            session: Arc::new(session),
        }
    }

    /// Spawns the event socket. Events stop flowing when `cancel` fires.
    pub fn connect(
        &self,
        events: flume::Sender<EngineEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let socket = NodeSocket {
            config: self.config.clone(),
            user_id: self.user_id,
            session: self.session.clone(),
            events,
            cancel,
        };
        tokio::spawn(socket.run())
    }

    pub fn is_ready(&self) -> bool {
        self.session.borrow().is_some()
    }

    /// Waits for the engine to hand out a session id.
    pub async fn ready(&self) {
        let mut rx = self.session.subscribe();
        let _ = rx.wait_for(Option::is_some).await;
    }

    fn session_id(&self) -> Result<String, TransportError> {
        self.session.borrow().clone().ok_or(TransportError::NotReady)
    }

    /// URLs load directly; anything else goes through the configured search.
    fn identifier_for(&self, query: &str) -> String {
        let query = query.trim();
        if query.starts_with("http://") || query.starts_with("https://") {
            query.to_string()
        } else {
            format!("{}{}", self.config.search_prefix, query)
        }
    }

    async fn update(&self, guild_id: GuildId, update: PlayerUpdate) -> Result<(), TransportError> {
        let session_id = self.session_id()?;
        self.rest.update_player(&session_id, guild_id, &update).await
    }
}

#[async_trait]
impl PlayerNode for LavalinkNode {
    async fn update_voice(
        &self,
        guild_id: GuildId,
        credentials: &VoiceCredentials,
    ) -> Result<(), TransportError> {
        debug!("[{}] Sending voice credentials for {}", guild_id, credentials.endpoint);
        self.update(
            guild_id,
            PlayerUpdate {
                voice: Some(VoicePayload {
                    token: credentials.token.clone(),
                    endpoint: credentials.endpoint.clone(),
                    session_id: credentials.session_id.clone(),
                    channel_id: credentials.channel_id.map(|c| c.to_string()),
                }),
                ..Default::default()
            },
        )
        .await
    }

    async fn load_tracks(&self, query: &str) -> Result<LoadOutcome, TransportError> {
        let identifier = self.identifier_for(query);
        Ok(self.rest.load_tracks(&identifier).await?.into())
    }

    async fn play(&self, guild_id: GuildId, playing: &Playing) -> Result<(), TransportError> {
        self.update(
            guild_id,
            PlayerUpdate {
                track: Some(UpdateTrack {
                    encoded: Some(playing.track.encoded.clone()),
                    user_data: Some(handle_user_data(playing.handle)),
                }),
                position: playing.track.seek_offset_ms,
                paused: Some(false),
                ..Default::default()
            },
        )
        .await
    }

    async fn set_paused(&self, guild_id: GuildId, paused: bool) -> Result<(), TransportError> {
        self.update(
            guild_id,
            PlayerUpdate {
                paused: Some(paused),
                ..Default::default()
            },
        )
        .await
    }

    async fn stop(&self, guild_id: GuildId) -> Result<(), TransportError> {
        self.update(
            guild_id,
            PlayerUpdate {
                track: Some(UpdateTrack {
                    encoded: None,
                    user_data: None,
                }),
                ..Default::default()
            },
        )
        .await
    }

    async fn destroy(&self, guild_id: GuildId) -> Result<(), TransportError> {
        let session_id = self.session_id()?;
        self.rest.destroy_player(&session_id, guild_id).await
    }
}
