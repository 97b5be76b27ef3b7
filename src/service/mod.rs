//! The face the host bot talks to: construction, background tasks, commands.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    common::{
        VoiceError,
        types::{ChannelId, GuildId, UserId},
    },
    configs::Config,
    gateway::{GatewayClient, VoiceGatewayAdapter},
    playback::QueueMode,
    player::{EngineEvent, LavalinkNode, PlayerNode},
    punishment::{PunishmentMode, PunishmentStore},
    session::{SessionRegistry, VoiceSession},
};

pub mod commands;
pub mod notifications;
pub mod reaper;

pub use commands::Reply;
pub use notifications::{Notification, Notifier};
pub use reaper::IdleReaper;

pub struct VoiceService {
    config: Config,
    registry: Arc<SessionRegistry>,
    gateway: Arc<dyn GatewayClient>,
    adapter: Arc<VoiceGatewayAdapter>,
    punishment: Arc<PunishmentMode>,
    cancel: CancellationToken,
}

impl VoiceService {
    /// Wires the bridge to an engine node and the chat platform. Notifications
    /// come out of the returned receiver.
    pub fn new(
        config: Config,
        node: Arc<dyn PlayerNode>,
        gateway: Arc<dyn GatewayClient>,
        store: Arc<dyn PunishmentStore>,
    ) -> (Self, flume::Receiver<Notification>) {
        let (notifier, notifications) = Notifier::channel();
        let registry = SessionRegistry::new(node, gateway.clone(), notifier, config.voice.clone());
        let adapter = Arc::new(VoiceGatewayAdapter::new(registry.clone()));
        let punishment = Arc::new(PunishmentMode::new(
            registry.clone(),
            gateway.clone(),
            store,
            config.punishment.clone(),
        ));
        adapter.register(punishment.clone());

        let service = Self {
            config,
            registry,
            gateway,
            adapter,
            punishment,
            cancel: CancellationToken::new(),
        };
        (service, notifications)
    }

    /// Builds the service on a Lavalink node and starts every background task:
    /// the engine socket, engine event routing and the idle reaper.
    pub fn with_lavalink(
        config: Config,
        gateway: Arc<dyn GatewayClient>,
        store: Arc<dyn PunishmentStore>,
    ) -> (Self, flume::Receiver<Notification>) {
        let node = Arc::new(LavalinkNode::new(config.lavalink.clone(), gateway.bot_user_id()));
        let (service, notifications) = Self::new(config, node.clone(), gateway, store);

        let (events_tx, events_rx) = flume::unbounded();
        node.connect(events_tx, service.cancel.child_token());
        service.spawn_engine_events(events_rx);
        service.spawn_reaper();

        info!("Voice bridge started against {}", service.config.lavalink.rest_base());
        (service, notifications)
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn adapter(&self) -> &Arc<VoiceGatewayAdapter> {
        &self.adapter
    }

    pub fn punishment(&self) -> &Arc<PunishmentMode> {
        &self.punishment
    }

    pub fn gateway(&self) -> &Arc<dyn GatewayClient> {
        &self.gateway
    }

    /// Joins `channel_id` for regular playback, or reuses the session already there.
    pub async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<VoiceSession>, VoiceError> {
        self.registry
            .connect(guild_id, channel_id, QueueMode::Drain)
            .await
    }

    /// Routes engine events to their sessions until cancelled or the source closes.
    pub fn spawn_engine_events(&self, events: flume::Receiver<EngineEvent>) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv_async() => match event {
                        Ok(event) => registry.route_engine(event),
                        Err(_) => break,
                    },
                }
            }
            debug!("Engine event routing stopped");
        })
    }

    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        IdleReaper::new(
            self.registry.clone(),
            self.gateway.clone(),
            self.config.voice.idle_sweep_interval(),
        )
        .spawn(self.cancel.child_token())
    }

    /// Whether `user_id` is punished right now in `guild_id`.
    pub fn is_punished(&self, guild_id: GuildId, user_id: UserId) -> bool {
        self.punishment.is_punished(guild_id, user_id)
    }

    /// Stops background tasks and leaves every channel.
    pub async fn shutdown(&self) {
        info!("Shutting down voice bridge");
        self.cancel.cancel();
        self.registry.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        common::testing::{BOT, ServiceHarness},
        player::{EndReason, PlayerEvent, PlayerEventKind},
        session::Phase,
    };

    #[tokio::test]
    async fn test_engine_events_reach_sessions() {
        let h = ServiceHarness::new();
        h.gateway.place(GuildId(1), UserId(2), Some(ChannelId(3)));
        h.node.set_result(
            "song",
            crate::player::LoadOutcome::SingleTrack(crate::common::testing::track_data("a")),
        );
        h.service.play(GuildId(1), UserId(2), "song").await.unwrap();
        h.service.play(GuildId(1), UserId(2), "song").await.unwrap();

        let (tx, rx) = flume::unbounded();
        let task = h.service.spawn_engine_events(rx);
        let handle = h.node.last_play_handle(GuildId(1)).unwrap();
        tx.send(EngineEvent::Player(PlayerEvent {
            guild_id: GuildId(1),
            kind: PlayerEventKind::TrackEnded {
                handle: Some(handle),
                reason: EndReason::Finished,
            },
        }))
        .unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while h.node.played(GuildId(1)).len() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_leaves_every_channel() {
        let h = ServiceHarness::new();
        let session = h.service.connect(GuildId(1), ChannelId(3)).await.unwrap();
        assert_eq!(session.phase(), Phase::Active);
        assert_eq!(h.gateway.voice_channel_of(GuildId(1), BOT).await, Some(ChannelId(3)));

        h.service.shutdown().await;

        assert!(h.service.registry().is_empty());
        assert_eq!(h.gateway.voice_channel_of(GuildId(1), BOT).await, None);
    }
}
