use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::{DashMap, mapref::entry::Entry};
use tracing::{debug, info};

use crate::{
    common::{
        VoiceError,
        types::{ChannelId, GuildId},
    },
    configs::VoiceConfig,
    gateway::{GatewayClient, GatewayEvent},
    playback::QueueMode,
    player::{EngineEvent, GuildPlayer, PlayerEvent, PlayerNode},
    service::notifications::Notifier,
    session::{CloseReason, Phase, SessionEvent, VoiceSession},
};

/// Result of asking for a guild's voice slot.
pub enum Admission {
    /// A fresh session now owns the guild; the caller starts it.
    Created(Arc<VoiceSession>),
    /// The guild is already being served in the requested channel.
    Existing(Arc<VoiceSession>),
}

/// Guild → live session. The only place that decides whether a guild is connected.
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<VoiceSession>>,
    players: DashMap<GuildId, Arc<GuildPlayer>>,
    node: Arc<dyn PlayerNode>,
    pub(crate) gateway: Arc<dyn GatewayClient>,
    pub(crate) notifier: Notifier,
    pub(crate) config: VoiceConfig,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new(
        node: Arc<dyn PlayerNode>,
        gateway: Arc<dyn GatewayClient>,
        notifier: Notifier,
        config: VoiceConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            players: DashMap::new(),
            node,
            gateway,
            notifier,
            config,
            next_id: AtomicU64::new(1),
        })
    }

    /// The guild's engine client, created on first use and kept across sessions.
    pub fn player_for(&self, guild_id: GuildId) -> Arc<GuildPlayer> {
        self.players
            .entry(guild_id)
            .or_insert_with(|| {
                Arc::new(GuildPlayer::new(
                    guild_id,
                    self.node.clone(),
                    self.config.command_retries,
                ))
            })
            .clone()
    }

    /// Claims the guild's voice slot for `channel_id`.
    pub fn admit(
        self: &Arc<Self>,
        guild_id: GuildId,
        channel_id: ChannelId,
        mode: QueueMode,
    ) -> Result<Admission, VoiceError> {
        let (session, events) = match self.sessions.entry(guild_id) {
            Entry::Occupied(entry) => {
                let existing = entry.get();
                if !existing.phase().is_live() {
                    return Err(VoiceError::SessionClosed);
                }
                if existing.channel_id() != channel_id {
                    return Err(VoiceError::AlreadyBusy {
                        channel_id: existing.channel_id(),
                    });
                }
                return Ok(Admission::Existing(existing.clone()));
            }
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (session, events) = VoiceSession::new(self, id, guild_id, channel_id, mode);
                entry.insert(session.clone());
                (session, events)
            }
        };

        debug!("[{}] Session #{} created", guild_id, session.id());
        session.spawn_event_loop(events);
        Ok(Admission::Created(session))
    }

    /// Admits, joins and waits for the session to become active. Concurrent
    /// calls for the same channel share one session.
    pub async fn connect(
        self: &Arc<Self>,
        guild_id: GuildId,
        channel_id: ChannelId,
        mode: QueueMode,
    ) -> Result<Arc<VoiceSession>, VoiceError> {
        let session = match self.admit(guild_id, channel_id, mode)? {
            Admission::Created(session) => {
                session.start().await?;
                session
            }
            Admission::Existing(session) => session,
        };
        session.wait_active().await?;
        Ok(session)
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<VoiceSession>> {
        self.sessions.get(&guild_id).map(|s| s.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn active_sessions(&self) -> Vec<Arc<VoiceSession>> {
        self.sessions
            .iter()
            .filter(|s| s.phase() == Phase::Active)
            .map(|s| s.value().clone())
            .collect()
    }

    pub fn route(&self, event: &GatewayEvent) {
        if let Some(session) = self.get(event.guild_id()) {
            session.notify(SessionEvent::Gateway(event.clone()));
        }
    }

    pub fn route_engine(&self, event: EngineEvent) {
        match event {
            EngineEvent::Player(event) => self.route_player(event),
            EngineEvent::SessionReset => {
                let sessions: Vec<_> = self.sessions.iter().map(|s| s.value().clone()).collect();
                if !sessions.is_empty() {
                    info!("Engine session reset; restoring {} voice session(s)", sessions.len());
                }
                for session in sessions {
                    session.notify(SessionEvent::EngineReset);
                }
            }
        }
    }

    pub fn route_player(&self, event: PlayerEvent) {
        match self.get(event.guild_id) {
            Some(session) => session.notify(SessionEvent::Player(event.kind)),
            None => debug!("[{}] Player event without a session: {:?}", event.guild_id, event.kind),
        }
    }

    /// Removes the entry only if it still belongs to session `id`.
    pub(crate) fn release(&self, guild_id: GuildId, id: u64) {
        if self
            .sessions
            .remove_if(&guild_id, |_, s| s.id() == id)
            .is_some()
        {
            debug!("[{}] Session #{} released", guild_id, id);
        }
    }

    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions.iter().map(|s| s.value().clone()).collect();
        if !sessions.is_empty() {
            info!("Closing {} voice session(s)", sessions.len());
        }
        for session in sessions {
            session.disconnect(CloseReason::Shutdown).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::common::testing::{Harness, track};

    const GUILD: GuildId = GuildId(1);

    #[tokio::test]
    async fn test_second_channel_is_busy_while_connecting() {
        let harness = Harness::new();
        let registry = &harness.registry;

        let Admission::Created(first) = registry.admit(GUILD, ChannelId(5), QueueMode::Drain).unwrap()
        else {
            panic!("expected a new session");
        };
        assert!(matches!(
            registry.admit(GUILD, ChannelId(6), QueueMode::Drain),
            Err(VoiceError::AlreadyBusy { channel_id: ChannelId(5) })
        ));
        assert!(matches!(
            registry.admit(GUILD, ChannelId(5), QueueMode::Drain),
            Ok(Admission::Existing(s)) if s.id() == first.id()
        ));

        harness.auto_join();
        first.start().await.unwrap();
        first.wait_active().await.unwrap();
        assert_eq!(first.phase(), Phase::Active);
    }

    #[tokio::test]
    async fn test_concurrent_connects_share_one_session() {
        let harness = Harness::new();
        harness.auto_join();

        let connects = (0..4).map(|_| harness.registry.connect(GUILD, ChannelId(5), QueueMode::Drain));
        let sessions = futures::future::join_all(connects).await;

        let ids: Vec<u64> = sessions.into_iter().map(|s| s.unwrap().id()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(harness.gateway.voice_updates(), vec![(GUILD, Some(ChannelId(5)))]);
        assert_eq!(harness.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_other_guilds_are_independent() {
        let harness = Harness::new();
        harness.auto_join();

        let a = harness.registry.connect(GuildId(1), ChannelId(5), QueueMode::Drain);
        let b = harness.registry.connect(GuildId(2), ChannelId(6), QueueMode::Drain);
        let (a, b) = tokio::join!(a, b);
        assert_ne!(a.unwrap().id(), b.unwrap().id());

        harness.registry.get(GuildId(1)).unwrap().disconnect(CloseReason::Requested).await;
        assert!(harness.registry.get(GuildId(1)).is_none());
        assert!(harness.registry.get(GuildId(2)).is_some());
    }

    #[tokio::test]
    async fn test_stale_release_keeps_newer_session() {
        let harness = Harness::new();
        harness.auto_join();
        let old = harness.registry.connect(GUILD, ChannelId(5), QueueMode::Drain).await.unwrap();
        old.disconnect(CloseReason::Requested).await;

        let new = harness.registry.connect(GUILD, ChannelId(5), QueueMode::Drain).await.unwrap();
        harness.registry.release(GUILD, old.id());

        assert_eq!(harness.registry.get(GUILD).map(|s| s.id()), Some(new.id()));
    }

    #[tokio::test]
    async fn test_engine_reset_restores_every_session() {
        let harness = Harness::new();
        harness.auto_join();
        let a = harness.registry.connect(GuildId(1), ChannelId(5), QueueMode::Drain).await.unwrap();
        harness.registry.connect(GuildId(2), ChannelId(6), QueueMode::Drain).await.unwrap();
        a.enqueue(track("a")).await.unwrap();

        harness.registry.route_engine(EngineEvent::SessionReset);

        tokio::time::timeout(Duration::from_secs(1), async {
            while harness.node.voice_updates(GuildId(1)) < 2
                || harness.node.voice_updates(GuildId(2)) < 2
                || harness.node.played(GuildId(1)).len() < 2
            {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(harness.node.played(GuildId(1)), vec!["a", "a"]);
        assert!(harness.node.played(GuildId(2)).is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let harness = Harness::new();
        harness.auto_join();
        harness.registry.connect(GuildId(1), ChannelId(5), QueueMode::Drain).await.unwrap();
        harness.registry.connect(GuildId(2), ChannelId(6), QueueMode::Drain).await.unwrap();

        harness.registry.shutdown().await;
        assert!(harness.registry.is_empty());
    }
}
