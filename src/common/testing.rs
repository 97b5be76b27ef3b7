//! In-process stand-ins for the chat platform and the audio engine.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    common::{
        GatewayError, TransportError,
        types::{ChannelId, GuildId, UserId},
    },
    configs::{Config, VoiceConfig},
    gateway::{GatewayClient, GatewayEvent, VoiceGatewayAdapter},
    playback::{PlayHandle, Playing, Track},
    player::{LoadOutcome, PlayerNode, VoiceCredentials},
    protocol::{TrackData, TrackInfo},
    punishment::StaticPunishmentStore,
    service::{
        VoiceService,
        notifications::{Notification, Notifier},
    },
    session::SessionRegistry,
};

pub const BOT: UserId = UserId(999);

pub fn track_data(id: &str) -> TrackData {
    TrackData {
        encoded: format!("enc-{}", id),
        info: TrackInfo {
            identifier: id.to_string(),
            title: format!("Track {}", id),
            author: "someone".to_string(),
            length: 180_000,
            uri: Some(format!("https://example.com/{}", id)),
            source_name: "http".to_string(),
            ..Default::default()
        },
        user_data: serde_json::Value::Null,
    }
}

pub fn track(id: &str) -> Track {
    Track::from_data(track_data(id), UserId(1))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeCall {
    UpdateVoice(GuildId, VoiceCredentials),
    Load(String),
    Play {
        guild_id: GuildId,
        handle: PlayHandle,
        identifier: String,
        position: Option<u64>,
    },
    Pause(GuildId, bool),
    Stop(GuildId),
    Destroy(GuildId),
}

/// Records every command; fails the next N on request.
#[derive(Default)]
pub struct FakeNode {
    calls: Mutex<Vec<NodeCall>>,
    failures: AtomicUsize,
    empty_destroy: AtomicBool,
    destroy_delay: Mutex<Option<Duration>>,
    results: Mutex<HashMap<String, LoadOutcome>>,
}

impl FakeNode {
    pub fn calls(&self) -> Vec<NodeCall> {
        self.calls.lock().clone()
    }

    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_destroy_with_empty_body(&self) {
        self.empty_destroy.store(true, Ordering::SeqCst);
    }

    /// Makes `destroy` take a while, like a real engine round trip.
    pub fn slow_destroy(&self, delay: Duration) {
        *self.destroy_delay.lock() = Some(delay);
    }

    pub fn set_result(&self, query: &str, outcome: LoadOutcome) {
        self.results.lock().insert(query.to_string(), outcome);
    }

    pub fn played(&self, guild: GuildId) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                NodeCall::Play {
                    guild_id,
                    identifier,
                    ..
                } if guild_id == guild => Some(identifier),
                _ => None,
            })
            .collect()
    }

    pub fn last_play_handle(&self, guild: GuildId) -> Option<PlayHandle> {
        self.calls().into_iter().rev().find_map(|c| match c {
            NodeCall::Play {
                guild_id, handle, ..
            } if guild_id == guild => Some(handle),
            _ => None,
        })
    }

    pub fn voice_updates(&self, guild: GuildId) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, NodeCall::UpdateVoice(g, _) if *g == guild))
            .count()
    }

    fn record(&self, call: NodeCall) -> Result<(), TransportError> {
        self.calls.lock().push(call);
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TransportError::Status {
                status: 500,
                message: "injected failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PlayerNode for FakeNode {
    async fn update_voice(
        &self,
        guild_id: GuildId,
        credentials: &VoiceCredentials,
    ) -> Result<(), TransportError> {
        self.record(NodeCall::UpdateVoice(guild_id, credentials.clone()))
    }

    async fn load_tracks(&self, identifier: &str) -> Result<LoadOutcome, TransportError> {
        self.record(NodeCall::Load(identifier.to_string()))?;
        Ok(self
            .results
            .lock()
            .get(identifier)
            .cloned()
            .unwrap_or(LoadOutcome::NoMatch))
    }

    async fn play(&self, guild_id: GuildId, playing: &Playing) -> Result<(), TransportError> {
        self.record(NodeCall::Play {
            guild_id,
            handle: playing.handle,
            identifier: playing.track.identifier.clone(),
            position: playing.track.seek_offset_ms,
        })
    }

    async fn set_paused(&self, guild_id: GuildId, paused: bool) -> Result<(), TransportError> {
        self.record(NodeCall::Pause(guild_id, paused))
    }

    async fn stop(&self, guild_id: GuildId) -> Result<(), TransportError> {
        self.record(NodeCall::Stop(guild_id))
    }

    async fn destroy(&self, guild_id: GuildId) -> Result<(), TransportError> {
        self.record(NodeCall::Destroy(guild_id))?;
        let delay = *self.destroy_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.empty_destroy.load(Ordering::SeqCst) {
            return Err(TransportError::EmptyBody { status: 204 });
        }
        Ok(())
    }
}

/// Voice membership held in memory. Bot joins and leaves update it immediately.
pub struct FakeGateway {
    members: Mutex<HashMap<(GuildId, UserId), ChannelId>>,
    voice_updates: Mutex<Vec<(GuildId, Option<ChannelId>)>>,
    moves: Mutex<Vec<(GuildId, UserId, ChannelId)>>,
    forbid_moves: AtomicBool,
    requests: (
        flume::Sender<(GuildId, Option<ChannelId>)>,
        flume::Receiver<(GuildId, Option<ChannelId>)>,
    ),
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
            voice_updates: Mutex::new(Vec::new()),
            moves: Mutex::new(Vec::new()),
            forbid_moves: AtomicBool::new(false),
            requests: flume::unbounded(),
        }
    }
}

impl FakeGateway {
    pub fn place(&self, guild_id: GuildId, user_id: UserId, channel_id: Option<ChannelId>) {
        let mut members = self.members.lock();
        match channel_id {
            Some(channel_id) => members.insert((guild_id, user_id), channel_id),
            None => members.remove(&(guild_id, user_id)),
        };
    }

    pub fn voice_updates(&self) -> Vec<(GuildId, Option<ChannelId>)> {
        self.voice_updates.lock().clone()
    }

    pub fn moves(&self) -> Vec<(GuildId, UserId, ChannelId)> {
        self.moves.lock().clone()
    }

    pub fn forbid_moves(&self) {
        self.forbid_moves.store(true, Ordering::SeqCst);
    }

    fn join_requests(&self) -> flume::Receiver<(GuildId, Option<ChannelId>)> {
        self.requests.1.clone()
    }
}

#[async_trait]
impl GatewayClient for FakeGateway {
    fn bot_user_id(&self) -> UserId {
        BOT
    }

    async fn occupants_of(&self, guild_id: GuildId, channel_id: ChannelId) -> HashSet<UserId> {
        self.members
            .lock()
            .iter()
            .filter(|((g, _), c)| *g == guild_id && **c == channel_id)
            .map(|((_, u), _)| *u)
            .collect()
    }

    async fn voice_channel_of(&self, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
        self.members.lock().get(&(guild_id, user_id)).copied()
    }

    async fn request_voice_update(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        _self_deaf: bool,
    ) -> Result<(), GatewayError> {
        self.voice_updates.lock().push((guild_id, channel_id));
        self.place(guild_id, BOT, channel_id);
        let _ = self.requests.0.send((guild_id, channel_id));
        Ok(())
    }

    async fn move_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<(), GatewayError> {
        if self.forbid_moves.load(Ordering::SeqCst) {
            return Err(GatewayError::Forbidden);
        }
        self.moves.lock().push((guild_id, user_id, channel_id));
        self.place(guild_id, user_id, Some(channel_id));
        Ok(())
    }
}

/// A registry wired to fakes.
pub struct Harness {
    pub node: Arc<FakeNode>,
    pub gateway: Arc<FakeGateway>,
    pub registry: Arc<SessionRegistry>,
    pub notifications: flume::Receiver<Notification>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(VoiceConfig::default())
    }

    pub fn with_config(config: VoiceConfig) -> Self {
        let node = Arc::new(FakeNode::default());
        let gateway = Arc::new(FakeGateway::default());
        let (notifier, notifications) = Notifier::channel();
        let registry = SessionRegistry::new(node.clone(), gateway.clone(), notifier, config);
        Self {
            node,
            gateway,
            registry,
            notifications,
        }
    }

    /// Answers every join request the way the platform does: server first, then
    /// the bot's own voice state.
    pub fn auto_join(&self) {
        let registry = self.registry.clone();
        answer_joins(&self.gateway, move |event| registry.route(&event));
    }

    pub async fn active_session(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Arc<crate::session::VoiceSession> {
        self.auto_join();
        self.registry
            .connect(guild_id, channel_id, crate::playback::QueueMode::Drain)
            .await
            .unwrap()
    }

    pub fn drain_notifications(&self) -> Vec<Notification> {
        self.notifications.try_iter().collect()
    }
}

/// Spawns a responder that turns each voice update request into the events the
/// platform would send back.
fn answer_joins(gateway: &FakeGateway, deliver: impl Fn(GatewayEvent) + Send + 'static) {
    let requests = gateway.join_requests();
    tokio::spawn(async move {
        while let Ok((guild_id, channel_id)) = requests.recv_async().await {
            if channel_id.is_some() {
                deliver(GatewayEvent::ServerAssigned {
                    guild_id,
                    endpoint: "voice.example.gg".into(),
                    token: "token".into(),
                });
            }
            deliver(GatewayEvent::StateChanged {
                guild_id,
                user_id: BOT,
                channel_id,
                session_id: "bot-session".into(),
            });
        }
    });
}

/// A full service wired to fakes, answering joins through its gateway adapter.
pub struct ServiceHarness {
    pub node: Arc<FakeNode>,
    pub gateway: Arc<FakeGateway>,
    pub service: VoiceService,
    pub notifications: flume::Receiver<Notification>,
}

impl ServiceHarness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let node = Arc::new(FakeNode::default());
        let gateway = Arc::new(FakeGateway::default());
        let store = Arc::new(StaticPunishmentStore::from_config(&config.punishment));
        let (service, notifications) =
            VoiceService::new(config, node.clone(), gateway.clone(), store);

        let adapter: Arc<VoiceGatewayAdapter> = service.adapter().clone();
        answer_joins(&gateway, move |event| adapter.dispatch(event));

        Self {
            node,
            gateway,
            service,
            notifications,
        }
    }

    pub fn drain_notifications(&self) -> Vec<Notification> {
        self.notifications.try_iter().collect()
    }
}
