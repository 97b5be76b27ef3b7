//! Punishment mode: a guild channel that loops a random song at whoever is sent there.

use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::{
    common::{
        GatewayError, PunishmentError, VoiceError,
        types::{ChannelId, GuildId, UserId},
    },
    configs::{PunishmentConfig, PunishmentSong},
    gateway::{GatewayClient, GatewayEvent, VoiceEventListener},
    playback::{QueueMode, Track},
    player::LoadOutcome,
    service::reaper::is_alone,
    session::{CloseReason, Phase, SessionRegistry},
};

pub mod assignments;
pub mod store;

pub use assignments::{PunishmentAssignment, PunishmentAssignments};
pub use store::{PunishmentStore, StaticPunishmentStore};

/// What `show` reports for a guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PunishmentOverview {
    pub channel_id: Option<ChannelId>,
    pub songs: Vec<PunishmentSong>,
    pub punished: Vec<PunishmentAssignment>,
}

pub struct PunishmentMode {
    registry: Arc<SessionRegistry>,
    gateway: Arc<dyn GatewayClient>,
    store: Arc<dyn PunishmentStore>,
    config: PunishmentConfig,
    assignments: PunishmentAssignments,
}

impl PunishmentMode {
    pub fn new(
        registry: Arc<SessionRegistry>,
        gateway: Arc<dyn GatewayClient>,
        store: Arc<dyn PunishmentStore>,
        config: PunishmentConfig,
    ) -> Self {
        Self {
            registry,
            gateway,
            store,
            config,
            assignments: PunishmentAssignments::default(),
        }
    }

    /// Sends `user_id` to the punishment channel for `seconds`, clamped to the
    /// configured bounds. Users already in voice are moved right away.
    pub async fn punish(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        seconds: u64,
    ) -> Result<PunishmentAssignment, PunishmentError> {
        let channel_id = self
            .store
            .punishment_channel(guild_id)
            .await
            .ok_or(PunishmentError::NotConfigured)?;

        let seconds = seconds.max(self.config.min_seconds).min(self.config.max_seconds);
        let assignment = self.assignments.assign(guild_id, user_id, seconds);
        info!("[{}] Punishing user {} for {}s", guild_id, user_id, seconds);

        if let Some(current) = self.gateway.voice_channel_of(guild_id, user_id).await {
            if current != channel_id {
                self.move_to(guild_id, user_id, channel_id).await;
            }
        }
        Ok(assignment)
    }

    /// Lifts one user's punishment, or everyone's in the guild when `user_id` is `None`.
    pub fn clear(&self, guild_id: GuildId, user_id: Option<UserId>) -> Result<usize, PunishmentError> {
        match user_id {
            Some(user_id) if self.assignments.remove(guild_id, user_id) => Ok(1),
            Some(_) => Err(PunishmentError::NotPunished),
            None => Ok(self.assignments.clear_guild(guild_id)),
        }
    }

    pub async fn show(&self, guild_id: GuildId) -> PunishmentOverview {
        PunishmentOverview {
            channel_id: self.store.punishment_channel(guild_id).await,
            songs: self.store.punishment_songs(guild_id).await,
            punished: self.assignments.list(guild_id),
        }
    }

    pub fn is_punished(&self, guild_id: GuildId, user_id: UserId) -> bool {
        self.assignments.active(guild_id, user_id).is_some()
    }

    async fn move_to(&self, guild_id: GuildId, user_id: UserId, channel_id: ChannelId) {
        match self.gateway.move_member(guild_id, user_id, channel_id).await {
            Ok(()) => debug!("[{}] Moved user {} to {}", guild_id, user_id, channel_id),
            Err(GatewayError::Forbidden) => {
                debug!("[{}] Not allowed to move user {}", guild_id, user_id)
            }
            Err(e) => warn!("[{}] Could not move user {}: {}", guild_id, user_id, e),
        }
    }

    /// Joins the punishment channel with one random song on repeat.
    async fn start_song(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<(), VoiceError> {
        if self.registry.get(guild_id).is_some() {
            debug!("[{}] Voice already in use; no punishment song", guild_id);
            return Ok(());
        }

        let songs = self.store.punishment_songs(guild_id).await;
        let song = songs.choose(&mut rand::thread_rng()).cloned();
        let Some(song) = song else {
            debug!("[{}] No punishment songs configured", guild_id);
            return Ok(());
        };

        let player = self.registry.player_for(guild_id);
        let data = match player.load_tracks(&song.url).await? {
            LoadOutcome::SingleTrack(data) => data,
            LoadOutcome::Playlist { mut tracks, .. } if !tracks.is_empty() => tracks.swap_remove(0),
            LoadOutcome::LoadFailed(reason) => {
                warn!("[{}] Punishment song {} failed to load: {}", guild_id, song.name, reason);
                return Ok(());
            }
            _ => {
                warn!("[{}] Punishment song {} matched nothing", guild_id, song.name);
                return Ok(());
            }
        };

        let session = self
            .registry
            .connect(guild_id, channel_id, QueueMode::Repeat)
            .await?;
        session.enqueue(Track::from_data(data, user_id)).await?;
        info!("[{}] Punishment song {} started", guild_id, song.name);
        Ok(())
    }

    /// Leaves the punishment channel once nobody is left to hear it.
    async fn leave_if_empty(&self, guild_id: GuildId, channel_id: ChannelId) {
        let Some(session) = self.registry.get(guild_id) else {
            return;
        };
        if session.channel_id() != channel_id
            || session.queue_mode() != QueueMode::Repeat
            || session.phase() != Phase::Active
        {
            return;
        }
        if is_alone(self.gateway.as_ref(), &session).await {
            info!("[{}] Punishment channel is empty; leaving", guild_id);
            session.disconnect(CloseReason::Idle).await;
        }
    }
}

#[async_trait]
impl VoiceEventListener for PunishmentMode {
    fn name(&self) -> &'static str {
        "punishment"
    }

    async fn on_voice_event(&self, event: &GatewayEvent) -> Result<(), VoiceError> {
        let GatewayEvent::StateChanged {
            guild_id,
            user_id,
            channel_id,
            ..
        } = event
        else {
            return Ok(());
        };
        let (guild_id, user_id) = (*guild_id, *user_id);
        if user_id == self.gateway.bot_user_id() {
            return Ok(());
        }
        let Some(punishment_channel) = self.store.punishment_channel(guild_id).await else {
            return Ok(());
        };

        match *channel_id {
            Some(channel_id) if channel_id == punishment_channel => {
                self.start_song(guild_id, user_id, channel_id).await
            }
            Some(_) if self.is_punished(guild_id, user_id) => {
                self.move_to(guild_id, user_id, punishment_channel).await;
                Ok(())
            }
            _ => {
                self.leave_if_empty(guild_id, punishment_channel).await;
                Ok(())
            }
        }
    }
}
