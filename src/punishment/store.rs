use std::collections::HashMap;

use async_trait::async_trait;
use tracing::warn;

use crate::{
    common::types::{ChannelId, GuildId},
    configs::{PunishmentConfig, PunishmentSong},
};

/// Per-guild punishment settings. A missing record means the feature is off for that guild.
#[async_trait]
pub trait PunishmentStore: Send + Sync {
    async fn punishment_channel(&self, guild_id: GuildId) -> Option<ChannelId>;

    async fn punishment_songs(&self, guild_id: GuildId) -> Vec<PunishmentSong>;
}

/// Settings read once from `[punishment.guilds]`.
#[derive(Debug, Default)]
pub struct StaticPunishmentStore {
    channels: HashMap<GuildId, ChannelId>,
    songs: HashMap<GuildId, Vec<PunishmentSong>>,
}

impl StaticPunishmentStore {
    pub fn from_config(config: &PunishmentConfig) -> Self {
        let mut store = Self::default();
        for (key, guild) in &config.guilds {
            let Ok(guild_id) = key.parse::<GuildId>() else {
                warn!("Ignoring punishment settings for invalid guild id '{}'", key);
                continue;
            };
            if let Some(channel) = guild.channel {
                store.channels.insert(guild_id, channel);
            }
            store.songs.insert(guild_id, guild.songs.clone());
        }
        store
    }
}

#[async_trait]
impl PunishmentStore for StaticPunishmentStore {
    async fn punishment_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        self.channels.get(&guild_id).copied()
    }

    async fn punishment_songs(&self, guild_id: GuildId) -> Vec<PunishmentSong> {
        self.songs.get(&guild_id).cloned().unwrap_or_default()
    }
}
