use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::common::types::ChannelId;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PunishmentConfig {
    #[serde(default = "default_min_seconds")]
    pub min_seconds: u64,
    #[serde(default = "default_max_seconds")]
    pub max_seconds: u64,
    /// Keyed by guild id.
    #[serde(default)]
    pub guilds: HashMap<String, GuildPunishmentConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GuildPunishmentConfig {
    pub channel: Option<ChannelId>,
    #[serde(default)]
    pub songs: Vec<PunishmentSong>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct PunishmentSong {
    pub name: String,
    pub url: String,
}

impl Default for PunishmentConfig {
    fn default() -> Self {
        Self {
            min_seconds: default_min_seconds(),
            max_seconds: default_max_seconds(),
            guilds: HashMap::new(),
        }
    }
}

fn default_min_seconds() -> u64 {
    5
}

fn default_max_seconds() -> u64 {
    60
}
