//! Chat-platform side of the bridge: the collaborator seam for voice signalling
//! and membership, and the adapter that turns raw signals into session events.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::common::{
    GatewayError,
    types::{ChannelId, GuildId, UserId},
};

pub mod adapter;
pub mod payloads;

pub use adapter::VoiceGatewayAdapter;
pub use payloads::{VoiceServerUpdate, VoiceStateUpdate};

/// Voice signalling normalised for sessions. Delivery order between the two
/// kinds is not causal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// A member (possibly the bot) joined, moved or left voice.
    StateChanged {
        guild_id: GuildId,
        user_id: UserId,
        channel_id: Option<ChannelId>,
        session_id: String,
    },
    /// Voice server credentials issued after the bot asked to join.
    ServerAssigned {
        guild_id: GuildId,
        endpoint: String,
        token: String,
    },
}

impl GatewayEvent {
    pub fn guild_id(&self) -> GuildId {
        match self {
            Self::StateChanged { guild_id, .. } | Self::ServerAssigned { guild_id, .. } => {
                *guild_id
            }
        }
    }
}

/// What the bridge needs from the chat platform.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    fn bot_user_id(&self) -> UserId;

    /// Members currently in `channel_id`, the bot included.
    async fn occupants_of(&self, guild_id: GuildId, channel_id: ChannelId) -> HashSet<UserId>;

    async fn voice_channel_of(&self, guild_id: GuildId, user_id: UserId) -> Option<ChannelId>;

    /// Fire-and-forget join (`Some`) or leave (`None`). Confirmation arrives
    /// later as a `StateChanged` for the bot.
    async fn request_voice_update(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        self_deaf: bool,
    ) -> Result<(), GatewayError>;

    async fn move_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<(), GatewayError>;
}

/// Observer of every normalised gateway event, run after session routing.
#[async_trait]
pub trait VoiceEventListener: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_voice_event(&self, event: &GatewayEvent) -> Result<(), crate::common::VoiceError>;
}

/// Engine voice-link close codes after which the link will not come back:
/// authentication failed, or the bot was disconnected from the channel.
pub fn is_fatal_close(code: u16) -> bool {
    matches!(code, 4004 | 4014)
}
