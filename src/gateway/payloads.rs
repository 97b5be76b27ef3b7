use serde::Deserialize;

use crate::{
    common::types::{ChannelId, GuildId, UserId},
    gateway::GatewayEvent,
};

/// `VOICE_STATE_UPDATE` dispatch data, reduced to what the bridge reads.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceStateUpdate {
    /// Absent for private calls.
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    pub channel_id: Option<ChannelId>,
    pub user_id: UserId,
    pub session_id: String,
    #[serde(default)]
    pub self_deaf: bool,
    #[serde(default)]
    pub self_mute: bool,
}

/// `VOICE_SERVER_UPDATE` dispatch data.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceServerUpdate {
    pub token: String,
    pub guild_id: GuildId,
    /// Null while the platform reallocates the voice server.
    pub endpoint: Option<String>,
}

impl VoiceStateUpdate {
    pub fn into_event(self) -> Option<GatewayEvent> {
        Some(GatewayEvent::StateChanged {
            guild_id: self.guild_id?,
            user_id: self.user_id,
            channel_id: self.channel_id,
            session_id: self.session_id,
        })
    }
}

impl VoiceServerUpdate {
    pub fn into_event(self) -> Option<GatewayEvent> {
        let endpoint = self.endpoint?;
        let endpoint = endpoint.strip_prefix("wss://").unwrap_or(&endpoint);
        if endpoint.is_empty() {
            return None;
        }

        Some(GatewayEvent::ServerAssigned {
            guild_id: self.guild_id,
            endpoint: endpoint.to_string(),
            token: self.token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_update_strips_scheme() {
        let raw = r#"{"token":"abc","guild_id":"41771983423143937","endpoint":"wss://smart.loyal.discord.gg"}"#;
        let update: VoiceServerUpdate = serde_json::from_str(raw).unwrap();
        assert_eq!(
            update.into_event(),
            Some(GatewayEvent::ServerAssigned {
                guild_id: GuildId(41771983423143937),
                endpoint: "smart.loyal.discord.gg".into(),
                token: "abc".into(),
            })
        );
    }

    #[test]
    fn test_null_endpoint_is_dropped() {
        let raw = r#"{"token":"abc","guild_id":"1","endpoint":null}"#;
        let update: VoiceServerUpdate = serde_json::from_str(raw).unwrap();
        assert_eq!(update.into_event(), None);
    }

    #[test]
    fn test_state_update_without_guild_is_ignored() {
        let raw = r#"{"channel_id":null,"user_id":"80351110224678912","session_id":"90326bd25d71d39b9ef95b299e3872ff"}"#;
        let update: VoiceStateUpdate = serde_json::from_str(raw).unwrap();
        assert!(update.into_event().is_none());
    }

    #[test]
    fn test_state_update_leave() {
        let raw = r#"{"guild_id":"7","channel_id":null,"user_id":"8","session_id":"s","self_deaf":true}"#;
        let update: VoiceStateUpdate = serde_json::from_str(raw).unwrap();
        assert_eq!(
            update.into_event(),
            Some(GatewayEvent::StateChanged {
                guild_id: GuildId(7),
                user_id: UserId(8),
                channel_id: None,
                session_id: "s".into(),
            })
        );
    }
}
