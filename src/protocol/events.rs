use serde::Deserialize;

use crate::{
    common::{Severity, types::GuildId},
    protocol::tracks::TrackData,
};

/// Messages the engine pushes over its websocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum IncomingMessage {
    #[serde(rename_all = "camelCase")]
    Ready { resumed: bool, session_id: String },
    #[serde(rename_all = "camelCase")]
    PlayerUpdate { guild_id: GuildId, state: PlayerState },
    Stats(serde_json::Value),
    Event(NodeEvent),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    #[serde(default)]
    pub time: u64,
    #[serde(default)]
    pub position: u64,
    pub connected: bool,
    /// -1 if not connected.
    #[serde(default)]
    pub ping: i64,
}

/// Player lifecycle events.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum NodeEvent {
    #[serde(rename = "TrackStartEvent", rename_all = "camelCase")]
    TrackStart { guild_id: GuildId, track: TrackData },

    #[serde(rename = "TrackEndEvent", rename_all = "camelCase")]
    TrackEnd {
        guild_id: GuildId,
        track: TrackData,
        reason: TrackEndReason,
    },

    #[serde(rename = "TrackExceptionEvent", rename_all = "camelCase")]
    TrackException {
        guild_id: GuildId,
        track: TrackData,
        exception: TrackException,
    },

    #[serde(rename = "TrackStuckEvent", rename_all = "camelCase")]
    TrackStuck {
        guild_id: GuildId,
        track: TrackData,
        threshold_ms: u64,
    },

    #[serde(rename = "WebSocketClosedEvent", rename_all = "camelCase")]
    WebSocketClosed {
        guild_id: GuildId,
        code: u16,
        reason: String,
        by_remote: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackException {
    pub message: Option<String>,
    pub severity: Severity,
    pub cause: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ready() {
        let msg: IncomingMessage =
            serde_json::from_str(r#"{"op":"ready","resumed":false,"sessionId":"la3kfsdf5eafe848"}"#)
                .unwrap();
        match msg {
            IncomingMessage::Ready { resumed, session_id } => {
                assert!(!resumed);
                assert_eq!(session_id, "la3kfsdf5eafe848");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_track_end_event() {
        let raw = r#"{
            "op": "event",
            "type": "TrackEndEvent",
            "guildId": "817327181659111454",
            "track": {
                "encoded": "QAAA",
                "info": {"identifier": "abc", "length": 1000, "title": "t", "uri": null},
                "userData": {"playHandle": 7}
            },
            "reason": "loadFailed"
        }"#;
        match serde_json::from_str::<IncomingMessage>(raw).unwrap() {
            IncomingMessage::Event(NodeEvent::TrackEnd {
                guild_id,
                track,
                reason,
            }) => {
                assert_eq!(guild_id, GuildId(817327181659111454));
                assert_eq!(reason, TrackEndReason::LoadFailed);
                assert_eq!(track.user_data["playHandle"], 7);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_websocket_closed() {
        let raw = r#"{"op":"event","type":"WebSocketClosedEvent","guildId":"1","code":4014,"reason":"","byRemote":true}"#;
        assert!(matches!(
            serde_json::from_str::<IncomingMessage>(raw).unwrap(),
            IncomingMessage::Event(NodeEvent::WebSocketClosed { code: 4014, .. })
        ));
    }
}
