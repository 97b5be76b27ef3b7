//! Control side of the audio engine: the transport seam (`PlayerNode`), the
//! per-guild client built on top of it, and the lifecycle events it emits.

use async_trait::async_trait;

use crate::{
    common::{
        TransportError,
        types::{ChannelId, GuildId, UserId},
    },
    playback::{PlayHandle, Playing},
    protocol::{LoadResult, NodeEvent, TrackData, TrackEndReason},
};

pub mod guild;
pub mod lavalink;

pub use guild::GuildPlayer;
pub use lavalink::LavalinkNode;

/// Everything the engine needs to attach to a guild's voice server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceCredentials {
    pub endpoint: String,
    pub token: String,
    /// The bot's voice session id from its own voice state.
    pub session_id: String,
    pub user_id: UserId,
    pub channel_id: Option<ChannelId>,
}

/// Normalised result of a track lookup. Callers branch on all four.
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    NoMatch,
    SingleTrack(TrackData),
    Playlist { name: String, tracks: Vec<TrackData> },
    LoadFailed(String),
}

impl From<LoadResult> for LoadOutcome {
    fn from(result: LoadResult) -> Self {
        match result {
            LoadResult::Track(track) => Self::SingleTrack(track),
            LoadResult::Search(tracks) => match tracks.into_iter().next() {
                Some(first) => Self::SingleTrack(first),
                None => Self::NoMatch,
            },
            LoadResult::Playlist(playlist) if playlist.tracks.is_empty() => Self::NoMatch,
            LoadResult::Playlist(playlist) => Self::Playlist {
                name: playlist.info.name,
                tracks: playlist.tracks,
            },
            LoadResult::Empty(_) => Self::NoMatch,
            LoadResult::Error(e) => Self::LoadFailed(e.reason()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Finished,
    Failed,
    Replaced,
    Stopped,
    Cleanup,
}

impl From<TrackEndReason> for EndReason {
    fn from(reason: TrackEndReason) -> Self {
        match reason {
            TrackEndReason::Finished => Self::Finished,
            TrackEndReason::LoadFailed => Self::Failed,
            TrackEndReason::Replaced => Self::Replaced,
            TrackEndReason::Stopped => Self::Stopped,
            TrackEndReason::Cleanup => Self::Cleanup,
        }
    }
}

/// Everything the engine socket reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Player(PlayerEvent),
    /// The engine opened a fresh session; every player it held before is gone.
    SessionReset,
}

/// Lifecycle event for one guild's player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerEvent {
    pub guild_id: GuildId,
    pub kind: PlayerEventKind,
}

/// `handle` is `None` for tracks this bridge did not start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEventKind {
    TrackStarted {
        handle: Option<PlayHandle>,
    },
    TrackEnded {
        handle: Option<PlayHandle>,
        reason: EndReason,
    },
    TrackException {
        handle: Option<PlayHandle>,
        message: String,
    },
    VoiceClosed {
        code: u16,
        reason: String,
        by_remote: bool,
    },
}

const PLAY_HANDLE_KEY: &str = "playHandle";

pub(crate) fn handle_user_data(handle: PlayHandle) -> serde_json::Value {
    let mut data = serde_json::Map::new();
    data.insert(PLAY_HANDLE_KEY.to_string(), handle.0.into());
    serde_json::Value::Object(data)
}

fn handle_of(track: &TrackData) -> Option<PlayHandle> {
    track
        .user_data
        .get(PLAY_HANDLE_KEY)
        .and_then(|v| v.as_u64())
        .map(PlayHandle)
}

impl From<NodeEvent> for PlayerEvent {
    fn from(event: NodeEvent) -> Self {
        match event {
            NodeEvent::TrackStart { guild_id, track } => Self {
                guild_id,
                kind: PlayerEventKind::TrackStarted {
                    handle: handle_of(&track),
                },
            },
            NodeEvent::TrackEnd {
                guild_id,
                track,
                reason,
            } => Self {
                guild_id,
                kind: PlayerEventKind::TrackEnded {
                    handle: handle_of(&track),
                    reason: reason.into(),
                },
            },
            NodeEvent::TrackException {
                guild_id,
                track,
                exception,
            } => Self {
                guild_id,
                kind: PlayerEventKind::TrackException {
                    handle: handle_of(&track),
                    message: exception.message.unwrap_or(exception.cause),
                },
            },
            NodeEvent::TrackStuck {
                guild_id,
                track,
                threshold_ms,
            } => Self {
                guild_id,
                kind: PlayerEventKind::TrackException {
                    handle: handle_of(&track),
                    message: format!("track stuck for {}ms", threshold_ms),
                },
            },
            NodeEvent::WebSocketClosed {
                guild_id,
                code,
                reason,
                by_remote,
            } => Self {
                guild_id,
                kind: PlayerEventKind::VoiceClosed {
                    code,
                    reason,
                    by_remote,
                },
            },
        }
    }
}

/// Transport to an audio engine node shared by every guild.
#[async_trait]
pub trait PlayerNode: Send + Sync {
    async fn update_voice(
        &self,
        guild_id: GuildId,
        credentials: &VoiceCredentials,
    ) -> Result<(), TransportError>;

    async fn load_tracks(&self, identifier: &str) -> Result<LoadOutcome, TransportError>;

    async fn play(&self, guild_id: GuildId, playing: &Playing) -> Result<(), TransportError>;

    async fn set_paused(&self, guild_id: GuildId, paused: bool) -> Result<(), TransportError>;

    async fn stop(&self, guild_id: GuildId) -> Result<(), TransportError>;

    /// Drops the engine-side player entirely.
    async fn destroy(&self, guild_id: GuildId) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::IncomingMessage;

    #[test]
    fn test_search_result_yields_first_track() {
        let raw = r#"{"loadType":"search","data":[
            {"encoded":"a","info":{"identifier":"1","length":1,"title":"first","uri":null}},
            {"encoded":"b","info":{"identifier":"2","length":1,"title":"second","uri":null}}
        ]}"#;
        let result: LoadResult = serde_json::from_str(raw).unwrap();
        match LoadOutcome::from(result) {
            LoadOutcome::SingleTrack(track) => assert_eq!(track.info.title, "first"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_empty_search_is_no_match() {
        let result: LoadResult = serde_json::from_str(r#"{"loadType":"search","data":[]}"#).unwrap();
        assert!(matches!(LoadOutcome::from(result), LoadOutcome::NoMatch));
    }

    #[test]
    fn test_event_carries_play_handle_back() {
        let raw = r#"{"op":"event","type":"TrackExceptionEvent","guildId":"5",
            "track":{"encoded":"a","info":{"identifier":"1","length":1,"title":"t","uri":null},"userData":{"playHandle":42}},
            "exception":{"message":null,"severity":"fault","cause":"java.io.IOException"}}"#;
        let IncomingMessage::Event(event) = serde_json::from_str::<IncomingMessage>(raw).unwrap() else {
            panic!("expected an event");
        };
        assert_eq!(
            PlayerEvent::from(event),
            PlayerEvent {
                guild_id: GuildId(5),
                kind: PlayerEventKind::TrackException {
                    handle: Some(PlayHandle(42)),
                    message: "java.io.IOException".into(),
                },
            }
        );
    }

    #[test]
    fn test_foreign_track_has_no_handle() {
        let track: TrackData = serde_json::from_str(
            r#"{"encoded":"a","info":{"identifier":"1","length":1,"title":"t","uri":null}}"#,
        )
        .unwrap();
        assert_eq!(handle_of(&track), None);
        assert_eq!(handle_of(&TrackData {
            user_data: handle_user_data(PlayHandle(9)),
            ..track
        }), Some(PlayHandle(9)));
    }
}
