use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::types::ChannelId;

/// Exception severity levels reported by the audio engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Common,
    Suspicious,
    Fault,
}

/// Failures talking to the audio engine.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("engine answered {status}: {message}")]
    Status { status: u16, message: String },

    #[error("could not decode engine response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The engine answered without a JSON body. Expected while a player is torn down.
    #[error("engine answered {status} without a json body")]
    EmptyBody { status: u16 },

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("engine session is not ready")]
    NotReady,
}

impl TransportError {
    /// Decode failures on empty bodies race with player teardown and carry no signal.
    pub fn is_teardown_noise(&self) -> bool {
        match self {
            Self::EmptyBody { .. } => true,
            Self::Http(e) => e.is_decode(),
            Self::Status { status, .. } => *status == 404,
            _ => false,
        }
    }
}

/// Failures reported by the chat-platform collaborator.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing permissions, e.g. to move a member.
    #[error("forbidden by the platform")]
    Forbidden,

    #[error("gateway request failed: {0}")]
    Request(String),
}

/// Everything that can go wrong in the voice bridge.
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("already busy in voice channel {channel_id}")]
    AlreadyBusy { channel_id: ChannelId },

    #[error("the requester is not in a voice channel")]
    NotInVoiceChannel,

    #[error("no voice session for this guild")]
    NotConnected,

    #[error("nothing is playing")]
    NothingPlaying,

    #[error("no tracks matched the query")]
    NoMatch,

    #[error("track load failed: {reason}")]
    LoadFailed { reason: String },

    #[error("timed out joining the voice channel")]
    JoinTimeout,

    #[error("could not join the voice channel")]
    JoinFailed,

    #[error("the voice session closed")]
    SessionClosed,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Punishment commands that cannot be carried out.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PunishmentError {
    #[error("no punishment channel is configured for this guild")]
    NotConfigured,

    #[error("that user is not currently punished")]
    NotPunished,
}

impl VoiceError {
    /// Admission, load and playback errors are reported to the user verbatim and never retried.
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            Self::AlreadyBusy { .. }
                | Self::NotInVoiceChannel
                | Self::NotConnected
                | Self::NothingPlaying
                | Self::NoMatch
                | Self::LoadFailed { .. }
        )
    }
}
