//! Wire models for the Lavalink v4 REST and websocket protocol.

pub mod events;
pub mod player;
pub mod tracks;

pub use events::{IncomingMessage, NodeEvent, TrackEndReason};
pub use player::{PlayerUpdate, UpdateTrack, VoicePayload};
pub use tracks::{LoadResult, TrackData, TrackInfo};
