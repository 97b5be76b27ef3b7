use std::sync::atomic::{AtomicU64, Ordering};

use crate::{common::types::UserId, protocol::TrackData};

/// A track waiting in, or playing from, a guild's queue. Never mutated after enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    /// Engine blob used to start playback.
    pub encoded: String,
    pub identifier: String,
    pub title: String,
    pub author: String,
    pub uri: Option<String>,
    pub duration_ms: u64,
    pub source_name: String,
    pub requester: UserId,
    /// Start playback this far into the track.
    pub seek_offset_ms: Option<u64>,
}

impl Track {
    pub fn from_data(data: TrackData, requester: UserId) -> Self {
        let info = data.info;
        Self {
            encoded: data.encoded,
            identifier: info.identifier,
            title: info.title,
            author: info.author,
            uri: info.uri,
            duration_ms: info.length,
            source_name: info.source_name,
            requester,
            seek_offset_ms: None,
        }
    }

    pub fn with_seek_offset(mut self, offset_ms: u64) -> Self {
        self.seek_offset_ms = (offset_ms > 0).then_some(offset_ms);
        self
    }
}

/// Ticket for one play of one track. Engine events carry it back so stale or
/// duplicated lifecycle events can be told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlayHandle(pub u64);

static NEXT_PLAY_HANDLE: AtomicU64 = AtomicU64::new(1);

impl PlayHandle {
    /// Handles are unique across sessions, so an event for a closed session's
    /// track can never match a newer session in the same guild.
    pub fn next() -> Self {
        Self(NEXT_PLAY_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for PlayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
