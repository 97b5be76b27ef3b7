use serde::{Deserialize, Serialize};

use crate::common::Severity;

/// A track as the engine describes it: opaque encoded blob plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackData {
    /// Base64 blob the engine needs to play the track again.
    pub encoded: String,
    pub info: TrackInfo,
    /// Echo of whatever was attached when the track was played.
    #[serde(default)]
    pub user_data: serde_json::Value,
}

/// Metadata for an audio track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    #[serde(default)]
    pub is_seekable: bool,
    #[serde(default)]
    pub author: String,
    /// Duration in milliseconds. 0 for live streams.
    pub length: u64,
    #[serde(default)]
    pub is_stream: bool,
    #[serde(default)]
    pub position: u64,
    pub title: String,
    pub uri: Option<String>,
    #[serde(default)]
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub isrc: Option<String>,
    #[serde(default)]
    pub source_name: String,
}

/// Result of `GET /v4/loadtracks`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "loadType", content = "data", rename_all = "camelCase")]
pub enum LoadResult {
    Track(TrackData),
    Playlist(PlaylistData),
    Search(Vec<TrackData>),
    Empty(serde_json::Value),
    Error(LoadError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistData {
    pub info: PlaylistInfo,
    #[serde(default)]
    pub plugin_info: serde_json::Value,
    pub tracks: Vec<TrackData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub name: String,
    /// Index of the selected track, or -1 if none.
    #[serde(default = "no_selection")]
    pub selected_track: i32,
}

fn no_selection() -> i32 {
    -1
}

/// Error from a failed track load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadError {
    pub message: Option<String>,
    pub severity: Severity,
    pub cause: String,
}

impl LoadError {
    pub fn reason(&self) -> String {
        self.message.clone().unwrap_or_else(|| self.cause.clone())
    }
}
