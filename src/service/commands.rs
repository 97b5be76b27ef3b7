use std::{ops::Range, sync::Arc};

use tracing::{error, info, warn};

use crate::{
    common::{
        VoiceError,
        types::{ChannelId, GuildId, UserId},
    },
    playback::{QueueMode, Track},
    player::LoadOutcome,
    service::VoiceService,
    session::{CloseReason, Phase, VoiceSession},
};

/// Structured outcome of a music command. Turning it into chat text is the caller's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Enqueued {
        track: Track,
        position: usize,
    },
    PlaylistEnqueued {
        name: String,
        tracks: usize,
        positions: Range<usize>,
        total_duration_ms: u64,
    },
    AlreadyBusy {
        channel_id: ChannelId,
    },
    NotInVoiceChannel,
    NotConnected,
    NothingPlaying,
    NoMatch,
    LoadFailed {
        reason: String,
    },
    Paused,
    Resumed,
    AlreadyPaused,
    AlreadyPlaying,
    Skipped {
        track: Track,
    },
    Queue {
        now_playing: Track,
        paused: bool,
        upcoming: Vec<Track>,
    },
    NowPlaying {
        track: Track,
        paused: bool,
    },
    Cleared {
        removed: usize,
    },
    Stopped,
    /// Something went wrong that the user can only retry.
    Failed {
        message: String,
    },
}

impl Reply {
    /// Maps a command error to what the user sees. Errors nobody classified
    /// are handed back to the caller.
    pub fn from_error(err: VoiceError) -> Result<Self, VoiceError> {
        Ok(match err {
            VoiceError::AlreadyBusy { channel_id } => Self::AlreadyBusy { channel_id },
            VoiceError::NotInVoiceChannel => Self::NotInVoiceChannel,
            VoiceError::NotConnected => Self::NotConnected,
            VoiceError::NothingPlaying => Self::NothingPlaying,
            VoiceError::NoMatch => Self::NoMatch,
            VoiceError::LoadFailed { reason } => Self::LoadFailed { reason },
            VoiceError::Transport(e) => {
                warn!("Audio engine request failed after retry: {}", e);
                Self::Failed {
                    message: "The audio engine is not responding, try again later.".into(),
                }
            }
            VoiceError::JoinTimeout | VoiceError::JoinFailed | VoiceError::SessionClosed => {
                Self::Failed {
                    message: err.to_string(),
                }
            }
            VoiceError::Gateway(_) => {
                error!("Unhandled voice command error: {}", err);
                return Err(err);
            }
        })
    }
}

impl VoiceService {
    /// Looks `query` up and queues the result in the requester's voice channel,
    /// joining it first if needed.
    pub async fn play(
        &self,
        guild_id: GuildId,
        requester: UserId,
        query: &str,
    ) -> Result<Reply, VoiceError> {
        self.enqueue_query(guild_id, requester, query, QueueMode::Drain, None)
            .await
            .or_else(Reply::from_error)
    }

    /// Plays a single clip from `url`, starting `seek_offset_ms` in, and leaves
    /// voice when it ends. Refused while the guild has any voice session.
    pub async fn play_clip(
        &self,
        guild_id: GuildId,
        requester: UserId,
        url: &str,
        seek_offset_ms: u64,
    ) -> Result<Reply, VoiceError> {
        if let Some(session) = self.registry().get(guild_id) {
            return Ok(Reply::AlreadyBusy {
                channel_id: session.channel_id(),
            });
        }
        self.enqueue_query(guild_id, requester, url, QueueMode::Clip, Some(seek_offset_ms))
            .await
            .or_else(Reply::from_error)
    }

    pub async fn pause(&self, guild_id: GuildId) -> Result<Reply, VoiceError> {
        self.toggle_pause(guild_id, true).await.or_else(Reply::from_error)
    }

    pub async fn resume(&self, guild_id: GuildId) -> Result<Reply, VoiceError> {
        self.toggle_pause(guild_id, false).await.or_else(Reply::from_error)
    }

    pub async fn skip(&self, guild_id: GuildId) -> Result<Reply, VoiceError> {
        self.skip_current(guild_id).await.or_else(Reply::from_error)
    }

    pub async fn queue(&self, guild_id: GuildId) -> Result<Reply, VoiceError> {
        self.describe_queue(guild_id).await.or_else(Reply::from_error)
    }

    pub async fn now_playing(&self, guild_id: GuildId) -> Result<Reply, VoiceError> {
        self.describe_current(guild_id).await.or_else(Reply::from_error)
    }

    pub async fn clear(&self, guild_id: GuildId) -> Result<Reply, VoiceError> {
        self.clear_pending(guild_id).await.or_else(Reply::from_error)
    }

    /// Leaves voice, dropping the queue.
    pub async fn stop(&self, guild_id: GuildId) -> Result<Reply, VoiceError> {
        match self.registry().get(guild_id) {
            Some(session) => {
                session.disconnect(CloseReason::Requested).await;
                Ok(Reply::Stopped)
            }
            None => Ok(Reply::NotConnected),
        }
    }

    fn session_for(&self, guild_id: GuildId) -> Result<Arc<VoiceSession>, VoiceError> {
        self.registry()
            .get(guild_id)
            .filter(|s| s.phase() == Phase::Active)
            .ok_or(VoiceError::NotConnected)
    }

    async fn toggle_pause(&self, guild_id: GuildId, paused: bool) -> Result<Reply, VoiceError> {
        let changed = self.session_for(guild_id)?.set_pause(paused).await?;
        Ok(match (paused, changed) {
            (true, true) => Reply::Paused,
            (true, false) => Reply::AlreadyPaused,
            (false, true) => Reply::Resumed,
            (false, false) => Reply::AlreadyPlaying,
        })
    }

    async fn skip_current(&self, guild_id: GuildId) -> Result<Reply, VoiceError> {
        let track = self.session_for(guild_id)?.skip().await?;
        Ok(Reply::Skipped { track })
    }

    async fn describe_queue(&self, guild_id: GuildId) -> Result<Reply, VoiceError> {
        let snapshot = self.session_for(guild_id)?.snapshot().await;
        let now_playing = snapshot.now_playing.ok_or(VoiceError::NothingPlaying)?;
        Ok(Reply::Queue {
            now_playing,
            paused: snapshot.paused,
            upcoming: snapshot.upcoming,
        })
    }

    async fn describe_current(&self, guild_id: GuildId) -> Result<Reply, VoiceError> {
        let (track, paused) = self
            .session_for(guild_id)?
            .now_playing()
            .await
            .ok_or(VoiceError::NothingPlaying)?;
        Ok(Reply::NowPlaying { track, paused })
    }

    async fn clear_pending(&self, guild_id: GuildId) -> Result<Reply, VoiceError> {
        let removed = self.session_for(guild_id)?.clear().await?;
        Ok(Reply::Cleared { removed })
    }

    /// Connects for `mode`; a session that appeared meanwhile must serve the same mode.
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        mode: QueueMode,
    ) -> Result<Arc<VoiceSession>, VoiceError> {
        let session = self.registry().connect(guild_id, channel_id, mode).await?;
        ensure_compatible(&session, channel_id, mode)?;
        Ok(session)
    }

    async fn enqueue_query(
        &self,
        guild_id: GuildId,
        requester: UserId,
        query: &str,
        mode: QueueMode,
        seek_offset_ms: Option<u64>,
    ) -> Result<Reply, VoiceError> {
        let channel_id = self
            .gateway()
            .voice_channel_of(guild_id, requester)
            .await
            .ok_or(VoiceError::NotInVoiceChannel)?;

        // Reject before spending a lookup on a guild that is busy elsewhere.
        if let Some(session) = self.registry().get(guild_id) {
            ensure_compatible(&session, channel_id, mode)?;
        }

        let outcome = self.registry().player_for(guild_id).load_tracks(query).await?;
        match outcome {
            LoadOutcome::NoMatch => Err(VoiceError::NoMatch),
            LoadOutcome::LoadFailed(reason) => Err(VoiceError::LoadFailed { reason }),
            LoadOutcome::SingleTrack(data) => {
                let mut track = Track::from_data(data, requester);
                if let Some(offset) = seek_offset_ms {
                    track = track.with_seek_offset(offset);
                }

                let session = self.join(guild_id, channel_id, mode).await?;
                let position = session.enqueue(track.clone()).await?;
                info!(
                    "[{}] Queued {} at position {} for {}",
                    guild_id, track.title, position, requester
                );
                Ok(Reply::Enqueued { track, position })
            }
            LoadOutcome::Playlist { name, tracks } => {
                let tracks: Vec<Track> = tracks
                    .into_iter()
                    .map(|data| Track::from_data(data, requester))
                    .collect();
                let total_duration_ms = tracks.iter().map(|t| t.duration_ms).sum();
                let count = tracks.len();

                let session = self.join(guild_id, channel_id, mode).await?;
                let positions = session.enqueue_playlist(tracks).await?;
                info!(
                    "[{}] Queued playlist '{}' ({} tracks) for {}",
                    guild_id, name, count, requester
                );
                Ok(Reply::PlaylistEnqueued {
                    name,
                    tracks: count,
                    positions,
                    total_duration_ms,
                })
            }
        }
    }
}

/// A guild serves one channel in one mode at a time.
fn ensure_compatible(
    session: &VoiceSession,
    channel_id: ChannelId,
    mode: QueueMode,
) -> Result<(), VoiceError> {
    if session.channel_id() != channel_id || session.queue_mode() != mode {
        return Err(VoiceError::AlreadyBusy {
            channel_id: session.channel_id(),
        });
    }
    Ok(())
}
