use std::{future::Future, sync::Arc};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    common::{TransportError, types::GuildId},
    playback::Playing,
    player::{LoadOutcome, PlayerNode, VoiceCredentials},
};

/// One guild's view of the engine. Created lazily with the guild's first session.
pub struct GuildPlayer {
    guild_id: GuildId,
    node: Arc<dyn PlayerNode>,
    retries: u8,
    /// Last credentials the engine accepted.
    credentials: Mutex<Option<VoiceCredentials>>,
}

impl GuildPlayer {
    pub fn new(guild_id: GuildId, node: Arc<dyn PlayerNode>, retries: u8) -> Self {
        Self {
            guild_id,
            node,
            retries,
            credentials: Mutex::new(None),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Hands voice credentials to the engine. Identical credentials are only sent
    /// once, so a duplicated server assignment cannot open a second voice link.
    ///
    /// Returns whether anything was sent. Not retried here: the session decides
    /// when to try again.
    pub async fn send_voice_credentials(
        &self,
        credentials: &VoiceCredentials,
    ) -> Result<bool, TransportError> {
        if self.credentials.lock().as_ref() == Some(credentials) {
            debug!("[{}] Voice credentials unchanged; not resending", self.guild_id);
            return Ok(false);
        }

        self.node.update_voice(self.guild_id, credentials).await?;
        *self.credentials.lock() = Some(credentials.clone());
        Ok(true)
    }

    /// Forgets what the engine was told, so the next credentials go out even if
    /// unchanged. Needed once the engine has lost its players.
    pub fn forget_voice_credentials(&self) {
        if self.credentials.lock().take().is_some() {
            debug!("[{}] Voice credentials forgotten", self.guild_id);
        }
    }

    pub async fn load_tracks(&self, identifier: &str) -> Result<LoadOutcome, TransportError> {
        self.with_retry("load tracks", || self.node.load_tracks(identifier))
            .await
    }

    pub async fn play(&self, playing: &Playing) -> Result<(), TransportError> {
        self.with_retry("play", || self.node.play(self.guild_id, playing))
            .await
    }

    pub async fn set_paused(&self, paused: bool) -> Result<(), TransportError> {
        self.with_retry("pause", || self.node.set_paused(self.guild_id, paused))
            .await
    }

    pub async fn stop(&self) -> Result<(), TransportError> {
        self.with_retry("stop", || self.node.stop(self.guild_id)).await
    }

    /// Releases the engine-side player. The engine answers without a body here,
    /// and a racing player update may fail to decode; both are swallowed.
    pub async fn destroy(&self) {
        self.credentials.lock().take();
        match self.node.destroy(self.guild_id).await {
            Ok(()) => {}
            Err(e) if e.is_teardown_noise() => {
                debug!("[{}] Ignoring teardown response: {}", self.guild_id, e);
            }
            Err(e) => warn!("[{}] Failed to destroy player: {}", self.guild_id, e),
        }
    }

    async fn with_retry<'a, T, F, Fut>(&'a self, op: &str, mut f: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>> + 'a,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        "[{}] {} failed ({}); retrying ({}/{})",
                        self.guild_id, op, e, attempt, self.retries
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}
