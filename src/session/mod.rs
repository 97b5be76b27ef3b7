//! One guild's voice connection: the Connecting → Active → Disconnecting → Closed
//! state machine, the queue it owns, and the event loop that reconciles gateway
//! signals with engine lifecycle events.
//!
//! Every mutation of a session's state runs under its state lock, so commands,
//! queue advancement and credential handling for one guild never interleave.
//! Gateway and engine events reach the session through its inbox and are applied
//! in arrival order by a dedicated task.

use std::{
    ops::Range,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, trace, warn};

use crate::{
    common::{
        TransportError, VoiceError,
        types::{ChannelId, GuildId, UserId},
    },
    configs::VoiceConfig,
    gateway::{GatewayClient, GatewayEvent, is_fatal_close},
    playback::{PlayHandle, PlaybackQueue, QueueMode, Track},
    player::{EndReason, GuildPlayer, PlayerEventKind, VoiceCredentials},
    service::notifications::{Notification, Notifier},
};

pub mod phase;
pub mod registry;

pub use phase::{CloseReason, Phase};
pub use registry::{Admission, SessionRegistry};

/// Everything a session reacts to, in one inbox.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Gateway(GatewayEvent),
    Player(PlayerEventKind),
    /// The engine restarted without resuming and dropped this guild's player.
    EngineReset,
}

/// Point-in-time copy of a session's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub now_playing: Option<Track>,
    pub paused: bool,
    pub upcoming: Vec<Track>,
}

/// The two halves of a voice connection. Either may arrive first.
#[derive(Debug, Default)]
struct PendingCredentials {
    session_id: Option<String>,
    server: Option<(String, String)>,
    failures: u8,
}

impl PendingCredentials {
    fn complete(&self, user_id: UserId, channel_id: ChannelId) -> Option<VoiceCredentials> {
        let session_id = self.session_id.clone()?;
        let (endpoint, token) = self.server.clone()?;
        Some(VoiceCredentials {
            endpoint,
            token,
            session_id,
            user_id,
            channel_id: Some(channel_id),
        })
    }
}

struct SessionState {
    queue: PlaybackQueue,
    credentials: PendingCredentials,
}

pub struct VoiceSession {
    id: u64,
    guild_id: GuildId,
    bot_user_id: UserId,
    channel_id: AtomicU64,
    mode: QueueMode,
    phase: watch::Sender<Phase>,
    state: Mutex<SessionState>,
    inbox: flume::Sender<SessionEvent>,
    player: Arc<GuildPlayer>,
    gateway: Arc<dyn GatewayClient>,
    notifier: Notifier,
    config: VoiceConfig,
    owner: Weak<SessionRegistry>,
}

impl VoiceSession {
    fn new(
        registry: &Arc<SessionRegistry>,
        id: u64,
        guild_id: GuildId,
        channel_id: ChannelId,
        mode: QueueMode,
    ) -> (Arc<Self>, flume::Receiver<SessionEvent>) {
        let (inbox, events) = flume::unbounded();
        let (phase, _) = watch::channel(Phase::Connecting);
        let session = Self {
            id,
            guild_id,
            bot_user_id: registry.gateway.bot_user_id(),
            channel_id: AtomicU64::new(channel_id.0),
            mode,
            phase,
            state: Mutex::new(SessionState {
                queue: PlaybackQueue::new(mode),
                credentials: PendingCredentials::default(),
            }),
            inbox,
            player: registry.player_for(guild_id),
            gateway: registry.gateway.clone(),
            notifier: registry.notifier.clone(),
            config: registry.config.clone(),
            owner: Arc::downgrade(registry),
        };
        (Arc::new(session), events)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn channel_id(&self) -> ChannelId {
        ChannelId(self.channel_id.load(Ordering::Acquire))
    }

    pub fn queue_mode(&self) -> QueueMode {
        self.mode
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Queues an event for this session. A closed session drops it.
    pub fn notify(&self, event: SessionEvent) {
        if self.phase().is_closed() {
            trace!("[{}] Session closed; dropping {:?}", self.guild_id, event);
            return;
        }
        if let Err(e) = self.inbox.send(event) {
            trace!(
                "[{}] Session loop gone; dropping {:?}",
                self.guild_id,
                e.into_inner()
            );
        }
    }

    fn spawn_event_loop(self: &Arc<Self>, events: flume::Receiver<SessionEvent>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let mut phase = session.phase.subscribe();
            loop {
                tokio::select! {
                    biased;
                    event = events.recv_async() => match event {
                        Ok(event) => session.apply(event).await,
                        Err(_) => break,
                    },
                    _ = async { let _ = phase.wait_for(|p| p.is_closed()).await; } => break,
                }
            }
            trace!("[{}] Session #{} event loop finished", session.guild_id, session.id);
        });
    }

    /// Asks the gateway to join and starts the join timer.
    async fn start(self: &Arc<Self>) -> Result<(), VoiceError> {
        let channel_id = self.channel_id();
        info!("[{}] Joining voice channel {}", self.guild_id, channel_id);
        self.arm_join_timeout();

        if let Err(e) = self
            .gateway
            .request_voice_update(self.guild_id, Some(channel_id), self.config.self_deaf)
            .await
        {
            error!("[{}] Join request failed: {}", self.guild_id, e);
            self.teardown(CloseReason::JoinFailed, Phase::is_live).await;
            return Err(e.into());
        }
        Ok(())
    }

    fn arm_join_timeout(self: &Arc<Self>) {
        let session = Arc::downgrade(self);
        let timeout = self.config.join_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(session) = session.upgrade() else {
                return;
            };
            if session.phase() == Phase::Connecting {
                warn!(
                    "[{}] No voice confirmation after {:?}; giving up",
                    session.guild_id, timeout
                );
                session
                    .teardown(CloseReason::JoinTimeout, |p| p == Phase::Connecting)
                    .await;
            }
        });
    }

    /// Resolves once the session is active or fully closed. A teardown in
    /// progress is waited out so the close reason reaches the caller.
    pub async fn wait_active(&self) -> Result<(), VoiceError> {
        let mut phase = self.phase.subscribe();
        let settled = |p: &Phase| matches!(p, Phase::Active | Phase::Closed(_));
        let reached = match phase.wait_for(settled).await {
            Ok(p) => *p,
            Err(_) => return Err(VoiceError::SessionClosed),
        };
        match reached {
            Phase::Active => Ok(()),
            Phase::Closed(CloseReason::JoinTimeout) => Err(VoiceError::JoinTimeout),
            Phase::Closed(CloseReason::JoinFailed) => Err(VoiceError::JoinFailed),
            _ => Err(VoiceError::SessionClosed),
        }
    }

    pub(crate) async fn apply(&self, event: SessionEvent) {
        if !self.phase().is_live() {
            trace!("[{}] Ignoring event after close: {:?}", self.guild_id, event);
            return;
        }

        let close = match event {
            SessionEvent::Gateway(event) => self.apply_gateway(event).await,
            SessionEvent::Player(event) => self.apply_player(event).await,
            SessionEvent::EngineReset => self.apply_engine_reset().await,
        };

        if let Some(reason) = close {
            self.disconnect(reason).await;
        }
    }

    async fn apply_gateway(&self, event: GatewayEvent) -> Option<CloseReason> {
        let mut state = self.state.lock().await;
        if !self.phase().is_live() {
            return None;
        }

        match event {
            GatewayEvent::StateChanged {
                user_id,
                channel_id,
                session_id,
                ..
            } => {
                if user_id != self.bot_user_id {
                    return None;
                }
                // Until the join is confirmed, a leave or another channel belongs to
                // an earlier session; the join timer covers a join that never lands.
                if self.phase() == Phase::Connecting && channel_id != Some(self.channel_id()) {
                    debug!(
                        "[{}] Ignoring bot voice state for {:?} while joining {}",
                        self.guild_id,
                        channel_id,
                        self.channel_id()
                    );
                    return None;
                }
                let Some(channel_id) = channel_id else {
                    info!("[{}] Bot left voice; closing session", self.guild_id);
                    return Some(CloseReason::Dropped);
                };
                if channel_id != self.channel_id() {
                    info!("[{}] Bot now in voice channel {}", self.guild_id, channel_id);
                    self.channel_id.store(channel_id.0, Ordering::Release);
                }
                state.credentials.session_id = Some(session_id);
            }
            GatewayEvent::ServerAssigned {
                endpoint, token, ..
            } => {
                debug!("[{}] Voice server assigned: {}", self.guild_id, endpoint);
                state.credentials.server = Some((endpoint, token));
            }
        }

        self.deliver_credentials(&mut state).await
    }

    async fn deliver_credentials(&self, state: &mut SessionState) -> Option<CloseReason> {
        let Some(credentials) = state
            .credentials
            .complete(self.bot_user_id, self.channel_id())
        else {
            trace!("[{}] Waiting for the other half of the credentials", self.guild_id);
            return None;
        };

        match self.player.send_voice_credentials(&credentials).await {
            Ok(sent) => {
                state.credentials.failures = 0;
                let activated = self.phase.send_if_modified(|phase| {
                    if *phase == Phase::Connecting {
                        *phase = Phase::Active;
                        true
                    } else {
                        false
                    }
                });
                if activated {
                    info!(
                        "[{}] Voice session active in channel {}",
                        self.guild_id,
                        self.channel_id()
                    );
                } else if sent {
                    info!("[{}] Voice credentials refreshed", self.guild_id);
                }
                None
            }
            Err(e) => {
                state.credentials.failures += 1;
                let failures = state.credentials.failures;
                if self.phase() == Phase::Connecting && failures >= self.config.credential_attempts {
                    error!(
                        "[{}] Could not hand voice credentials to the engine after {} attempts: {}",
                        self.guild_id, failures, e
                    );
                    return Some(CloseReason::JoinFailed);
                }
                warn!(
                    "[{}] Sending voice credentials failed ({}/{}): {}",
                    self.guild_id, failures, self.config.credential_attempts, e
                );
                None
            }
        }
    }

    async fn apply_player(&self, event: PlayerEventKind) -> Option<CloseReason> {
        let mut state = self.state.lock().await;
        if !self.phase().is_live() {
            return None;
        }
        let had_current = state.queue.current().is_some();

        match event {
            PlayerEventKind::TrackStarted { handle: Some(handle) } => {
                match state.queue.current().filter(|p| p.handle == handle) {
                    Some(playing) => {
                        debug!("[{}] Track started: {}", self.guild_id, playing.track.title);
                        self.notifier.send(Notification::TrackStarted {
                            guild_id: self.guild_id,
                            track: playing.track.clone(),
                        });
                    }
                    None => trace!("[{}] Stale start for {}", self.guild_id, handle),
                }
            }
            PlayerEventKind::TrackEnded {
                handle: Some(handle),
                reason,
            } => match reason {
                EndReason::Finished => {
                    if let Some(track) = state.queue.finish(handle) {
                        debug!("[{}] Track finished: {}", self.guild_id, track.title);
                        self.advance(&mut state).await;
                    } else {
                        debug!("[{}] Ignoring repeated end for {}", self.guild_id, handle);
                    }
                }
                EndReason::Failed => {
                    if self.fail_current(&mut state, handle, "the track could not be loaded") {
                        self.advance(&mut state).await;
                    }
                }
                EndReason::Stopped | EndReason::Cleanup => {
                    if state.queue.is_current(handle) {
                        debug!("[{}] Player stopped {} ({:?})", self.guild_id, handle, reason);
                        state.queue.take_current();
                    }
                }
                EndReason::Replaced => {}
            },
            PlayerEventKind::TrackException {
                handle: Some(handle),
                message,
            } => {
                if self.fail_current(&mut state, handle, &message) {
                    self.advance(&mut state).await;
                }
            }
            PlayerEventKind::VoiceClosed {
                code,
                reason,
                by_remote,
            } => {
                if is_fatal_close(code) {
                    warn!(
                        "[{}] Engine voice link closed: code={} reason='{}' remote={}",
                        self.guild_id, code, reason, by_remote
                    );
                } else {
                    debug!("[{}] Engine voice link closed: code={}", self.guild_id, code);
                }
            }
            other => trace!("[{}] Ignoring event for a foreign track: {:?}", self.guild_id, other),
        }

        if self.mode == QueueMode::Clip && had_current && state.queue.current().is_none() {
            info!("[{}] Clip ended; leaving voice", self.guild_id);
            return Some(CloseReason::Requested);
        }
        None
    }

    /// Restores voice on a restarted engine and restarts the current track there.
    async fn apply_engine_reset(&self) -> Option<CloseReason> {
        let mut state = self.state.lock().await;
        if !self.phase().is_live() {
            return None;
        }

        info!("[{}] Engine lost its player; restoring voice", self.guild_id);
        self.player.forget_voice_credentials();
        if let Some(reason) = self.deliver_credentials(&mut state).await {
            return Some(reason);
        }

        if self.phase() == Phase::Active {
            if let Some(playing) = state.queue.take_current() {
                state.queue.requeue_front(playing.track);
                self.advance(&mut state).await;
            }
        }
        None
    }

    /// Drops the current track if `handle` is still current, and reports it.
    fn fail_current(&self, state: &mut SessionState, handle: PlayHandle, message: &str) -> bool {
        if !state.queue.is_current(handle) {
            debug!("[{}] Ignoring failure of stale {}", self.guild_id, handle);
            return false;
        }
        if let Some(playing) = state.queue.take_current() {
            warn!(
                "[{}] Track failed: {} ({})",
                self.guild_id, playing.track.title, message
            );
            self.notifier.send(Notification::TrackFailed {
                guild_id: self.guild_id,
                track: playing.track,
                message: message.to_string(),
            });
        }
        true
    }

    /// Starts the next playable track, skipping ones the engine refuses.
    async fn advance(&self, state: &mut SessionState) {
        while let Some(playing) = state.queue.start_next() {
            match self.player.play(&playing).await {
                Ok(()) => {
                    debug!(
                        "[{}] Playing {} ({})",
                        self.guild_id, playing.track.title, playing.handle
                    );
                    return;
                }
                Err(e) => {
                    warn!("[{}] Could not start {}: {}", self.guild_id, playing.track.title, e);
                    state.queue.take_current();
                    self.notifier.send(Notification::TrackFailed {
                        guild_id: self.guild_id,
                        track: playing.track,
                        message: e.to_string(),
                    });
                }
            }
        }

        debug!("[{}] Queue finished", self.guild_id);
        self.notifier.send(Notification::QueueFinished {
            guild_id: self.guild_id,
        });
    }

    fn ensure_active(&self) -> Result<(), VoiceError> {
        match self.phase() {
            Phase::Active => Ok(()),
            Phase::Connecting => Err(VoiceError::NotConnected),
            Phase::Disconnecting | Phase::Closed(_) => Err(VoiceError::SessionClosed),
        }
    }

    /// Appends a track and returns the position it will play at. Starts playback
    /// when nothing is playing; if the engine refuses, the queue is left as it was.
    pub async fn enqueue(&self, track: Track) -> Result<usize, VoiceError> {
        let mut state = self.state.lock().await;
        self.ensure_active()?;

        let before = state.queue.pending_len();
        let position = state.queue.push(track);
        self.start_if_idle(&mut state, before).await?;
        Ok(position)
    }

    /// Appends tracks contiguously and returns the positions they occupy.
    pub async fn enqueue_playlist(&self, tracks: Vec<Track>) -> Result<Range<usize>, VoiceError> {
        if tracks.is_empty() {
            return Err(VoiceError::NoMatch);
        }

        let mut state = self.state.lock().await;
        self.ensure_active()?;

        let before = state.queue.pending_len();
        let positions = state.queue.extend(tracks);
        self.start_if_idle(&mut state, before).await?;
        Ok(positions)
    }

    async fn start_if_idle(&self, state: &mut SessionState, before: usize) -> Result<(), VoiceError> {
        if state.queue.current().is_some() {
            return Ok(());
        }
        let Some(playing) = state.queue.start_next() else {
            return Ok(());
        };

        if let Err(e) = self.player.play(&playing).await {
            warn!("[{}] Could not start {}: {}", self.guild_id, playing.track.title, e);
            state.queue.take_current();
            state.queue.requeue_front(playing.track);
            state.queue.truncate(before);
            return Err(e.into());
        }

        debug!(
            "[{}] Playing {} ({})",
            self.guild_id, playing.track.title, playing.handle
        );
        Ok(())
    }

    /// Ends the current track early and returns it.
    pub async fn skip(&self) -> Result<Track, VoiceError> {
        let mut state = self.state.lock().await;
        self.ensure_active()?;

        let was_paused = state.queue.is_paused();
        let Some(skipped) = state.queue.take_current() else {
            return Err(VoiceError::NothingPlaying);
        };

        let result = match state.queue.start_next() {
            Some(next) => self.player.play(&next).await,
            None => self.player.stop().await,
        };

        if let Err(e) = result {
            // The engine still plays the skipped track.
            if let Some(next) = state.queue.take_current() {
                state.queue.requeue_front(next.track);
            }
            state.queue.restore_current(Some(skipped));
            state.queue.set_paused(was_paused);
            return Err(e.into());
        }

        info!("[{}] Skipped {}", self.guild_id, skipped.track.title);
        if state.queue.current().is_none() {
            self.notifier.send(Notification::QueueFinished {
                guild_id: self.guild_id,
            });
        }
        Ok(skipped.track)
    }

    /// Returns whether the pause state changed.
    pub async fn set_pause(&self, paused: bool) -> Result<bool, VoiceError> {
        let mut state = self.state.lock().await;
        self.ensure_active()?;

        if state.queue.current().is_none() {
            return Err(VoiceError::NothingPlaying);
        }
        if state.queue.is_paused() == paused {
            return Ok(false);
        }

        self.player.set_paused(paused).await?;
        state.queue.set_paused(paused);
        Ok(true)
    }

    /// Empties the pending queue; the current track keeps playing.
    pub async fn clear(&self) -> Result<usize, VoiceError> {
        let mut state = self.state.lock().await;
        self.ensure_active()?;
        Ok(state.queue.clear())
    }

    pub async fn now_playing(&self) -> Option<(Track, bool)> {
        let state = self.state.lock().await;
        state
            .queue
            .current()
            .map(|p| (p.track.clone(), state.queue.is_paused()))
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock().await;
        QueueSnapshot {
            now_playing: state.queue.current().map(|p| p.track.clone()),
            paused: state.queue.is_paused(),
            upcoming: state.queue.pending().cloned().collect(),
        }
    }

    /// Leaves the channel and releases the guild. Safe to call any number of times.
    pub async fn disconnect(&self, reason: CloseReason) {
        self.teardown(reason, Phase::is_live).await;
    }

    async fn teardown(&self, reason: CloseReason, from: impl Fn(Phase) -> bool) {
        let began = self.phase.send_if_modified(|phase| {
            if from(*phase) {
                *phase = Phase::Disconnecting;
                true
            } else {
                false
            }
        });
        if !began {
            trace!("[{}] Disconnect already handled", self.guild_id);
            return;
        }

        info!(
            "[{}] Disconnecting from voice channel {} ({})",
            self.guild_id,
            self.channel_id(),
            reason
        );

        let mut state = self.state.lock().await;
        let was_playing = state.queue.current().is_some();
        state.queue.reset();

        if was_playing {
            if let Err(e) = self.player.stop().await {
                log_teardown_error(self.guild_id, "stop", &e);
            }
        }

        // A dropped session is already out of the channel.
        if reason != CloseReason::Dropped {
            if let Err(e) = self
                .gateway
                .request_voice_update(self.guild_id, None, self.config.self_deaf)
                .await
            {
                warn!("[{}] Leave request failed: {}", self.guild_id, e);
            }
        }

        self.player.destroy().await;
        self.phase.send_replace(Phase::Closed(reason));
        drop(state);

        if let Some(owner) = self.owner.upgrade() {
            owner.release(self.guild_id, self.id);
        }
        self.notifier.send(Notification::Disconnected {
            guild_id: self.guild_id,
            reason,
        });
    }
}

fn log_teardown_error(guild_id: GuildId, op: &str, e: &TransportError) {
    if e.is_teardown_noise() {
        debug!("[{}] Ignoring {} response during teardown: {}", guild_id, op, e);
    } else {
        warn!("[{}] {} failed during teardown: {}", guild_id, op, e);
    }
}
