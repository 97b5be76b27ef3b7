use std::{sync::Arc, time::Duration};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    gateway::GatewayClient,
    session::{CloseReason, SessionRegistry, VoiceSession},
};

/// Periodically leaves channels where the bot has nobody left to play for.
pub struct IdleReaper {
    registry: Arc<SessionRegistry>,
    gateway: Arc<dyn GatewayClient>,
    interval: Duration,
}

impl IdleReaper {
    pub fn new(
        registry: Arc<SessionRegistry>,
        gateway: Arc<dyn GatewayClient>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            gateway,
            interval,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        self.sweep().await;
                    }
                }
            }
            debug!("Idle reaper stopped");
        })
    }

    /// Runs one pass over active sessions. Returns how many were disconnected.
    pub async fn sweep(&self) -> usize {
        let mut reaped = 0;
        for session in self.registry.active_sessions() {
            if is_alone(self.gateway.as_ref(), &session).await {
                info!(
                    "[{}] Leaving voice channel {}: nobody else is listening",
                    session.guild_id(),
                    session.channel_id()
                );
                session.disconnect(CloseReason::Idle).await;
                reaped += 1;
            }
        }
        reaped
    }
}

/// True when no one but the bot occupies the session's channel.
pub(crate) async fn is_alone(gateway: &dyn GatewayClient, session: &VoiceSession) -> bool {
    let bot = gateway.bot_user_id();
    let occupants = gateway
        .occupants_of(session.guild_id(), session.channel_id())
        .await;
    !occupants.iter().any(|user| *user != bot)
}
