use flume::TrySendError;
use tracing::{debug, trace};

use crate::{common::types::GuildId, playback::Track, session::CloseReason};

/// Unprompted outcomes for the chat layer. Formatting is the receiver's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    TrackStarted {
        guild_id: GuildId,
        track: Track,
    },
    TrackFailed {
        guild_id: GuildId,
        track: Track,
        message: String,
    },
    QueueFinished {
        guild_id: GuildId,
    },
    Disconnected {
        guild_id: GuildId,
        reason: CloseReason,
    },
}

const NOTIFICATION_CAPACITY: usize = 256;

/// Best-effort outlet for notifications. Nobody listening is fine, and a
/// receiver that falls behind loses the overflow.
#[derive(Clone)]
pub struct Notifier {
    tx: flume::Sender<Notification>,
}

impl Notifier {
    pub fn channel() -> (Self, flume::Receiver<Notification>) {
        Self::with_capacity(NOTIFICATION_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, flume::Receiver<Notification>) {
        let (tx, rx) = flume::bounded(capacity);
        (Self { tx }, rx)
    }

    pub fn send(&self, notification: Notification) {
        match self.tx.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(n)) => debug!("Notification queue full; dropping {:?}", n),
            Err(TrySendError::Disconnected(n)) => {
                trace!("Dropped notification, no receiver: {:?}", n)
            }
        }
    }
}
