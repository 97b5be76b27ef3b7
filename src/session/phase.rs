/// Lifecycle of one voice session. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Active,
    Disconnecting,
    Closed(CloseReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A user or command asked to leave.
    Requested,
    /// Nobody but the bot was left in the channel.
    Idle,
    /// The platform removed the bot from voice.
    Dropped,
    JoinTimeout,
    JoinFailed,
    Shutdown,
}

impl Phase {
    /// Connecting or Active: the session still owns its guild slot and accepts events.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Active)
    }

    pub fn is_closed(self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Requested => "requested",
            Self::Idle => "idle",
            Self::Dropped => "dropped",
            Self::JoinTimeout => "join timeout",
            Self::JoinFailed => "join failed",
            Self::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}
