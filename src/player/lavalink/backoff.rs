use std::time::Duration;

const BACKOFF_BASE_MS: u64 = 1000;

/// Reconnect delays for the engine websocket: 1s, 2s, 4s, then 8s until exhausted.
pub(super) struct Backoff {
    attempt: u32,
    max_attempts: u32,
}

impl Backoff {
    pub(super) fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
        }
    }

    pub(super) fn next(&mut self) -> Duration {
        self.attempt += 1;
        let delay = BACKOFF_BASE_MS * 2u64.pow((self.attempt - 1).min(3));
        Duration::from_millis(delay)
    }

    pub(super) fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub(super) fn reset(&mut self) {
        self.attempt = 0;
    }
}
