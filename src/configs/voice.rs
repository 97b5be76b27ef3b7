use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VoiceConfig {
    /// How long a session may stay `Connecting` before it cancels itself.
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
    #[serde(default = "default_idle_sweep_interval_secs")]
    pub idle_sweep_interval_secs: u64,
    /// Credential deliveries to the engine before a join is abandoned.
    #[serde(default = "default_credential_attempts")]
    pub credential_attempts: u8,
    /// Automatic retries for a failed player command.
    #[serde(default = "default_command_retries")]
    pub command_retries: u8,
    #[serde(default = "default_self_deaf")]
    pub self_deaf: bool,
}

impl VoiceConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn idle_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.idle_sweep_interval_secs.max(1))
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            join_timeout_ms: default_join_timeout_ms(),
            idle_sweep_interval_secs: default_idle_sweep_interval_secs(),
            credential_attempts: default_credential_attempts(),
            command_retries: default_command_retries(),
            self_deaf: default_self_deaf(),
        }
    }
}

fn default_join_timeout_ms() -> u64 {
    10_000
}

fn default_idle_sweep_interval_secs() -> u64 {
    60
}

fn default_credential_attempts() -> u8 {
    2
}

fn default_command_retries() -> u8 {
    1
}

fn default_self_deaf() -> bool {
    true
}
