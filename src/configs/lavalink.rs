use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LavalinkConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_password")]
    pub password: String,
    /// Use https/wss instead of http/ws.
    #[serde(default)]
    pub secure: bool,
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Prefix applied to queries that are not URLs.
    #[serde(default = "default_search_prefix")]
    pub search_prefix: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl LavalinkConfig {
    pub fn rest_base(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn websocket_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}/v4/websocket", scheme, self.host, self.port)
    }
}

impl Default for LavalinkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: default_password(),
            secure: false,
            client_name: default_client_name(),
            search_prefix: default_search_prefix(),
            request_timeout_ms: default_request_timeout_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    2333
}

fn default_password() -> String {
    "youshallnotpass".to_string()
}

fn default_client_name() -> String {
    format!("sunbot-voice/{}", env!("CARGO_PKG_VERSION"))
}

fn default_search_prefix() -> String {
    "ytsearch:".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}
