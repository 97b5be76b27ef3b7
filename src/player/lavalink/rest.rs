use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::{
    common::{TransportError, types::GuildId},
    configs::LavalinkConfig,
    protocol::{LoadResult, PlayerUpdate},
};

pub(super) struct RestClient {
    http: reqwest::Client,
    base: String,
    password: String,
}

impl RestClient {
    pub(super) fn new(config: &LavalinkConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .user_agent(config.client_name.as_str())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            base: config.rest_base(),
            password: config.password.clone(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base, path))
            .header("Authorization", &self.password)
    }

    fn player_path(session_id: &str, guild_id: GuildId) -> String {
        format!("/v4/sessions/{}/players/{}", session_id, guild_id)
    }

    pub(super) async fn load_tracks(&self, identifier: &str) -> Result<LoadResult, TransportError> {
        trace!("GET /v4/loadtracks identifier={}", identifier);
        let response = self
            .request(Method::GET, "/v4/loadtracks")
            .query(&[("identifier", identifier)])
            .send()
            .await?;
        read_json(response).await
    }

    pub(super) async fn update_player(
        &self,
        session_id: &str,
        guild_id: GuildId,
        update: &PlayerUpdate,
    ) -> Result<(), TransportError> {
        trace!("[{}] PATCH player: {:?}", guild_id, update);
        let response = self
            .request(Method::PATCH, &Self::player_path(session_id, guild_id))
            .json(update)
            .send()
            .await?;
        // The updated player comes back; only its presence matters here.
        read_json::<serde_json::Value>(response).await.map(|_| ())
    }

    pub(super) async fn destroy_player(
        &self,
        session_id: &str,
        guild_id: GuildId,
    ) -> Result<(), TransportError> {
        trace!("[{}] DELETE player", guild_id);
        let response = self
            .request(Method::DELETE, &Self::player_path(session_id, guild_id))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(status_error(status, response).await)
    }
}

async fn status_error(status: StatusCode, response: Response) -> TransportError {
    let message = response.text().await.unwrap_or_default();
    TransportError::Status {
        status: status.as_u16(),
        message,
    }
}

/// Reads a JSON body, telling an empty answer apart from a malformed one.
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, TransportError> {
    let status = response.status();
    if !status.is_success() {
        return Err(status_error(status, response).await);
    }

    let body = response.bytes().await?;
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(TransportError::EmptyBody {
            status: status.as_u16(),
        });
    }
    Ok(serde_json::from_slice(&body)?)
}
