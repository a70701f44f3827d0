//! REST client for a deckbox server.
//!
//! Layout: `{base}/v1/owners/{owner}/{decks|cards}[/{id}]` for record writes
//! and `{base}/v1/owners/{owner}/changes?since={checkpoint}` for deltas. The
//! owner segment is percent-encoded.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use super::{RemoteChanges, RemoteError, RemoteResult, RemoteStore};
use crate::config::RemoteConfig;
use crate::models::{Entity, EntityKind, OwnerId};
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// Remote store backed by the deckbox REST API
#[derive(Clone)]
pub struct HttpRemoteStore {
    base_url: String,
    auth_token: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteStore")
            .field("base_url", &self.base_url)
            .field("auth_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpRemoteStore {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: impl Into<String>,
        timeout: Duration,
    ) -> RemoteResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let auth_token = normalize_text_option(Some(auth_token.into()))
            .ok_or_else(|| RemoteError::Auth("auth token must not be empty".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| {
                RemoteError::Network(format!("failed to build HTTP client: {error}"))
            })?;
        Ok(Self {
            base_url,
            auth_token,
            client,
        })
    }

    pub fn from_config(config: &RemoteConfig, timeout: Duration) -> RemoteResult<Self> {
        Self::new(config.base_url.clone(), config.auth_token.clone(), timeout)
    }

    fn collection_url(&self, owner: &OwnerId, kind: EntityKind) -> String {
        format!(
            "{}/v1/owners/{}/{}",
            self.base_url,
            urlencoding::encode(owner.as_str()),
            kind.plural()
        )
    }

    fn record_url(&self, owner: &OwnerId, kind: EntityKind, id: &str) -> String {
        format!("{}/{id}", self.collection_url(owner, kind))
    }

    fn changes_url(&self, owner: &OwnerId) -> String {
        format!(
            "{}/v1/owners/{}/changes",
            self.base_url,
            urlencoding::encode(owner.as_str())
        )
    }

    async fn execute(&self, request: RequestBuilder) -> RemoteResult<Response> {
        request
            .bearer_auth(&self.auth_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(classify_transport)
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        check(self.execute(request).await?).await
    }
}

#[async_trait::async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn create_remote(&self, owner: &OwnerId, entity: &Entity) -> RemoteResult<()> {
        let request = self
            .client
            .post(self.collection_url(owner, entity.kind()))
            .json(&record_body(entity)?);
        let response = self.execute(request).await?;
        if response.status() == StatusCode::CONFLICT {
            // The server already holds this id: a retried create
            tracing::debug!("{} {} already exists remotely", entity.kind(), entity.id());
            return Ok(());
        }
        check(response).await.map(drop)
    }

    async fn update_remote(
        &self,
        owner: &OwnerId,
        kind: EntityKind,
        id: &str,
        patch: &Entity,
    ) -> RemoteResult<()> {
        let request = self
            .client
            .put(self.record_url(owner, kind, id))
            .json(&record_body(patch)?);
        self.send(request).await.map(drop)
    }

    async fn delete_remote(&self, owner: &OwnerId, kind: EntityKind, id: &str) -> RemoteResult<()> {
        let request = self.client.delete(self.record_url(owner, kind, id));
        self.send(request).await.map(drop)
    }

    async fn fetch_changed_since(
        &self,
        owner: &OwnerId,
        checkpoint: Option<i64>,
    ) -> RemoteResult<RemoteChanges> {
        let mut request = self.client.get(self.changes_url(owner));
        if let Some(since) = checkpoint {
            request = request.query(&[("since", since)]);
        }
        let response = self.send(request).await?;
        response
            .json::<RemoteChanges>()
            .await
            .map_err(|error| RemoteError::Rejected(format!("invalid changes payload: {error}")))
    }
}

/// Bare record JSON, without the entity tag
fn record_body(entity: &Entity) -> RemoteResult<serde_json::Value> {
    let body = match entity {
        Entity::Deck(deck) => serde_json::to_value(deck),
        Entity::Card(card) => serde_json::to_value(card),
    };
    body.map_err(|error| RemoteError::Rejected(format!("unserializable record: {error}")))
}

async fn check(response: Response) -> RemoteResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &body))
}

fn classify_transport(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout(error.to_string())
    } else {
        RemoteError::Network(error.to_string())
    }
}

fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    let message = parse_api_error(status, body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Auth(message),
        StatusCode::NOT_FOUND => RemoteError::NotFound(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            RemoteError::Network(message)
        }
        status if status.is_server_error() => RemoteError::Network(message),
        _ => RemoteError::Rejected(message),
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> RemoteResult<String> {
    let base_url = normalize_text_option(Some(raw))
        .ok_or_else(|| RemoteError::Rejected("base URL must not be empty".to_string()))?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::Rejected(
            "base URL must include http:// or https://".to_string(),
        ))
    }
}
