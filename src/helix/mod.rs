pub mod auth;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use chrono::{DateTime, Utc};
use http::header::{AUTHORIZATION, InvalidHeaderValue};
use http::{HeaderMap, HeaderValue, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use crate::collector::channel_core::{LiveStream, StreamSource};
use crate::collector::eventsub_self::UserDirectory;
use crate::collector::runtime::RuntimeMetrics;
use crate::constants::HTTP_TIMEOUT_SECS;
use crate::eventsub::subscriber::SubscriptionRegistry;
use crate::eventsub::types::{CreateOutcome, CreateRequest, SubscriptionRecord};
use auth::TokenCell;

pub const HELIX_URN_STREAMS: &str = "streams";
pub const HELIX_URN_USERS: &str = "users";
pub const HELIX_URN_SUBSCRIPTIONS: &str = "eventsub/subscriptions";

pub type HelixResult<T> = core::result::Result<T, HelixErr>;

#[derive(Debug, Error)]
pub enum HelixErr {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("while creating a HeaderValue ({0})")]
    HeaderError(#[from] InvalidHeaderValue),

    #[error("while decoding a helix response: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("helix rejected the access token")]
    Unauthorized,

    #[error("helix rate limit exhausted")]
    RateLimited,

    #[error("error during helix fetch: status {0}")]
    Status(u16),

    #[error("error (with detail) during helix fetch: {status}: {message}")]
    FetchErrWithBody { status: u16, message: String },
}

impl HelixErr {
    /// Bounded `reason` label for `collector_errors_total`.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ReqwestError(e) if e.is_timeout() => "timeout",
            Self::ReqwestError(_) => "transport",
            Self::HeaderError(_) => "bad_credentials",
            Self::SerdeError(_) => "decode",
            Self::Unauthorized => "unauthorized",
            Self::RateLimited => "rate_limited",
            Self::Status(status) | Self::FetchErrWithBody { status, .. } => match status {
                400..=499 => "http_4xx",
                500..=599 => "http_5xx",
                _ => "http_other",
            },
        }
    }

    fn from_response(status: StatusCode, body: &[u8]) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => return Self::Unauthorized,
            StatusCode::TOO_MANY_REQUESTS => return Self::RateLimited,
            _ => {}
        }

        match error_message(body) {
            Some(message) => Self::FetchErrWithBody {
                status: status.as_u16(),
                message,
            },
            None => Self::Status(status.as_u16()),
        }
    }
}

/// Pulls the `message` field out of a Helix error body, if there is one.
fn error_message(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<Value>(body)
        .ok()?
        .get("message")?
        .as_str()
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

pub fn build_http_client() -> HelixResult<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()?)
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelixDataResponse<T> {
    data: Vec<T>,
    #[serde(default)]
    pagination: Option<HelixPagination>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelixPagination {
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelixUser {
    pub id: String,
    pub login: String,
    #[serde(rename = "display_name", default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelixStream {
    pub user_login: String,
    #[serde(default)]
    pub viewer_count: u64,
    #[serde(default)]
    pub started_at: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub game_id: String,
}

impl From<HelixStream> for LiveStream {
    fn from(s: HelixStream) -> Self {
        Self {
            user_login: s.user_login,
            viewer_count: s.viewer_count,
            started_at: DateTime::parse_from_rfc3339(&s.started_at)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            title: s.title,
            game_id: s.game_id,
        }
    }
}

/// Helix REST client authenticated with one token.
///
/// Every response is reported to [`RuntimeMetrics`] under this client's `api` label, including
/// rate-limit headers.
#[derive(Debug, Clone)]
pub struct HelixClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    token: TokenCell,
    api: &'static str,
    runtime: Arc<RuntimeMetrics>,
}

impl HelixClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        client_id: &str,
        token: TokenCell,
        api: &'static str,
        runtime: Arc<RuntimeMetrics>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            token,
            api,
            runtime,
        }
    }

    fn auth_headers(&self) -> HelixResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.token.get()))?,
        );
        headers.insert("Client-Id", HeaderValue::from_str(&self.client_id)?);
        Ok(headers)
    }

    fn uri(&self, urn: &str) -> String {
        format!("{}/{}", self.base_url, urn)
    }

    /// Sends a request and returns the status and raw body, recording the response.
    async fn send(&self, builder: reqwest::RequestBuilder) -> HelixResult<(StatusCode, Bytes)> {
        let res = builder.headers(self.auth_headers()?).send().await?;

        let status = res.status();
        self.runtime
            .observe_api_response(self.api, res.url().path(), status.as_u16(), res.headers());

        if let Some(remaining) = res.headers().get("ratelimit-remaining")
            && let Some(total) = res.headers().get("ratelimit-limit")
        {
            tracing::trace!(ratelimit_available = ?remaining, ratelimit_total = ?total, "rate-limit bucket");
        }

        let body = res.bytes().await?;
        Ok((status, body))
    }

    /// GETs `urn` and decodes a 200 response as `T`.
    async fn fetch<T>(&self, urn: &str, query: &[(&str, &str)]) -> HelixResult<T>
    where
        T: DeserializeOwned,
    {
        let (status, body) = self.send(self.http.get(self.uri(urn)).query(query)).await?;
        if status != StatusCode::OK {
            let err = HelixErr::from_response(status, &body);
            tracing::error!(code = %status, error = %err, "non-200/OK response");
            return Err(err);
        }

        Ok(serde_json::from_slice(&body)?)
    }

    #[instrument(skip(self, logins), fields(login_count = logins.len()))]
    pub async fn fetch_streams(&self, logins: &[String]) -> HelixResult<Vec<HelixStream>> {
        if logins.is_empty() {
            return Ok(Vec::new());
        }

        let first = logins.len().to_string();
        let mut query: Vec<(&str, &str)> = logins
            .iter()
            .map(|login| ("user_login", login.as_str()))
            .collect();
        query.push(("first", &first));

        let res: HelixDataResponse<HelixStream> = self.fetch(HELIX_URN_STREAMS, &query).await?;
        tracing::debug!(live_count = res.data.len(), "fetched live streams");
        Ok(res.data)
    }

    #[instrument(skip(self))]
    pub async fn fetch_user_by_login(&self, login: &str) -> HelixResult<Option<HelixUser>> {
        let res: HelixDataResponse<HelixUser> =
            self.fetch(HELIX_URN_USERS, &[("login", login)]).await?;
        Ok(res.data.into_iter().next())
    }

    /// Fetches every page of the subscription listing.
    #[instrument(skip(self))]
    pub async fn fetch_subscriptions(
        &self,
        event_type: Option<&str>,
        user_id: Option<&str>,
    ) -> HelixResult<Vec<SubscriptionRecord>> {
        let mut retrieved = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query = Vec::new();
            if let Some(t) = event_type {
                query.push(("type", t));
            }
            if let Some(u) = user_id {
                query.push(("user_id", u));
            }
            if let Some(after) = cursor.as_deref() {
                query.push(("after", after));
            }

            let page: HelixDataResponse<SubscriptionRecord> =
                self.fetch(HELIX_URN_SUBSCRIPTIONS, &query).await?;
            retrieved.extend(page.data);

            let next = page
                .pagination
                .and_then(|p| p.cursor)
                .filter(|c| !c.is_empty());

            match next {
                Some(c) if cursor.as_deref() != Some(c.as_str()) => cursor = Some(c),
                _ => break,
            }
        }

        tracing::debug!(subscription_count = retrieved.len(), "listed eventsub subscriptions");
        Ok(retrieved)
    }

    #[instrument(skip(self, request), fields(event_type = %request.event_type))]
    pub async fn create_subscription(&self, request: &CreateRequest) -> HelixResult<CreateOutcome> {
        let (status, body) = self
            .send(self.http.post(self.uri(HELIX_URN_SUBSCRIPTIONS)).json(request))
            .await?;

        if status == StatusCode::ACCEPTED {
            return Ok(CreateOutcome {
                accepted: true,
                error_message: String::new(),
            });
        }

        let error_message = error_message(&body).unwrap_or_else(|| status.to_string());
        tracing::warn!(code = %status, error_message = %error_message, "failed to create subscription");
        Ok(CreateOutcome {
            accepted: false,
            error_message,
        })
    }
}

#[async_trait]
impl StreamSource for HelixClient {
    async fn live_streams(&self, logins: &[String]) -> HelixResult<Vec<LiveStream>> {
        Ok(self
            .fetch_streams(logins)
            .await?
            .into_iter()
            .map(LiveStream::from)
            .collect())
    }
}

#[async_trait]
impl UserDirectory for HelixClient {
    async fn user_id(&self, login: &str) -> HelixResult<Option<String>> {
        Ok(self.fetch_user_by_login(login).await?.map(|u| u.id))
    }
}

#[async_trait]
impl SubscriptionRegistry for HelixClient {
    async fn list(
        &self,
        event_type: Option<&str>,
        user_id: Option<&str>,
    ) -> HelixResult<Vec<SubscriptionRecord>> {
        self.fetch_subscriptions(event_type, user_id).await
    }

    async fn create(&self, request: &CreateRequest) -> HelixResult<CreateOutcome> {
        self.create_subscription(request).await
    }
}
