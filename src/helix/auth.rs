use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use http::StatusCode;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::instrument;

use super::{HelixErr, HelixResult};
use crate::collector::runtime::RuntimeMetrics;
use crate::constants::TOKEN_REFRESH_SECS;

/// Shared, swappable access token. Clones observe refreshes made through any other clone.
#[derive(Clone, Default)]
pub struct TokenCell(Arc<RwLock<String>>);

impl TokenCell {
    pub fn new(token: &str) -> Self {
        Self(Arc::new(RwLock::new(token.to_string())))
    }

    pub fn get(&self) -> String {
        match self.0.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, token: &str) {
        let mut guard = match self.0.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = token.to_string();
    }
}

impl fmt::Debug for TokenCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenCell(<redacted>)")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppToken {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserToken {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub scope: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatedToken {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expires_in: u64,
}

/// Client for the `id.twitch.tv/oauth2` endpoints.
pub struct OAuthClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    runtime: Arc<RuntimeMetrics>,
}

impl fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthClient")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl OAuthClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        client_id: &str,
        client_secret: &str,
        runtime: Arc<RuntimeMetrics>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            runtime,
        }
    }

    async fn finish<T>(&self, res: reqwest::Response) -> HelixResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = res.status();
        self.runtime
            .observe_api_response("oauth", res.url().path(), status.as_u16(), res.headers());

        let body = res.bytes().await?;
        if status != StatusCode::OK {
            return Err(HelixErr::from_response(status, &body));
        }

        Ok(serde_json::from_slice(&body)?)
    }

    /// Client-credentials grant.
    #[instrument(skip(self))]
    pub async fn app_token(&self) -> HelixResult<AppToken> {
        let res = self
            .http
            .post(format!("{}/token", self.base_url))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;

        let token: AppToken = self.finish(res).await?;
        tracing::info!(expires_in = token.expires_in, "obtained app access token");
        Ok(token)
    }

    #[instrument(skip(self, refresh_token))]
    pub async fn refresh_user_token(&self, refresh_token: &str) -> HelixResult<UserToken> {
        let res = self
            .http
            .post(format!("{}/token", self.base_url))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        let token: UserToken = self.finish(res).await?;
        tracing::info!(scope_count = token.scope.len(), "refreshed user access token");
        Ok(token)
    }

    /// Validates a user token and returns the scopes granted to it.
    #[instrument(skip(self, access_token))]
    pub async fn validate(&self, access_token: &str) -> HelixResult<ValidatedToken> {
        let res = self
            .http
            .get(format!("{}/validate", self.base_url))
            .header(http::header::AUTHORIZATION, format!("OAuth {access_token}"))
            .send()
            .await?;

        let validated: ValidatedToken = self.finish(res).await?;
        tracing::debug!(login = %validated.login, scopes = ?validated.scopes, "validated user token");
        Ok(validated)
    }
}

/// A user token and the refresh token that rotates with it.
#[derive(Debug)]
pub struct UserSession {
    pub access: TokenCell,
    refresh: TokenCell,
}

impl UserSession {
    pub fn new(access_token: &str, refresh_token: &str) -> Self {
        Self {
            access: TokenCell::new(access_token),
            refresh: TokenCell::new(refresh_token),
        }
    }

    /// Exchanges the current refresh token, storing the new pair. Returns the granted scopes.
    pub async fn refresh(&self, oauth: &OAuthClient) -> HelixResult<Vec<String>> {
        let token = oauth.refresh_user_token(&self.refresh.get()).await?;
        self.access.set(&token.access_token);
        if !token.refresh_token.is_empty() {
            self.refresh.set(&token.refresh_token);
        }
        Ok(token.scope)
    }
}

/// Runs `task` every 24 hours, starting one period from now. Failures are logged and retried on
/// the next tick.
pub fn spawn_refresh<F, Fut>(name: &'static str, task: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = HelixResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let period = Duration::from_secs(TOKEN_REFRESH_SECS);
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            interval.tick().await;
            tracing::info!(token = name, "refreshing access token");
            if let Err(e) = task().await {
                tracing::error!(token = name, error = %e, "token refresh failed");
            }
        }
    })
}
