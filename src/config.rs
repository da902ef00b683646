use thiserror::Error;

pub type ConfigResult<T> = core::result::Result<T, ConfigErr>;

/// Configuration problems detected at startup. Every variant is fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigErr {
    #[error("watchlist role=watch exceeds {max} channels ({count})")]
    WatchlistTooLarge { count: usize, max: usize },

    #[error("reward_group cardinality too high: {count} groups (max {max}): {groups:?}")]
    RewardGroupCardinality {
        count: usize,
        max: usize,
        groups: Vec<String>,
    },

    #[error("expected <key>:<value>, got '{0}'")]
    MalformedKeyValue(String),

    #[error("webhook secret must be 10-100 ASCII characters (got {0} characters)")]
    InvalidWebhookSecret(usize),

    #[error("webhook url must be an absolute http(s) url, got '{0}'")]
    InvalidWebhookUrl(String),

    #[error("self channel is not configured")]
    MissingSelfChannel,
}

/// Parses a single `<key>:<value>` flag value; both sides are trimmed and must be non-empty.
pub fn parse_key_value(raw: &str) -> ConfigResult<(String, String)> {
    let (key, value) = raw
        .split_once(':')
        .ok_or_else(|| ConfigErr::MalformedKeyValue(raw.to_string()))?;

    let (key, value) = (key.trim(), value.trim());
    if key.is_empty() || value.is_empty() {
        return Err(ConfigErr::MalformedKeyValue(raw.to_string()));
    }

    Ok((key.to_string(), value.to_string()))
}

/// Twitch only accepts webhook secrets of 10 to 100 ASCII characters.
pub fn validate_webhook_secret(secret: &str) -> ConfigResult<()> {
    let len = secret.chars().count();
    if !secret.is_ascii() || !(10..=100).contains(&len) {
        return Err(ConfigErr::InvalidWebhookSecret(len));
    }

    Ok(())
}

/// Only the scheme is checked; a reverse proxy may expose the callback under any path.
pub fn validate_webhook_url(url: &str) -> ConfigResult<()> {
    let host = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or_default();
    if host.is_empty() || host.starts_with('/') {
        return Err(ConfigErr::InvalidWebhookUrl(url.to_string()));
    }

    Ok(())
}
