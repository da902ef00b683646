use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;

use crate::constants::{STATUS_ENABLED, STATUS_VERIFICATION_PENDING};

/// EventSub subscription condition as an opaque key/value map.
///
/// Empty values are dropped on construction so that a condition read back from Helix
/// (which reports unused keys as `""`) compares equal to the one that created it. Otherwise
/// comparison is exact: no case folding, no trimming.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, Value>",
    into = "BTreeMap<String, String>"
)]
pub struct Condition(BTreeMap<String, String>);

impl Condition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        if !value.is_empty() {
            self.0.insert(key.to_string(), value.to_string());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// User id used to narrow subscription listings: `broadcaster_user_id`, else `user_id`.
    pub fn filter_user_id(&self) -> Option<&str> {
        self.get("broadcaster_user_id").or_else(|| self.get("user_id"))
    }
}

impl From<BTreeMap<String, Value>> for Condition {
    fn from(raw: BTreeMap<String, Value>) -> Self {
        Self(
            raw.into_iter()
                .filter_map(|(k, v)| match v {
                    Value::String(s) if !s.is_empty() => Some((k, s)),
                    _ => None,
                })
                .collect(),
        )
    }
}

impl From<Condition> for BTreeMap<String, String> {
    fn from(condition: Condition) -> Self {
        condition.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transport {
    pub method: String,
    #[serde(default)]
    pub callback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl Transport {
    pub fn webhook(callback: &str, secret: &str) -> Self {
        Self {
            method: "webhook".to_string(),
            callback: callback.to_string(),
            secret: Some(secret.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum SubscriptionStatus {
    Enabled,
    VerificationPending,
    Other(String),
}

impl SubscriptionStatus {
    /// Enabled and pending-verification subscriptions both count as present.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Enabled | Self::VerificationPending)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Enabled => STATUS_ENABLED,
            Self::VerificationPending => STATUS_VERIFICATION_PENDING,
            Self::Other(s) => s,
        }
    }
}

impl From<String> for SubscriptionStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            STATUS_ENABLED => Self::Enabled,
            STATUS_VERIFICATION_PENDING => Self::VerificationPending,
            _ => Self::Other(value),
        }
    }
}

/// An existing subscription as reported by `GET /eventsub/subscriptions`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionRecord {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub version: String,
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub condition: Condition,
    pub transport: Transport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    pub version: String,
    pub condition: Condition,
    pub transport: Transport,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreateOutcome {
    /// Twitch answers a successful create with `202 Accepted`.
    pub accepted: bool,
    pub error_message: String,
}

pub enum WebhookMessageType {
    Verify,
    Notify,
    Revoke,
}

impl WebhookMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verify => "webhook_callback_verification",
            Self::Notify => "notification",
            Self::Revoke => "revocation",
        }
    }
}

impl TryFrom<&str> for WebhookMessageType {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "webhook_callback_verification" => Ok(Self::Verify),
            "notification" => Ok(Self::Notify),
            "revocation" => Ok(Self::Revoke),
            other => Err(format!("unknown message type '{other}'")),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MessageSubscription {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Body of any webhook delivery; which optional field is set depends on the message type.
#[derive(Debug, Deserialize)]
pub struct WebhookMessage {
    pub subscription: MessageSubscription,
    #[serde(default)]
    pub challenge: Option<String>,
    #[serde(default)]
    pub event: Option<Box<RawValue>>,
}
