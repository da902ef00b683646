use std::fmt;
use std::sync::Arc;

use http::HeaderMap;
use ring::hmac::{self, Key};

use crate::constants::{
    HMAC_PREFIX, TWITCH_MESSAGE_ID, TWITCH_MESSAGE_SIGNATURE, TWITCH_MESSAGE_TIMESTAMP,
};

/// Called with the failure reason for every rejected delivery.
pub type FailureHook = Arc<dyn Fn(&'static str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureFailure {
    MissingHeaders,
    BadSignature,
}

impl SignatureFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingHeaders => "missing_headers",
            Self::BadSignature => "bad_signature",
        }
    }
}

impl fmt::Display for SignatureFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticates EventSub webhook deliveries against the shared webhook secret.
///
/// The expected signature is `sha256=<hex HMAC-SHA256(secret, id || timestamp || body)>`,
/// where `id` and `timestamp` are the raw header values and `body` is the unparsed request
/// body.
pub struct SignatureVerifier {
    key: Key,
    on_failure: Option<FailureHook>,
}

impl fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("on_failure", &self.on_failure.is_some())
            .finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: Key::new(hmac::HMAC_SHA256, secret.as_bytes()),
            on_failure: None,
        }
    }

    pub fn with_failure_hook(mut self, hook: FailureHook) -> Self {
        self.on_failure = Some(hook);
        self
    }

    pub fn verify(&self, headers: &HeaderMap, body: &[u8]) -> bool {
        match self.check(headers, body) {
            Ok(()) => true,
            Err(reason) => {
                tracing::warn!(%reason, "eventsub signature verification failed");
                if let Some(hook) = &self.on_failure {
                    hook(reason.as_str());
                }
                false
            }
        }
    }

    /// Same as [`SignatureVerifier::verify`] without invoking the failure hook.
    pub fn check(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), SignatureFailure> {
        let (id, timestamp, signature) = message_parts(headers)?;

        let digest = signature
            .strip_prefix(HMAC_PREFIX)
            .filter(|d| !d.is_empty())
            .ok_or(SignatureFailure::BadSignature)?;
        let provided = hex::decode(digest).map_err(|_| SignatureFailure::BadSignature)?;

        let message = rebuild_message(id, timestamp, body);
        hmac::verify(&self.key, &message, &provided).map_err(|_| SignatureFailure::BadSignature)
    }

    #[cfg(test)]
    pub fn sign(&self, id: &str, timestamp: &str, body: &[u8]) -> String {
        let signed = hmac::sign(&self.key, &rebuild_message(id, timestamp, body));
        format!("{}{}", HMAC_PREFIX, hex::encode(signed))
    }
}

type MessageParts<'a> = (&'a str, &'a str, &'a str);
fn message_parts(headers: &HeaderMap) -> Result<MessageParts<'_>, SignatureFailure> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or(SignatureFailure::MissingHeaders)
    };

    Ok((
        get(TWITCH_MESSAGE_ID)?,
        get(TWITCH_MESSAGE_TIMESTAMP)?,
        get(TWITCH_MESSAGE_SIGNATURE)?,
    ))
}

fn rebuild_message(id: &str, ts: &str, body: &[u8]) -> Vec<u8> {
    let mut m = Vec::with_capacity(id.len() + ts.len() + body.len());
    m.extend_from_slice(id.as_bytes());
    m.extend_from_slice(ts.as_bytes());
    m.extend_from_slice(body);

    m
}
