use std::collections::BTreeSet;

use async_trait::async_trait;
use thiserror::Error;
use tracing::instrument;

use super::types::{Condition, CreateOutcome, CreateRequest, SubscriptionRecord, Transport};
use crate::helix::{HelixErr, HelixResult};

pub type SubscribeResult<T> = core::result::Result<T, SubscribeErr>;

#[derive(Debug, Error)]
pub enum SubscribeErr {
    #[error(transparent)]
    Helix(#[from] HelixErr),

    #[error("failed to create subscription for '{event_type}': {message}")]
    Rejected { event_type: String, message: String },
}

/// The subscription listing and creation endpoints of the EventSub API.
#[async_trait]
pub trait SubscriptionRegistry: Send + Sync {
    /// Lists existing subscriptions, optionally narrowed by type and user id. Implementations
    /// return every page.
    async fn list(
        &self,
        event_type: Option<&str>,
        user_id: Option<&str>,
    ) -> HelixResult<Vec<SubscriptionRecord>>;

    async fn create(&self, request: &CreateRequest) -> HelixResult<CreateOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    Existing,
    Created,
}

/// Creates webhook subscriptions pointing at this exporter, without duplicating ones that
/// already exist.
#[derive(Debug, Clone)]
pub struct WebhookSubscriber {
    callback: String,
    secret: String,
}

impl WebhookSubscriber {
    pub fn new(callback: &str, secret: &str) -> Self {
        Self {
            callback: callback.to_string(),
            secret: secret.to_string(),
        }
    }

    /// Makes sure a subscription for `(event_type, condition)` delivering to our callback
    /// exists. An existing enabled or pending subscription with an identical condition is
    /// reused; anything else results in a create call.
    #[instrument(skip(self, registry, condition))]
    pub async fn ensure(
        &self,
        registry: &dyn SubscriptionRegistry,
        event_type: &str,
        version: &str,
        condition: &Condition,
    ) -> SubscribeResult<Ensured> {
        let existing = registry
            .list(Some(event_type), condition.filter_user_id())
            .await?;

        if let Some(found) = existing.iter().find(|s| {
            s.event_type == event_type
                && s.transport.callback == self.callback
                && s.condition == *condition
                && s.status.is_active()
        }) {
            tracing::info!(status = found.status.as_str(), "subscription already exists");
            return Ok(Ensured::Existing);
        }

        let version = if version.is_empty() { "1" } else { version };
        let request = CreateRequest {
            event_type: event_type.to_string(),
            version: version.to_string(),
            condition: condition.clone(),
            transport: Transport::webhook(&self.callback, &self.secret),
        };

        let outcome = registry.create(&request).await?;
        if !outcome.accepted {
            return Err(SubscribeErr::Rejected {
                event_type: event_type.to_string(),
                message: outcome.error_message,
            });
        }

        tracing::info!(version, "subscription created");
        Ok(Ensured::Created)
    }
}

/// Event types with at least one enabled or pending subscription.
pub async fn active_types(registry: &dyn SubscriptionRegistry) -> HelixResult<BTreeSet<String>> {
    Ok(registry
        .list(None, None)
        .await?
        .into_iter()
        .filter(|s| s.status.is_active())
        .map(|s| s.event_type)
        .collect())
}

#[cfg(test)]
pub(crate) mod test {
    use std::sync::Mutex;

    use super::*;
    use crate::eventsub::types::SubscriptionStatus;

    /// In-memory registry that records creates as pending subscriptions.
    #[derive(Default)]
    pub(crate) struct FakeRegistry {
        pub records: Mutex<Vec<SubscriptionRecord>>,
        pub creates: Mutex<Vec<CreateRequest>>,
        pub reject_with: Option<String>,
        /// Limits `reject_with` to one event type.
        pub reject_only: Option<&'static str>,
    }

    #[async_trait]
    impl SubscriptionRegistry for FakeRegistry {
        async fn list(
            &self,
            event_type: Option<&str>,
            user_id: Option<&str>,
        ) -> HelixResult<Vec<SubscriptionRecord>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|s| event_type.is_none_or(|t| s.event_type == t))
                .filter(|s| user_id.is_none_or(|u| s.condition.filter_user_id() == Some(u)))
                .cloned()
                .collect())
        }

        async fn create(&self, request: &CreateRequest) -> HelixResult<CreateOutcome> {
            self.creates.lock().unwrap().push(request.clone());
            if let Some(message) = &self.reject_with
                && self.reject_only.is_none_or(|t| t == request.event_type)
            {
                return Ok(CreateOutcome {
                    accepted: false,
                    error_message: message.clone(),
                });
            }

            self.records.lock().unwrap().push(SubscriptionRecord {
                id: format!("sub-{}", self.creates.lock().unwrap().len()),
                event_type: request.event_type.clone(),
                version: request.version.clone(),
                status: SubscriptionStatus::VerificationPending,
                condition: request.condition.clone(),
                transport: Transport {
                    method: "webhook".to_string(),
                    callback: request.transport.callback.clone(),
                    secret: None,
                },
            });

            Ok(CreateOutcome {
                accepted: true,
                error_message: String::new(),
            })
        }
    }

    const CALLBACK: &str = "https://exporter.example/eventsub";

    fn cond() -> Condition {
        Condition::new().with("broadcaster_user_id", "1234")
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let registry = FakeRegistry::default();
        let subscriber = WebhookSubscriber::new(CALLBACK, "0123456789abcdef");

        let first = subscriber.ensure(&registry, "channel.cheer", "1", &cond()).await.unwrap();
        let second = subscriber.ensure(&registry, "channel.cheer", "1", &cond()).await.unwrap();

        assert_eq!(first, Ensured::Created);
        assert_eq!(second, Ensured::Existing);

        let creates = registry.creates.lock().unwrap();
        assert_eq!(creates.len(), 1);
        assert_eq!(creates[0].transport.method, "webhook");
        assert_eq!(creates[0].transport.callback, CALLBACK);
        assert_eq!(creates[0].transport.secret.as_deref(), Some("0123456789abcdef"));
    }

    #[tokio::test]
    async fn test_ensure_recreates_on_mismatch() {
        let registry = FakeRegistry::default();
        let subscriber = WebhookSubscriber::new(CALLBACK, "0123456789abcdef");
        subscriber.ensure(&registry, "channel.cheer", "", &cond()).await.unwrap();
        assert_eq!(registry.creates.lock().unwrap()[0].version, "1");

        // different callback
        WebhookSubscriber::new("https://other.example/eventsub", "0123456789abcdef")
            .ensure(&registry, "channel.cheer", "1", &cond())
            .await
            .unwrap();

        // inactive status
        registry.records.lock().unwrap()[0].status =
            SubscriptionStatus::Other("authorization_revoked".to_string());
        let again = subscriber.ensure(&registry, "channel.cheer", "1", &cond()).await.unwrap();

        assert_eq!(again, Ensured::Created);
        assert_eq!(registry.creates.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_ensure_rejected() {
        let registry = FakeRegistry {
            reject_with: Some("subscription missing proper authorization".to_string()),
            ..Default::default()
        };
        let subscriber = WebhookSubscriber::new(CALLBACK, "0123456789abcdef");

        let err = subscriber
            .ensure(&registry, "channel.ban", "1", &cond())
            .await
            .unwrap_err();

        match err {
            SubscribeErr::Rejected { event_type, message } => {
                assert_eq!(event_type, "channel.ban");
                assert!(message.contains("authorization"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_active_types() {
        let registry = FakeRegistry::default();
        let subscriber = WebhookSubscriber::new(CALLBACK, "0123456789abcdef");
        subscriber.ensure(&registry, "channel.cheer", "1", &cond()).await.unwrap();
        subscriber.ensure(&registry, "channel.raid", "1", &cond()).await.unwrap();
        registry.records.lock().unwrap()[1].status =
            SubscriptionStatus::Other("notification_failures_exceeded".to_string());

        let active = active_types(&registry).await.unwrap();
        assert_eq!(active.into_iter().collect::<Vec<_>>(), vec!["channel.cheer"]);
    }
}
