use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, StatusCode};
use tracing::instrument;

use super::mid::verify::VerifiedBody;
use super::{AppState, RouteErr, RouteResult};
use crate::constants::TWITCH_MESSAGE_TYPE_HEADER;
use crate::eventsub::types::{WebhookMessage, WebhookMessageType};

/// Handles verified deliveries on the EventSub callback route.
#[instrument(skip(state, headers, body))]
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: VerifiedBody,
) -> RouteResult<Response> {
    let msg_type: WebhookMessageType = headers
        .get(TWITCH_MESSAGE_TYPE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(RouteErr::MissingHeader(TWITCH_MESSAGE_TYPE_HEADER))?
        .try_into()
        .map_err(RouteErr::MessageType)?;

    let message: WebhookMessage = body.as_json()?;
    let event_type = message.subscription.event_type.as_str();
    tracing::debug!(msg_type = msg_type.as_str(), event_type, "incoming webhook");

    match msg_type {
        WebhookMessageType::Verify => {
            let challenge = message.challenge.ok_or(RouteErr::MissingField("challenge"))?;
            tracing::info!(event_type, "answering webhook verification challenge");
            Ok(([(CONTENT_TYPE, "text/plain")], challenge).into_response())
        }

        WebhookMessageType::Notify => {
            let event = message.event.as_deref().ok_or(RouteErr::MissingField("event"))?;
            if !state.dispatcher.dispatch(event_type, event) {
                tracing::debug!(event_type, "notification for unhandled event type");
            }
            Ok(StatusCode::NO_CONTENT.into_response())
        }

        WebhookMessageType::Revoke => {
            let status = message.subscription.status.as_deref().unwrap_or_default();
            tracing::warn!(event_type, status, "eventsub subscription revoked");
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::body::Body;
    use http::Request;
    use serde_json::value::RawValue;
    use tower::ServiceExt;

    use super::*;
    use crate::collector::Exporter;
    use crate::collector::runtime::RuntimeMetrics;
    use crate::constants::{
        EVENTSUB_ROUTE, TWITCH_MESSAGE_ID, TWITCH_MESSAGE_SIGNATURE, TWITCH_MESSAGE_TIMESTAMP,
    };
    use crate::eventsub::dispatch::Dispatcher;
    use crate::eventsub::verify::SignatureVerifier;
    use crate::server::router;

    const SECRET: &str = "0123456789abcdef";
    const MESSAGE_ID: &str = "befa7b53-d79d-478f-86b9-120f112b044e";
    const TIMESTAMP: &str = "2024-03-18T12:00:00.000000000Z";

    struct Harness {
        app: axum::Router,
        cheers: Arc<AtomicUsize>,
        runtime: Arc<RuntimeMetrics>,
    }

    fn harness() -> Harness {
        let runtime = Arc::new(RuntimeMetrics::new());
        let cheers = Arc::new(AtomicUsize::new(0));

        let mut dispatcher = Dispatcher::new();
        let hits = Arc::clone(&cheers);
        dispatcher.on(
            "channel.cheer",
            Arc::new(move |_: &RawValue| {
                hits.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let hook_runtime = Arc::clone(&runtime);
        let verifier = SignatureVerifier::new(SECRET)
            .with_failure_hook(Arc::new(move |reason: &'static str| hook_runtime.inc_signature_fail(reason)));

        let state = Arc::new(AppState {
            exporter: Exporter::new(Arc::clone(&runtime)),
            dispatcher,
            telemetry_path: "/metrics".to_string(),
        });

        Harness {
            app: router(state, Some(Arc::new(verifier))),
            cheers,
            runtime,
        }
    }

    fn delivery(msg_type: &str, body: &str, signature: Option<String>) -> Request<Body> {
        let signature = signature.unwrap_or_else(|| {
            SignatureVerifier::new(SECRET).sign(MESSAGE_ID, TIMESTAMP, body.as_bytes())
        });

        Request::builder()
            .method("POST")
            .uri(EVENTSUB_ROUTE)
            .header(TWITCH_MESSAGE_ID, MESSAGE_ID)
            .header(TWITCH_MESSAGE_TIMESTAMP, TIMESTAMP)
            .header(TWITCH_MESSAGE_SIGNATURE, signature)
            .header(TWITCH_MESSAGE_TYPE_HEADER, msg_type)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn signature_failures(runtime: &RuntimeMetrics, reason: &str) -> f64 {
        runtime
            .samples()
            .iter()
            .find(|s| s.desc.name == "eventsub_signature_fail" && s.label("reason") == Some(reason))
            .map(|s| s.value)
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_verification_challenge_is_echoed() {
        let h = harness();
        let body = r#"{"challenge":"pogchamp-kappa-360noscope-vohiyo","subscription":{"id":"f1c2a387","status":"webhook_callback_verification_pending","type":"channel.cheer","version":"1"}}"#;

        let res = h
            .app
            .oneshot(delivery("webhook_callback_verification", body, None))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[CONTENT_TYPE], "text/plain");
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"pogchamp-kappa-360noscope-vohiyo");
    }

    #[tokio::test]
    async fn test_notification_is_dispatched() {
        let h = harness();
        let body = r#"{"subscription":{"id":"f1c2a387","status":"enabled","type":"channel.cheer","version":"1"},"event":{"bits":500,"broadcaster_user_id":"1234"}}"#;

        let res = h.app.oneshot(delivery("notification", body, None)).await.unwrap();

        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert_eq!(h.cheers.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bad_signature_is_forbidden() {
        let h = harness();
        let body = r#"{"subscription":{"type":"channel.cheer"},"event":{"bits":500}}"#;
        let forged = SignatureVerifier::new("not-the-secret").sign(MESSAGE_ID, TIMESTAMP, body.as_bytes());

        let res = h
            .app
            .oneshot(delivery("notification", body, Some(forged)))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(h.cheers.load(Ordering::SeqCst), 0);
        assert_eq!(signature_failures(&h.runtime, "bad_signature"), 1.0);
    }

    #[tokio::test]
    async fn test_missing_headers_are_forbidden() {
        let h = harness();
        let req = Request::builder()
            .method("POST")
            .uri(EVENTSUB_ROUTE)
            .header(TWITCH_MESSAGE_TYPE_HEADER, "notification")
            .body(Body::from("{}"))
            .unwrap();

        let res = h.app.oneshot(req).await.unwrap();

        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(signature_failures(&h.runtime, "missing_headers"), 1.0);
    }

    #[tokio::test]
    async fn test_revocation_is_acknowledged() {
        let h = harness();
        let body = r#"{"subscription":{"id":"f1c2a387","status":"authorization_revoked","type":"channel.cheer","version":"1"}}"#;

        let res = h.app.oneshot(delivery("revocation", body, None)).await.unwrap();

        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert_eq!(h.cheers.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_message_type_is_rejected() {
        let h = harness();
        let body = r#"{"subscription":{"type":"channel.cheer"}}"#;

        let res = h.app.oneshot(delivery("keepalive", body, None)).await.unwrap();

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
