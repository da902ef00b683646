pub mod exposition;
pub mod mid;
pub mod webhook;

use std::sync::Arc;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::{self, Next, from_fn};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use http::header::CONTENT_TYPE;
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::collector::Exporter;
use crate::constants::EVENTSUB_ROUTE;
use crate::eventsub::dispatch::Dispatcher;
use crate::eventsub::verify::SignatureVerifier;
use mid::verify::verify_sender_ident;
use webhook::webhook_handler;

pub type RouteResult<T> = core::result::Result<T, RouteErr>;

pub struct AppState {
    pub exporter: Exporter,
    pub dispatcher: Dispatcher,
    pub telemetry_path: String,
}

/// Builds the HTTP surface. The EventSub callback route is only mounted when a verifier is
/// given.
pub fn router(state: Arc<AppState>, verifier: Option<Arc<SignatureVerifier>>) -> Router {
    let mut app = Router::new().route(&state.telemetry_path, get(metrics));
    if state.telemetry_path != "/" {
        app = app.route("/", get(landing));
    }

    if let Some(verifier) = verifier {
        let eventsub_routes = Router::new()
            .route(EVENTSUB_ROUTE, post(webhook_handler))
            .route_layer(middleware::from_fn_with_state(verifier, verify_sender_ident));
        app = app.merge(eventsub_routes);
    }

    app.layer(
        TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
            let method = req.method();
            let uri = req.uri();

            let matched_path = req
                .extensions()
                .get::<MatchedPath>()
                .map(|matched| matched.as_str());

            tracing::debug_span!("http_request", ?method, ?uri, ?matched_path)
        }),
    )
    .layer(from_fn(log_route_errors))
    .with_state(state)
}

/// Serves `app` until ctrl-c.
pub async fn serve(listener: TcpListener, app: Router) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutting down");
        })
        .await
}

async fn landing(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(format!(
        "<html>
<head><title>Twitch Exporter</title></head>
<body>
<h1>Twitch Exporter</h1>
<p><a href='{path}'>Metrics</a></p>
<h2>Build</h2>
<pre>{name} {version}</pre>
</body>
</html>",
        path = state.telemetry_path,
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
    ))
}

/// Runs one collection pass and renders it.
#[instrument(skip(state))]
async fn metrics(State(state): State<Arc<AppState>>) -> RouteResult<Response> {
    let samples = state.exporter.gather().await;
    tracing::debug!(samples = samples.len(), "collection pass finished");

    let body = exposition::encode(samples)?;
    Ok(([(CONTENT_TYPE, exposition::CONTENT_TYPE)], body).into_response())
}

#[instrument(skip(request, next), fields(uri = request.uri().to_string()))]
async fn log_route_errors(request: Request, next: Next) -> Response {
    let res = next.run(request).await;
    if let Some(err) = res.extensions().get::<Arc<RouteErr>>() {
        tracing::error!(error = ?err, "error occurred inside route handler");
    }

    res
}

#[derive(Debug, Error)]
pub enum RouteErr {
    #[error("failed to encode metrics: {0}")]
    Encode(#[from] std::fmt::Error),

    #[error(transparent)]
    MalformedBody(#[from] serde_json::Error),

    #[error("missing '{0}' header")]
    MissingHeader(&'static str),

    #[error("{0}")]
    MessageType(String),

    #[error("webhook message has no '{0}' field")]
    MissingField(&'static str),
}

impl IntoResponse for RouteErr {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            message: String,
        }

        let status = match &self {
            RouteErr::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RouteErr::MalformedBody(_)
            | RouteErr::MissingHeader(_)
            | RouteErr::MessageType(_)
            | RouteErr::MissingField(_) => StatusCode::BAD_REQUEST,
        };

        let message = self.to_string();
        let mut response = (status, Json(ErrorResponse { message })).into_response();
        response.extensions_mut().insert(Arc::new(self));

        response
    }
}

#[cfg(test)]
mod test {
    use axum::body::Body;
    use tower::ServiceExt;

    use super::*;
    use crate::collector::runtime::RuntimeMetrics;

    fn app(telemetry_path: &str) -> Router {
        let runtime = Arc::new(RuntimeMetrics::new());
        runtime.set_configured(true);
        runtime.inc_signature_fail("bad_signature");

        let state = Arc::new(AppState {
            exporter: Exporter::new(runtime),
            dispatcher: Dispatcher::new(),
            telemetry_path: telemetry_path.to_string(),
        });
        router(state, None)
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let req = http::Request::builder().uri(uri).body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_metrics_route() {
        let (status, body) = get_body(app("/probe"), "/probe").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("twitch_exporter_configured"));
        assert!(body.contains(r#"twitch_eventsub_signature_fail_total{reason="bad_signature"}"#));
    }

    #[tokio::test]
    async fn test_landing_links_metrics() {
        let (status, body) = get_body(app("/probe"), "/").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("href='/probe'"));
    }

    #[tokio::test]
    async fn test_eventsub_route_requires_verifier() {
        let req = http::Request::builder()
            .method("POST")
            .uri(EVENTSUB_ROUTE)
            .body(Body::from("{}"))
            .unwrap();

        let res = app("/metrics").oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_route_error_status() {
        let res = RouteErr::MissingField("challenge").into_response();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(res.extensions().get::<Arc<RouteErr>>().is_some());

        let res = RouteErr::Encode(std::fmt::Error).into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
