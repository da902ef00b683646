use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{FromRequest, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::StatusCode;

use crate::eventsub::verify::SignatureVerifier;

/// EventSub payloads are small; anything larger is not a Twitch delivery.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// The raw request body, captured before signature verification.
#[derive(Clone)]
pub struct VerifiedBody(pub Bytes);

impl VerifiedBody {
    pub fn as_json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(&self.0)
    }
}

/// Rejects deliveries whose signature does not match the webhook secret, then hands the
/// untouched body to the route handler through the request extensions.
pub async fn verify_sender_ident(
    State(verifier): State<Arc<SignatureVerifier>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let body = match extract_body(&mut req).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read eventsub request body");
            return Err(StatusCode::BAD_REQUEST);
        }
    };

    if !verifier.verify(req.headers(), &body) {
        return Err(StatusCode::FORBIDDEN);
    }

    req.extensions_mut().insert(VerifiedBody(body));
    Ok(next.run(req).await)
}

async fn extract_body(request: &mut Request) -> Result<Bytes, axum::Error> {
    let body = std::mem::replace(request.body_mut(), Body::empty());
    axum::body::to_bytes(body, MAX_BODY_BYTES).await
}

impl<S> FromRequest<S> for VerifiedBody
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request(req: Request, _: &S) -> Result<Self, Self::Rejection> {
        req.extensions()
            .get::<VerifiedBody>()
            .cloned()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}
