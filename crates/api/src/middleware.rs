//! API middleware.

#![allow(missing_docs)]

use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};
use lounge_core::{PollService, RoomRegistry, SessionVerifierService};

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub room_registry: RoomRegistry,
    pub poll_service: PollService,
    pub session_verifier: SessionVerifierService,
}

/// Bearer token from an `Authorization` header value.
pub(crate) fn bearer_token(req: &Request<Body>) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Authentication middleware.
///
/// A missing or invalid token leaves the request anonymous; handlers that
/// need an identity reject it through [`crate::extractors::AuthUser`].
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(token) = bearer_token(&req).map(str::to_owned) {
        match state.session_verifier.verify(&token).await {
            Ok(user) => {
                req.extensions_mut().insert(user);
            }
            Err(e) => tracing::debug!(error = %e, "Ignoring invalid bearer token"),
        }
    }

    next.run(req).await
}
