//! HTTP API layer for lounge.
//!
//! - **Endpoints**: room and poll request/response calls under `/api`
//! - **Extractors**: session identity set by the auth middleware
//! - **Middleware**: bearer token authentication, shared state
//! - **Streaming**: the room WebSocket channel
//!
//! Built on Axum 0.8 with Tower middleware stack.

pub mod endpoints;
pub mod extractors;
pub mod middleware;
pub mod response;
pub mod streaming;

use axum::{Router, routing::get};

pub use endpoints::{healthz, router};
pub use middleware::{AppState, auth_middleware};
pub use streaming::{RoomConnection, streaming_handler};

/// Full application router: `/api`, `/streaming` and `/healthz`.
///
/// Transport layers (tracing, CORS) are added by the binary.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/streaming", get(streaming_handler))
        .nest("/api", router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state)
}
