//! HTTP API application wiring (Axum router + engine wiring).
//!
//! - `services.rs`: engine wiring (stores, relay, collaborators)
//! - `routes/`: HTTP routes + handlers (one file per store)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use torque_infra::engine::Engine;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(ServiceBuilder::new().layer(Extension(engine)))
}
