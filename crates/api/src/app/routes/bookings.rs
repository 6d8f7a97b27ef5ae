use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};

use torque_infra::engine::Engine;
use torque_infra::saga::BookingRequest;

use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/", post(book))
}

/// Register customer and vehicle when new, then book; undone on failure.
pub async fn book(
    Extension(engine): Extension<Arc<Engine>>,
    Json(body): Json<BookingRequest>,
) -> axum::response::Response {
    match engine.booking().book(body) {
        Ok(outcome) => (StatusCode::CREATED, Json(dto::booking_to_json(&outcome))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
