use std::sync::Arc;

use axum::{Json, extract::Extension, response::IntoResponse};

use torque_infra::engine::Engine;

pub async fn health(Extension(engine): Extension<Arc<Engine>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "relay_subscribers": engine.bus().subscriber_count(),
    }))
}
