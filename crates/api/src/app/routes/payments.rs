use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
};

use torque_billing::PaymentId;
use torque_core::AggregateId;
use torque_infra::engine::Engine;
use torque_infra::stores::{PaymentFilter, PaymentRecord};

use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_payments))
        .route("/:id", get(get_payment))
        .route("/:id/status", put(set_payment_status))
}

fn payment_id(raw: &str) -> Result<PaymentId, axum::response::Response> {
    errors::parse_id::<AggregateId>(raw, "payment").map(PaymentId::new)
}

pub async fn list_payments(
    Extension(engine): Extension<Arc<Engine>>,
    Query(filter): Query<PaymentFilter>,
) -> axum::response::Response {
    let items = engine
        .invoices()
        .list_payments(&filter)
        .iter()
        .map(dto::payment_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn get_payment(
    Extension(engine): Extension<Arc<Engine>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match payment_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match engine.invoices().get_payment(id) {
        Ok(r) => (StatusCode::OK, Json(dto::payment_to_json(&r))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

/// Approving or rejecting a payment re-derives the invoice status.
pub async fn set_payment_status(
    Extension(engine): Extension<Arc<Engine>>,
    Path(id): Path<String>,
    Json(body): Json<dto::PaymentStatusRequest>,
) -> axum::response::Response {
    let id = match payment_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match engine.invoices().update_payment_status(id, body.status) {
        Ok((invoice, payment)) => {
            let record = PaymentRecord {
                invoice_id: invoice.id_typed(),
                payment,
            };
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "payment": dto::payment_to_json(&record),
                    "invoice": dto::invoice_to_json(&invoice),
                })),
            )
                .into_response()
        }
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
