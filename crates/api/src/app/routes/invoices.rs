use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};

use torque_billing::InvoiceId;
use torque_core::{AggregateId, CustomerId};
use torque_infra::engine::Engine;
use torque_infra::stores::{InvoiceFilter, NewInvoice, NewPayment, PaymentFilter, PaymentRecord};

use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_invoice).get(list_invoices))
        .route("/by-customer/:customer_id", get(invoices_by_customer))
        .route("/:id", get(get_invoice))
        .route("/:id/status", put(set_invoice_status))
        .route("/:id/payments", post(register_payment).get(invoice_payments))
}

fn invoice_id(raw: &str) -> Result<InvoiceId, axum::response::Response> {
    errors::parse_id::<AggregateId>(raw, "invoice").map(InvoiceId::new)
}

pub async fn create_invoice(
    Extension(engine): Extension<Arc<Engine>>,
    Json(body): Json<NewInvoice>,
) -> axum::response::Response {
    match engine.invoices().create_invoice(body) {
        Ok(i) => (StatusCode::CREATED, Json(dto::invoice_to_json(&i))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn list_invoices(
    Extension(engine): Extension<Arc<Engine>>,
    Query(filter): Query<InvoiceFilter>,
) -> axum::response::Response {
    let items = engine
        .invoices()
        .list(&filter)
        .iter()
        .map(dto::invoice_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn invoices_by_customer(
    Extension(engine): Extension<Arc<Engine>>,
    Path(customer_id): Path<String>,
) -> axum::response::Response {
    let customer_id = match errors::parse_id::<CustomerId>(&customer_id, "customer") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let items = engine
        .invoices()
        .by_customer(customer_id)
        .iter()
        .map(dto::invoice_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn get_invoice(
    Extension(engine): Extension<Arc<Engine>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match engine.invoices().get(id) {
        Ok(i) => (StatusCode::OK, Json(dto::invoice_to_json(&i))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

/// Only voiding is accepted; PAID follows from approved payments.
pub async fn set_invoice_status(
    Extension(engine): Extension<Arc<Engine>>,
    Path(id): Path<String>,
    Json(body): Json<dto::InvoiceStatusRequest>,
) -> axum::response::Response {
    let id = match invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match engine.invoices().update_invoice_status(id, body.status, body.reason) {
        Ok(i) => (StatusCode::OK, Json(dto::invoice_to_json(&i))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn register_payment(
    Extension(engine): Extension<Arc<Engine>>,
    Path(id): Path<String>,
    Json(body): Json<NewPayment>,
) -> axum::response::Response {
    let id = match invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match engine.invoices().register_payment(id, body) {
        Ok((invoice, payment)) => {
            let record = PaymentRecord { invoice_id: id, payment };
            (
                StatusCode::CREATED,
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

pub async fn invoice_payments(
    Extension(engine): Extension<Arc<Engine>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(e) = engine.invoices().get(id) {
        return errors::dispatch_error_to_response(e);
    }
    let filter = PaymentFilter {
        invoice_id: Some(id),
        ..PaymentFilter::default()
    };
    let items = engine
        .invoices()
        .list_payments(&filter)
        .iter()
        .map(dto::payment_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}
