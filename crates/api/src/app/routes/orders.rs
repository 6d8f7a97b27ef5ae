use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};

use torque_core::{AggregateId, MechanicId, VehicleId};
use torque_infra::engine::Engine;
use torque_infra::stores::{NewOrder, OrderFilter, StoreResult};
use torque_orders::{OrderPatch, RepairOrder, RepairOrderId, ServiceLineId};

use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/by-mechanic/:mechanic_id", get(orders_by_mechanic))
        .route("/by-vehicle/:vehicle_id", get(orders_by_vehicle))
        .route("/:id", get(get_order).patch(update_order))
        .route("/:id/status", put(set_order_status))
        .route("/:id/diagnosis", put(set_diagnosis))
        .route("/:id/mechanic", put(assign_mechanic))
        .route("/:id/cost", get(order_cost))
        .route("/:id/finalize", post(finalize_order))
        .route("/:id/deliver", post(deliver_order))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/lines", post(add_line))
        .route("/:id/lines/:line_id", axum::routing::patch(update_line).delete(remove_line))
        .route("/:id/lines/:line_id/status", put(set_line_status))
        .route("/:id/lines/:line_id/parts", post(add_part_usage))
}

fn order_id(raw: &str) -> Result<RepairOrderId, axum::response::Response> {
    errors::parse_id::<AggregateId>(raw, "order").map(RepairOrderId::new)
}

fn line_id(raw: &str) -> Result<ServiceLineId, axum::response::Response> {
    errors::parse_id::<AggregateId>(raw, "service line").map(ServiceLineId::new)
}

fn order_response(result: StoreResult<RepairOrder>) -> axum::response::Response {
    match result {
        Ok(o) => (StatusCode::OK, Json(dto::order_to_json(&o))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

fn list_response(orders: &[RepairOrder]) -> axum::response::Response {
    let items = orders.iter().map(dto::order_to_json).collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn create_order(
    Extension(engine): Extension<Arc<Engine>>,
    Json(body): Json<dto::CreateOrderRequest>,
) -> axum::response::Response {
    let lines = match body.lines.into_iter().map(dto::ServiceLineRequest::into_draft).collect::<Result<Vec<_>, _>>() {
        Ok(v) => v,
        Err(msg) => return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
    };
    let request = NewOrder {
        appointment_id: body.appointment_id,
        customer_id: body.customer_id,
        vehicle_id: body.vehicle_id,
        mechanic_id: body.mechanic_id,
        diagnosis: body.diagnosis,
        estimated_completion: body.estimated_completion,
        lines,
    };
    match engine.orders().create(request) {
        Ok(o) => (StatusCode::CREATED, Json(dto::order_to_json(&o))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn list_orders(
    Extension(engine): Extension<Arc<Engine>>,
    Query(filter): Query<OrderFilter>,
) -> axum::response::Response {
    list_response(&engine.orders().list(&filter))
}

pub async fn orders_by_mechanic(
    Extension(engine): Extension<Arc<Engine>>,
    Path(mechanic_id): Path<String>,
) -> axum::response::Response {
    let mechanic_id = match errors::parse_id::<MechanicId>(&mechanic_id, "mechanic") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    list_response(&engine.orders().by_mechanic(mechanic_id))
}

pub async fn orders_by_vehicle(
    Extension(engine): Extension<Arc<Engine>>,
    Path(vehicle_id): Path<String>,
) -> axum::response::Response {
    let vehicle_id = match errors::parse_id::<VehicleId>(&vehicle_id, "vehicle") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    list_response(&engine.orders().by_vehicle(vehicle_id))
}

pub async fn get_order(
    Extension(engine): Extension<Arc<Engine>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match order_id(&id) {
        Ok(id) => order_response(engine.orders().get(id)),
        Err(resp) => resp,
    }
}

pub async fn update_order(
    Extension(engine): Extension<Arc<Engine>>,
    Path(id): Path<String>,
    Json(patch): Json<OrderPatch>,
) -> axum::response::Response {
    match order_id(&id) {
        Ok(id) => order_response(engine.orders().update(id, patch)),
        Err(resp) => resp,
    }
}

pub async fn set_order_status(
    Extension(engine): Extension<Arc<Engine>>,
    Path(id): Path<String>,
    Json(body): Json<dto::OrderStatusRequest>,
) -> axum::response::Response {
    match order_id(&id) {
        Ok(id) => order_response(engine.orders().transition(id, body.status, body.reason)),
        Err(resp) => resp,
    }
}

pub async fn set_diagnosis(
    Extension(engine): Extension<Arc<Engine>>,
    Path(id): Path<String>,
    Json(body): Json<dto::DiagnosisRequest>,
) -> axum::response::Response {
    match order_id(&id) {
        Ok(id) => order_response(engine.orders().update_diagnosis(id, body.diagnosis)),
        Err(resp) => resp,
    }
}

pub async fn assign_mechanic(
    Extension(engine): Extension<Arc<Engine>>,
    Path(id): Path<String>,
    Json(body): Json<dto::MechanicRequest>,
) -> axum::response::Response {
    match order_id(&id) {
        Ok(id) => order_response(engine.orders().assign_mechanic(id, body.mechanic_id)),
        Err(resp) => resp,
    }
}

pub async fn order_cost(
    Extension(engine): Extension<Arc<Engine>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match engine.orders().compute_cost(id) {
        Ok(cost) => (StatusCode::OK, Json(dto::cost_to_json(&cost))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn finalize_order(
    Extension(engine): Extension<Arc<Engine>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match order_id(&id) {
        Ok(id) => order_response(engine.orders().finalize(id)),
        Err(resp) => resp,
    }
}

pub async fn deliver_order(
    Extension(engine): Extension<Arc<Engine>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match order_id(&id) {
        Ok(id) => order_response(engine.orders().deliver(id)),
        Err(resp) => resp,
    }
}

pub async fn cancel_order(
    Extension(engine): Extension<Arc<Engine>>,
    Path(id): Path<String>,
    body: Option<Json<dto::ReasonRequest>>,
) -> axum::response::Response {
    let reason = body.and_then(|Json(b)| b.reason);
    match order_id(&id) {
        Ok(id) => order_response(engine.orders().cancel(id, reason)),
        Err(resp) => resp,
    }
}

pub async fn add_line(
    Extension(engine): Extension<Arc<Engine>>,
    Path(id): Path<String>,
    Json(body): Json<dto::ServiceLineRequest>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let draft = match body.into_draft() {
        Ok(d) => d,
        Err(msg) => return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
    };
    match engine.orders().add_service_line(id, draft) {
        Ok(o) => (StatusCode::CREATED, Json(dto::order_to_json(&o))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn update_line(
    Extension(engine): Extension<Arc<Engine>>,
    Path((id, line)): Path<(String, String)>,
    Json(body): Json<dto::UpdateServiceLineRequest>,
) -> axum::response::Response {
    let (id, line) = match (order_id(&id), line_id(&line)) {
        (Ok(id), Ok(line)) => (id, line),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    let patch = match body.into_patch() {
        Ok(p) => p,
        Err(msg) => return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
    };
    order_response(engine.orders().update_service_line(id, line, patch))
}

pub async fn remove_line(
    Extension(engine): Extension<Arc<Engine>>,
    Path((id, line)): Path<(String, String)>,
) -> axum::response::Response {
    match (order_id(&id), line_id(&line)) {
        (Ok(id), Ok(line)) => order_response(engine.orders().remove_service_line(id, line)),
        (Err(resp), _) | (_, Err(resp)) => resp,
    }
}

pub async fn set_line_status(
    Extension(engine): Extension<Arc<Engine>>,
    Path((id, line)): Path<(String, String)>,
    Json(body): Json<dto::LineStatusRequest>,
) -> axum::response::Response {
    match (order_id(&id), line_id(&line)) {
        (Ok(id), Ok(line)) => order_response(engine.orders().transition_service_line(id, line, body.status)),
        (Err(resp), _) | (_, Err(resp)) => resp,
    }
}

pub async fn add_part_usage(
    Extension(engine): Extension<Arc<Engine>>,
    Path((id, line)): Path<(String, String)>,
    Json(body): Json<dto::PartUsageRequest>,
) -> axum::response::Response {
    let (id, line) = match (order_id(&id), line_id(&line)) {
        (Ok(id), Ok(line)) => (id, line),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    match engine
        .orders()
        .add_part_usage(id, line, body.part_id, body.quantity, body.unit_price)
    {
        Ok(o) => (StatusCode::CREATED, Json(dto::order_to_json(&o))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
