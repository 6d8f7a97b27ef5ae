use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::NaiveDate;

use torque_core::AggregateId;
use torque_infra::engine::Engine;
use torque_infra::stores::{AppointmentFilter, NewAppointment};
use torque_scheduling::{AppointmentId, AppointmentPatch};

use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_appointment).get(list_appointments))
        .route("/range", get(appointments_in_range))
        .route("/availability/:date", get(availability))
        .route("/:id", get(get_appointment).patch(update_appointment))
        .route("/:id/confirm", post(confirm_appointment))
        .route("/:id/cancel", post(cancel_appointment))
        .route("/:id/complete", post(complete_appointment))
}

fn appointment_id(raw: &str) -> Result<AppointmentId, axum::response::Response> {
    errors::parse_id::<AggregateId>(raw, "appointment").map(AppointmentId::new)
}

pub async fn create_appointment(
    Extension(engine): Extension<Arc<Engine>>,
    Json(body): Json<NewAppointment>,
) -> axum::response::Response {
    match engine.appointments().create(body) {
        Ok(a) => (StatusCode::CREATED, Json(dto::appointment_to_json(&a))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn list_appointments(
    Extension(engine): Extension<Arc<Engine>>,
    Query(filter): Query<AppointmentFilter>,
) -> axum::response::Response {
    let items = engine
        .appointments()
        .list(&filter)
        .iter()
        .map(dto::appointment_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn appointments_in_range(
    Extension(engine): Extension<Arc<Engine>>,
    Query(range): Query<dto::RangeQuery>,
) -> axum::response::Response {
    match engine.appointments().range(range.from, range.to) {
        Ok(list) => {
            let items = list.iter().map(dto::appointment_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn availability(
    Extension(engine): Extension<Arc<Engine>>,
    Path(date): Path<String>,
    Query(query): Query<dto::AvailabilityQuery>,
) -> axum::response::Response {
    let date = match NaiveDate::parse_from_str(&date, "%Y-%m-%d") {
        Ok(d) => d,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_date", "date must be YYYY-MM-DD"),
    };
    let day = engine.appointments().availability(date, query.site_id);
    (StatusCode::OK, Json(day)).into_response()
}

pub async fn get_appointment(
    Extension(engine): Extension<Arc<Engine>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match appointment_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match engine.appointments().get(id) {
        Ok(a) => (StatusCode::OK, Json(dto::appointment_to_json(&a))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn update_appointment(
    Extension(engine): Extension<Arc<Engine>>,
    Path(id): Path<String>,
    Json(patch): Json<AppointmentPatch>,
) -> axum::response::Response {
    let id = match appointment_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match engine.appointments().update(id, patch) {
        Ok(a) => (StatusCode::OK, Json(dto::appointment_to_json(&a))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn confirm_appointment(
    Extension(engine): Extension<Arc<Engine>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match appointment_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match engine.appointments().confirm(id) {
        Ok(a) => (StatusCode::OK, Json(dto::appointment_to_json(&a))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn cancel_appointment(
    Extension(engine): Extension<Arc<Engine>>,
    Path(id): Path<String>,
    body: Option<Json<dto::NoteRequest>>,
) -> axum::response::Response {
    let id = match appointment_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let note = body.and_then(|Json(b)| b.note);
    match engine.appointments().cancel(id, note) {
        Ok(a) => (StatusCode::OK, Json(dto::appointment_to_json(&a))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn complete_appointment(
    Extension(engine): Extension<Arc<Engine>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match appointment_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match engine.appointments().complete(id) {
        Ok(a) => (StatusCode::OK, Json(dto::appointment_to_json(&a))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
