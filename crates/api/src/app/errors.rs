use std::str::FromStr;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use torque_core::DomainError;
use torque_infra::command_dispatcher::DispatchError;

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Domain(e) => domain_error_to_response(e),
        DispatchError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::DependencyUnavailable(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "dependency_unavailable", msg)
        }
        DispatchError::Deserialize(msg) => {
            tracing::error!(error = %msg, "stored event could not be decoded");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        DispatchError::Store(e) => {
            tracing::error!(error = %e, "event store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        DomainError::Validation(_) => json_error(StatusCode::BAD_REQUEST, "validation_error", message),
        DomainError::InvalidId(_) => json_error(StatusCode::BAD_REQUEST, "invalid_id", message),
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", message),
        DomainError::Conflict(_) => json_error(StatusCode::CONFLICT, "conflict", message),
        DomainError::InvalidTransition { .. } => json_error(StatusCode::CONFLICT, "invalid_transition", message),
        DomainError::InvariantViolation(_) => json_error(StatusCode::CONFLICT, "invariant_violation", message),
        DomainError::InsufficientBalance { .. } => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "insufficient_balance", message)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path id, answering 400 on garbage.
pub fn parse_id<T>(raw: &str, what: &str) -> Result<T, axum::response::Response>
where
    T: FromStr,
{
    raw.parse::<T>()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id")))
}
