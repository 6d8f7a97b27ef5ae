use axum::Router;

pub mod appointments;
pub mod bookings;
pub mod invoices;
pub mod orders;
pub mod payments;
pub mod system;

/// Router for the store endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/appointments", appointments::router())
        .nest("/bookings", bookings::router())
        .nest("/orders", orders::router())
        .nest("/invoices", invoices::router())
        .nest("/payments", payments::router())
}
