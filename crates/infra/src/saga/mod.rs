//! Multi-step workflows spanning a store and external collaborators.

pub mod booking;

pub use booking::{BookingOrchestrator, BookingOutcome, BookingRequest, CustomerRef, VehicleRef};
