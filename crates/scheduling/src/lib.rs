//! Appointment scheduling domain module (event-sourced).
//!
//! Booking records, their status lifecycle, scheduling conflict detection and
//! the availability grid, implemented purely as deterministic domain logic (no
//! IO, no HTTP, no storage).

pub mod appointment;
pub mod availability;
pub mod conflict;

pub use appointment::{
    Appointment, AppointmentBooked, AppointmentCancelled, AppointmentCommand, AppointmentCompleted,
    AppointmentConfirmed, AppointmentEvent, AppointmentId, AppointmentPatch, AppointmentStatus,
    AppointmentUpdated, BookAppointment, MAX_REASON_LEN, Schedule, ServiceSnapshot,
    TransitionAppointment, UpdateAppointment, topics,
};
pub use availability::{BusinessHours, DayAvailability, Slot, availability};
pub use conflict::{ConflictQuery, TimeInterval, has_conflict};
