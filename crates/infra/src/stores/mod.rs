//! The three stores of the workflow engine.
//!
//! Each store is the only writer of its aggregate streams. Stores talk to each
//! other exclusively through relay events (see `crate::relay`); synchronous
//! calls go only to external collaborators.

pub mod appointments;
pub mod invoices;
pub mod orders;

use std::sync::{Mutex, MutexGuard};

use crate::command_dispatcher::DispatchError;
use crate::event_store::EventStoreError;

pub use appointments::{AppointmentFilter, AppointmentStore, NewAppointment, SchedulingSettings};
pub use invoices::{InvoiceFilter, InvoiceStore, NewInvoice, NewPayment, PaymentFilter, PaymentRecord};
pub use orders::{NewOrder, OrderFilter, OrderStore, ServiceLineDraft};

/// Result type of every store operation.
pub type StoreResult<T> = Result<T, DispatchError>;

pub const APPOINTMENT_AGGREGATE: &str = "scheduling.appointment";
pub const ORDER_AGGREGATE: &str = "orders.repair_order";
pub const INVOICE_AGGREGATE: &str = "billing.invoice";

fn lock<'a>(mutex: &'a Mutex<()>, what: &str) -> StoreResult<MutexGuard<'a, ()>> {
    mutex
        .lock()
        .map_err(|_| DispatchError::Store(EventStoreError::Unavailable(format!("{what} lock poisoned"))))
}
