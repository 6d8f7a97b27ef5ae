//! Invoicing and payments domain module (event-sourced).
//!
//! Invoices created once from an order's billing snapshot, payments applied
//! against them, and the paid-in-full rule. Pure domain logic (no IO, no HTTP,
//! no storage).

pub mod invoice;
pub mod number;
pub mod payment;

pub use invoice::{
    Invoice, InvoiceCommand, InvoiceEvent, InvoiceId, InvoiceIssued, InvoiceLineItem, InvoicePaid,
    InvoiceStatus, InvoiceVoided, IssueInvoice, PaymentRegistered, PaymentStatusChanged,
    RegisterPayment, UpdateInvoiceStatus, UpdatePaymentStatus, topics,
};
pub use number::{InvoiceNumber, InvoiceNumberGenerator};
pub use payment::{Payment, PaymentId, PaymentMethod, PaymentStatus};
