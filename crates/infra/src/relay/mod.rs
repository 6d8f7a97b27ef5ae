//! Event relay consumers.
//!
//! The stores never call each other. Two workers carry the workflow forward:
//!
//! ```text
//! appointment.completed   ──► OrderStore::on_appointment_completed
//! order.ready_for_billing ──► InvoiceStore::on_order_ready_for_billing
//! ```

pub mod handlers;
pub mod worker;

use std::io;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use torque_events::{EventBus, EventEnvelope, TopicFilter};
use torque_orders::topics as order_topics;
use torque_scheduling::topics as appointment_topics;

use crate::config::RelayRetry;
use crate::event_store::EventStore;
use crate::stores::{InvoiceStore, OrderStore};

pub use worker::{RelayWorker, WorkerHandle};

pub const ORDER_RELAY: &str = "relay-orders";
pub const BILLING_RELAY: &str = "relay-billing";

/// Running relay workers.
#[derive(Debug)]
pub struct RelayHandles {
    workers: Vec<WorkerHandle>,
}

impl RelayHandles {
    pub fn names(&self) -> Vec<&'static str> {
        self.workers.iter().map(WorkerHandle::name).collect()
    }

    /// Stop every worker and wait for them.
    pub fn shutdown(self) {
        for worker in self.workers {
            worker.shutdown();
        }
    }
}

/// Subscribe the Order and Invoice stores to the relay.
pub fn spawn_relay<S, B>(
    bus: &B,
    orders: Arc<OrderStore<S, B>>,
    invoices: Arc<InvoiceStore<S, B>>,
    retry: RelayRetry,
) -> io::Result<RelayHandles>
where
    S: EventStore + 'static,
    B: EventBus<EventEnvelope<JsonValue>> + 'static,
{
    let order_worker = RelayWorker::spawn(
        ORDER_RELAY,
        bus,
        TopicFilter::new([appointment_topics::COMPLETED]),
        retry,
        move |envelope: &EventEnvelope<JsonValue>| handlers::appointment_completed(&orders, envelope),
    )?;

    let billing_worker = match RelayWorker::spawn(
        BILLING_RELAY,
        bus,
        TopicFilter::new([order_topics::READY_FOR_BILLING]),
        retry,
        move |envelope: &EventEnvelope<JsonValue>| handlers::order_ready_for_billing(&invoices, envelope),
    ) {
        Ok(worker) => worker,
        Err(err) => {
            order_worker.shutdown();
            return Err(err);
        }
    };

    Ok(RelayHandles {
        workers: vec![order_worker, billing_worker],
    })
}
