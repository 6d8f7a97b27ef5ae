//! Relay handlers: decode a published envelope and call the consuming store.

use serde_json::Value as JsonValue;
use tracing::debug;

use torque_events::{EventBus, EventEnvelope, Topical};
use torque_orders::RepairOrderEvent;
use torque_scheduling::AppointmentEvent;

use crate::command_dispatcher::DispatchError;
use crate::event_store::EventStore;
use crate::stores::{InvoiceStore, OrderStore};

fn decode<T: serde::de::DeserializeOwned>(envelope: &EventEnvelope<JsonValue>) -> Result<T, DispatchError> {
    envelope.decode::<T>().map_err(|e| {
        DispatchError::Deserialize(format!("{} #{}: {e}", envelope.topic(), envelope.sequence_number()))
    })
}

/// `appointment.completed` → Order Store.
pub fn appointment_completed<S, B>(
    orders: &OrderStore<S, B>,
    envelope: &EventEnvelope<JsonValue>,
) -> Result<(), DispatchError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    match decode::<AppointmentEvent>(envelope)? {
        AppointmentEvent::AppointmentCompleted(event) => {
            orders.on_appointment_completed(&event)?;
        }
        other => {
            debug!(topic = envelope.topic(), event = ?other, "ignored by order relay");
        }
    }
    Ok(())
}

/// `order.ready_for_billing` → Invoice Store.
pub fn order_ready_for_billing<S, B>(
    invoices: &InvoiceStore<S, B>,
    envelope: &EventEnvelope<JsonValue>,
) -> Result<(), DispatchError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    match decode::<RepairOrderEvent>(envelope)? {
        RepairOrderEvent::OrderReadyForBilling(event) => {
            invoices.on_order_ready_for_billing(&event)?;
        }
        other => {
            debug!(topic = envelope.topic(), event = ?other, "ignored by billing relay");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::json;
    use torque_core::{AggregateId, SystemClock};
    use torque_events::InMemoryEventBus;
    use uuid::Uuid;

    use crate::command_dispatcher::CommandDispatcher;
    use crate::event_store::InMemoryEventStore;
    use crate::external::InMemoryPartsInventory;

    type TestBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    fn envelope(topic: &str, payload: JsonValue) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            AggregateId::new(),
            "test".to_string(),
            1,
            topic.to_string(),
            Utc::now(),
            payload,
        )
    }

    fn dispatcher() -> Arc<CommandDispatcher<Arc<InMemoryEventStore>, TestBus>> {
        Arc::new(CommandDispatcher::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
        ))
    }

    #[test]
    fn undecodable_payload_is_a_deserialize_error() {
        let orders = OrderStore::new(dispatcher(), Arc::new(SystemClock), Arc::new(InMemoryPartsInventory::new()));
        let err = appointment_completed(&orders, &envelope("appointment.completed", json!({"nope": 1})))
            .unwrap_err();
        match err {
            DispatchError::Deserialize(msg) => assert!(msg.contains("appointment.completed")),
            other => panic!("Expected Deserialize, got {other:?}"),
        }
    }

    #[test]
    fn undecodable_billing_payload_is_a_deserialize_error() {
        let invoices = InvoiceStore::new(dispatcher(), Arc::new(SystemClock));
        let err = order_ready_for_billing(&invoices, &envelope("order.ready_for_billing", json!(null)))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Deserialize(_)));
        assert!(invoices.list(&Default::default()).is_empty());
    }
}
