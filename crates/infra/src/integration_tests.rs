//! Integration tests for the full workflow.
//!
//! Tests: Appointment → relay → Order → relay → Invoice → Payments
//!
//! Verifies:
//! - A completed appointment yields exactly one order, a finalized order
//!   exactly one invoice
//! - Relay outages never roll back the local transition
//! - The double-booking rule holds for any booking sequence

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
    use proptest::prelude::*;
    use uuid::Uuid;

    use torque_billing::{InvoiceId, InvoiceStatus, PaymentMethod};
    use torque_core::{CatalogServiceId, CustomerId, FixedClock, Money, SiteId, VehicleId};
    use torque_events::{EventBus, Topical};
    use torque_orders::{OrderStatus, RepairOrder, RepairOrderId, ServiceLineStatus};
    use torque_scheduling::{Appointment, AppointmentStatus, TimeInterval};

    use crate::command_dispatcher::DispatchError;
    use crate::config::{EngineConfig, RelayRetry};
    use crate::engine::{Engine, InMemoryCollaborators};
    use crate::event_store::EventStore;
    use crate::external::CatalogEntry;
    use crate::stores::{AppointmentFilter, InvoiceFilter, NewAppointment, NewPayment, OrderFilter};

    fn test_service() -> CatalogServiceId {
        CatalogServiceId::from_uuid(Uuid::from_u128(0x0b1))
    }

    fn test_day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 1, 7).unwrap()
    }

    fn setup() -> (Engine, InMemoryCollaborators) {
        let collaborators = InMemoryCollaborators::new();
        collaborators.catalog.insert(CatalogEntry {
            service_id: test_service(),
            name: "Brake inspection".to_string(),
            price: Money::from_cents(84_034),
        });
        let config = EngineConfig {
            relay_retry: RelayRetry {
                attempts: 5,
                backoff_ms: 5,
            },
            ..EngineConfig::default()
        };
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2030, 1, 6, 12, 0, 0).unwrap()));
        let engine = Engine::start_with_clock(config, collaborators.collaborators(), clock).unwrap();
        (engine, collaborators)
    }

    fn booking(site: SiteId, hour: u32, minute: u32, duration: u32) -> NewAppointment {
        NewAppointment {
            customer_id: CustomerId::new(),
            vehicle_id: VehicleId::new(),
            mechanic_id: None,
            site_id: Some(site),
            service_id: test_service(),
            date: test_day(),
            time: NaiveTime::from_hms_opt(hour, minute, 0).unwrap(),
            duration_minutes: duration,
            reason: "squeaking brakes".to_string(),
        }
    }

    fn wait_for<T>(mut poll: impl FnMut() -> Option<T>) -> Option<T> {
        for _ in 0..300 {
            if let Some(v) = poll() {
                return Some(v);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        None
    }

    fn complete(engine: &Engine, appointment: &Appointment) -> RepairOrder {
        let appointments = engine.appointments();
        appointments.confirm(appointment.id_typed()).unwrap();
        appointments.complete(appointment.id_typed()).unwrap();

        let order_id = RepairOrderId::for_appointment(appointment.id_typed());
        wait_for(|| engine.orders().get(order_id).ok()).expect("order materialized from completed appointment")
    }

    #[test]
    fn appointment_to_paid_invoice() {
        let (engine, _) = setup();
        let appointment = engine.appointments().create(booking(SiteId::new(), 9, 0, 60)).unwrap();

        let order = complete(&engine, &appointment);
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.customer_id(), appointment.customer_id());
        assert_eq!(order.lines().len(), 1);
        assert_eq!(order.lines()[0].labor_cost, Money::from_cents(84_034));

        let line = order.lines()[0].id;
        engine
            .orders()
            .transition_service_line(order.id_typed(), line, ServiceLineStatus::InProgress)
            .unwrap();
        let order = engine
            .orders()
            .transition_service_line(order.id_typed(), line, ServiceLineStatus::Completed)
            .unwrap();
        assert_eq!(order.status(), OrderStatus::Finalized);

        let invoice_id = InvoiceId::for_order(order.id_typed());
        let invoice = wait_for(|| engine.invoices().get(invoice_id).ok()).expect("invoice issued from billing snapshot");
        assert_eq!(invoice.status(), InvoiceStatus::Pending);
        assert_eq!(invoice.totals().subtotal, order.cost().unwrap().subtotal);
        assert_eq!(invoice.totals().total, Money::from_cents(100_000));

        let pay = |cents| NewPayment {
            amount: Money::from_cents(cents),
            method: PaymentMethod::Card,
            reference: None,
            awaiting_confirmation: false,
        };
        let (invoice, _) = engine.invoices().register_payment(invoice_id, pay(40_000)).unwrap();
        assert_eq!(invoice.remaining(), Money::from_cents(60_000));
        let (invoice, _) = engine.invoices().register_payment(invoice_id, pay(60_000)).unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Paid);

        assert_eq!(engine.orders().deliver(order.id_typed()).unwrap().status(), OrderStatus::Delivered);
        engine.shutdown();
    }

    #[test]
    fn duplicate_completion_events_create_one_order() {
        let (engine, _) = setup();
        let appointment = engine.appointments().create(booking(SiteId::new(), 10, 0, 30)).unwrap();
        complete(&engine, &appointment);

        // Replay every stored appointment event onto the relay.
        let history = engine
            .dispatcher()
            .store()
            .load_stream(appointment.id_typed().0)
            .unwrap();
        for stored in &history {
            engine.bus().publish(stored.to_envelope()).unwrap();
        }
        std::thread::sleep(Duration::from_millis(100));

        let orders = engine.orders().list(&OrderFilter {
            customer_id: Some(appointment.customer_id()),
            ..OrderFilter::default()
        });
        assert_eq!(orders.len(), 1);
    }

    #[test]
    fn staff_created_order_is_invoiced_on_finalize() {
        let (engine, _) = setup();
        let order = engine
            .orders()
            .create(crate::stores::NewOrder {
                appointment_id: None,
                customer_id: CustomerId::new(),
                vehicle_id: VehicleId::new(),
                mechanic_id: None,
                diagnosis: "walk-in".to_string(),
                estimated_completion: None,
                lines: vec![crate::stores::ServiceLineDraft {
                    kind: "mechanical".to_string(),
                    name: "Battery swap".to_string(),
                    description: String::new(),
                    labor_cost: Money::from_cents(10_000),
                    estimated_minutes: 30,
                }],
            })
            .unwrap();
        engine.orders().start(order.id_typed()).unwrap();
        engine.orders().finalize(order.id_typed()).unwrap();

        let invoice = wait_for(|| engine.invoices().get(InvoiceId::for_order(order.id_typed())).ok())
            .expect("invoice issued");
        assert_eq!(invoice.customer_id(), order.customer_id());
        assert_eq!(engine.invoices().list(&InvoiceFilter::default()).len(), 1);
    }

    #[test]
    fn relay_outage_keeps_local_transition() {
        let (engine, _) = setup();
        let appointment = engine.appointments().create(booking(SiteId::new(), 11, 0, 30)).unwrap();
        engine.appointments().confirm(appointment.id_typed()).unwrap();

        engine.bus().set_reachable(false);
        let completed = engine.appointments().complete(appointment.id_typed()).unwrap();
        assert_eq!(completed.status(), AppointmentStatus::Completed);

        std::thread::sleep(Duration::from_millis(100));
        let order_id = RepairOrderId::for_appointment(appointment.id_typed());
        assert!(engine.orders().get(order_id).unwrap_err().is_not_found());
        assert_eq!(
            engine.appointments().get(appointment.id_typed()).unwrap().status(),
            AppointmentStatus::Completed
        );
    }

    #[test]
    fn relay_delivers_only_after_subscription() {
        let (engine, _) = setup();
        let sub = engine.bus().subscribe();
        engine.appointments().create(booking(SiteId::new(), 14, 0, 30)).unwrap();

        let envelope = sub.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(envelope.topic(), torque_scheduling::topics::CREATED);
    }

    #[test]
    fn conflicting_booking_is_rejected_end_to_end() {
        let (engine, _) = setup();
        let site = SiteId::new();
        engine.appointments().create(booking(site, 9, 0, 60)).unwrap();

        match engine.appointments().create(booking(site, 9, 30, 30)).unwrap_err() {
            DispatchError::Domain(torque_core::DomainError::Conflict(_)) => {}
            other => panic!("Expected Conflict, got {other:?}"),
        }
        engine.appointments().create(booking(SiteId::new(), 9, 30, 30)).unwrap();
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]

        #[test]
        fn active_appointments_never_overlap(
            requests in prop::collection::vec((8u32..17, prop::sample::select(vec![0u32, 15, 30, 45]), 15u32..120), 1..12)
        ) {
            let (engine, _) = setup();
            let site = SiteId::new();

            for (hour, minute, duration) in requests {
                let _ = engine.appointments().create(booking(site, hour, minute, duration));
            }

            let active: Vec<TimeInterval> = engine
                .appointments()
                .list(&AppointmentFilter { date: Some(test_day()), ..AppointmentFilter::default() })
                .into_iter()
                .filter(|a| a.status().is_active())
                .map(|a| a.schedule().interval().unwrap())
                .collect();

            for (i, a) in active.iter().enumerate() {
                for b in active.iter().skip(i + 1) {
                    prop_assert!(!a.overlaps(b));
                }
            }
        }
    }
}
