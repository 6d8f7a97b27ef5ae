//! Booking orchestration: register customer → register vehicle → book.
//!
//! Each step that creates something in the registry has an inverse. When a
//! later step fails, what this booking created is removed again in reverse
//! order. Nothing pre-existing is ever touched.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use torque_core::{CatalogServiceId, CustomerId, DomainError, MechanicId, SiteId, VehicleId};
use torque_events::{EventBus, EventEnvelope};
use torque_scheduling::Appointment;

use crate::command_dispatcher::DispatchError;
use crate::event_store::EventStore;
use crate::external::{CollaboratorError, CustomerRegistry, NewCustomer, NewVehicle};
use crate::stores::{AppointmentStore, NewAppointment, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerRef {
    Existing(CustomerId),
    New(NewCustomer),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleRef {
    Existing(VehicleId),
    New(NewVehicle),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub customer: CustomerRef,
    pub vehicle: VehicleRef,
    #[serde(default)]
    pub mechanic_id: Option<MechanicId>,
    #[serde(default)]
    pub site_id: Option<SiteId>,
    pub service_id: CatalogServiceId,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: u32,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingOutcome {
    pub appointment: Appointment,
    pub customer_id: CustomerId,
    pub vehicle_id: VehicleId,
    pub created_customer: bool,
    pub created_vehicle: bool,
}

/// Something created during a booking that must be undone on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Created {
    Customer(CustomerId),
    Vehicle(VehicleId),
}

pub struct BookingOrchestrator<S, B> {
    registry: Arc<dyn CustomerRegistry>,
    appointments: Arc<AppointmentStore<S, B>>,
}

impl<S, B> BookingOrchestrator<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(registry: Arc<dyn CustomerRegistry>, appointments: Arc<AppointmentStore<S, B>>) -> Self {
        Self {
            registry,
            appointments,
        }
    }

    pub fn book(&self, request: BookingRequest) -> StoreResult<BookingOutcome> {
        let mut created: Vec<Created> = Vec::new();

        match self.run(request, &mut created) {
            Ok(outcome) => {
                info!(
                    appointment_id = %outcome.appointment.id_typed(),
                    customer_id = %outcome.customer_id,
                    vehicle_id = %outcome.vehicle_id,
                    created_customer = outcome.created_customer,
                    created_vehicle = outcome.created_vehicle,
                    "booking completed"
                );
                Ok(outcome)
            }
            Err(err) => {
                self.compensate(&created);
                Err(err)
            }
        }
    }

    fn run(&self, request: BookingRequest, created: &mut Vec<Created>) -> StoreResult<BookingOutcome> {
        let (customer_id, created_customer) = match &request.customer {
            CustomerRef::Existing(id) => (*id, false),
            CustomerRef::New(customer) => {
                let id = self
                    .registry
                    .register_customer(customer)
                    .map_err(|e| registry_error("register customer", e))?;
                created.push(Created::Customer(id));
                (id, true)
            }
        };

        let (vehicle_id, created_vehicle) = match &request.vehicle {
            VehicleRef::Existing(id) => (*id, false),
            VehicleRef::New(vehicle) => {
                let id = self
                    .registry
                    .register_vehicle(customer_id, vehicle)
                    .map_err(|e| registry_error("register vehicle", e))?;
                created.push(Created::Vehicle(id));
                (id, true)
            }
        };

        let appointment = self.appointments.create(NewAppointment {
            customer_id,
            vehicle_id,
            mechanic_id: request.mechanic_id,
            site_id: request.site_id,
            service_id: request.service_id,
            date: request.date,
            time: request.time,
            duration_minutes: request.duration_minutes,
            reason: request.reason,
        })?;

        Ok(BookingOutcome {
            appointment,
            customer_id,
            vehicle_id,
            created_customer,
            created_vehicle,
        })
    }

    fn compensate(&self, created: &[Created]) {
        for step in created.iter().rev() {
            let result = match *step {
                Created::Vehicle(id) => self.registry.remove_vehicle(id),
                Created::Customer(id) => self.registry.remove_customer(id),
            };
            match result {
                Ok(()) => info!(step = ?step, "booking step compensated"),
                Err(err) => warn!(step = ?step, error = %err, "booking compensation failed"),
            }
        }
    }
}

fn registry_error(step: &str, err: CollaboratorError) -> DispatchError {
    match err {
        CollaboratorError::Unavailable(what) => {
            DispatchError::DependencyUnavailable(format!("{step}: {what} is unavailable"))
        }
        CollaboratorError::NotFound => DispatchError::Domain(DomainError::not_found()),
        other => DispatchError::Domain(DomainError::validation(format!("{step}: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};
    use torque_core::{FixedClock, Money};
    use torque_events::InMemoryEventBus;
    use uuid::Uuid;

    use crate::command_dispatcher::CommandDispatcher;
    use crate::config::EngineConfig;
    use crate::event_store::InMemoryEventStore;
    use crate::external::{CatalogEntry, InMemoryCustomerRegistry, InMemoryServiceCatalog};
    use crate::hooks::NoopHook;
    use crate::stores::{AppointmentFilter, SchedulingSettings};

    type TestBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
    type TestOrchestrator = BookingOrchestrator<Arc<InMemoryEventStore>, TestBus>;

    fn service() -> CatalogServiceId {
        CatalogServiceId::from_uuid(Uuid::from_u128(0xb00c))
    }

    fn setup() -> (TestOrchestrator, Arc<InMemoryCustomerRegistry>, Arc<AppointmentStore<Arc<InMemoryEventStore>, TestBus>>) {
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
        ));
        let catalog = Arc::new(InMemoryServiceCatalog::new());
        catalog.insert(CatalogEntry {
            service_id: service(),
            name: "Oil change".to_string(),
            price: Money::from_cents(4_500),
        });
        let appointments = Arc::new(AppointmentStore::new(
            dispatcher,
            Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2030, 1, 6, 12, 0, 0).unwrap())),
            catalog,
            Arc::new(NoopHook),
            SchedulingSettings::from_config(&EngineConfig::default()),
        ));
        let registry = Arc::new(InMemoryCustomerRegistry::new());
        (
            BookingOrchestrator::new(registry.clone(), appointments.clone()),
            registry,
            appointments,
        )
    }

    fn request(time: (u32, u32)) -> BookingRequest {
        BookingRequest {
            customer: CustomerRef::New(NewCustomer {
                name: "Ada".to_string(),
                email: Some("ada@example.com".to_string()),
                phone: None,
            }),
            vehicle: VehicleRef::New(NewVehicle {
                plate: "ABC-123".to_string(),
                make: "Fiat".to_string(),
                model: "Uno".to_string(),
                year: Some(2012),
            }),
            mechanic_id: None,
            site_id: Some(SiteId::from_uuid(Uuid::from_u128(1))),
            service_id: service(),
            date: NaiveDate::from_ymd_opt(2030, 1, 7).unwrap(),
            time: NaiveTime::from_hms_opt(time.0, time.1, 0).unwrap(),
            duration_minutes: 60,
            reason: "oil change".to_string(),
        }
    }

    #[test]
    fn books_with_new_customer_and_vehicle() {
        let (orchestrator, registry, _) = setup();
        let outcome = orchestrator.book(request((9, 0))).unwrap();

        assert!(outcome.created_customer);
        assert!(outcome.created_vehicle);
        assert_eq!(outcome.appointment.customer_id(), outcome.customer_id);
        assert_eq!(outcome.appointment.vehicle_id(), outcome.vehicle_id);
        assert_eq!(registry.customer_count(), 1);
        assert_eq!(registry.vehicle_count(), 1);
    }

    #[test]
    fn booking_conflict_removes_created_records() {
        let (orchestrator, registry, appointments) = setup();
        orchestrator.book(request((9, 0))).unwrap();

        let err = orchestrator.book(request((9, 30))).unwrap_err();
        match err {
            DispatchError::Domain(DomainError::Conflict(_)) => {}
            other => panic!("Expected Conflict, got {other:?}"),
        }
        assert_eq!(registry.customer_count(), 1);
        assert_eq!(registry.vehicle_count(), 1);
        assert_eq!(appointments.list(&AppointmentFilter::default()).len(), 1);
    }

    #[test]
    fn existing_records_are_never_compensated() {
        let (orchestrator, registry, _) = setup();
        let first = orchestrator.book(request((9, 0))).unwrap();

        let mut again = request((9, 30));
        again.customer = CustomerRef::Existing(first.customer_id);
        again.vehicle = VehicleRef::Existing(first.vehicle_id);
        assert!(orchestrator.book(again).is_err());

        assert_eq!(registry.customer_count(), 1);
        assert_eq!(registry.vehicle_count(), 1);
    }

    #[test]
    fn unreachable_registry_is_dependency_unavailable() {
        let (orchestrator, registry, appointments) = setup();
        registry.set_reachable(false);

        match orchestrator.book(request((9, 0))).unwrap_err() {
            DispatchError::DependencyUnavailable(_) => {}
            other => panic!("Expected DependencyUnavailable, got {other:?}"),
        }
        assert!(appointments.list(&AppointmentFilter::default()).is_empty());
    }
}
