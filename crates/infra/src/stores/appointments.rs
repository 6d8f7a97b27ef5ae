//! Appointment Store: bookings, conflict checks and the availability grid.

use std::sync::{Arc, Mutex};

use chrono::{FixedOffset, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use torque_core::{
    AggregateId, CatalogServiceId, Clock, CustomerId, DomainError, MechanicId, SiteId, VehicleId,
};
use torque_events::{EventBus, EventEnvelope};
use torque_scheduling::{
    Appointment, AppointmentCommand, AppointmentId, AppointmentPatch, AppointmentStatus,
    BookAppointment, BusinessHours, ConflictQuery, DayAvailability, Schedule, ServiceSnapshot,
    TimeInterval, TransitionAppointment, UpdateAppointment, availability,
};

use super::{APPOINTMENT_AGGREGATE, StoreResult, lock};
use crate::command_dispatcher::CommandDispatcher;
use crate::config::EngineConfig;
use crate::event_store::EventStore;
use crate::external::ServiceCatalog;
use crate::hooks::ConfirmationHook;
use crate::read_model::{InMemoryRecordStore, RecordStore};

/// Booking request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAppointment {
    pub customer_id: CustomerId,
    pub vehicle_id: VehicleId,
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

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentFilter {
    pub date: Option<NaiveDate>,
    pub status: Option<AppointmentStatus>,
    pub customer_id: Option<CustomerId>,
    pub mechanic_id: Option<MechanicId>,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.date.is_none_or(|d| appointment.schedule().date == d)
            && self.status.is_none_or(|s| appointment.status() == s)
            && self.customer_id.is_none_or(|c| appointment.customer_id() == c)
            && self.mechanic_id.is_none_or(|m| appointment.mechanic_id() == Some(m))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingSettings {
    pub business_hours: BusinessHours,
    pub utc_offset: FixedOffset,
}

impl SchedulingSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            business_hours: config.business_hours,
            utc_offset: config.utc_offset(),
        }
    }
}

fn make_appointment(id: AggregateId) -> Appointment {
    Appointment::empty(AppointmentId::new(id))
}

pub struct AppointmentStore<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    records: InMemoryRecordStore<AppointmentId, Appointment>,
    // Serializes check-then-write for creates and schedule changes.
    schedule_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
    catalog: Arc<dyn ServiceCatalog>,
    hook: Arc<dyn ConfirmationHook>,
    settings: SchedulingSettings,
}

impl<S, B> AppointmentStore<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        clock: Arc<dyn Clock>,
        catalog: Arc<dyn ServiceCatalog>,
        hook: Arc<dyn ConfirmationHook>,
        settings: SchedulingSettings,
    ) -> Self {
        Self {
            dispatcher,
            records: InMemoryRecordStore::new(),
            schedule_lock: Mutex::new(()),
            clock,
            catalog,
            hook,
            settings,
        }
    }

    pub fn settings(&self) -> &SchedulingSettings {
        &self.settings
    }

    /// Book a new appointment in SCHEDULED status.
    pub fn create(&self, request: NewAppointment) -> StoreResult<Appointment> {
        let schedule = Schedule::new(request.date, request.time, request.duration_minutes);
        let query = ConflictQuery::new(
            schedule.date,
            schedule.time,
            schedule.duration_minutes,
            request.mechanic_id,
            request.site_id,
        )?;
        self.ensure_not_past(&schedule)?;
        let service = self.resolve_service(request.service_id)?;

        let appointment_id = AppointmentId::new(AggregateId::new());
        let command = AppointmentCommand::BookAppointment(BookAppointment {
            appointment_id,
            customer_id: request.customer_id,
            vehicle_id: request.vehicle_id,
            mechanic_id: request.mechanic_id,
            site_id: request.site_id,
            service,
            schedule,
            reason: request.reason,
            occurred_at: self.clock.now(),
        });

        let _guard = lock(&self.schedule_lock, "schedule")?;
        self.conflict_check(&query)?;
        let out = self
            .dispatcher
            .dispatch(appointment_id.0, APPOINTMENT_AGGREGATE, &command, make_appointment)?;
        self.records.upsert(appointment_id, out.aggregate.clone());

        info!(
            appointment_id = %appointment_id,
            date = %schedule.date,
            time = %schedule.time.format("%H:%M"),
            duration_minutes = schedule.duration_minutes,
            "appointment booked"
        );
        Ok(out.aggregate)
    }

    /// Reject the candidate if it overlaps a competing active appointment.
    pub fn conflict_check(&self, query: &ConflictQuery) -> StoreResult<()> {
        let existing = self.records.list();
        if let Some(other) = query.first_conflict(existing.iter()) {
            return Err(DomainError::conflict(format!(
                "overlaps appointment {} at {} for {} minutes",
                other.id_typed(),
                other.schedule().time.format("%H:%M"),
                other.schedule().duration_minutes
            ))
            .into());
        }
        Ok(())
    }

    /// Apply a partial update. Schedule-affecting patches are re-checked for
    /// conflicts (excluding the appointment itself); a patch that moves the
    /// start must not move it into the past.
    pub fn update(&self, appointment_id: AppointmentId, patch: AppointmentPatch) -> StoreResult<Appointment> {
        let command = AppointmentCommand::UpdateAppointment(UpdateAppointment {
            appointment_id,
            patch: patch.clone(),
            occurred_at: self.clock.now(),
        });

        if !patch.touches_schedule() {
            return self.apply_update(appointment_id, &command);
        }

        let _guard = lock(&self.schedule_lock, "schedule")?;
        let current = self.load(appointment_id)?;
        if current.status().is_active() {
            let query = current.conflict_query_after(&patch)?;
            if patch.moves_start() {
                self.ensure_not_past(&current.schedule_after(&patch))?;
            }
            self.conflict_check(&query)?;
        }
        self.apply_update(appointment_id, &command)
    }

    fn apply_update(&self, appointment_id: AppointmentId, command: &AppointmentCommand) -> StoreResult<Appointment> {
        let out = self
            .dispatcher
            .dispatch(appointment_id.0, APPOINTMENT_AGGREGATE, command, make_appointment)?;
        self.records.upsert(appointment_id, out.aggregate.clone());
        info!(appointment_id = %appointment_id, "appointment updated");
        Ok(out.aggregate)
    }

    pub fn transition(
        &self,
        appointment_id: AppointmentId,
        status: AppointmentStatus,
        note: Option<String>,
    ) -> StoreResult<Appointment> {
        let command = AppointmentCommand::TransitionAppointment(TransitionAppointment {
            appointment_id,
            status,
            note,
            occurred_at: self.clock.now(),
        });
        let out = self
            .dispatcher
            .dispatch(appointment_id.0, APPOINTMENT_AGGREGATE, &command, make_appointment)?;
        self.records.upsert(appointment_id, out.aggregate.clone());
        info!(appointment_id = %appointment_id, status = %status, "appointment status changed");

        if status == AppointmentStatus::Confirmed {
            if let Err(err) = self.hook.on_confirmed(&out.aggregate) {
                warn!(
                    appointment_id = %appointment_id,
                    hook = self.hook.name(),
                    error = %err,
                    "confirmation hook failed"
                );
            }
        }
        Ok(out.aggregate)
    }

    pub fn confirm(&self, appointment_id: AppointmentId) -> StoreResult<Appointment> {
        self.transition(appointment_id, AppointmentStatus::Confirmed, None)
    }

    pub fn cancel(&self, appointment_id: AppointmentId, note: Option<String>) -> StoreResult<Appointment> {
        self.transition(appointment_id, AppointmentStatus::Cancelled, note)
    }

    pub fn complete(&self, appointment_id: AppointmentId) -> StoreResult<Appointment> {
        self.transition(appointment_id, AppointmentStatus::Completed, None)
    }

    /// Slot grid for a date; a slot is occupied when any active appointment
    /// (at `site_id`, when given) overlaps it.
    pub fn availability(&self, date: NaiveDate, site_id: Option<SiteId>) -> DayAvailability {
        let booked: Vec<TimeInterval> = self
            .records
            .list()
            .iter()
            .filter(|a| a.status().is_active() && a.schedule().date == date)
            .filter(|a| site_id.is_none() || a.site_id() == site_id)
            .filter_map(|a| a.schedule().interval().ok())
            .collect();
        availability(date, site_id, &self.settings.business_hours, booked.iter())
    }

    pub fn get(&self, appointment_id: AppointmentId) -> StoreResult<Appointment> {
        self.records
            .get(&appointment_id)
            .ok_or_else(|| DomainError::not_found().into())
    }

    /// Appointments matching `filter`, ordered by date and time.
    pub fn list(&self, filter: &AppointmentFilter) -> Vec<Appointment> {
        let mut out: Vec<Appointment> = self
            .records
            .list()
            .into_iter()
            .filter(|a| filter.matches(a))
            .collect();
        sort_by_schedule(&mut out);
        out
    }

    /// Appointments dated within `[from, to]`.
    pub fn range(&self, from: NaiveDate, to: NaiveDate) -> StoreResult<Vec<Appointment>> {
        if from > to {
            return Err(DomainError::validation("range start must not be after its end").into());
        }
        let mut out: Vec<Appointment> = self
            .records
            .list()
            .into_iter()
            .filter(|a| (from..=to).contains(&a.schedule().date))
            .collect();
        sort_by_schedule(&mut out);
        Ok(out)
    }

    fn load(&self, appointment_id: AppointmentId) -> StoreResult<Appointment> {
        let appointment = self.dispatcher.load(appointment_id.0, make_appointment)?;
        if !appointment.is_created() {
            return Err(DomainError::not_found().into());
        }
        Ok(appointment)
    }

    fn ensure_not_past(&self, schedule: &Schedule) -> StoreResult<()> {
        if schedule.is_in_past(self.clock.now(), self.settings.utc_offset) {
            return Err(DomainError::validation("appointment cannot start in the past").into());
        }
        Ok(())
    }

    fn resolve_service(&self, service_id: CatalogServiceId) -> StoreResult<ServiceSnapshot> {
        match self.catalog.lookup(service_id) {
            Ok(Some(entry)) => Ok(ServiceSnapshot {
                service_id,
                name: Some(entry.name),
                price: Some(entry.price),
            }),
            Ok(None) => Err(DomainError::not_found().into()),
            Err(err) => {
                warn!(
                    service_id = %service_id,
                    error = %err,
                    "catalog lookup failed; booking without service snapshot"
                );
                Ok(ServiceSnapshot::unresolved(service_id))
            }
        }
    }
}

fn sort_by_schedule(appointments: &mut [Appointment]) {
    appointments.sort_by_key(|a| (a.schedule().date, a.schedule().time));
}
