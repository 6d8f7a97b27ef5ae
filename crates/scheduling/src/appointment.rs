use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use torque_core::{
    Aggregate, AggregateId, AggregateRoot, CatalogServiceId, CustomerId, DomainError, DomainResult,
    Lifecycle, MechanicId, Money, SiteId, VehicleId,
};
use torque_events::{Command, Event};

use crate::conflict::{ConflictQuery, TimeInterval};

/// Longest accepted free-text reason.
pub const MAX_REASON_LEN: usize = 1_000;

/// Topics published by the appointment store.
pub mod topics {
    pub const CREATED: &str = "appointment.created";
    pub const UPDATED: &str = "appointment.updated";
    pub const CONFIRMED: &str = "appointment.confirmed";
    pub const CANCELLED: &str = "appointment.cancelled";
    pub const COMPLETED: &str = "appointment.completed";
}

/// Appointment identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppointmentId(pub AggregateId);

impl AppointmentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for AppointmentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Appointment status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    /// Scheduled and confirmed appointments hold their slot.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Scheduled | Self::Confirmed)
    }
}

impl core::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Scheduled => "SCHEDULED",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::Completed => "COMPLETED",
        };
        f.write_str(s)
    }
}

impl Lifecycle for AppointmentStatus {
    const ENTITY: &'static str = "appointment";
    const ALL: &'static [Self] = &[
        Self::Scheduled,
        Self::Confirmed,
        Self::Cancelled,
        Self::Completed,
    ];

    fn next_states(self) -> &'static [Self] {
        match self {
            Self::Scheduled => &[Self::Confirmed, Self::Cancelled],
            Self::Confirmed => &[Self::Completed, Self::Cancelled],
            Self::Cancelled | Self::Completed => &[],
        }
    }
}

/// When an appointment takes place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: u32,
}

impl Schedule {
    pub fn new(date: NaiveDate, time: NaiveTime, duration_minutes: u32) -> Self {
        Self {
            date,
            time,
            duration_minutes,
        }
    }

    pub fn interval(&self) -> DomainResult<TimeInterval> {
        if self.duration_minutes == 0 {
            return Err(DomainError::validation("duration must be positive"));
        }
        TimeInterval::starting_at(self.time, self.duration_minutes)
    }

    /// Start instant, interpreting date/time in the workshop's `offset`.
    pub fn starts_at(&self, offset: FixedOffset) -> Option<DateTime<Utc>> {
        offset
            .from_local_datetime(&self.date.and_time(self.time))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn is_in_past(&self, now: DateTime<Utc>, offset: FixedOffset) -> bool {
        self.starts_at(offset).is_none_or(|start| start < now)
    }
}

/// Catalog service booked, with its name/price captured at booking time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub service_id: CatalogServiceId,
    pub name: Option<String>,
    pub price: Option<Money>,
}

impl ServiceSnapshot {
    /// Reference only; used when the catalog could not be reached.
    pub fn unresolved(service_id: CatalogServiceId) -> Self {
        Self {
            service_id,
            name: None,
            price: None,
        }
    }
}

/// Legal mutable fields of an appointment. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppointmentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mechanic_id: Option<MechanicId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<SiteId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AppointmentPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Whether the patch changes when the appointment starts.
    pub fn moves_start(&self) -> bool {
        self.date.is_some() || self.time.is_some()
    }

    /// Whether applying the patch can move the appointment on the calendar.
    pub fn touches_schedule(&self) -> bool {
        self.date.is_some()
            || self.time.is_some()
            || self.duration_minutes.is_some()
            || self.mechanic_id.is_some()
            || self.site_id.is_some()
    }
}

/// Aggregate root: Appointment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appointment {
    id: AppointmentId,
    customer_id: CustomerId,
    vehicle_id: VehicleId,
    mechanic_id: Option<MechanicId>,
    site_id: Option<SiteId>,
    service: ServiceSnapshot,
    schedule: Schedule,
    reason: String,
    status: AppointmentStatus,
    version: u64,
    created: bool,
}

impl Appointment {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: AppointmentId) -> Self {
        Self {
            id,
            customer_id: CustomerId::nil(),
            vehicle_id: VehicleId::nil(),
            mechanic_id: None,
            site_id: None,
            service: ServiceSnapshot::unresolved(CatalogServiceId::nil()),
            schedule: Schedule::default(),
            reason: String::new(),
            status: AppointmentStatus::Scheduled,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> AppointmentId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn vehicle_id(&self) -> VehicleId {
        self.vehicle_id
    }

    pub fn mechanic_id(&self) -> Option<MechanicId> {
        self.mechanic_id
    }

    pub fn site_id(&self) -> Option<SiteId> {
        self.site_id
    }

    pub fn service(&self) -> &ServiceSnapshot {
        &self.service
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn status(&self) -> AppointmentStatus {
        self.status
    }

    /// Conflict query for this appointment as it would be after `patch`,
    /// excluding itself.
    pub fn conflict_query_after(&self, patch: &AppointmentPatch) -> DomainResult<ConflictQuery> {
        let schedule = self.schedule_after(patch);
        Ok(ConflictQuery::new(
            schedule.date,
            schedule.time,
            schedule.duration_minutes,
            patch.mechanic_id.or(self.mechanic_id),
            patch.site_id.or(self.site_id),
        )?
        .excluding(self.id))
    }

    pub fn schedule_after(&self, patch: &AppointmentPatch) -> Schedule {
        Schedule {
            date: patch.date.unwrap_or(self.schedule.date),
            time: patch.time.unwrap_or(self.schedule.time),
            duration_minutes: patch.duration_minutes.unwrap_or(self.schedule.duration_minutes),
        }
    }
}

impl AggregateRoot for Appointment {
    type Id = AppointmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: BookAppointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookAppointment {
    pub appointment_id: AppointmentId,
    pub customer_id: CustomerId,
    pub vehicle_id: VehicleId,
    pub mechanic_id: Option<MechanicId>,
    pub site_id: Option<SiteId>,
    pub service: ServiceSnapshot,
    pub schedule: Schedule,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateAppointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAppointment {
    pub appointment_id: AppointmentId,
    pub patch: AppointmentPatch,
    pub occurred_at: DateTime<Utc>,
}

/// Command: TransitionAppointment (confirm / cancel / complete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionAppointment {
    pub appointment_id: AppointmentId,
    pub status: AppointmentStatus,
    /// Free-text note; only recorded on cancellation.
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentCommand {
    BookAppointment(BookAppointment),
    UpdateAppointment(UpdateAppointment),
    TransitionAppointment(TransitionAppointment),
}

impl Command for AppointmentCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        match self {
            AppointmentCommand::BookAppointment(c) => c.appointment_id.0,
            AppointmentCommand::UpdateAppointment(c) => c.appointment_id.0,
            AppointmentCommand::TransitionAppointment(c) => c.appointment_id.0,
        }
    }
}

/// Event: AppointmentBooked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentBooked {
    pub appointment_id: AppointmentId,
    pub customer_id: CustomerId,
    pub vehicle_id: VehicleId,
    pub mechanic_id: Option<MechanicId>,
    pub site_id: Option<SiteId>,
    pub service: ServiceSnapshot,
    pub schedule: Schedule,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AppointmentUpdated (full post-update values).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentUpdated {
    pub appointment_id: AppointmentId,
    pub schedule: Schedule,
    pub mechanic_id: Option<MechanicId>,
    pub site_id: Option<SiteId>,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AppointmentConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentConfirmed {
    pub appointment_id: AppointmentId,
    pub customer_id: CustomerId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AppointmentCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentCancelled {
    pub appointment_id: AppointmentId,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AppointmentCompleted.
///
/// Carries everything the order store needs to open a repair order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentCompleted {
    pub appointment_id: AppointmentId,
    pub customer_id: CustomerId,
    pub vehicle_id: VehicleId,
    pub mechanic_id: Option<MechanicId>,
    pub site_id: Option<SiteId>,
    pub service: ServiceSnapshot,
    pub reason: String,
    pub date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentEvent {
    AppointmentBooked(AppointmentBooked),
    AppointmentUpdated(AppointmentUpdated),
    AppointmentConfirmed(AppointmentConfirmed),
    AppointmentCancelled(AppointmentCancelled),
    AppointmentCompleted(AppointmentCompleted),
}

impl Event for AppointmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AppointmentEvent::AppointmentBooked(_) => topics::CREATED,
            AppointmentEvent::AppointmentUpdated(_) => topics::UPDATED,
            AppointmentEvent::AppointmentConfirmed(_) => topics::CONFIRMED,
            AppointmentEvent::AppointmentCancelled(_) => topics::CANCELLED,
            AppointmentEvent::AppointmentCompleted(_) => topics::COMPLETED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AppointmentEvent::AppointmentBooked(e) => e.occurred_at,
            AppointmentEvent::AppointmentUpdated(e) => e.occurred_at,
            AppointmentEvent::AppointmentConfirmed(e) => e.occurred_at,
            AppointmentEvent::AppointmentCancelled(e) => e.occurred_at,
            AppointmentEvent::AppointmentCompleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Appointment {
    type Command = AppointmentCommand;
    type Event = AppointmentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AppointmentEvent::AppointmentBooked(e) => {
                self.id = e.appointment_id;
                self.customer_id = e.customer_id;
                self.vehicle_id = e.vehicle_id;
                self.mechanic_id = e.mechanic_id;
                self.site_id = e.site_id;
                self.service = e.service.clone();
                self.schedule = e.schedule;
                self.reason = e.reason.clone();
                self.status = AppointmentStatus::Scheduled;
                self.created = true;
            }
            AppointmentEvent::AppointmentUpdated(e) => {
                self.schedule = e.schedule;
                self.mechanic_id = e.mechanic_id;
                self.site_id = e.site_id;
                self.reason = e.reason.clone();
            }
            AppointmentEvent::AppointmentConfirmed(_) => {
                self.status = AppointmentStatus::Confirmed;
            }
            AppointmentEvent::AppointmentCancelled(_) => {
                self.status = AppointmentStatus::Cancelled;
            }
            AppointmentEvent::AppointmentCompleted(_) => {
                self.status = AppointmentStatus::Completed;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AppointmentCommand::BookAppointment(cmd) => self.handle_book(cmd),
            AppointmentCommand::UpdateAppointment(cmd) => self.handle_update(cmd),
            AppointmentCommand::TransitionAppointment(cmd) => self.handle_transition(cmd),
        }
    }
}

fn validate_reason(reason: &str) -> DomainResult<()> {
    if reason.chars().count() > MAX_REASON_LEN {
        return Err(DomainError::validation(format!(
            "reason must be at most {MAX_REASON_LEN} characters"
        )));
    }
    Ok(())
}

impl Appointment {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_appointment_id(&self, appointment_id: AppointmentId) -> Result<(), DomainError> {
        if self.id != appointment_id {
            return Err(DomainError::invariant("appointment_id mismatch"));
        }
        Ok(())
    }

    fn handle_book(&self, cmd: &BookAppointment) -> Result<Vec<AppointmentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("appointment already exists"));
        }
        cmd.schedule.interval()?;
        validate_reason(&cmd.reason)?;

        Ok(vec![AppointmentEvent::AppointmentBooked(AppointmentBooked {
            appointment_id: cmd.appointment_id,
            customer_id: cmd.customer_id,
            vehicle_id: cmd.vehicle_id,
            mechanic_id: cmd.mechanic_id,
            site_id: cmd.site_id,
            service: cmd.service.clone(),
            schedule: cmd.schedule,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateAppointment) -> Result<Vec<AppointmentEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_appointment_id(cmd.appointment_id)?;

        if self.status.is_terminal() {
            return Err(DomainError::invariant(format!(
                "cannot update an appointment that is {}",
                self.status
            )));
        }
        if cmd.patch.is_empty() {
            return Err(DomainError::validation("patch must change at least one field"));
        }

        let schedule = self.schedule_after(&cmd.patch);
        schedule.interval()?;
        let reason = cmd.patch.reason.clone().unwrap_or_else(|| self.reason.clone());
        validate_reason(&reason)?;

        Ok(vec![AppointmentEvent::AppointmentUpdated(AppointmentUpdated {
            appointment_id: cmd.appointment_id,
            schedule,
            mechanic_id: cmd.patch.mechanic_id.or(self.mechanic_id),
            site_id: cmd.patch.site_id.or(self.site_id),
            reason,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_transition(
        &self,
        cmd: &TransitionAppointment,
    ) -> Result<Vec<AppointmentEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_appointment_id(cmd.appointment_id)?;
        self.status.ensure_transition(cmd.status)?;

        let event = match cmd.status {
            AppointmentStatus::Confirmed => {
                AppointmentEvent::AppointmentConfirmed(AppointmentConfirmed {
                    appointment_id: self.id,
                    customer_id: self.customer_id,
                    occurred_at: cmd.occurred_at,
                })
            }
            AppointmentStatus::Cancelled => {
                AppointmentEvent::AppointmentCancelled(AppointmentCancelled {
                    appointment_id: self.id,
                    note: cmd.note.clone(),
                    occurred_at: cmd.occurred_at,
                })
            }
            AppointmentStatus::Completed => {
                AppointmentEvent::AppointmentCompleted(AppointmentCompleted {
                    appointment_id: self.id,
                    customer_id: self.customer_id,
                    vehicle_id: self.vehicle_id,
                    mechanic_id: self.mechanic_id,
                    site_id: self.site_id,
                    service: self.service.clone(),
                    reason: self.reason.clone(),
                    date: self.schedule.date,
                    occurred_at: cmd.occurred_at,
                })
            }
            AppointmentStatus::Scheduled => {
                return Err(DomainError::invalid_transition(
                    AppointmentStatus::ENTITY,
                    self.status,
                    cmd.status,
                ));
            }
        };

        Ok(vec![event])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_appointment_id() -> AppointmentId {
        AppointmentId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_schedule() -> Schedule {
        Schedule::new(
            NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            30,
        )
    }

    fn book_cmd(appointment_id: AppointmentId) -> BookAppointment {
        BookAppointment {
            appointment_id,
            customer_id: CustomerId::new(),
            vehicle_id: VehicleId::new(),
            mechanic_id: Some(MechanicId::new()),
            site_id: Some(SiteId::new()),
            service: ServiceSnapshot {
                service_id: CatalogServiceId::new(),
                name: Some("Oil change".to_string()),
                price: Some(Money::from_cents(4_500)),
            },
            schedule: test_schedule(),
            reason: "strange noise when braking".to_string(),
            occurred_at: test_time(),
        }
    }

    fn booked() -> Appointment {
        let id = test_appointment_id();
        let mut appt = Appointment::empty(id);
        let events = appt
            .handle(&AppointmentCommand::BookAppointment(book_cmd(id)))
            .unwrap();
        appt.apply(&events[0]);
        appt
    }

    fn transition(appt: &mut Appointment, status: AppointmentStatus) {
        let events = appt
            .handle(&AppointmentCommand::TransitionAppointment(transition_cmd(appt, status)))
            .unwrap();
        appt.apply(&events[0]);
    }

    fn transition_cmd(appt: &Appointment, status: AppointmentStatus) -> TransitionAppointment {
        TransitionAppointment {
            appointment_id: appt.id_typed(),
            status,
            note: None,
            occurred_at: test_time(),
        }
    }

    /// Appointment driven into `status` along a legal path.
    fn in_status(status: AppointmentStatus) -> Appointment {
        let mut appt = booked();
        match status {
            AppointmentStatus::Scheduled => {}
            AppointmentStatus::Confirmed => transition(&mut appt, AppointmentStatus::Confirmed),
            AppointmentStatus::Cancelled => transition(&mut appt, AppointmentStatus::Cancelled),
            AppointmentStatus::Completed => {
                transition(&mut appt, AppointmentStatus::Confirmed);
                transition(&mut appt, AppointmentStatus::Completed);
            }
        }
        assert_eq!(appt.status(), status);
        appt
    }

    #[test]
    fn book_emits_appointment_booked_event() {
        let id = test_appointment_id();
        let appt = Appointment::empty(id);
        let cmd = book_cmd(id);

        let events = appt
            .handle(&AppointmentCommand::BookAppointment(cmd.clone()))
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "appointment.created");

        match &events[0] {
            AppointmentEvent::AppointmentBooked(e) => {
                assert_eq!(e.appointment_id, id);
                assert_eq!(e.customer_id, cmd.customer_id);
                assert_eq!(e.schedule, cmd.schedule);
            }
            _ => panic!("Expected AppointmentBooked event"),
        }
    }

    #[test]
    fn booking_twice_is_a_conflict() {
        let appt = booked();
        let err = appt
            .handle(&AppointmentCommand::BookAppointment(book_cmd(appt.id_typed())))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn zero_duration_is_rejected() {
        let id = test_appointment_id();
        let mut cmd = book_cmd(id);
        cmd.schedule.duration_minutes = 0;
        let err = Appointment::empty(id)
            .handle(&AppointmentCommand::BookAppointment(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn completed_event_carries_order_snapshot() {
        let mut appt = in_status(AppointmentStatus::Confirmed);
        let events = appt
            .handle(&AppointmentCommand::TransitionAppointment(transition_cmd(
                &appt,
                AppointmentStatus::Completed,
            )))
            .unwrap();

        match &events[0] {
            AppointmentEvent::AppointmentCompleted(e) => {
                assert_eq!(e.customer_id, appt.customer_id());
                assert_eq!(e.vehicle_id, appt.vehicle_id());
                assert_eq!(e.mechanic_id, appt.mechanic_id());
                assert_eq!(e.service.name.as_deref(), Some("Oil change"));
                assert_eq!(e.service.price, Some(Money::from_cents(4_500)));
                assert_eq!(e.reason, "strange noise when braking");
            }
            _ => panic!("Expected AppointmentCompleted event"),
        }

        appt.apply(&events[0]);
        assert_eq!(appt.status(), AppointmentStatus::Completed);
    }

    #[test]
    fn skipping_confirmation_is_an_invalid_transition() {
        let appt = booked();
        let err = appt
            .handle(&AppointmentCommand::TransitionAppointment(transition_cmd(
                &appt,
                AppointmentStatus::Completed,
            )))
            .unwrap_err();

        match err {
            DomainError::InvalidTransition { entity, from, to } => {
                assert_eq!(entity, "appointment");
                assert_eq!(from, "SCHEDULED");
                assert_eq!(to, "COMPLETED");
            }
            _ => panic!("Expected InvalidTransition"),
        }
    }

    #[test]
    fn update_reschedules_and_keeps_unpatched_fields() {
        let mut appt = booked();
        let site = appt.site_id();
        let patch = AppointmentPatch {
            time: Some(NaiveTime::from_hms_opt(11, 0, 0).unwrap()),
            duration_minutes: Some(60),
            ..AppointmentPatch::default()
        };
        assert!(patch.touches_schedule());

        let events = appt
            .handle(&AppointmentCommand::UpdateAppointment(UpdateAppointment {
                appointment_id: appt.id_typed(),
                patch,
                occurred_at: test_time(),
            }))
            .unwrap();
        appt.apply(&events[0]);

        assert_eq!(appt.schedule().time, NaiveTime::from_hms_opt(11, 0, 0).unwrap());
        assert_eq!(appt.schedule().duration_minutes, 60);
        assert_eq!(appt.schedule().date, test_schedule().date);
        assert_eq!(appt.site_id(), site);
    }

    #[test]
    fn update_is_forbidden_once_terminal() {
        for status in [AppointmentStatus::Cancelled, AppointmentStatus::Completed] {
            let appt = in_status(status);
            let err = appt
                .handle(&AppointmentCommand::UpdateAppointment(UpdateAppointment {
                    appointment_id: appt.id_typed(),
                    patch: AppointmentPatch {
                        reason: Some("new".to_string()),
                        ..AppointmentPatch::default()
                    },
                    occurred_at: test_time(),
                }))
                .unwrap_err();
            assert!(matches!(err, DomainError::InvariantViolation(_)));
        }
    }

    #[test]
    fn empty_patch_is_rejected() {
        let appt = booked();
        let err = appt
            .handle(&AppointmentCommand::UpdateAppointment(UpdateAppointment {
                appointment_id: appt.id_typed(),
                patch: AppointmentPatch::default(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn patch_rejects_unknown_fields() {
        let ok: AppointmentPatch = serde_json::from_str(r#"{"reason":"rattle"}"#).unwrap();
        assert_eq!(ok.reason.as_deref(), Some("rattle"));
        assert!(!ok.touches_schedule());

        let err = serde_json::from_str::<AppointmentPatch>(r#"{"status":"COMPLETED"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn past_check_uses_workshop_offset() {
        let schedule = test_schedule();
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        // 09:00 at +02:00 is 07:00 UTC.
        let just_before = "2025-06-10T06:59:00Z".parse::<DateTime<Utc>>().unwrap();
        let just_after = "2025-06-10T07:01:00Z".parse::<DateTime<Utc>>().unwrap();

        assert!(!schedule.is_in_past(just_before, plus_two));
        assert!(schedule.is_in_past(just_after, plus_two));
    }

    #[test]
    fn conflict_query_after_patch_excludes_self() {
        let appt = booked();
        let query = appt
            .conflict_query_after(&AppointmentPatch::default())
            .unwrap();
        assert_eq!(query.exclude, Some(appt.id_typed()));
        assert!(!query.competes_with(&appt));
    }

    #[test]
    fn transition_closure_leaves_state_unchanged() {
        for &from in AppointmentStatus::ALL {
            for &to in AppointmentStatus::ALL {
                let appt = in_status(from);
                let before = appt.clone();
                let result = appt.handle(&AppointmentCommand::TransitionAppointment(
                    transition_cmd(&appt, to),
                ));

                if from.can_transition_to(to) {
                    assert!(result.is_ok(), "{from} -> {to} should be legal");
                } else {
                    assert!(
                        matches!(result, Err(DomainError::InvalidTransition { .. })),
                        "{from} -> {to} should be rejected"
                    );
                }
                assert_eq!(appt, before);
            }
        }
    }

    #[test]
    fn apply_is_deterministic() {
        let id = test_appointment_id();
        let cmd = book_cmd(id);
        let booked = AppointmentEvent::AppointmentBooked(AppointmentBooked {
            appointment_id: id,
            customer_id: cmd.customer_id,
            vehicle_id: cmd.vehicle_id,
            mechanic_id: cmd.mechanic_id,
            site_id: cmd.site_id,
            service: cmd.service.clone(),
            schedule: cmd.schedule,
            reason: cmd.reason.clone(),
            occurred_at: test_time(),
        });
        let confirmed = AppointmentEvent::AppointmentConfirmed(AppointmentConfirmed {
            appointment_id: id,
            customer_id: cmd.customer_id,
            occurred_at: test_time(),
        });

        let mut a = Appointment::empty(id);
        a.apply(&booked);
        a.apply(&confirmed);
        let mut b = Appointment::empty(id);
        b.apply(&booked);
        b.apply(&confirmed);

        assert_eq!(a, b);
        assert_eq!(a.version(), 2);
        assert_eq!(a.status(), AppointmentStatus::Confirmed);
    }
}
