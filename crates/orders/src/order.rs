use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use torque_core::{
    Aggregate, AggregateId, AggregateRoot, CustomerId, DomainError, DomainResult, Lifecycle,
    MechanicId, Money, PartId, VehicleId, entity::find_by_id,
};
use torque_events::{Command, Event};
use torque_scheduling::{AppointmentCompleted, AppointmentId};

use crate::cost::{BillableItem, CostBreakdown, billable_items};
use crate::service_line::{
    NewServiceLine, PartUsage, ServiceLine, ServiceLineId, ServiceLinePatch, ServiceLineStatus,
};

/// Name of the line seeded from an appointment with no catalog snapshot.
pub const DEFAULT_SERVICE_NAME: &str = "General service";
/// Labor cost of a seeded line when the catalog price is unknown.
pub const DEFAULT_LABOR_COST: Money = Money::ZERO;
/// Estimate of a seeded line (one hour).
pub const DEFAULT_ESTIMATED_MINUTES: u32 = 60;

/// Topics published by the order store.
pub mod topics {
    pub const CREATED: &str = "order.created";
    pub const UPDATED: &str = "order.updated";
    pub const LINE_ADDED: &str = "order.line_added";
    pub const LINE_REMOVED: &str = "order.line_removed";
    pub const LINE_UPDATED: &str = "order.line_updated";
    pub const LINE_STATUS_CHANGED: &str = "order.line_status_changed";
    pub const PART_ADDED: &str = "order.part_added";
    pub const STATUS_CHANGED: &str = "order.status_changed";
    pub const READY_FOR_BILLING: &str = "order.ready_for_billing";
}

/// Repair order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepairOrderId(pub AggregateId);

impl RepairOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// The one order an appointment can produce.
    pub fn for_appointment(appointment_id: AppointmentId) -> Self {
        Self(AggregateId::derived_from(&appointment_id.0, "repair-order"))
    }
}

impl core::fmt::Display for RepairOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    InProgress,
    Finalized,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Lines and parts can no longer change.
    pub fn is_locked(self) -> bool {
        matches!(self, Self::Finalized | Self::Delivered | Self::Cancelled)
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Finalized => "FINALIZED",
            Self::Delivered => "DELIVERED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

impl Lifecycle for OrderStatus {
    const ENTITY: &'static str = "order";
    const ALL: &'static [Self] = &[
        Self::Pending,
        Self::InProgress,
        Self::Finalized,
        Self::Delivered,
        Self::Cancelled,
    ];

    fn next_states(self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::InProgress, Self::Cancelled],
            Self::InProgress => &[Self::Finalized, Self::Cancelled],
            Self::Finalized => &[Self::Delivered],
            Self::Delivered | Self::Cancelled => &[],
        }
    }
}

/// Legal mutable order-level fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mechanic_id: Option<MechanicId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_completion: Option<NaiveDate>,
}

impl OrderPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Aggregate root: RepairOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOrder {
    id: RepairOrderId,
    appointment_id: Option<AppointmentId>,
    customer_id: CustomerId,
    vehicle_id: VehicleId,
    mechanic_id: Option<MechanicId>,
    created_on: NaiveDate,
    estimated_completion: Option<NaiveDate>,
    diagnosis: String,
    status: OrderStatus,
    cancellation_reason: Option<String>,
    lines: Vec<ServiceLine>,
    version: u64,
    created: bool,
}

impl RepairOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: RepairOrderId) -> Self {
        Self {
            id,
            appointment_id: None,
            customer_id: CustomerId::nil(),
            vehicle_id: VehicleId::nil(),
            mechanic_id: None,
            created_on: NaiveDate::default(),
            estimated_completion: None,
            diagnosis: String::new(),
            status: OrderStatus::Pending,
            cancellation_reason: None,
            lines: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> RepairOrderId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn appointment_id(&self) -> Option<AppointmentId> {
        self.appointment_id
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

    pub fn created_on(&self) -> NaiveDate {
        self.created_on
    }

    pub fn estimated_completion(&self) -> Option<NaiveDate> {
        self.estimated_completion
    }

    pub fn diagnosis(&self) -> &str {
        &self.diagnosis
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn lines(&self) -> &[ServiceLine] {
        &self.lines
    }

    pub fn line(&self, line_id: ServiceLineId) -> Option<&ServiceLine> {
        find_by_id(&self.lines, &line_id)
    }

    pub fn cost(&self) -> DomainResult<CostBreakdown> {
        CostBreakdown::compute(&self.lines)
    }

    fn line_mut(&mut self, line_id: ServiceLineId) -> Option<&mut ServiceLine> {
        self.lines.iter_mut().find(|l| l.id == line_id)
    }
}

impl AggregateRoot for RepairOrder {
    type Id = RepairOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: RepairOrderId,
    pub appointment_id: Option<AppointmentId>,
    pub customer_id: CustomerId,
    pub vehicle_id: VehicleId,
    pub mechanic_id: Option<MechanicId>,
    pub diagnosis: String,
    pub estimated_completion: Option<NaiveDate>,
    pub lines: Vec<NewServiceLine>,
    pub occurred_at: DateTime<Utc>,
}

impl OpenOrder {
    /// Order materialized from a completed appointment.
    ///
    /// Ids are derived from the appointment id, so a redelivered event maps to
    /// the same order stream.
    pub fn from_completed_appointment(event: &AppointmentCompleted, occurred_at: DateTime<Utc>) -> Self {
        let order_id = RepairOrderId::for_appointment(event.appointment_id);
        let seed = NewServiceLine {
            line_id: ServiceLineId::new(AggregateId::derived_from(&order_id.0, "service-line-1")),
            kind: "service".to_string(),
            name: event
                .service
                .name
                .clone()
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            description: event.reason.clone(),
            labor_cost: event.service.price.unwrap_or(DEFAULT_LABOR_COST),
            estimated_minutes: DEFAULT_ESTIMATED_MINUTES,
        };

        Self {
            order_id,
            appointment_id: Some(event.appointment_id),
            customer_id: event.customer_id,
            vehicle_id: event.vehicle_id,
            mechanic_id: event.mechanic_id,
            diagnosis: event.reason.clone(),
            estimated_completion: None,
            lines: vec![seed],
            occurred_at,
        }
    }
}

/// Command: UpdateOrder (diagnosis, mechanic, estimated completion).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOrder {
    pub order_id: RepairOrderId,
    pub patch: OrderPatch,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddServiceLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddServiceLine {
    pub order_id: RepairOrderId,
    pub line: NewServiceLine,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveServiceLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveServiceLine {
    pub order_id: RepairOrderId,
    pub line_id: ServiceLineId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateServiceLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateServiceLine {
    pub order_id: RepairOrderId,
    pub line_id: ServiceLineId,
    pub patch: ServiceLinePatch,
    pub occurred_at: DateTime<Utc>,
}

/// Command: TransitionServiceLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionServiceLine {
    pub order_id: RepairOrderId,
    pub line_id: ServiceLineId,
    pub status: ServiceLineStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddPartUsage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPartUsage {
    pub order_id: RepairOrderId,
    pub line_id: ServiceLineId,
    pub part_id: PartId,
    pub quantity: u32,
    pub unit_price: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Command: TransitionOrder (start / finalize / deliver / cancel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOrder {
    pub order_id: RepairOrderId,
    pub status: OrderStatus,
    /// Cancellation reason; ignored for other targets.
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairOrderCommand {
    OpenOrder(OpenOrder),
    UpdateOrder(UpdateOrder),
    AddServiceLine(AddServiceLine),
    RemoveServiceLine(RemoveServiceLine),
    UpdateServiceLine(UpdateServiceLine),
    TransitionServiceLine(TransitionServiceLine),
    AddPartUsage(AddPartUsage),
    TransitionOrder(TransitionOrder),
}

impl Command for RepairOrderCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        let id = match self {
            RepairOrderCommand::OpenOrder(c) => c.order_id,
            RepairOrderCommand::UpdateOrder(c) => c.order_id,
            RepairOrderCommand::AddServiceLine(c) => c.order_id,
            RepairOrderCommand::RemoveServiceLine(c) => c.order_id,
            RepairOrderCommand::UpdateServiceLine(c) => c.order_id,
            RepairOrderCommand::TransitionServiceLine(c) => c.order_id,
            RepairOrderCommand::AddPartUsage(c) => c.order_id,
            RepairOrderCommand::TransitionOrder(c) => c.order_id,
        };
        id.0
    }
}

/// Event: OrderOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderOpened {
    pub order_id: RepairOrderId,
    pub appointment_id: Option<AppointmentId>,
    pub customer_id: CustomerId,
    pub vehicle_id: VehicleId,
    pub mechanic_id: Option<MechanicId>,
    pub diagnosis: String,
    pub created_on: NaiveDate,
    pub estimated_completion: Option<NaiveDate>,
    pub lines: Vec<ServiceLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderDetailsUpdated (full post-update values).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDetailsUpdated {
    pub order_id: RepairOrderId,
    pub diagnosis: String,
    pub mechanic_id: Option<MechanicId>,
    pub estimated_completion: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ServiceLineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLineAdded {
    pub order_id: RepairOrderId,
    pub line: ServiceLine,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ServiceLineRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLineRemoved {
    pub order_id: RepairOrderId,
    pub line_id: ServiceLineId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ServiceLineUpdated (full post-update values).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLineUpdated {
    pub order_id: RepairOrderId,
    pub line_id: ServiceLineId,
    pub kind: String,
    pub name: String,
    pub description: String,
    pub labor_cost: Money,
    pub estimated_minutes: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ServiceLineStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLineStatusChanged {
    pub order_id: RepairOrderId,
    pub line_id: ServiceLineId,
    pub from: ServiceLineStatus,
    pub to: ServiceLineStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PartUsageAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartUsageAdded {
    pub order_id: RepairOrderId,
    pub line_id: ServiceLineId,
    pub usage: PartUsage,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusChanged {
    pub order_id: RepairOrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub reason: Option<String>,
    /// True when caused by a service line transition rather than requested.
    pub derived: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderReadyForBilling.
///
/// The sole trigger for invoice creation. Billing uses `items` and `cost` as
/// given and never re-reads the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReadyForBilling {
    pub order_id: RepairOrderId,
    pub customer_id: CustomerId,
    pub vehicle_id: VehicleId,
    pub cost: CostBreakdown,
    pub items: Vec<BillableItem>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairOrderEvent {
    OrderOpened(OrderOpened),
    OrderDetailsUpdated(OrderDetailsUpdated),
    ServiceLineAdded(ServiceLineAdded),
    ServiceLineRemoved(ServiceLineRemoved),
    ServiceLineUpdated(ServiceLineUpdated),
    ServiceLineStatusChanged(ServiceLineStatusChanged),
    PartUsageAdded(PartUsageAdded),
    OrderStatusChanged(OrderStatusChanged),
    OrderReadyForBilling(OrderReadyForBilling),
}

impl Event for RepairOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RepairOrderEvent::OrderOpened(_) => topics::CREATED,
            RepairOrderEvent::OrderDetailsUpdated(_) => topics::UPDATED,
            RepairOrderEvent::ServiceLineAdded(_) => topics::LINE_ADDED,
            RepairOrderEvent::ServiceLineRemoved(_) => topics::LINE_REMOVED,
            RepairOrderEvent::ServiceLineUpdated(_) => topics::LINE_UPDATED,
            RepairOrderEvent::ServiceLineStatusChanged(_) => topics::LINE_STATUS_CHANGED,
            RepairOrderEvent::PartUsageAdded(_) => topics::PART_ADDED,
            RepairOrderEvent::OrderStatusChanged(_) => topics::STATUS_CHANGED,
            RepairOrderEvent::OrderReadyForBilling(_) => topics::READY_FOR_BILLING,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RepairOrderEvent::OrderOpened(e) => e.occurred_at,
            RepairOrderEvent::OrderDetailsUpdated(e) => e.occurred_at,
            RepairOrderEvent::ServiceLineAdded(e) => e.occurred_at,
            RepairOrderEvent::ServiceLineRemoved(e) => e.occurred_at,
            RepairOrderEvent::ServiceLineUpdated(e) => e.occurred_at,
            RepairOrderEvent::ServiceLineStatusChanged(e) => e.occurred_at,
            RepairOrderEvent::PartUsageAdded(e) => e.occurred_at,
            RepairOrderEvent::OrderStatusChanged(e) => e.occurred_at,
            RepairOrderEvent::OrderReadyForBilling(e) => e.occurred_at,
        }
    }
}

impl Aggregate for RepairOrder {
    type Command = RepairOrderCommand;
    type Event = RepairOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RepairOrderEvent::OrderOpened(e) => {
                self.id = e.order_id;
                self.appointment_id = e.appointment_id;
                self.customer_id = e.customer_id;
                self.vehicle_id = e.vehicle_id;
                self.mechanic_id = e.mechanic_id;
                self.diagnosis = e.diagnosis.clone();
                self.created_on = e.created_on;
                self.estimated_completion = e.estimated_completion;
                self.lines = e.lines.clone();
                self.status = OrderStatus::Pending;
                self.created = true;
            }
            RepairOrderEvent::OrderDetailsUpdated(e) => {
                self.diagnosis = e.diagnosis.clone();
                self.mechanic_id = e.mechanic_id;
                self.estimated_completion = e.estimated_completion;
            }
            RepairOrderEvent::ServiceLineAdded(e) => {
                self.lines.push(e.line.clone());
            }
            RepairOrderEvent::ServiceLineRemoved(e) => {
                self.lines.retain(|l| l.id != e.line_id);
            }
            RepairOrderEvent::ServiceLineUpdated(e) => {
                if let Some(line) = self.line_mut(e.line_id) {
                    line.kind = e.kind.clone();
                    line.name = e.name.clone();
                    line.description = e.description.clone();
                    line.labor_cost = e.labor_cost;
                    line.estimated_minutes = e.estimated_minutes;
                }
            }
            RepairOrderEvent::ServiceLineStatusChanged(e) => {
                if let Some(line) = self.line_mut(e.line_id) {
                    line.status = e.to;
                }
            }
            RepairOrderEvent::PartUsageAdded(e) => {
                if let Some(line) = self.line_mut(e.line_id) {
                    line.parts.push(e.usage.clone());
                }
            }
            RepairOrderEvent::OrderStatusChanged(e) => {
                self.status = e.to;
                if e.to == OrderStatus::Cancelled {
                    self.cancellation_reason = e.reason.clone();
                }
            }
            RepairOrderEvent::OrderReadyForBilling(_) => {}
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            RepairOrderCommand::OpenOrder(cmd) => self.handle_open(cmd),
            RepairOrderCommand::UpdateOrder(cmd) => self.handle_update(cmd),
            RepairOrderCommand::AddServiceLine(cmd) => self.handle_add_line(cmd),
            RepairOrderCommand::RemoveServiceLine(cmd) => self.handle_remove_line(cmd),
            RepairOrderCommand::UpdateServiceLine(cmd) => self.handle_update_line(cmd),
            RepairOrderCommand::TransitionServiceLine(cmd) => self.handle_line_transition(cmd),
            RepairOrderCommand::AddPartUsage(cmd) => self.handle_add_part(cmd),
            RepairOrderCommand::TransitionOrder(cmd) => self.handle_transition(cmd),
        }
    }
}

impl RepairOrder {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: RepairOrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_modifiable(&self) -> Result<(), DomainError> {
        if self.status.is_locked() {
            return Err(DomainError::invariant(format!(
                "cannot modify service lines of an order that is {}",
                self.status
            )));
        }
        Ok(())
    }

    fn existing_line(&self, line_id: ServiceLineId) -> Result<&ServiceLine, DomainError> {
        self.line(line_id).ok_or_else(DomainError::not_found)
    }

    fn status_changed(
        &self,
        from: OrderStatus,
        to: OrderStatus,
        reason: Option<String>,
        derived: bool,
        occurred_at: DateTime<Utc>,
    ) -> RepairOrderEvent {
        RepairOrderEvent::OrderStatusChanged(OrderStatusChanged {
            order_id: self.id,
            from,
            to,
            reason,
            derived,
            occurred_at,
        })
    }

    /// Billing snapshot of the order as it is now.
    fn ready_for_billing(&self, occurred_at: DateTime<Utc>) -> DomainResult<RepairOrderEvent> {
        Ok(RepairOrderEvent::OrderReadyForBilling(OrderReadyForBilling {
            order_id: self.id,
            customer_id: self.customer_id,
            vehicle_id: self.vehicle_id,
            cost: self.cost()?,
            items: billable_items(&self.lines)?,
            occurred_at,
        }))
    }

    fn handle_open(&self, cmd: &OpenOrder) -> Result<Vec<RepairOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("repair order already exists"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation(
                "an order needs at least one service line",
            ));
        }
        for line in &cmd.lines {
            line.validate()?;
        }

        Ok(vec![RepairOrderEvent::OrderOpened(OrderOpened {
            order_id: cmd.order_id,
            appointment_id: cmd.appointment_id,
            customer_id: cmd.customer_id,
            vehicle_id: cmd.vehicle_id,
            mechanic_id: cmd.mechanic_id,
            diagnosis: cmd.diagnosis.clone(),
            created_on: cmd.occurred_at.date_naive(),
            estimated_completion: cmd.estimated_completion,
            lines: cmd
                .lines
                .iter()
                .cloned()
                .map(|line| line.into_line(cmd.order_id))
                .collect(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateOrder) -> Result<Vec<RepairOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        if matches!(self.status, OrderStatus::Delivered | OrderStatus::Cancelled) {
            return Err(DomainError::invariant(format!(
                "cannot update an order that is {}",
                self.status
            )));
        }
        if cmd.patch.is_empty() {
            return Err(DomainError::validation("patch must change at least one field"));
        }

        Ok(vec![RepairOrderEvent::OrderDetailsUpdated(OrderDetailsUpdated {
            order_id: self.id,
            diagnosis: cmd
                .patch
                .diagnosis
                .clone()
                .unwrap_or_else(|| self.diagnosis.clone()),
            mechanic_id: cmd.patch.mechanic_id.or(self.mechanic_id),
            estimated_completion: cmd.patch.estimated_completion.or(self.estimated_completion),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddServiceLine) -> Result<Vec<RepairOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_modifiable()?;
        cmd.line.validate()?;

        if self.line(cmd.line.line_id).is_some() {
            return Err(DomainError::conflict("service line already exists"));
        }

        Ok(vec![RepairOrderEvent::ServiceLineAdded(ServiceLineAdded {
            order_id: self.id,
            line: cmd.line.clone().into_line(self.id),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_line(
        &self,
        cmd: &RemoveServiceLine,
    ) -> Result<Vec<RepairOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_modifiable()?;
        self.existing_line(cmd.line_id)?;

        if self.lines.len() == 1 {
            return Err(DomainError::invariant(
                "cannot remove the only service line of an order",
            ));
        }

        Ok(vec![RepairOrderEvent::ServiceLineRemoved(ServiceLineRemoved {
            order_id: self.id,
            line_id: cmd.line_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_line(
        &self,
        cmd: &UpdateServiceLine,
    ) -> Result<Vec<RepairOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_modifiable()?;

        if cmd.patch.is_empty() {
            return Err(DomainError::validation("patch must change at least one field"));
        }
        let next = self.existing_line(cmd.line_id)?.patched(&cmd.patch)?;

        Ok(vec![RepairOrderEvent::ServiceLineUpdated(ServiceLineUpdated {
            order_id: self.id,
            line_id: cmd.line_id,
            kind: next.kind,
            name: next.name,
            description: next.description,
            labor_cost: next.labor_cost,
            estimated_minutes: next.estimated_minutes,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_part(&self, cmd: &AddPartUsage) -> Result<Vec<RepairOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_modifiable()?;
        self.existing_line(cmd.line_id)?;

        let usage = PartUsage {
            part_id: cmd.part_id,
            quantity: cmd.quantity,
            unit_price: cmd.unit_price,
        };
        usage.validate()?;

        Ok(vec![RepairOrderEvent::PartUsageAdded(PartUsageAdded {
            order_id: self.id,
            line_id: cmd.line_id,
            usage,
            occurred_at: cmd.occurred_at,
        })])
    }

    /// Line move plus the order-level promotions it triggers:
    /// first line started on a PENDING order starts the order; all lines
    /// completed on an open order finalizes it.
    fn handle_line_transition(
        &self,
        cmd: &TransitionServiceLine,
    ) -> Result<Vec<RepairOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_modifiable()?;

        let line = self.existing_line(cmd.line_id)?;
        line.status.ensure_transition(cmd.status)?;

        let mut events = vec![RepairOrderEvent::ServiceLineStatusChanged(
            ServiceLineStatusChanged {
                order_id: self.id,
                line_id: cmd.line_id,
                from: line.status,
                to: cmd.status,
                occurred_at: cmd.occurred_at,
            },
        )];

        let mut next = self.clone();
        next.apply(&events[0]);

        let all_completed = next
            .lines
            .iter()
            .all(|l| l.status == ServiceLineStatus::Completed);
        let starts_work = cmd.status == ServiceLineStatus::InProgress
            || (all_completed && next.status == OrderStatus::Pending);

        if starts_work && next.status == OrderStatus::Pending {
            let e = self.status_changed(
                OrderStatus::Pending,
                OrderStatus::InProgress,
                None,
                true,
                cmd.occurred_at,
            );
            next.apply(&e);
            events.push(e);
        }

        if all_completed && next.status == OrderStatus::InProgress {
            let e = self.status_changed(
                OrderStatus::InProgress,
                OrderStatus::Finalized,
                None,
                true,
                cmd.occurred_at,
            );
            next.apply(&e);
            events.push(e);
            events.push(next.ready_for_billing(cmd.occurred_at)?);
        }

        Ok(events)
    }

    fn handle_transition(&self, cmd: &TransitionOrder) -> Result<Vec<RepairOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;
        self.status.ensure_transition(cmd.status)?;

        let reason = match cmd.status {
            OrderStatus::Cancelled => cmd.reason.clone(),
            _ => None,
        };
        let mut events = vec![self.status_changed(
            self.status,
            cmd.status,
            reason,
            false,
            cmd.occurred_at,
        )];

        if cmd.status == OrderStatus::Finalized {
            events.push(self.ready_for_billing(cmd.occurred_at)?);
        }

        Ok(events)
    }
}
