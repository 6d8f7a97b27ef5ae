//! Order Store: repair orders, their service lines and consumed parts.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use torque_core::{
    Aggregate, AggregateId, Clock, CustomerId, DomainError, MechanicId, Money, PartId, VehicleId,
};
use torque_events::{EventBus, EventEnvelope};
use torque_orders::{
    AddPartUsage, AddServiceLine, CostBreakdown, NewServiceLine, OpenOrder, OrderPatch,
    OrderStatus, RemoveServiceLine, RepairOrder, RepairOrderCommand, RepairOrderId,
    ServiceLineId, ServiceLinePatch, ServiceLineStatus, TransitionOrder, TransitionServiceLine,
    UpdateOrder, UpdateServiceLine,
};
use torque_scheduling::{AppointmentCompleted, AppointmentId};

use super::{ORDER_AGGREGATE, StoreResult};
use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::external::{CollaboratorError, PartsInventory};
use crate::read_model::{InMemoryRecordStore, RecordStore};

/// A service line as requested by staff; the store assigns its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLineDraft {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub labor_cost: Money,
    pub estimated_minutes: u32,
}

impl ServiceLineDraft {
    fn into_new_line(self) -> NewServiceLine {
        NewServiceLine {
            line_id: ServiceLineId::new(AggregateId::new()),
            kind: self.kind,
            name: self.name,
            description: self.description,
            labor_cost: self.labor_cost,
            estimated_minutes: self.estimated_minutes,
        }
    }
}

/// Staff-created order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    #[serde(default)]
    pub appointment_id: Option<AppointmentId>,
    pub customer_id: CustomerId,
    pub vehicle_id: VehicleId,
    #[serde(default)]
    pub mechanic_id: Option<MechanicId>,
    #[serde(default)]
    pub diagnosis: String,
    #[serde(default)]
    pub estimated_completion: Option<NaiveDate>,
    pub lines: Vec<ServiceLineDraft>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub mechanic_id: Option<MechanicId>,
    pub customer_id: Option<CustomerId>,
    pub vehicle_id: Option<VehicleId>,
    /// Inclusive bounds on the creation date.
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl OrderFilter {
    pub fn matches(&self, order: &RepairOrder) -> bool {
        self.status.is_none_or(|s| order.status() == s)
            && self.mechanic_id.is_none_or(|m| order.mechanic_id() == Some(m))
            && self.customer_id.is_none_or(|c| order.customer_id() == c)
            && self.vehicle_id.is_none_or(|v| order.vehicle_id() == v)
            && self.from.is_none_or(|d| order.created_on() >= d)
            && self.to.is_none_or(|d| order.created_on() <= d)
    }
}

fn make_order(id: AggregateId) -> RepairOrder {
    RepairOrder::empty(RepairOrderId::new(id))
}

pub struct OrderStore<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    records: InMemoryRecordStore<RepairOrderId, RepairOrder>,
    clock: Arc<dyn Clock>,
    inventory: Arc<dyn PartsInventory>,
}

impl<S, B> OrderStore<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        clock: Arc<dyn Clock>,
        inventory: Arc<dyn PartsInventory>,
    ) -> Self {
        Self {
            dispatcher,
            records: InMemoryRecordStore::new(),
            clock,
            inventory,
        }
    }

    /// Materialize the order for a completed appointment.
    ///
    /// Idempotent: the order id is derived from the appointment id, so a
    /// redelivered event (or a concurrent duplicate losing the race) resolves
    /// to the order that already exists.
    pub fn on_appointment_completed(&self, event: &AppointmentCompleted) -> StoreResult<RepairOrder> {
        let command = OpenOrder::from_completed_appointment(event, self.clock.now());
        let order_id = command.order_id;

        let existing = self.dispatcher.load(order_id.0, make_order)?;
        if existing.is_created() {
            debug!(
                order_id = %order_id,
                appointment_id = %event.appointment_id,
                "order already materialized for appointment"
            );
            self.records.upsert(order_id, existing.clone());
            return Ok(existing);
        }

        match self.execute(order_id, RepairOrderCommand::OpenOrder(command)) {
            Ok(order) => {
                info!(
                    order_id = %order_id,
                    appointment_id = %event.appointment_id,
                    "order opened from completed appointment"
                );
                Ok(order)
            }
            Err(err) if err.is_conflict() => {
                debug!(order_id = %order_id, "lost order creation race; using existing order");
                let order = self.dispatcher.load(order_id.0, make_order)?;
                self.records.upsert(order_id, order.clone());
                Ok(order)
            }
            Err(err) => Err(err),
        }
    }

    /// Staff-created order in PENDING status.
    ///
    /// An order that references an appointment takes the appointment's derived
    /// id, so at most one order ever exists per appointment whichever path
    /// opens it first.
    pub fn create(&self, request: NewOrder) -> StoreResult<RepairOrder> {
        let order_id = request
            .appointment_id
            .map(RepairOrderId::for_appointment)
            .unwrap_or_else(|| RepairOrderId::new(AggregateId::new()));
        let command = RepairOrderCommand::OpenOrder(OpenOrder {
            order_id,
            appointment_id: request.appointment_id,
            customer_id: request.customer_id,
            vehicle_id: request.vehicle_id,
            mechanic_id: request.mechanic_id,
            diagnosis: request.diagnosis,
            estimated_completion: request.estimated_completion,
            lines: request
                .lines
                .into_iter()
                .map(ServiceLineDraft::into_new_line)
                .collect(),
            occurred_at: self.clock.now(),
        });
        let order = self.execute(order_id, command)?;
        info!(order_id = %order_id, lines = order.lines().len(), "order created");
        Ok(order)
    }

    pub fn update(&self, order_id: RepairOrderId, patch: OrderPatch) -> StoreResult<RepairOrder> {
        let command = RepairOrderCommand::UpdateOrder(UpdateOrder {
            order_id,
            patch,
            occurred_at: self.clock.now(),
        });
        self.execute(order_id, command)
    }

    pub fn update_diagnosis(&self, order_id: RepairOrderId, diagnosis: String) -> StoreResult<RepairOrder> {
        self.update(
            order_id,
            OrderPatch {
                diagnosis: Some(diagnosis),
                ..OrderPatch::default()
            },
        )
    }

    pub fn assign_mechanic(&self, order_id: RepairOrderId, mechanic_id: MechanicId) -> StoreResult<RepairOrder> {
        self.update(
            order_id,
            OrderPatch {
                mechanic_id: Some(mechanic_id),
                ..OrderPatch::default()
            },
        )
    }

    pub fn set_estimated_completion(
        &self,
        order_id: RepairOrderId,
        estimated_completion: NaiveDate,
    ) -> StoreResult<RepairOrder> {
        self.update(
            order_id,
            OrderPatch {
                estimated_completion: Some(estimated_completion),
                ..OrderPatch::default()
            },
        )
    }

    pub fn add_service_line(&self, order_id: RepairOrderId, draft: ServiceLineDraft) -> StoreResult<RepairOrder> {
        let command = RepairOrderCommand::AddServiceLine(AddServiceLine {
            order_id,
            line: draft.into_new_line(),
            occurred_at: self.clock.now(),
        });
        self.execute(order_id, command)
    }

    pub fn remove_service_line(&self, order_id: RepairOrderId, line_id: ServiceLineId) -> StoreResult<RepairOrder> {
        let command = RepairOrderCommand::RemoveServiceLine(RemoveServiceLine {
            order_id,
            line_id,
            occurred_at: self.clock.now(),
        });
        self.execute(order_id, command)
    }

    pub fn update_service_line(
        &self,
        order_id: RepairOrderId,
        line_id: ServiceLineId,
        patch: ServiceLinePatch,
    ) -> StoreResult<RepairOrder> {
        let command = RepairOrderCommand::UpdateServiceLine(UpdateServiceLine {
            order_id,
            line_id,
            patch,
            occurred_at: self.clock.now(),
        });
        self.execute(order_id, command)
    }

    /// Move a line; derived order promotions are decided in the same write.
    pub fn transition_service_line(
        &self,
        order_id: RepairOrderId,
        line_id: ServiceLineId,
        status: ServiceLineStatus,
    ) -> StoreResult<RepairOrder> {
        let command = RepairOrderCommand::TransitionServiceLine(TransitionServiceLine {
            order_id,
            line_id,
            status,
            occurred_at: self.clock.now(),
        });
        let order = self.execute(order_id, command)?;
        info!(
            order_id = %order_id,
            line_id = %line_id,
            line_status = %status,
            order_status = %order.status(),
            "service line status changed"
        );
        Ok(order)
    }

    /// Record a part consumed by a line and take it out of stock.
    ///
    /// Insufficient stock rejects the usage. An unreachable inventory is
    /// logged and the usage is still recorded. If recording fails after stock
    /// was taken, the stock is put back.
    pub fn add_part_usage(
        &self,
        order_id: RepairOrderId,
        line_id: ServiceLineId,
        part_id: PartId,
        quantity: u32,
        unit_price: Money,
    ) -> StoreResult<RepairOrder> {
        let command = RepairOrderCommand::AddPartUsage(AddPartUsage {
            order_id,
            line_id,
            part_id,
            quantity,
            unit_price,
            occurred_at: self.clock.now(),
        });

        // Decide against the current snapshot before touching stock.
        let current = self.dispatcher.load(order_id.0, make_order)?;
        current.handle(&command)?;

        let consumed = match self.inventory.consume(part_id, quantity) {
            Ok(()) => true,
            Err(CollaboratorError::InsufficientStock {
                requested, available, ..
            }) => {
                return Err(DomainError::conflict(format!(
                    "insufficient stock for part {part_id}: requested {requested}, available {available}"
                ))
                .into());
            }
            Err(CollaboratorError::NotFound) => return Err(DomainError::not_found().into()),
            Err(err) => {
                warn!(
                    order_id = %order_id,
                    part_id = %part_id,
                    error = %err,
                    "stock adjustment failed; recording part usage anyway"
                );
                false
            }
        };

        match self.execute(order_id, command) {
            Ok(order) => Ok(order),
            Err(err) => {
                if consumed {
                    if let Err(restock) = self.inventory.restock(part_id, quantity) {
                        warn!(part_id = %part_id, error = %restock, "failed to return stock");
                    }
                }
                Err(err)
            }
        }
    }

    pub fn transition(
        &self,
        order_id: RepairOrderId,
        status: OrderStatus,
        reason: Option<String>,
    ) -> StoreResult<RepairOrder> {
        let command = RepairOrderCommand::TransitionOrder(TransitionOrder {
            order_id,
            status,
            reason,
            occurred_at: self.clock.now(),
        });
        let order = self.execute(order_id, command)?;
        info!(order_id = %order_id, status = %status, "order status changed");
        Ok(order)
    }

    pub fn start(&self, order_id: RepairOrderId) -> StoreResult<RepairOrder> {
        self.transition(order_id, OrderStatus::InProgress, None)
    }

    /// Finalize and hand the billing snapshot to the relay.
    pub fn finalize(&self, order_id: RepairOrderId) -> StoreResult<RepairOrder> {
        self.transition(order_id, OrderStatus::Finalized, None)
    }

    pub fn deliver(&self, order_id: RepairOrderId) -> StoreResult<RepairOrder> {
        self.transition(order_id, OrderStatus::Delivered, None)
    }

    pub fn cancel(&self, order_id: RepairOrderId, reason: Option<String>) -> StoreResult<RepairOrder> {
        self.transition(order_id, OrderStatus::Cancelled, reason)
    }

    /// Cost derived from the current lines; never stored.
    pub fn compute_cost(&self, order_id: RepairOrderId) -> StoreResult<CostBreakdown> {
        Ok(self.get(order_id)?.cost()?)
    }

    pub fn get(&self, order_id: RepairOrderId) -> StoreResult<RepairOrder> {
        self.records
            .get(&order_id)
            .ok_or_else(|| DomainError::not_found().into())
    }

    /// Orders matching `filter`, newest first.
    pub fn list(&self, filter: &OrderFilter) -> Vec<RepairOrder> {
        let mut out: Vec<RepairOrder> = self
            .records
            .list()
            .into_iter()
            .filter(|o| filter.matches(o))
            .collect();
        out.sort_by(|a, b| b.created_on().cmp(&a.created_on()));
        out
    }

    pub fn by_mechanic(&self, mechanic_id: MechanicId) -> Vec<RepairOrder> {
        self.list(&OrderFilter {
            mechanic_id: Some(mechanic_id),
            ..OrderFilter::default()
        })
    }

    pub fn by_vehicle(&self, vehicle_id: VehicleId) -> Vec<RepairOrder> {
        self.list(&OrderFilter {
            vehicle_id: Some(vehicle_id),
            ..OrderFilter::default()
        })
    }

    fn execute(&self, order_id: RepairOrderId, command: RepairOrderCommand) -> Result<RepairOrder, DispatchError> {
        let out = self
            .dispatcher
            .dispatch(order_id.0, ORDER_AGGREGATE, &command, make_order)?;
        self.records.upsert(order_id, out.aggregate.clone());
        Ok(out.aggregate)
    }
}
