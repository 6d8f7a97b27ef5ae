//! Repair orders domain module (event-sourced).
//!
//! Orders, their service lines and consumed parts, the order and line status
//! lifecycles with derived promotions, and cost computation. Pure domain logic
//! (no IO, no HTTP, no storage).

pub mod cost;
pub mod order;
pub mod service_line;

pub use cost::{BillableItem, CostBreakdown, billable_items};
pub use order::{
    AddPartUsage, AddServiceLine, DEFAULT_ESTIMATED_MINUTES, DEFAULT_LABOR_COST,
    DEFAULT_SERVICE_NAME, OpenOrder, OrderDetailsUpdated, OrderOpened, OrderPatch,
    OrderReadyForBilling, OrderStatus, OrderStatusChanged, PartUsageAdded, RemoveServiceLine,
    RepairOrder, RepairOrderCommand, RepairOrderEvent, RepairOrderId, ServiceLineAdded,
    ServiceLineRemoved, ServiceLineStatusChanged, ServiceLineUpdated, TransitionOrder,
    TransitionServiceLine, UpdateOrder, UpdateServiceLine, topics,
};
pub use service_line::{
    NewServiceLine, PartUsage, ServiceLine, ServiceLineId, ServiceLinePatch, ServiceLineStatus,
};
