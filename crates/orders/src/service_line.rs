use serde::{Deserialize, Serialize};

use torque_core::{AggregateId, DomainError, DomainResult, Entity, Lifecycle, Money, PartId};

use crate::order::RepairOrderId;

/// Service line identifier (unique within the workspace, addressed through its order).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceLineId(pub AggregateId);

impl ServiceLineId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ServiceLineId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceLineStatus {
    Pending,
    InProgress,
    Completed,
}

impl core::fmt::Display for ServiceLineStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
        };
        f.write_str(s)
    }
}

impl Lifecycle for ServiceLineStatus {
    const ENTITY: &'static str = "service line";
    const ALL: &'static [Self] = &[Self::Pending, Self::InProgress, Self::Completed];

    fn next_states(self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::InProgress],
            Self::InProgress => &[Self::Completed],
            Self::Completed => &[],
        }
    }
}

/// Quantity of a part consumed by a service line, at the price snapshotted
/// when it was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartUsage {
    pub part_id: PartId,
    pub quantity: u32,
    pub unit_price: Money,
}

impl PartUsage {
    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        self.unit_price.ensure_non_negative("unit_price")
    }

    pub fn cost(&self) -> DomainResult<Money> {
        self.unit_price.times(self.quantity)
    }
}

/// Fields supplied when a line is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewServiceLine {
    pub line_id: ServiceLineId,
    pub kind: String,
    pub name: String,
    pub description: String,
    pub labor_cost: Money,
    pub estimated_minutes: u32,
}

impl NewServiceLine {
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("service line name cannot be empty"));
        }
        self.labor_cost.ensure_non_negative("labor_cost")
    }

    /// Line as owned by `order_id`, starting in PENDING.
    pub fn into_line(self, order_id: RepairOrderId) -> ServiceLine {
        ServiceLine {
            id: self.line_id,
            order_id,
            kind: self.kind,
            name: self.name,
            description: self.description,
            labor_cost: self.labor_cost,
            estimated_minutes: self.estimated_minutes,
            status: ServiceLineStatus::Pending,
            parts: Vec::new(),
        }
    }
}

/// Legal mutable fields of a service line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceLinePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labor_cost: Option<Money>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<u32>,
}

impl ServiceLinePatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// One billable unit of labor within a repair order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLine {
    pub id: ServiceLineId,
    pub order_id: RepairOrderId,
    pub kind: String,
    pub name: String,
    pub description: String,
    pub labor_cost: Money,
    pub estimated_minutes: u32,
    pub status: ServiceLineStatus,
    pub parts: Vec<PartUsage>,
}

impl Entity for ServiceLine {
    type Id = ServiceLineId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl ServiceLine {
    pub fn parts_cost(&self) -> DomainResult<Money> {
        self.parts
            .iter()
            .try_fold(Money::ZERO, |acc, p| acc.checked_add(p.cost()?))
    }

    /// Line with `patch` applied; the result is validated like a new line.
    pub fn patched(&self, patch: &ServiceLinePatch) -> DomainResult<ServiceLine> {
        let mut next = self.clone();
        if let Some(kind) = &patch.kind {
            next.kind = kind.clone();
        }
        if let Some(name) = &patch.name {
            next.name = name.clone();
        }
        if let Some(description) = &patch.description {
            next.description = description.clone();
        }
        if let Some(labor_cost) = patch.labor_cost {
            next.labor_cost = labor_cost;
        }
        if let Some(minutes) = patch.estimated_minutes {
            next.estimated_minutes = minutes;
        }

        if next.name.trim().is_empty() {
            return Err(DomainError::validation("service line name cannot be empty"));
        }
        next.labor_cost.ensure_non_negative("labor_cost")?;
        Ok(next)
    }
}
