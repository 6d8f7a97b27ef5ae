//! Repair order cost computation.
//!
//! Cost is always derived from the lines; it is never stored on the order.

use serde::{Deserialize, Serialize};

use torque_core::{DomainResult, Money, TaxedTotals};

use crate::service_line::ServiceLine;

/// Labor, parts and the taxed totals of an order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub labor: Money,
    pub parts: Money,
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
}

impl CostBreakdown {
    pub fn compute(lines: &[ServiceLine]) -> DomainResult<Self> {
        let mut labor = Money::ZERO;
        let mut parts = Money::ZERO;
        for line in lines {
            labor = labor.checked_add(line.labor_cost)?;
            parts = parts.checked_add(line.parts_cost()?)?;
        }

        let totals = TaxedTotals::from_subtotal(labor.checked_add(parts)?);
        Ok(Self {
            labor,
            parts,
            subtotal: totals.subtotal,
            tax: totals.tax,
            total: totals.total,
        })
    }
}

/// One invoiceable row; the snapshot handed to billing at finalize time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillableItem {
    pub description: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub amount: Money,
}

/// Labor row per line, then one row per part usage.
///
/// The amounts add up to `CostBreakdown::subtotal` for the same lines.
pub fn billable_items(lines: &[ServiceLine]) -> DomainResult<Vec<BillableItem>> {
    let mut items = Vec::new();
    for line in lines {
        items.push(BillableItem {
            description: line.name.clone(),
            quantity: 1,
            unit_price: line.labor_cost,
            amount: line.labor_cost,
        });
        for usage in &line.parts {
            items.push(BillableItem {
                description: format!("{} / part {}", line.name, usage.part_id),
                quantity: usage.quantity,
                unit_price: usage.unit_price,
                amount: usage.cost()?,
            });
        }
    }
    Ok(items)
}
