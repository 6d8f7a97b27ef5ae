use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use chrono::NaiveDate;
use torque_billing::{Invoice, InvoiceStatus, PaymentStatus};
use torque_core::{MechanicId, Money, PartId};
use torque_infra::saga::BookingOutcome;
use torque_infra::stores::{PaymentRecord, ServiceLineDraft};
use torque_orders::{CostBreakdown, OrderStatus, RepairOrder, ServiceLine, ServiceLineStatus};
use torque_scheduling::Appointment;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct NoteRequest {
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    #[serde(default)]
    pub site_id: Option<torque_core::SiteId>,
}

/// Service line as entered at the counter; durations are in hours.
#[derive(Debug, Deserialize)]
pub struct ServiceLineRequest {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub labor_cost: Money,
    pub estimated_hours: f64,
}

impl ServiceLineRequest {
    pub fn into_draft(self) -> Result<ServiceLineDraft, String> {
        Ok(ServiceLineDraft {
            estimated_minutes: hours_to_minutes(self.estimated_hours)?,
            kind: self.kind,
            name: self.name,
            description: self.description,
            labor_cost: self.labor_cost,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub appointment_id: Option<torque_scheduling::AppointmentId>,
    pub customer_id: torque_core::CustomerId,
    pub vehicle_id: torque_core::VehicleId,
    #[serde(default)]
    pub mechanic_id: Option<MechanicId>,
    #[serde(default)]
    pub diagnosis: String,
    #[serde(default)]
    pub estimated_completion: Option<NaiveDate>,
    pub lines: Vec<ServiceLineRequest>,
}

/// Line edit; `estimated_hours` replaces the minutes field of the domain patch.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateServiceLineRequest {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub labor_cost: Option<Money>,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
}

impl UpdateServiceLineRequest {
    pub fn into_patch(self) -> Result<torque_orders::ServiceLinePatch, String> {
        Ok(torque_orders::ServiceLinePatch {
            kind: self.kind,
            name: self.name,
            description: self.description,
            labor_cost: self.labor_cost,
            estimated_minutes: self.estimated_hours.map(hours_to_minutes).transpose()?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct OrderStatusRequest {
    pub status: OrderStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LineStatusRequest {
    pub status: ServiceLineStatus,
}

#[derive(Debug, Deserialize)]
pub struct PartUsageRequest {
    pub part_id: PartId,
    pub quantity: u32,
    pub unit_price: Money,
}

#[derive(Debug, Deserialize)]
pub struct DiagnosisRequest {
    pub diagnosis: String,
}

#[derive(Debug, Deserialize)]
pub struct MechanicRequest {
    pub mechanic_id: MechanicId,
}

#[derive(Debug, Deserialize)]
pub struct InvoiceStatusRequest {
    pub status: InvoiceStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentStatusRequest {
    pub status: PaymentStatus,
}

pub fn hours_to_minutes(hours: f64) -> Result<u32, String> {
    if !hours.is_finite() || hours < 0.0 {
        return Err("estimated_hours must be a non-negative number".to_string());
    }
    let minutes = (hours * 60.0).round();
    if minutes > f64::from(u32::MAX) {
        return Err("estimated_hours is too large".to_string());
    }
    Ok(minutes as u32)
}

fn minutes_to_hours(minutes: u32) -> f64 {
    f64::from(minutes) / 60.0
}

// -------------------------
// Response mapping
// -------------------------

pub fn appointment_to_json(a: &Appointment) -> JsonValue {
    let schedule = a.schedule();
    json!({
        "id": a.id_typed().to_string(),
        "customer_id": a.customer_id().to_string(),
        "vehicle_id": a.vehicle_id().to_string(),
        "mechanic_id": a.mechanic_id().map(|m| m.to_string()),
        "site_id": a.site_id().map(|s| s.to_string()),
        "service": {
            "service_id": a.service().service_id.to_string(),
            "name": a.service().name,
            "price": a.service().price,
        },
        "date": schedule.date,
        "time": schedule.time.format("%H:%M").to_string(),
        "duration_minutes": schedule.duration_minutes,
        "reason": a.reason(),
        "status": a.status(),
    })
}

fn line_to_json(l: &ServiceLine) -> JsonValue {
    json!({
        "id": l.id.to_string(),
        "order_id": l.order_id.to_string(),
        "kind": l.kind,
        "name": l.name,
        "description": l.description,
        "labor_cost": l.labor_cost,
        "estimated_hours": minutes_to_hours(l.estimated_minutes),
        "status": l.status,
        "parts": l.parts.iter().map(|p| json!({
            "part_id": p.part_id.to_string(),
            "quantity": p.quantity,
            "unit_price": p.unit_price,
        })).collect::<Vec<_>>(),
    })
}

pub fn cost_to_json(c: &CostBreakdown) -> JsonValue {
    json!({
        "labor": c.labor,
        "parts": c.parts,
        "subtotal": c.subtotal,
        "tax": c.tax,
        "total": c.total,
    })
}

pub fn order_to_json(o: &RepairOrder) -> JsonValue {
    json!({
        "id": o.id_typed().to_string(),
        "appointment_id": o.appointment_id().map(|a| a.to_string()),
        "customer_id": o.customer_id().to_string(),
        "vehicle_id": o.vehicle_id().to_string(),
        "mechanic_id": o.mechanic_id().map(|m| m.to_string()),
        "created_on": o.created_on(),
        "estimated_completion": o.estimated_completion(),
        "diagnosis": o.diagnosis(),
        "status": o.status(),
        "cancellation_reason": o.cancellation_reason(),
        "lines": o.lines().iter().map(line_to_json).collect::<Vec<_>>(),
        "cost": o.cost().ok().as_ref().map(cost_to_json),
    })
}

fn payment_fields(invoice_id: String, p: &torque_billing::Payment) -> JsonValue {
    json!({
        "id": p.id.to_string(),
        "invoice_id": invoice_id,
        "amount": p.amount,
        "method": p.method,
        "status": p.status,
        "reference": p.reference,
        "paid_on": p.paid_on,
    })
}

pub fn payment_to_json(r: &PaymentRecord) -> JsonValue {
    payment_fields(r.invoice_id.to_string(), &r.payment)
}

pub fn invoice_to_json(i: &Invoice) -> JsonValue {
    let totals = i.totals();
    json!({
        "id": i.id_typed().to_string(),
        "order_id": i.order_id().to_string(),
        "customer_id": i.customer_id().to_string(),
        "number": i.number().map(|n| n.as_str()),
        "issued_on": i.issued_on(),
        "status": i.status(),
        "void_reason": i.void_reason(),
        "payment_method_hint": i.payment_method_hint(),
        "subtotal": totals.subtotal,
        "tax": totals.tax,
        "total": totals.total,
        "paid": i.approved_total(),
        "remaining": i.remaining(),
        "items": i.items().iter().map(|item| json!({
            "description": item.description,
            "quantity": item.quantity,
            "unit_price": item.unit_price,
            "amount": item.amount,
        })).collect::<Vec<_>>(),
        "payments": i.payments().iter().map(|p| payment_fields(i.id_typed().to_string(), p)).collect::<Vec<_>>(),
    })
}

pub fn booking_to_json(b: &BookingOutcome) -> JsonValue {
    json!({
        "appointment": appointment_to_json(&b.appointment),
        "customer_id": b.customer_id.to_string(),
        "vehicle_id": b.vehicle_id.to_string(),
        "created_customer": b.created_customer,
        "created_vehicle": b.created_vehicle,
    })
}
