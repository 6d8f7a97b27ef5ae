use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use torque_core::{
    Aggregate, AggregateId, AggregateRoot, CustomerId, DomainError, DomainResult, Lifecycle, Money,
    TaxedTotals, entity::find_by_id,
};
use torque_events::{Command, Event};
use torque_orders::{BillableItem, RepairOrderId};

use crate::number::InvoiceNumber;
use crate::payment::{Payment, PaymentId, PaymentMethod, PaymentStatus};

/// Topics published by the invoice/payment store.
pub mod topics {
    pub const INVOICE_CREATED: &str = "invoice.created";
    pub const INVOICE_PAID: &str = "invoice.paid";
    pub const INVOICE_VOIDED: &str = "invoice.voided";
    pub const PAYMENT_REGISTERED: &str = "payment.registered";
    pub const PAYMENT_STATUS_CHANGED: &str = "payment.status_changed";
}

/// Invoice identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub AggregateId);

impl InvoiceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// The one invoice an order can have.
    pub fn for_order(order_id: RepairOrderId) -> Self {
        Self(AggregateId::derived_from(&order_id.0, "invoice"))
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Invoice status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Void,
}

impl core::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Void => "VOID",
        };
        f.write_str(s)
    }
}

impl Lifecycle for InvoiceStatus {
    const ENTITY: &'static str = "invoice";
    const ALL: &'static [Self] = &[Self::Pending, Self::Paid, Self::Void];

    fn next_states(self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::Paid, Self::Void],
            Self::Paid | Self::Void => &[],
        }
    }
}

/// Invoice row, copied from the order's billing snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLineItem {
    pub description: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub amount: Money,
}

impl InvoiceLineItem {
    fn validate(&self) -> DomainResult<()> {
        if self.quantity == 0 {
            return Err(DomainError::validation("invoice line quantity must be positive"));
        }
        self.unit_price.ensure_non_negative("unit_price")?;
        if self.unit_price.times(self.quantity)? != self.amount {
            return Err(DomainError::validation(
                "invoice line amount must equal quantity x unit_price",
            ));
        }
        Ok(())
    }
}

impl From<BillableItem> for InvoiceLineItem {
    fn from(item: BillableItem) -> Self {
        Self {
            description: item.description,
            quantity: item.quantity,
            unit_price: item.unit_price,
            amount: item.amount,
        }
    }
}

/// Aggregate root: Invoice (owns its payments).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    order_id: RepairOrderId,
    customer_id: CustomerId,
    number: Option<InvoiceNumber>,
    issued_on: NaiveDate,
    items: Vec<InvoiceLineItem>,
    totals: TaxedTotals,
    payment_method_hint: Option<PaymentMethod>,
    status: InvoiceStatus,
    void_reason: Option<String>,
    payments: Vec<Payment>,
    version: u64,
    created: bool,
}

impl Invoice {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            order_id: RepairOrderId::new(AggregateId::nil()),
            customer_id: CustomerId::nil(),
            number: None,
            issued_on: NaiveDate::default(),
            items: Vec::new(),
            totals: TaxedTotals::from_subtotal(Money::ZERO),
            payment_method_hint: None,
            status: InvoiceStatus::Pending,
            void_reason: None,
            payments: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn order_id(&self) -> RepairOrderId {
        self.order_id
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn number(&self) -> Option<&InvoiceNumber> {
        self.number.as_ref()
    }

    pub fn issued_on(&self) -> NaiveDate {
        self.issued_on
    }

    pub fn items(&self) -> &[InvoiceLineItem] {
        &self.items
    }

    pub fn totals(&self) -> TaxedTotals {
        self.totals
    }

    pub fn payment_method_hint(&self) -> Option<PaymentMethod> {
        self.payment_method_hint
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn void_reason(&self) -> Option<&str> {
        self.void_reason.as_deref()
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn payment(&self, payment_id: PaymentId) -> Option<&Payment> {
        find_by_id(&self.payments, &payment_id)
    }

    /// Σ amounts of APPROVED payments.
    pub fn approved_total(&self) -> Money {
        self.payments
            .iter()
            .filter(|p| p.is_approved())
            .map(|p| p.amount)
            .sum()
    }

    /// What is still owed: total − Σ APPROVED.
    pub fn remaining(&self) -> Money {
        self.totals.total - self.approved_total()
    }

    fn payment_mut(&mut self, payment_id: PaymentId) -> Option<&mut Payment> {
        self.payments.iter_mut().find(|p| p.id == payment_id)
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: IssueInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueInvoice {
    pub invoice_id: InvoiceId,
    pub order_id: RepairOrderId,
    pub customer_id: CustomerId,
    pub number: InvoiceNumber,
    pub items: Vec<InvoiceLineItem>,
    pub payment_method_hint: Option<PaymentMethod>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RegisterPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPayment {
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    /// Record as PENDING until confirmed through `UpdatePaymentStatus`.
    pub awaiting_confirmation: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdatePaymentStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePaymentStatus {
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub status: PaymentStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateInvoiceStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInvoiceStatus {
    pub invoice_id: InvoiceId,
    pub status: InvoiceStatus,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    IssueInvoice(IssueInvoice),
    RegisterPayment(RegisterPayment),
    UpdatePaymentStatus(UpdatePaymentStatus),
    UpdateInvoiceStatus(UpdateInvoiceStatus),
}

impl Command for InvoiceCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        let id = match self {
            InvoiceCommand::IssueInvoice(c) => c.invoice_id,
            InvoiceCommand::RegisterPayment(c) => c.invoice_id,
            InvoiceCommand::UpdatePaymentStatus(c) => c.invoice_id,
            InvoiceCommand::UpdateInvoiceStatus(c) => c.invoice_id,
        };
        id.0
    }
}

/// Event: InvoiceIssued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceIssued {
    pub invoice_id: InvoiceId,
    pub order_id: RepairOrderId,
    pub customer_id: CustomerId,
    pub number: InvoiceNumber,
    pub issued_on: NaiveDate,
    pub items: Vec<InvoiceLineItem>,
    pub totals: TaxedTotals,
    pub payment_method_hint: Option<PaymentMethod>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRegistered. Carries the balance left after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRegistered {
    pub invoice_id: InvoiceId,
    pub payment: Payment,
    pub remaining: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStatusChanged {
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub from: PaymentStatus,
    pub to: PaymentStatus,
    pub remaining: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoicePaid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicePaid {
    pub invoice_id: InvoiceId,
    pub order_id: RepairOrderId,
    pub customer_id: CustomerId,
    pub total: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceVoided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceVoided {
    pub invoice_id: InvoiceId,
    pub order_id: RepairOrderId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceIssued(InvoiceIssued),
    PaymentRegistered(PaymentRegistered),
    PaymentStatusChanged(PaymentStatusChanged),
    InvoicePaid(InvoicePaid),
    InvoiceVoided(InvoiceVoided),
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceIssued(_) => topics::INVOICE_CREATED,
            InvoiceEvent::PaymentRegistered(_) => topics::PAYMENT_REGISTERED,
            InvoiceEvent::PaymentStatusChanged(_) => topics::PAYMENT_STATUS_CHANGED,
            InvoiceEvent::InvoicePaid(_) => topics::INVOICE_PAID,
            InvoiceEvent::InvoiceVoided(_) => topics::INVOICE_VOIDED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceIssued(e) => e.occurred_at,
            InvoiceEvent::PaymentRegistered(e) => e.occurred_at,
            InvoiceEvent::PaymentStatusChanged(e) => e.occurred_at,
            InvoiceEvent::InvoicePaid(e) => e.occurred_at,
            InvoiceEvent::InvoiceVoided(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceIssued(e) => {
                self.id = e.invoice_id;
                self.order_id = e.order_id;
                self.customer_id = e.customer_id;
                self.number = Some(e.number.clone());
                self.issued_on = e.issued_on;
                self.items = e.items.clone();
                self.totals = e.totals;
                self.payment_method_hint = e.payment_method_hint;
                self.status = InvoiceStatus::Pending;
                self.payments.clear();
                self.created = true;
            }
            InvoiceEvent::PaymentRegistered(e) => {
                self.payments.push(e.payment.clone());
            }
            InvoiceEvent::PaymentStatusChanged(e) => {
                if let Some(payment) = self.payment_mut(e.payment_id) {
                    payment.status = e.to;
                }
            }
            InvoiceEvent::InvoicePaid(_) => {
                self.status = InvoiceStatus::Paid;
            }
            InvoiceEvent::InvoiceVoided(e) => {
                self.status = InvoiceStatus::Void;
                self.void_reason = e.reason.clone();
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::IssueInvoice(cmd) => self.handle_issue(cmd),
            InvoiceCommand::RegisterPayment(cmd) => self.handle_register_payment(cmd),
            InvoiceCommand::UpdatePaymentStatus(cmd) => self.handle_payment_status(cmd),
            InvoiceCommand::UpdateInvoiceStatus(cmd) => self.handle_invoice_status(cmd),
        }
    }
}

impl Invoice {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_invoice_id(&self, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if self.id != invoice_id {
            return Err(DomainError::invariant("invoice_id mismatch"));
        }
        Ok(())
    }

    fn ensure_not_void(&self) -> Result<(), DomainError> {
        if self.status == InvoiceStatus::Void {
            return Err(DomainError::invariant("invoice is VOID, payments are closed"));
        }
        Ok(())
    }

    /// Reject `amount` if it exceeds what is still owed. A PAID invoice owes
    /// nothing, so any further payment lands here.
    fn ensure_covers(&self, amount: Money) -> Result<(), DomainError> {
        let remaining = self.remaining();
        if amount > remaining {
            return Err(DomainError::InsufficientBalance {
                requested: amount.cents(),
                remaining: remaining.cents(),
            });
        }
        Ok(())
    }

    fn paid(&self, occurred_at: DateTime<Utc>) -> InvoiceEvent {
        InvoiceEvent::InvoicePaid(InvoicePaid {
            invoice_id: self.id,
            order_id: self.order_id,
            customer_id: self.customer_id,
            total: self.totals.total,
            occurred_at,
        })
    }

    fn handle_issue(&self, cmd: &IssueInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("an invoice already exists for this order"));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation("cannot issue invoice without line items"));
        }

        let mut subtotal = Money::ZERO;
        for item in &cmd.items {
            item.validate()?;
            subtotal = subtotal.checked_add(item.amount)?;
        }
        let totals = TaxedTotals::from_subtotal(subtotal);

        let issued = InvoiceIssued {
            invoice_id: cmd.invoice_id,
            order_id: cmd.order_id,
            customer_id: cmd.customer_id,
            number: cmd.number.clone(),
            issued_on: cmd.occurred_at.date_naive(),
            items: cmd.items.clone(),
            totals,
            payment_method_hint: cmd.payment_method_hint,
            occurred_at: cmd.occurred_at,
        };

        let mut events = vec![InvoiceEvent::InvoiceIssued(issued)];

        // Nothing owed: settled as soon as it exists.
        if totals.total == Money::ZERO {
            let mut next = self.clone();
            next.apply(&events[0]);
            events.push(next.paid(cmd.occurred_at));
        }

        Ok(events)
    }

    fn handle_register_payment(
        &self,
        cmd: &RegisterPayment,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_invoice_id(cmd.invoice_id)?;
        self.ensure_not_void()?;

        if !cmd.amount.is_positive() {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        if self.payment(cmd.payment_id).is_some() {
            return Err(DomainError::conflict("payment already registered"));
        }
        self.ensure_covers(cmd.amount)?;

        let payment = Payment {
            id: cmd.payment_id,
            amount: cmd.amount,
            method: cmd.method,
            status: if cmd.awaiting_confirmation {
                PaymentStatus::Pending
            } else {
                PaymentStatus::Approved
            },
            reference: cmd.reference.clone(),
            paid_on: cmd.occurred_at.date_naive(),
        };

        let mut next = self.clone();
        next.payments.push(payment.clone());
        let remaining = next.remaining();

        let mut events = vec![InvoiceEvent::PaymentRegistered(PaymentRegistered {
            invoice_id: self.id,
            payment,
            remaining,
            occurred_at: cmd.occurred_at,
        })];
        if remaining == Money::ZERO {
            events.push(self.paid(cmd.occurred_at));
        }

        Ok(events)
    }

    fn handle_payment_status(
        &self,
        cmd: &UpdatePaymentStatus,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_invoice_id(cmd.invoice_id)?;

        let payment = self.payment(cmd.payment_id).ok_or_else(DomainError::not_found)?;
        payment.status.ensure_transition(cmd.status)?;

        let mut remaining = self.remaining();
        if cmd.status == PaymentStatus::Approved {
            self.ensure_not_void()?;
            self.ensure_covers(payment.amount)?;
            remaining = remaining - payment.amount;
        }

        let mut events = vec![InvoiceEvent::PaymentStatusChanged(PaymentStatusChanged {
            invoice_id: self.id,
            payment_id: payment.id,
            from: payment.status,
            to: cmd.status,
            remaining,
            occurred_at: cmd.occurred_at,
        })];
        if cmd.status == PaymentStatus::Approved && remaining == Money::ZERO {
            events.push(self.paid(cmd.occurred_at));
        }

        Ok(events)
    }

    fn handle_invoice_status(
        &self,
        cmd: &UpdateInvoiceStatus,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_invoice_id(cmd.invoice_id)?;
        self.status.ensure_transition(cmd.status)?;

        if cmd.status == InvoiceStatus::Paid {
            return Err(DomainError::validation(
                "an invoice becomes PAID only through approved payments",
            ));
        }

        Ok(vec![InvoiceEvent::InvoiceVoided(InvoiceVoided {
            invoice_id: self.id,
            order_id: self.order_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
