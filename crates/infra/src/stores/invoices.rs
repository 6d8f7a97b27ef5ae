//! Invoice/Payment Store: invoices issued from billing snapshots and the
//! payments applied against them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use torque_billing::{
    Invoice, InvoiceCommand, InvoiceId, InvoiceLineItem, InvoiceNumberGenerator, InvoiceStatus,
    IssueInvoice, Payment, PaymentId, PaymentMethod, PaymentStatus, RegisterPayment,
    UpdateInvoiceStatus, UpdatePaymentStatus,
};
use torque_core::{AggregateId, Clock, CustomerId, DomainError, Money};
use torque_events::{EventBus, EventEnvelope};
use torque_orders::{OrderReadyForBilling, RepairOrderId};

use super::{INVOICE_AGGREGATE, StoreResult};
use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::read_model::{InMemoryRecordStore, RecordStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInvoice {
    pub order_id: RepairOrderId,
    pub customer_id: CustomerId,
    pub items: Vec<InvoiceLineItem>,
    #[serde(default)]
    pub payment_method_hint: Option<PaymentMethod>,
}

impl From<&OrderReadyForBilling> for NewInvoice {
    fn from(event: &OrderReadyForBilling) -> Self {
        Self {
            order_id: event.order_id,
            customer_id: event.customer_id,
            items: event.items.iter().cloned().map(InvoiceLineItem::from).collect(),
            payment_method_hint: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPayment {
    pub amount: Money,
    pub method: PaymentMethod,
    #[serde(default)]
    pub reference: Option<String>,
    /// Record as PENDING until someone approves it.
    #[serde(default)]
    pub awaiting_confirmation: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceFilter {
    pub status: Option<InvoiceStatus>,
    pub customer_id: Option<CustomerId>,
}

impl InvoiceFilter {
    pub fn matches(&self, invoice: &Invoice) -> bool {
        self.status.is_none_or(|s| invoice.status() == s)
            && self.customer_id.is_none_or(|c| invoice.customer_id() == c)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFilter {
    pub invoice_id: Option<InvoiceId>,
    pub status: Option<PaymentStatus>,
}

/// A payment together with the invoice it settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub invoice_id: InvoiceId,
    #[serde(flatten)]
    pub payment: Payment,
}

fn make_invoice(id: AggregateId) -> Invoice {
    Invoice::empty(InvoiceId::new(id))
}

pub struct InvoiceStore<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    records: InMemoryRecordStore<InvoiceId, Invoice>,
    numbers: InvoiceNumberGenerator,
    clock: Arc<dyn Clock>,
}

impl<S, B> InvoiceStore<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>, clock: Arc<dyn Clock>) -> Self {
        Self::with_numbers(dispatcher, clock, InvoiceNumberGenerator::new())
    }

    pub fn with_numbers(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        clock: Arc<dyn Clock>,
        numbers: InvoiceNumberGenerator,
    ) -> Self {
        Self {
            dispatcher,
            records: InMemoryRecordStore::new(),
            numbers,
            clock,
        }
    }

    /// Issue the single invoice of an order.
    ///
    /// The invoice id is derived from the order id, so a second invoice for
    /// the same order is a `Conflict`.
    pub fn create_invoice(&self, request: NewInvoice) -> StoreResult<Invoice> {
        let invoice_id = InvoiceId::for_order(request.order_id);
        let now = self.clock.now();
        let command = InvoiceCommand::IssueInvoice(IssueInvoice {
            invoice_id,
            order_id: request.order_id,
            customer_id: request.customer_id,
            number: self.numbers.next(now.date_naive()),
            items: request.items,
            payment_method_hint: request.payment_method_hint,
            occurred_at: now,
        });

        let invoice = self.execute(invoice_id, command)?;
        info!(
            invoice_id = %invoice_id,
            order_id = %request.order_id,
            number = invoice.number().map(|n| n.as_str()).unwrap_or_default(),
            total = %invoice.totals().total,
            status = %invoice.status(),
            "invoice issued"
        );
        Ok(invoice)
    }

    /// Relay handler for `order.ready_for_billing`.
    pub fn on_order_ready_for_billing(&self, event: &OrderReadyForBilling) -> StoreResult<Invoice> {
        let invoice_id = InvoiceId::for_order(event.order_id);

        let existing = self.dispatcher.load(invoice_id.0, make_invoice)?;
        if existing.is_created() {
            debug!(invoice_id = %invoice_id, order_id = %event.order_id, "order already invoiced");
            self.records.upsert(invoice_id, existing.clone());
            return Ok(existing);
        }

        match self.create_invoice(NewInvoice::from(event)) {
            Err(err) if err.is_conflict() => {
                let invoice = self.dispatcher.load(invoice_id.0, make_invoice)?;
                self.records.upsert(invoice_id, invoice.clone());
                Ok(invoice)
            }
            other => other,
        }
    }

    /// Record a payment; reaching the total settles the invoice.
    pub fn register_payment(&self, invoice_id: InvoiceId, request: NewPayment) -> StoreResult<(Invoice, Payment)> {
        let payment_id = PaymentId::new(AggregateId::new());
        let command = InvoiceCommand::RegisterPayment(RegisterPayment {
            invoice_id,
            payment_id,
            amount: request.amount,
            method: request.method,
            reference: request.reference,
            awaiting_confirmation: request.awaiting_confirmation,
            occurred_at: self.clock.now(),
        });

        let invoice = self.execute(invoice_id, command)?;
        let payment = invoice
            .payment(payment_id)
            .cloned()
            .ok_or_else(|| DispatchError::Domain(DomainError::not_found()))?;
        info!(
            invoice_id = %invoice_id,
            payment_id = %payment_id,
            amount = %payment.amount,
            payment_status = %payment.status,
            remaining = %invoice.remaining(),
            invoice_status = %invoice.status(),
            "payment registered"
        );
        Ok((invoice, payment))
    }

    /// Approve or reject a PENDING payment.
    pub fn update_payment_status(&self, payment_id: PaymentId, status: PaymentStatus) -> StoreResult<(Invoice, Payment)> {
        let invoice_id = self.get_payment(payment_id)?.invoice_id;
        let command = InvoiceCommand::UpdatePaymentStatus(UpdatePaymentStatus {
            invoice_id,
            payment_id,
            status,
            occurred_at: self.clock.now(),
        });

        let invoice = self.execute(invoice_id, command)?;
        let payment = invoice
            .payment(payment_id)
            .cloned()
            .ok_or_else(|| DispatchError::Domain(DomainError::not_found()))?;
        info!(
            invoice_id = %invoice_id,
            payment_id = %payment_id,
            payment_status = %payment.status,
            invoice_status = %invoice.status(),
            "payment status changed"
        );
        Ok((invoice, payment))
    }

    /// Only PENDING → VOID is accepted here.
    pub fn update_invoice_status(
        &self,
        invoice_id: InvoiceId,
        status: InvoiceStatus,
        reason: Option<String>,
    ) -> StoreResult<Invoice> {
        let command = InvoiceCommand::UpdateInvoiceStatus(UpdateInvoiceStatus {
            invoice_id,
            status,
            reason,
            occurred_at: self.clock.now(),
        });
        let invoice = self.execute(invoice_id, command)?;
        info!(invoice_id = %invoice_id, status = %invoice.status(), "invoice status changed");
        Ok(invoice)
    }

    pub fn get(&self, invoice_id: InvoiceId) -> StoreResult<Invoice> {
        self.records
            .get(&invoice_id)
            .ok_or_else(|| DomainError::not_found().into())
    }

    /// Invoices matching `filter`, newest first.
    pub fn list(&self, filter: &InvoiceFilter) -> Vec<Invoice> {
        let mut out: Vec<Invoice> = self
            .records
            .list()
            .into_iter()
            .filter(|i| filter.matches(i))
            .collect();
        out.sort_by(|a, b| {
            b.issued_on()
                .cmp(&a.issued_on())
                .then_with(|| b.number().cmp(&a.number()))
        });
        out
    }

    pub fn by_customer(&self, customer_id: CustomerId) -> Vec<Invoice> {
        self.list(&InvoiceFilter {
            customer_id: Some(customer_id),
            ..InvoiceFilter::default()
        })
    }

    pub fn get_payment(&self, payment_id: PaymentId) -> StoreResult<PaymentRecord> {
        self.records
            .list()
            .into_iter()
            .find_map(|invoice| {
                invoice.payment(payment_id).map(|p| PaymentRecord {
                    invoice_id: invoice.id_typed(),
                    payment: p.clone(),
                })
            })
            .ok_or_else(|| DomainError::not_found().into())
    }

    pub fn list_payments(&self, filter: &PaymentFilter) -> Vec<PaymentRecord> {
        let mut out: Vec<PaymentRecord> = self
            .records
            .list()
            .into_iter()
            .filter(|invoice| filter.invoice_id.is_none_or(|id| invoice.id_typed() == id))
            .flat_map(|invoice| {
                let invoice_id = invoice.id_typed();
                invoice
                    .payments()
                    .iter()
                    .filter(|p| filter.status.is_none_or(|s| p.status == s))
                    .map(|p| PaymentRecord {
                        invoice_id,
                        payment: p.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        out.sort_by(|a, b| b.payment.paid_on.cmp(&a.payment.paid_on));
        out
    }

    fn execute(&self, invoice_id: InvoiceId, command: InvoiceCommand) -> Result<Invoice, DispatchError> {
        let out = self
            .dispatcher
            .dispatch(invoice_id.0, INVOICE_AGGREGATE, &command, make_invoice)?;
        self.records.upsert(invoice_id, out.aggregate.clone());
        Ok(out.aggregate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};
    use torque_core::SystemClock;
    use torque_events::InMemoryEventBus;

    use crate::event_store::InMemoryEventStore;

    type TestStore = InvoiceStore<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn setup() -> TestStore {
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
        ));
        InvoiceStore::new(dispatcher, Arc::new(SystemClock))
    }

    fn item(description: &str, quantity: u32, unit_cents: i64) -> InvoiceLineItem {
        InvoiceLineItem {
            description: description.to_string(),
            quantity,
            unit_price: Money::from_cents(unit_cents),
            amount: Money::from_cents(unit_cents * i64::from(quantity)),
        }
    }

    fn test_invoice(store: &TestStore, items: Vec<InvoiceLineItem>) -> Invoice {
        store
            .create_invoice(NewInvoice {
                order_id: RepairOrderId::new(AggregateId::new()),
                customer_id: CustomerId::new(),
                items,
                payment_method_hint: Some(PaymentMethod::Card),
            })
            .unwrap()
    }

    fn pay(amount: Money) -> NewPayment {
        NewPayment {
            amount,
            method: PaymentMethod::Cash,
            reference: None,
            awaiting_confirmation: false,
        }
    }

    fn expect_domain(err: DispatchError) -> DomainError {
        match err {
            DispatchError::Domain(e) => e,
            other => panic!("Expected domain error, got {other:?}"),
        }
    }

    #[test]
    fn issue_computes_totals_and_numbers() {
        let store = setup();
        let first = test_invoice(&store, vec![item("Brake pads", 2, 5_000), item("Labor", 1, 20_000)]);
        let second = test_invoice(&store, vec![item("Labor", 1, 1_000)]);

        assert_eq!(first.status(), InvoiceStatus::Pending);
        assert_eq!(first.totals().subtotal, Money::from_cents(30_000));
        assert_eq!(first.totals().tax, Money::from_cents(5_700));
        assert_eq!(first.totals().total, Money::from_cents(35_700));
        assert_ne!(first.number(), second.number());
        assert!(first.number().unwrap().as_str().starts_with("INV-"));
    }

    #[test]
    fn second_invoice_for_order_conflicts() {
        let store = setup();
        let request = NewInvoice {
            order_id: RepairOrderId::new(AggregateId::new()),
            customer_id: CustomerId::new(),
            items: vec![item("Labor", 1, 1_000)],
            payment_method_hint: None,
        };
        store.create_invoice(request.clone()).unwrap();

        match expect_domain(store.create_invoice(request).unwrap_err()) {
            DomainError::Conflict(_) => {}
            other => panic!("Expected Conflict, got {other:?}"),
        }
        assert_eq!(store.list(&InvoiceFilter::default()).len(), 1);
    }

    #[test]
    fn empty_items_are_rejected() {
        let store = setup();
        let err = store
            .create_invoice(NewInvoice {
                order_id: RepairOrderId::new(AggregateId::new()),
                customer_id: CustomerId::new(),
                items: vec![],
                payment_method_hint: None,
            })
            .unwrap_err();
        match expect_domain(err) {
            DomainError::Validation(_) => {}
            other => panic!("Expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn partial_then_full_payment_settles_invoice() {
        let store = setup();
        let invoice = test_invoice(&store, vec![item("Labor", 1, 84_034)]);
        let id = invoice.id_typed();
        let total = invoice.totals().total;
        assert_eq!(total, Money::from_cents(100_000));

        let (invoice, payment) = store.register_payment(id, pay(Money::from_cents(40_000))).unwrap();
        assert_eq!(payment.status, PaymentStatus::Approved);
        assert_eq!(invoice.status(), InvoiceStatus::Pending);
        assert_eq!(invoice.remaining(), Money::from_cents(60_000));

        match expect_domain(store.register_payment(id, pay(Money::from_cents(60_001))).unwrap_err()) {
            DomainError::InsufficientBalance { requested, remaining } => {
                assert_eq!(requested, 60_001);
                assert_eq!(remaining, 60_000);
            }
            other => panic!("Expected InsufficientBalance, got {other:?}"),
        }

        let (invoice, _) = store.register_payment(id, pay(Money::from_cents(60_000))).unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Paid);
        assert_eq!(invoice.remaining(), Money::ZERO);

        match expect_domain(store.register_payment(id, pay(Money::from_cents(1))).unwrap_err()) {
            DomainError::InsufficientBalance { remaining, .. } => assert_eq!(remaining, 0),
            other => panic!("Expected InsufficientBalance, got {other:?}"),
        }
    }

    #[test]
    fn non_positive_payment_is_rejected() {
        let store = setup();
        let invoice = test_invoice(&store, vec![item("Labor", 1, 1_000)]);
        match expect_domain(store.register_payment(invoice.id_typed(), pay(Money::ZERO)).unwrap_err()) {
            DomainError::Validation(_) => {}
            other => panic!("Expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn pending_payment_counts_only_once_approved() {
        let store = setup();
        let invoice = test_invoice(&store, vec![item("Labor", 1, 84_034)]);
        let id = invoice.id_typed();

        let (invoice, payment) = store
            .register_payment(
                id,
                NewPayment {
                    awaiting_confirmation: true,
                    reference: Some("TX-1".to_string()),
                    ..pay(Money::from_cents(100_000))
                },
            )
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(invoice.remaining(), Money::from_cents(100_000));
        assert_eq!(store.get_payment(payment.id).unwrap().invoice_id, id);

        let (invoice, payment) = store.update_payment_status(payment.id, PaymentStatus::Approved).unwrap();
        assert_eq!(payment.status, PaymentStatus::Approved);
        assert_eq!(invoice.status(), InvoiceStatus::Paid);

        match expect_domain(store.update_payment_status(payment.id, PaymentStatus::Rejected).unwrap_err()) {
            DomainError::InvalidTransition { entity, from, to } => {
                assert_eq!(entity, "payment");
                assert_eq!(from, "APPROVED");
                assert_eq!(to, "REJECTED");
            }
            other => panic!("Expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn void_invoice_closes_payments() {
        let store = setup();
        let invoice = test_invoice(&store, vec![item("Labor", 1, 1_000)]);
        let id = invoice.id_typed();

        match expect_domain(store.update_invoice_status(id, InvoiceStatus::Paid, None).unwrap_err()) {
            DomainError::Validation(_) => {}
            other => panic!("Expected Validation, got {other:?}"),
        }

        let voided = store
            .update_invoice_status(id, InvoiceStatus::Void, Some("duplicate".to_string()))
            .unwrap();
        assert_eq!(voided.status(), InvoiceStatus::Void);
        assert_eq!(voided.void_reason(), Some("duplicate"));

        match expect_domain(store.register_payment(id, pay(Money::from_cents(100))).unwrap_err()) {
            DomainError::InvariantViolation(_) => {}
            other => panic!("Expected InvariantViolation, got {other:?}"),
        }
        assert!(store.update_invoice_status(id, InvoiceStatus::Pending, None).is_err());
    }

    #[test]
    fn zero_total_invoice_is_settled_on_issue() {
        let store = setup();
        let invoice = test_invoice(&store, vec![item("Warranty work", 1, 0)]);
        assert_eq!(invoice.status(), InvoiceStatus::Paid);
    }

    #[test]
    fn billing_snapshot_is_invoiced_once() {
        let store = setup();
        let event = OrderReadyForBilling {
            order_id: RepairOrderId::new(AggregateId::new()),
            customer_id: CustomerId::new(),
            vehicle_id: torque_core::VehicleId::new(),
            cost: torque_orders::CostBreakdown::compute(&[]).unwrap(),
            items: vec![torque_orders::BillableItem {
                description: "Labor: Brakes".to_string(),
                quantity: 1,
                unit_price: Money::from_cents(20_000),
                amount: Money::from_cents(20_000),
            }],
            occurred_at: Utc.with_ymd_and_hms(2030, 1, 7, 16, 0, 0).unwrap(),
        };

        let first = store.on_order_ready_for_billing(&event).unwrap();
        let second = store.on_order_ready_for_billing(&event).unwrap();

        assert_eq!(first.id_typed(), second.id_typed());
        assert_eq!(first.number(), second.number());
        assert_eq!(first.id_typed(), InvoiceId::for_order(event.order_id));
        assert_eq!(store.by_customer(event.customer_id).len(), 1);
    }

    #[test]
    fn payment_queries_filter_by_invoice_and_status() {
        let store = setup();
        let a = test_invoice(&store, vec![item("Labor", 1, 10_000)]);
        let b = test_invoice(&store, vec![item("Labor", 1, 10_000)]);
        store.register_payment(a.id_typed(), pay(Money::from_cents(100))).unwrap();
        store
            .register_payment(
                b.id_typed(),
                NewPayment {
                    awaiting_confirmation: true,
                    ..pay(Money::from_cents(200))
                },
            )
            .unwrap();

        assert_eq!(store.list_payments(&PaymentFilter::default()).len(), 2);
        let only_a = store.list_payments(&PaymentFilter {
            invoice_id: Some(a.id_typed()),
            status: None,
        });
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].payment.amount, Money::from_cents(100));
        let pending = store.list_payments(&PaymentFilter {
            invoice_id: None,
            status: Some(PaymentStatus::Pending),
        });
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].invoice_id, b.id_typed());
        assert!(store.get_payment(PaymentId::new(AggregateId::new())).unwrap_err().is_not_found());
    }
}
