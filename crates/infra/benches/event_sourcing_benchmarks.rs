use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use std::sync::Arc;
use torque_core::{
    AggregateId, CatalogServiceId, CustomerId, ExpectedVersion, FixedClock, Money, SiteId,
    VehicleId,
};
use torque_events::{EventEnvelope, InMemoryEventBus};
use torque_infra::command_dispatcher::CommandDispatcher;
use torque_infra::config::EngineConfig;
use torque_infra::event_store::{EventStore, InMemoryEventStore, UncommittedEvent};
use torque_infra::external::{CatalogEntry, InMemoryPartsInventory, InMemoryServiceCatalog};
use torque_infra::hooks::NoopHook;
use torque_infra::stores::{
    AppointmentStore, NewAppointment, NewOrder, OrderStore, SchedulingSettings, ServiceLineDraft,
};
use torque_orders::{OrderDetailsUpdated, RepairOrderEvent, RepairOrderId};
use torque_scheduling::ConflictQuery;

type Bus = Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>;
type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Bus>;

fn dispatcher() -> Arc<Dispatcher> {
    Arc::new(CommandDispatcher::new(
        Arc::new(InMemoryEventStore::new()),
        Arc::new(InMemoryEventBus::new()),
    ))
}

fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2030, 1, 6, 12, 0, 0).unwrap()))
}

fn draft(name: &str) -> ServiceLineDraft {
    ServiceLineDraft {
        kind: "mechanical".to_string(),
        name: name.to_string(),
        description: String::new(),
        labor_cost: Money::from_cents(10_000),
        estimated_minutes: 30,
    }
}

fn new_order() -> NewOrder {
    NewOrder {
        appointment_id: None,
        customer_id: CustomerId::new(),
        vehicle_id: VehicleId::new(),
        mechanic_id: None,
        diagnosis: "bench".to_string(),
        estimated_completion: None,
        lines: vec![draft("Diagnosis")],
    }
}

fn bench_command_execution_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_execution_latency");
    group.sample_size(500);

    // OpenOrder (first command, no history)
    group.bench_function("open_order_fresh", |b| {
        let orders = OrderStore::new(dispatcher(), clock(), Arc::new(InMemoryPartsInventory::new()));
        b.iter(|| {
            orders.create(black_box(new_order())).unwrap();
        });
    });

    // UpdateOrder on an order with a growing stream
    group.bench_function("update_order_with_history", |b| {
        let orders = OrderStore::new(dispatcher(), clock(), Arc::new(InMemoryPartsInventory::new()));
        let order = orders.create(new_order()).unwrap();
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            orders
                .update_diagnosis(order.id_typed(), black_box(format!("pass {n}")))
                .unwrap();
        });
    });

    group.finish();
}

fn bench_event_append_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_append_throughput");

    for batch_size in [1, 10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(BenchmarkId::new("batch_append", batch_size), batch_size, |b, &size| {
            let store = InMemoryEventStore::new();
            let order_id = AggregateId::new();
            b.iter(|| {
                let events: Vec<UncommittedEvent> = (0..size)
                    .map(|i| {
                        let event = RepairOrderEvent::OrderDetailsUpdated(OrderDetailsUpdated {
                            order_id: RepairOrderId::new(order_id),
                            diagnosis: format!("note {i}"),
                            mechanic_id: None,
                            estimated_completion: None,
                            occurred_at: Utc::now(),
                        });
                        UncommittedEvent::from_typed(order_id, "orders.repair_order", uuid::Uuid::now_v7(), &event)
                            .unwrap()
                    })
                    .collect();
                black_box(store.append(events, ExpectedVersion::Any).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_conflict_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("conflict_check");
    let service = CatalogServiceId::new();
    let date = NaiveDate::from_ymd_opt(2030, 1, 7).unwrap();

    for booked in [10usize, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("site_day", booked), booked, |b, &count| {
            let catalog = Arc::new(InMemoryServiceCatalog::new());
            catalog.insert(CatalogEntry {
                service_id: service,
                name: "Inspection".to_string(),
                price: Money::from_cents(5_000),
            });
            let appointments = AppointmentStore::new(
                dispatcher(),
                clock(),
                catalog,
                Arc::new(NoopHook),
                SchedulingSettings::from_config(&EngineConfig::default()),
            );

            // One 10-minute appointment per site, all at 09:00, so the queried
            // site sees `count` candidates to skip.
            for _ in 0..count {
                appointments
                    .create(NewAppointment {
                        customer_id: CustomerId::new(),
                        vehicle_id: VehicleId::new(),
                        mechanic_id: None,
                        site_id: Some(SiteId::new()),
                        service_id: service,
                        date,
                        time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                        duration_minutes: 10,
                        reason: String::new(),
                    })
                    .unwrap();
            }

            let query = ConflictQuery::new(
                date,
                NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                30,
                None,
                Some(SiteId::new()),
            )
            .unwrap();
            b.iter(|| {
                appointments.conflict_check(black_box(&query)).unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_command_execution_latency,
    bench_event_append_throughput,
    bench_conflict_check
);
criterion_main!(benches);
