//! Process wiring: one event store, one relay, the three stores and the relay
//! workers, built from an `EngineConfig`.

use std::io;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::info;

use torque_core::{Clock, SystemClock};
use torque_events::{EventEnvelope, InMemoryEventBus};

use crate::command_dispatcher::CommandDispatcher;
use crate::config::EngineConfig;
use crate::event_store::InMemoryEventStore;
use crate::external::{
    CustomerRegistry, IdentityDirectory, InMemoryCustomerRegistry, InMemoryIdentityDirectory,
    InMemoryPartsInventory, InMemoryServiceCatalog, PartsInventory, ServiceCatalog,
};
use crate::hooks::PortalAccessHook;
use crate::relay::{RelayHandles, spawn_relay};
use crate::saga::BookingOrchestrator;
use crate::stores::{AppointmentStore, InvoiceStore, OrderStore, SchedulingSettings};

pub type EngineEventStore = Arc<InMemoryEventStore>;
pub type EngineBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type EngineDispatcher = CommandDispatcher<EngineEventStore, EngineBus>;
pub type EngineAppointments = AppointmentStore<EngineEventStore, EngineBus>;
pub type EngineOrders = OrderStore<EngineEventStore, EngineBus>;
pub type EngineInvoices = InvoiceStore<EngineEventStore, EngineBus>;
pub type EngineBooking = BookingOrchestrator<EngineEventStore, EngineBus>;

/// External systems the engine calls synchronously.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn ServiceCatalog>,
    pub inventory: Arc<dyn PartsInventory>,
    pub directory: Arc<dyn IdentityDirectory>,
    pub registry: Arc<dyn CustomerRegistry>,
}

/// In-process fakes, kept concrete so callers can seed and inspect them.
#[derive(Clone, Default)]
pub struct InMemoryCollaborators {
    pub catalog: Arc<InMemoryServiceCatalog>,
    pub inventory: Arc<InMemoryPartsInventory>,
    pub directory: Arc<InMemoryIdentityDirectory>,
    pub registry: Arc<InMemoryCustomerRegistry>,
}

impl InMemoryCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            catalog: self.catalog.clone(),
            inventory: self.inventory.clone(),
            directory: self.directory.clone(),
            registry: self.registry.clone(),
        }
    }
}

/// Running workflow engine.
///
/// Dropping the engine stops the relay workers.
pub struct Engine {
    config: EngineConfig,
    bus: EngineBus,
    dispatcher: Arc<EngineDispatcher>,
    appointments: Arc<EngineAppointments>,
    orders: Arc<EngineOrders>,
    invoices: Arc<EngineInvoices>,
    booking: Arc<EngineBooking>,
    relay: Option<RelayHandles>,
}

impl Engine {
    pub fn start(config: EngineConfig, collaborators: Collaborators) -> io::Result<Self> {
        Self::start_with_clock(config, collaborators, Arc::new(SystemClock))
    }

    pub fn start_with_clock(
        config: EngineConfig,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let store: EngineEventStore = Arc::new(InMemoryEventStore::new());
        let bus: EngineBus = Arc::new(InMemoryEventBus::new());
        let dispatcher = Arc::new(
            CommandDispatcher::new(store, bus.clone()).with_max_attempts(config.dispatch_attempts),
        );

        let appointments = Arc::new(AppointmentStore::new(
            dispatcher.clone(),
            clock.clone(),
            collaborators.catalog.clone(),
            Arc::new(PortalAccessHook::new(collaborators.directory.clone())),
            SchedulingSettings::from_config(&config),
        ));
        let orders = Arc::new(OrderStore::new(
            dispatcher.clone(),
            clock.clone(),
            collaborators.inventory.clone(),
        ));
        let invoices = Arc::new(InvoiceStore::new(dispatcher.clone(), clock));
        let booking = Arc::new(BookingOrchestrator::new(
            collaborators.registry.clone(),
            appointments.clone(),
        ));

        let relay = spawn_relay(&bus, orders.clone(), invoices.clone(), config.relay_retry)?;
        info!(workers = ?relay.names(), "workflow engine started");

        Ok(Self {
            config,
            bus,
            dispatcher,
            appointments,
            orders,
            invoices,
            booking,
            relay: Some(relay),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bus(&self) -> &EngineBus {
        &self.bus
    }

    pub fn dispatcher(&self) -> &Arc<EngineDispatcher> {
        &self.dispatcher
    }

    pub fn appointments(&self) -> &Arc<EngineAppointments> {
        &self.appointments
    }

    pub fn orders(&self) -> &Arc<EngineOrders> {
        &self.orders
    }

    pub fn invoices(&self) -> &Arc<EngineInvoices> {
        &self.invoices
    }

    pub fn booking(&self) -> &Arc<EngineBooking> {
        &self.booking
    }

    /// Stop the relay workers and wait for them.
    pub fn shutdown(mut self) {
        self.stop_relay();
    }

    fn stop_relay(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.shutdown();
            info!("workflow engine stopped");
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop_relay();
    }
}
