use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use torque_core::{CatalogServiceId, CustomerId, PartId, VehicleId};

use super::{
    CatalogEntry, CollaboratorError, CustomerRegistry, IdentityDirectory, NewCustomer, NewVehicle,
    PartsInventory, ServiceCatalog,
};

/// Reachability switch shared by the fakes, used to simulate outages.
#[derive(Debug)]
struct Switch {
    name: &'static str,
    up: AtomicBool,
}

impl Switch {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            up: AtomicBool::new(true),
        }
    }

    fn set(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    fn ensure_up(&self) -> Result<(), CollaboratorError> {
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CollaboratorError::Unavailable(self.name))
        }
    }
}

fn poisoned(name: &'static str) -> CollaboratorError {
    CollaboratorError::Unavailable(name)
}

#[derive(Debug)]
pub struct InMemoryServiceCatalog {
    switch: Switch,
    entries: Mutex<HashMap<CatalogServiceId, CatalogEntry>>,
}

impl InMemoryServiceCatalog {
    pub fn new() -> Self {
        Self {
            switch: Switch::new("service catalog"),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, entry: CatalogEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(entry.service_id, entry);
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.switch.set(reachable);
    }
}

impl Default for InMemoryServiceCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceCatalog for InMemoryServiceCatalog {
    fn lookup(&self, service_id: CatalogServiceId) -> Result<Option<CatalogEntry>, CollaboratorError> {
        self.switch.ensure_up()?;
        let entries = self.entries.lock().map_err(|_| poisoned(self.switch.name))?;
        Ok(entries.get(&service_id).cloned())
    }
}

#[derive(Debug)]
pub struct InMemoryPartsInventory {
    switch: Switch,
    stock: Mutex<HashMap<PartId, u32>>,
}

impl InMemoryPartsInventory {
    pub fn new() -> Self {
        Self {
            switch: Switch::new("parts inventory"),
            stock: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_stock(&self, part_id: PartId, quantity: u32) {
        if let Ok(mut stock) = self.stock.lock() {
            stock.insert(part_id, quantity);
        }
    }

    pub fn stock(&self, part_id: PartId) -> Option<u32> {
        self.stock.lock().ok()?.get(&part_id).copied()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.switch.set(reachable);
    }
}

impl Default for InMemoryPartsInventory {
    fn default() -> Self {
        Self::new()
    }
}

impl PartsInventory for InMemoryPartsInventory {
    fn consume(&self, part_id: PartId, quantity: u32) -> Result<(), CollaboratorError> {
        self.switch.ensure_up()?;
        let mut stock = self.stock.lock().map_err(|_| poisoned(self.switch.name))?;
        let available = stock.get_mut(&part_id).ok_or(CollaboratorError::NotFound)?;
        if *available < quantity {
            return Err(CollaboratorError::InsufficientStock {
                part_id,
                requested: quantity,
                available: *available,
            });
        }
        *available -= quantity;
        Ok(())
    }

    fn restock(&self, part_id: PartId, quantity: u32) -> Result<(), CollaboratorError> {
        self.switch.ensure_up()?;
        let mut stock = self.stock.lock().map_err(|_| poisoned(self.switch.name))?;
        let available = stock.entry(part_id).or_insert(0);
        *available = available.saturating_add(quantity);
        Ok(())
    }
}

#[derive(Debug)]
pub struct InMemoryIdentityDirectory {
    switch: Switch,
    accounts: Mutex<HashSet<CustomerId>>,
}

impl InMemoryIdentityDirectory {
    pub fn new() -> Self {
        Self {
            switch: Switch::new("identity directory"),
            accounts: Mutex::new(HashSet::new()),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.switch.set(reachable);
    }

    pub fn account_count(&self) -> usize {
        self.accounts.lock().map(|a| a.len()).unwrap_or(0)
    }
}

impl Default for InMemoryIdentityDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityDirectory for InMemoryIdentityDirectory {
    fn has_portal_access(&self, customer_id: CustomerId) -> Result<bool, CollaboratorError> {
        self.switch.ensure_up()?;
        let accounts = self.accounts.lock().map_err(|_| poisoned(self.switch.name))?;
        Ok(accounts.contains(&customer_id))
    }

    fn provision_portal_access(&self, customer_id: CustomerId) -> Result<(), CollaboratorError> {
        self.switch.ensure_up()?;
        let mut accounts = self.accounts.lock().map_err(|_| poisoned(self.switch.name))?;
        accounts.insert(customer_id);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Registry {
    customers: HashMap<CustomerId, NewCustomer>,
    vehicles: HashMap<VehicleId, (CustomerId, NewVehicle)>,
}

#[derive(Debug)]
pub struct InMemoryCustomerRegistry {
    switch: Switch,
    inner: Mutex<Registry>,
}

impl InMemoryCustomerRegistry {
    pub fn new() -> Self {
        Self {
            switch: Switch::new("customer registry"),
            inner: Mutex::new(Registry::default()),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.switch.set(reachable);
    }

    pub fn customer_count(&self) -> usize {
        self.inner.lock().map(|r| r.customers.len()).unwrap_or(0)
    }

    pub fn vehicle_count(&self) -> usize {
        self.inner.lock().map(|r| r.vehicles.len()).unwrap_or(0)
    }
}

impl Default for InMemoryCustomerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CustomerRegistry for InMemoryCustomerRegistry {
    fn register_customer(&self, customer: &NewCustomer) -> Result<CustomerId, CollaboratorError> {
        self.switch.ensure_up()?;
        if customer.name.trim().is_empty() {
            return Err(CollaboratorError::Rejected("customer name is required".to_string()));
        }
        let mut inner = self.inner.lock().map_err(|_| poisoned(self.switch.name))?;
        let id = CustomerId::new();
        inner.customers.insert(id, customer.clone());
        Ok(id)
    }

    fn register_vehicle(
        &self,
        customer_id: CustomerId,
        vehicle: &NewVehicle,
    ) -> Result<VehicleId, CollaboratorError> {
        self.switch.ensure_up()?;
        if vehicle.plate.trim().is_empty() {
            return Err(CollaboratorError::Rejected("vehicle plate is required".to_string()));
        }
        let mut inner = self.inner.lock().map_err(|_| poisoned(self.switch.name))?;
        if !inner.customers.contains_key(&customer_id) {
            return Err(CollaboratorError::NotFound);
        }
        let id = VehicleId::new();
        inner.vehicles.insert(id, (customer_id, vehicle.clone()));
        Ok(id)
    }

    fn remove_customer(&self, customer_id: CustomerId) -> Result<(), CollaboratorError> {
        self.switch.ensure_up()?;
        let mut inner = self.inner.lock().map_err(|_| poisoned(self.switch.name))?;
        inner
            .customers
            .remove(&customer_id)
            .map(|_| ())
            .ok_or(CollaboratorError::NotFound)
    }

    fn remove_vehicle(&self, vehicle_id: VehicleId) -> Result<(), CollaboratorError> {
        self.switch.ensure_up()?;
        let mut inner = self.inner.lock().map_err(|_| poisoned(self.switch.name))?;
        inner
            .vehicles
            .remove(&vehicle_id)
            .map(|_| ())
            .ok_or(CollaboratorError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inventory_consumes_and_restocks() {
        let inventory = InMemoryPartsInventory::new();
        let part = PartId::new();
        inventory.set_stock(part, 3);

        inventory.consume(part, 2).unwrap();
        assert_eq!(inventory.stock(part), Some(1));

        match inventory.consume(part, 2) {
            Err(CollaboratorError::InsufficientStock { requested, available, .. }) => {
                assert_eq!((requested, available), (2, 1));
            }
            other => panic!("Expected InsufficientStock, got {other:?}"),
        }

        inventory.restock(part, 2).unwrap();
        assert_eq!(inventory.stock(part), Some(3));
    }

    #[test]
    fn unreachable_collaborator_reports_unavailable() {
        let catalog = InMemoryServiceCatalog::new();
        catalog.set_reachable(false);

        match catalog.lookup(CatalogServiceId::new()) {
            Err(CollaboratorError::Unavailable(name)) => assert_eq!(name, "service catalog"),
            other => panic!("Expected Unavailable, got {other:?}"),
        }
    }

    #[test]
    fn registry_removes_what_it_registered() {
        let registry = InMemoryCustomerRegistry::new();
        let customer = registry
            .register_customer(&NewCustomer {
                name: "Ada".to_string(),
                email: None,
                phone: None,
            })
            .unwrap();
        let vehicle = registry
            .register_vehicle(
                customer,
                &NewVehicle {
                    plate: "B-AB 123".to_string(),
                    make: "VW".to_string(),
                    model: "Golf".to_string(),
                    year: Some(2019),
                },
            )
            .unwrap();

        registry.remove_vehicle(vehicle).unwrap();
        registry.remove_customer(customer).unwrap();
        assert_eq!(registry.customer_count(), 0);
        assert_eq!(registry.vehicle_count(), 0);
        assert_eq!(registry.remove_customer(customer), Err(CollaboratorError::NotFound));
    }
}
