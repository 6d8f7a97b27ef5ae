//! External collaborators the stores call synchronously.
//!
//! The catalog, parts inventory, identity directory and customer/vehicle
//! registry are owned by other systems. The engine sees them only through the
//! traits below; `in_memory` provides fakes for dev and tests.

pub mod in_memory;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use torque_core::{CatalogServiceId, CustomerId, Money, PartId, VehicleId};

pub use in_memory::{
    InMemoryCustomerRegistry, InMemoryIdentityDirectory, InMemoryPartsInventory,
    InMemoryServiceCatalog,
};

/// Failure reported by a collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("{0} is unavailable")]
    Unavailable(&'static str),

    #[error("record not found")]
    NotFound,

    #[error("insufficient stock for part {part_id}: requested {requested}, available {available}")]
    InsufficientStock {
        part_id: PartId,
        requested: u32,
        available: u32,
    },

    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Catalog entry as seen at booking time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub service_id: CatalogServiceId,
    pub name: String,
    pub price: Money,
}

pub trait ServiceCatalog: Send + Sync {
    /// `Ok(None)` when the catalog does not know the id.
    fn lookup(&self, service_id: CatalogServiceId) -> Result<Option<CatalogEntry>, CollaboratorError>;
}

/// Stock keeping for parts consumed by repair orders.
pub trait PartsInventory: Send + Sync {
    fn consume(&self, part_id: PartId, quantity: u32) -> Result<(), CollaboratorError>;

    /// Inverse of `consume`.
    fn restock(&self, part_id: PartId, quantity: u32) -> Result<(), CollaboratorError>;
}

/// Customer portal accounts.
pub trait IdentityDirectory: Send + Sync {
    fn has_portal_access(&self, customer_id: CustomerId) -> Result<bool, CollaboratorError>;

    fn provision_portal_access(&self, customer_id: CustomerId) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCustomer {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVehicle {
    pub plate: String,
    pub make: String,
    pub model: String,
    #[serde(default)]
    pub year: Option<u16>,
}

/// Customer and vehicle registry, with inverse calls for compensation.
pub trait CustomerRegistry: Send + Sync {
    fn register_customer(&self, customer: &NewCustomer) -> Result<CustomerId, CollaboratorError>;

    fn register_vehicle(
        &self,
        customer_id: CustomerId,
        vehicle: &NewVehicle,
    ) -> Result<VehicleId, CollaboratorError>;

    fn remove_customer(&self, customer_id: CustomerId) -> Result<(), CollaboratorError>;

    fn remove_vehicle(&self, vehicle_id: VehicleId) -> Result<(), CollaboratorError>;
}
