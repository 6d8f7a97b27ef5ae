//! Engine wiring for the HTTP process: in-process collaborators seeded with a
//! starter service catalog.

use std::io;

use uuid::Uuid;

use torque_core::{CatalogServiceId, Money};
use torque_infra::config::EngineConfig;
use torque_infra::engine::{Engine, InMemoryCollaborators};
use torque_infra::external::CatalogEntry;

/// Catalog entries every fresh process offers, with stable ids.
pub fn starter_catalog() -> Vec<CatalogEntry> {
    [
        ("general-service", "General service", 8_000),
        ("oil-change", "Oil change", 4_500),
        ("brake-inspection", "Brake inspection", 6_000),
        ("diagnostics", "Diagnostics", 5_000),
    ]
    .into_iter()
    .map(|(key, name, cents)| CatalogEntry {
        service_id: catalog_service_id(key),
        name: name.to_string(),
        price: Money::from_cents(cents),
    })
    .collect()
}

pub fn catalog_service_id(key: &str) -> CatalogServiceId {
    CatalogServiceId::from_uuid(Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("torque.catalog.{key}").as_bytes()))
}

pub fn build_engine(config: EngineConfig) -> io::Result<Engine> {
    let collaborators = InMemoryCollaborators::new();
    for entry in starter_catalog() {
        collaborators.catalog.insert(entry);
    }
    Engine::start(config, collaborators.collaborators())
}
