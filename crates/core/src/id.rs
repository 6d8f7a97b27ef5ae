//! Strongly-typed identifiers used across the domain.
//!
//! Identifiers are opaque UUID tokens shared across stores as foreign keys.
//! Entities owned by a store wrap `AggregateId`; references to records owned
//! by external collaborators (registry, catalog, inventory) get their own
//! newtypes here so they cannot be mixed up at call sites.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of an aggregate root.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

/// Customer record in the external registry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(Uuid);

/// Vehicle record in the external registry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(Uuid);

/// Staff member performing repairs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MechanicId(Uuid);

/// Workshop location.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(Uuid);

/// Entry of the service catalog.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogServiceId(Uuid);

/// Inventory part.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// All-zero placeholder used by not-yet-created aggregates.
            pub const fn nil() -> Self {
                Self(Uuid::nil())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(AggregateId, "AggregateId");
impl_uuid_newtype!(CustomerId, "CustomerId");
impl_uuid_newtype!(VehicleId, "VehicleId");
impl_uuid_newtype!(MechanicId, "MechanicId");
impl_uuid_newtype!(SiteId, "SiteId");
impl_uuid_newtype!(CatalogServiceId, "CatalogServiceId");
impl_uuid_newtype!(PartId, "PartId");

impl AggregateId {
    /// Deterministically derive an identifier from another one.
    ///
    /// The same `(source, purpose)` pair always yields the same id (UUIDv5 with
    /// the source as namespace). Used to make event-driven creation idempotent:
    /// a redelivered event targets the stream that already exists.
    pub fn derived_from(source: &AggregateId, purpose: &str) -> Self {
        Self(Uuid::new_v5(&source.0, purpose.as_bytes()))
    }
}
