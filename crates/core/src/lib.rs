//! `torque-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod clock;
pub mod entity;
pub mod error;
pub mod id;
pub mod lifecycle;
pub mod money;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use clock::{Clock, FixedClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, CatalogServiceId, CustomerId, MechanicId, PartId, SiteId, VehicleId};
pub use lifecycle::Lifecycle;
pub use money::{Money, TAX_RATE_BPS, TaxedTotals};
pub use value_object::ValueObject;
