//! Event-relay mechanics shared by all stores (no business rules).

pub mod bus;
pub mod command;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod topic;

pub use bus::{EventBus, Subscription};
pub use command::Command;
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use topic::{TopicFilter, Topical};
