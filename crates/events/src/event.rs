use chrono::{DateTime, Utc};

/// A domain event published on the relay.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution)
/// - **self-sufficient**: they carry enough denormalized data for consumers in
///   other stores to act without a synchronous read-back
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Topic the event is published on (e.g. "appointment.completed").
    ///
    /// The first segment is the topic family of the owning store.
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
