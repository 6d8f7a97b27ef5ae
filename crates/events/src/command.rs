use torque_core::AggregateId;

/// A command targets a specific aggregate stream.
///
/// Commands represent **intent** ("confirm appointment X"); they are transient
/// and are either rejected or turned into events. The dispatcher routes a
/// command to its stream through `target_aggregate_id`, so every command
/// operates on exactly one aggregate (the transaction boundary of a store).
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> AggregateId;
}
