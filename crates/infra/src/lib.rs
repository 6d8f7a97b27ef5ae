//! Infrastructure layer: event store, dispatcher, the three stores, the event
//! relay workers, collaborator adapters and configuration.

pub mod command_dispatcher;
pub mod config;
pub mod engine;
pub mod event_store;
pub mod external;
pub mod hooks;
pub mod read_model;
pub mod relay;
pub mod saga;
pub mod stores;

#[cfg(test)]
mod integration_tests;
