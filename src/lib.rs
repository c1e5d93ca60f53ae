#[path = "shared/time/mod.rs"]
pub mod time;
#[cfg(test)]
mod tests;

#[cfg(test)]
pub use tests::support;

pub mod address;
pub mod app;
pub mod config;
pub mod coordinator;
pub mod http;
pub mod invoke;
pub mod model;
pub mod orchestrator;
pub mod preference;
pub mod probe;
pub mod shutdown;
pub mod transport;
