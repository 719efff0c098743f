//! Shepherd core: pathway stages, member progression and task automation
//! for multi-tenant church follow-up.
//!
//! Pure domain. Storage is reached only through the port traits in
//! [`ports`]; the PostgreSQL adapter lives in `shepherd_postgres` and the
//! HTTP surface in `shepherd_server`.

pub mod automation;
pub mod config;
pub mod error;
pub mod import;
pub mod members;
pub mod memory;
pub mod ports;
pub mod principal;
pub mod progression;
pub mod service;
pub mod stages;
pub mod sweep;
pub mod tasks;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::EngineConfig;
pub use error::ShepherdError;
pub use principal::{Permission, Principal, Role};
pub use service::Shepherd;
