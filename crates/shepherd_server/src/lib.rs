//! Shepherd REST server: axum router, JWT principal middleware, response
//! envelope and env-driven configuration. The binary lives in `main.rs`.

pub mod config;
pub mod envelope;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
