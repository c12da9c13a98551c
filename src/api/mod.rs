//! HTTP transport.

pub mod routes;

pub use routes::{ApiState, TENANT_HEADER, chat_routes, cors_layer};
