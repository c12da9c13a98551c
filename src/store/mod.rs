//! Tenant integration and business profile records.

pub mod libsql_backend;
pub mod memory;
mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use memory::InMemoryStore;
pub use traits::TenantStore;
