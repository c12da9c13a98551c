//! AdGenius — per-tenant advertising assistant core.

pub mod agent;
pub mod api;
pub mod config;
pub mod error;
pub mod llm;
pub mod platform;
pub mod retry;
pub mod safety;
pub mod store;
pub mod tenant;
pub mod tools;
pub mod vault;

#[cfg(test)]
mod testing;
