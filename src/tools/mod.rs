//! Ad-platform tools and per-session binding.

pub mod binder;
pub mod tool;

pub use binder::{BoundTool, ToolBinder, ToolSet};
pub use tool::AdTool;
