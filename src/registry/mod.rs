//! # Handler Registry
//!
//! Maps task-type names to job handlers and per-type configuration.
//!
//! ## Overview
//!
//! The registry is populated once at worker startup and read concurrently
//! by dispatcher loops afterward. There is no runtime mutation: the worker
//! takes ownership of the registry when it starts, so registration errors
//! surface before any job is leased.
//!
//! ## Usage
//!
//! ```rust
//! use leadflow_worker::registry::HandlerRegistry;
//! use leadflow_worker::config::TaskTypeConfig;
//! use leadflow_worker::types::{HandlerResult, Variables};
//!
//! # fn example() -> leadflow_worker::error::Result<()> {
//! let mut registry = HandlerRegistry::new();
//! registry.register_fn("validate-lead", TaskTypeConfig::default(), |vars: Variables| async move {
//!     HandlerResult::Success(vars)
//! })?;
//! assert_eq!(registry.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod handler_registry;

// Re-export main types for easy access
pub use handler_registry::{HandlerRegistry, Registration, RegistryStats};
