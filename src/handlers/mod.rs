//! # Built-in Lead Pipeline Handlers
//!
//! The four handlers the lead-enrichment workflow runs: validation,
//! enrichment, storage, and notification. Each one is a plain
//! [`crate::types::JobHandler`] implementation; the binary registers them
//! all via [`register_builtin`], library users can register any subset.
//!
//! ## Usage
//!
//! ```rust
//! use leadflow_worker::config::TaskTypeConfig;
//! use leadflow_worker::handlers;
//! use leadflow_worker::registry::HandlerRegistry;
//!
//! let mut registry = HandlerRegistry::new();
//! handlers::register_builtin(&mut registry, TaskTypeConfig::default()).unwrap();
//! assert_eq!(registry.len(), 4);
//! ```

pub mod enrich_lead;
pub mod notify_success;
pub mod store_lead;
pub mod validate_lead;

pub use enrich_lead::EnrichLeadHandler;
pub use notify_success::NotifySuccessHandler;
pub use store_lead::StoreLeadHandler;
pub use validate_lead::ValidateLeadHandler;

use std::sync::Arc;

use crate::config::TaskTypeConfig;
use crate::error::Result;
use crate::registry::HandlerRegistry;
use crate::types::Variables;

/// Register the four pipeline handlers under their workflow task types,
/// each with the same per-type tuning.
pub fn register_builtin(registry: &mut HandlerRegistry, defaults: TaskTypeConfig) -> Result<()> {
    registry.register(
        "validate-lead",
        defaults.clone(),
        Arc::new(ValidateLeadHandler),
    )?;
    registry.register(
        "lead-enrichment",
        defaults.clone(),
        Arc::new(EnrichLeadHandler),
    )?;
    registry.register("store-lead", defaults.clone(), Arc::new(StoreLeadHandler))?;
    registry.register("notify-success", defaults, Arc::new(NotifySuccessHandler))?;
    Ok(())
}

/// String field access with the empty string standing in for absent or
/// non-string values, mirroring how the workflow treats optional inputs.
pub(crate) fn string_field<'a>(variables: &'a Variables, key: &str) -> &'a str {
    variables
        .get(key)
        .and_then(serde_json::Value::as_str)
        .unwrap_or("")
}
