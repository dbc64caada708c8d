//! In-memory task-type to handler mapping.
//!
//! One handler per task type per worker process. Built at startup, then
//! shared read-only with every dispatcher loop.

use crate::config::TaskTypeConfig;
use crate::error::{Result, WorkerError};
use crate::types::{FnHandler, HandlerResult, JobHandler, TaskType, Variables};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// A registered handler and its per-type tuning.
#[derive(Clone)]
pub struct Registration {
    pub handler: Arc<dyn JobHandler>,
    pub config: TaskTypeConfig,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Registry statistics
#[derive(Debug, Clone)]
pub struct RegistryStats {
    pub total_handlers: usize,
    pub task_types: Vec<String>,
}

/// Task-type to handler registry.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    entries: HashMap<TaskType, Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a handler for a task type.
    ///
    /// Fails with `DuplicateRegistration` if the task type already has a
    /// handler; a worker must never race two handlers for one type.
    pub fn register(
        &mut self,
        task_type: impl Into<TaskType>,
        config: TaskTypeConfig,
        handler: Arc<dyn JobHandler>,
    ) -> Result<()> {
        let task_type = task_type.into();
        self.validate_task_type(&task_type)?;
        config.validate()?;

        if self.entries.contains_key(&task_type) {
            return Err(WorkerError::DuplicateRegistration(task_type.to_string()));
        }

        info!(
            task_type = %task_type,
            max_concurrent_jobs = config.max_concurrent_jobs,
            lock_duration_ms = config.lock_duration_ms,
            "📚 REGISTRY: Handler registered"
        );

        self.entries.insert(task_type, Registration { handler, config });
        Ok(())
    }

    /// Register an async closure as a handler.
    pub fn register_fn<F, Fut>(
        &mut self,
        task_type: impl Into<TaskType>,
        config: TaskTypeConfig,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(Variables) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(task_type, config, Arc::new(FnHandler(handler)))
    }

    /// Look up the handler and config for a task type.
    pub fn lookup(&self, task_type: &TaskType) -> Result<&Registration> {
        self.entries
            .get(task_type)
            .ok_or_else(|| WorkerError::HandlerNotFound(task_type.to_string()))
    }

    /// All registered task types. Iteration order is unspecified.
    pub fn task_types(&self) -> Vec<TaskType> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_handlers: self.entries.len(),
            task_types: self.entries.keys().map(|t| t.to_string()).collect(),
        }
    }

    fn validate_task_type(&self, task_type: &TaskType) -> Result<()> {
        if task_type.as_str().is_empty() {
            return Err(WorkerError::Configuration(
                "Task type cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_handler() -> Arc<dyn JobHandler> {
        Arc::new(FnHandler(|vars: Variables| async move {
            HandlerResult::Success(vars)
        }))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = HandlerRegistry::new();
        registry
            .register("validate-lead", TaskTypeConfig::default(), echo_handler())
            .unwrap();

        let registration = registry.lookup(&TaskType::new("validate-lead")).unwrap();
        assert_eq!(registration.config.max_concurrent_jobs, 10);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = HandlerRegistry::new();
        registry
            .register("store-lead", TaskTypeConfig::default(), echo_handler())
            .unwrap();

        let err = registry
            .register("store-lead", TaskTypeConfig::default(), echo_handler())
            .unwrap_err();
        assert!(matches!(err, WorkerError::DuplicateRegistration(t) if t == "store-lead"));
    }

    #[test]
    fn test_empty_task_type_rejected() {
        let mut registry = HandlerRegistry::new();
        let err = registry
            .register("", TaskTypeConfig::default(), echo_handler())
            .unwrap_err();
        assert!(matches!(err, WorkerError::Configuration(_)));
    }

    #[test]
    fn test_unusable_config_rejected() {
        let mut registry = HandlerRegistry::new();

        let no_buffer = TaskTypeConfig {
            stream_buffer: 0,
            ..Default::default()
        };
        let err = registry
            .register("store-lead", no_buffer, echo_handler())
            .unwrap_err();
        assert!(matches!(err, WorkerError::Configuration(m) if m.contains("stream_buffer")));

        let no_slots = TaskTypeConfig {
            max_concurrent_jobs: 0,
            ..Default::default()
        };
        let err = registry
            .register("store-lead", no_slots, echo_handler())
            .unwrap_err();
        assert!(matches!(err, WorkerError::Configuration(m) if m.contains("max_concurrent_jobs")));
    }

    #[test]
    fn test_lookup_missing_handler() {
        let registry = HandlerRegistry::new();
        let err = registry.lookup(&TaskType::new("nope")).unwrap_err();
        assert!(matches!(err, WorkerError::HandlerNotFound(t) if t == "nope"));
    }

    #[test]
    fn test_stats_and_task_types() {
        let mut registry = HandlerRegistry::new();
        registry
            .register("validate-lead", TaskTypeConfig::default(), echo_handler())
            .unwrap();
        registry
            .register("store-lead", TaskTypeConfig::default(), echo_handler())
            .unwrap();

        let stats = registry.stats();
        assert_eq!(stats.total_handlers, 2);
        let mut types = registry.task_types();
        types.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(types[0].as_str(), "store-lead");
        assert_eq!(types[1].as_str(), "validate-lead");
    }

    #[tokio::test]
    async fn test_registered_closure_executes() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_fn("notify", TaskTypeConfig::default(), |vars: Variables| async move {
                let mut out = Variables::new();
                out.insert("seen".to_string(), json!(vars.contains_key("leadName")));
                HandlerResult::Success(out)
            })
            .unwrap();

        let registration = registry.lookup(&TaskType::new("notify")).unwrap();
        let mut vars = Variables::new();
        vars.insert("leadName".to_string(), json!("Jane Doe"));
        match registration.handler.execute(&vars).await {
            HandlerResult::Success(out) => assert_eq!(out["seen"], json!(true)),
            other => panic!("expected success, got {other:?}"),
        }
    }
}
