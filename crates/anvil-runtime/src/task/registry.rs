//! C6 Task Registry: maps `task.spec.type` strings to the handler compiled
//! in for that name. Mirrors `forge`'s job registry, but the boxed
//! handler closes over a live `&mut PgConnection` (the worker's transaction)
//! instead of a standalone context value, since execution must happen inside
//! the same transaction as the attempts increment and lifecycle write
//!.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anvil_core::error::{AnvilError, Result};
use anvil_core::task::{TaskAttributes, TaskContext, TaskDef};

pub type BoxedTaskHandler = Arc<
    dyn for<'a> Fn(
            &'a mut TaskContext<'_>,
            Vec<u8>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>
        + Send
        + Sync,
>;

pub struct TaskEntry {
    pub name: &'static str,
    pub default_attributes: TaskAttributes,
    pub handler: BoxedTaskHandler,
}

/// Registry of all compiled-in task types. Built once at startup from
/// `#[task]`-annotated functions or codegen output, then shared read-only
/// across worker ticks.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: HashMap<&'static str, Arc<TaskEntry>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    pub fn register<T: TaskDef>(&mut self) {
        let handler: BoxedTaskHandler = Arc::new(move |ctx, payload| {
            Box::pin(async move {
                let args: T::Args = serde_json::from_slice(&payload)
                    .map_err(|e| AnvilError::Deserialization(e.to_string()))?;
                T::execute(ctx, args).await?;
                Ok(())
            })
        });

        self.tasks.insert(
            T::NAME,
            Arc::new(TaskEntry {
                name: T::NAME,
                default_attributes: T::default_attributes(),
                handler,
            }),
        );
    }

    pub fn get(&self, name: &str) -> Option<Arc<TaskEntry>> {
        self.tasks.get(name).cloned()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Runs the handler registered for `task_type`, surfacing `NotFound` if
    /// nothing is registered for it — the dead-letter case the worker treats
    /// as a fatal, non-retryable failure.
    pub async fn dispatch<'a>(
        &self,
        task_type: &str,
        ctx: &'a mut TaskContext<'_>,
        payload: Vec<u8>,
    ) -> Result<()> {
        let entry = self
            .tasks
            .get(task_type)
            .ok_or_else(|| AnvilError::NotFound(format!("task type '{task_type}'")))?
            .clone();

        (entry.handler)(ctx, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registry_has_no_tasks() {
        let registry = TaskRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.get("nonexistent").is_none());
        assert!(!registry.exists("nonexistent"));
    }
}
