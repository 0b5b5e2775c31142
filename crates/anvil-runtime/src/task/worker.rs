//! C8 Worker: the poll loop that pulls, runs, and finalizes tasks.
//!
//! Each tick opens exactly one transaction (`Storage::run_transaction`),
//! pulls at most one row with `FOR UPDATE SKIP LOCKED`, increments its
//! attempt counter, runs the registered handler against the open
//! transaction's connection, and writes the lifecycle outcome — all before
//! committing. A handler that enqueues further tasks or reads its own
//! `task` row sees exactly what this transaction has written so far, and an
//! execution that panics or times out rolls everything back, leaving the
//! row exactly as pullable as it was before the tick started.
//!
//! This is the one significant departure from `forge`'s own worker, which
//! claims a batch up front and completes each job with a second, independent
//! statement — that split leaves a window where a claimed job is invisible
//! to other workers but not yet durably marked in-flight.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use anvil_core::error::{AnvilError, Result};
use anvil_core::task::TaskContext;

use crate::db::Storage;
use crate::hooks::HookRegistry;

use super::lifecycle;
use super::registry::TaskRegistry;
use super::store;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: StdDuration,
    pub max_concurrent: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: StdDuration::from_millis(250),
            max_concurrent: 10,
        }
    }
}

/// Background task-queue worker. Owns the pull-execute-finalize loop;
/// handler dispatch goes through the shared [`TaskRegistry`].
pub struct Worker {
    storage: Storage,
    registry: Arc<TaskRegistry>,
    hooks: Option<Arc<HookRegistry>>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(storage: Storage, registry: TaskRegistry, config: WorkerConfig) -> Self {
        Self {
            storage,
            registry: Arc::new(registry),
            hooks: None,
            config,
        }
    }

    /// Attaches the application's hook registry so `OnTaskFailed` fires on
    /// terminal task failure. Optional: a worker with no hooks
    /// attached just skips the fan-out.
    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Runs until `shutdown` resolves. Each concurrency slot independently
    /// polls on `poll_interval` — an idle slot never blocks a busy one.
    pub async fn run(&self, shutdown: impl std::future::Future<Output = ()>) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent as usize));
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("worker shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                        continue;
                    };

                    let storage = self.storage.clone();
                    let registry = self.registry.clone();
                    let hooks = self.hooks.clone();

                    tokio::spawn(async move {
                        if let Err(e) = run_one_tick(&storage, &registry, hooks).await {
                            tracing::error!(error = %e, "tick failed");
                        }
                        drop(permit);
                    });
                }
            }
        }
    }

    /// On-demand execution of a specific task id, bypassing the poll
    /// schedule (§4.9's `RunTask`). Still goes through the same
    /// pull-execute-finalize transaction.
    pub async fn run_task(&self, task_id: i64) -> Result<lifecycle::Outcome> {
        run_one_task_by_id(&self.storage, &self.registry, task_id, self.hooks.clone()).await
    }
}

async fn run_one_tick(
    storage: &Storage,
    registry: &TaskRegistry,
    hooks: Option<Arc<HookRegistry>>,
) -> Result<Option<lifecycle::Outcome>> {
    let registry = registry.clone();
    storage
        .run_transaction(move |tx| {
            Box::pin(async move {
                let now = Utc::now();
                let task = match store::pull_task(&mut **tx, now).await? {
                    Some(t) => t,
                    None => return Ok(None),
                };

                let attempt = store::increment_attempts(&mut **tx, task.id).await?;
                let outcome =
                    dispatch_and_finalize(&mut **tx, task, attempt, &registry, hooks.as_deref())
                        .await?;
                Ok(Some(outcome))
            })
        })
        .await
}

async fn run_one_task_by_id(
    storage: &Storage,
    registry: &TaskRegistry,
    task_id: i64,
    hooks: Option<Arc<HookRegistry>>,
) -> Result<lifecycle::Outcome> {
    let registry = registry.clone();
    storage
        .run_transaction(move |tx| {
            Box::pin(async move {
                let now = Utc::now();
                let task = store::pull_task_by_id(&mut **tx, task_id, now)
                    .await?
                    .ok_or_else(|| AnvilError::NotFound(format!("pullable task {task_id}")))?;

                let attempt = store::increment_attempts(&mut **tx, task.id).await?;
                dispatch_and_finalize(&mut **tx, task, attempt, &registry, hooks.as_deref()).await
            })
        })
        .await
}

/// Shared by [`run_one_tick`] and [`run_one_task_by_id`]: pre-schedules the
/// next cron occurrence, dispatches the handler under the task's timeout,
/// and writes the lifecycle outcome — all against the same connection the
/// lease was taken on.
///
/// A cron expression that fails to parse at this point (it was validated at
/// `UpdateCronJob` time, but the row could have been written by an older
/// version of the cron parser) is routed through [`lifecycle::apply_outcome`]
/// as a `Fatal` error instead of bubbling out of the transaction closure —
/// escaping via `?` here would roll back the attempt increment along with
/// it, silently re-lease the same unparseable task forever with no audit
/// trail (spec: a runtime `BadCronExpression` "behaves like an error with
/// kind = Fatal").
async fn dispatch_and_finalize(
    tx: &mut sqlx::PgConnection,
    task: anvil_core::task::Task,
    attempt: i32,
    registry: &TaskRegistry,
    hooks: Option<&HookRegistry>,
) -> Result<lifecycle::Outcome> {
    if let Err(e) = lifecycle::handle_attributes(&mut *tx, &task).await {
        return lifecycle::apply_outcome(&mut *tx, &task, Err(AnvilError::Fatal(e.to_string())), hooks)
            .await;
    }

    let timeout_duration = task.attributes.timeout;

    let result = with_timeout(timeout_duration, async {
        let mut ctx = TaskContext::new(task.id, task.spec.task_type.clone(), attempt, &mut *tx);
        registry
            .dispatch(&task.spec.task_type, &mut ctx, task.spec.payload.clone())
            .await
    })
    .await;

    lifecycle::apply_outcome(&mut *tx, &task, result, hooks).await
}

/// Bounds handler execution by the task's `attributes.timeout`, mapping an
/// elapsed deadline onto the same `Result<()>` the handler itself returns so
/// the lifecycle handler treats it like any other failure.
async fn with_timeout(
    duration: Option<StdDuration>,
    fut: impl std::future::Future<Output = Result<()>>,
) -> Result<()> {
    match duration {
        Some(d) => timeout(d, fut)
            .await
            .unwrap_or_else(|_| Err(AnvilError::Internal("task execution timed out".to_string()))),
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval, StdDuration::from_millis(250));
        assert_eq!(config.max_concurrent, 10);
    }
}
