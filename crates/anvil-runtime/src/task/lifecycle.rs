//! C7 Task Lifecycle Handler: turns a handler's `Result<()>` into the status
//! transition, retry reschedule, and audit `event` row, all written through
//! the same connection the handler itself ran on.
//!
//! Cron tasks never reach a terminal `completed`/`failed` state (T3): the
//! next occurrence is always scheduled pre-execution by [`handle_attributes`],
//! and no outcome here ever overwrites `status` or `started_at` for one.
//!
//! Every function here takes a concrete `&mut PgConnection` rather than a
//! generic executor: each path issues more than one query against the same
//! connection, and a generic `E: PgExecutor<'_>` is consumed by value on
//! first use, so it can't be reused the way an explicit `&mut PgConnection`
//! can be reborrowed (`&mut *conn`) at each call site.

use chrono::Utc;
use sqlx::PgConnection;

use anvil_core::cron::CronSchedule;
use anvil_core::error::{AnvilError, Result};
use anvil_core::task::{EventSpec, Task, TaskStatus};

use crate::hooks::{HookRegistry, TaskFailedEvent};

use super::store;

/// What the lifecycle handler decided to do with a task after one execution
/// attempt. Exposed for worker-level logging/metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Rescheduled { attempt: i32 },
    Failed,
    RescheduledCron,
}

/// Pre-execution attributes handling: before dispatching, if `task`
/// is a cronjob, compute its next occurrence and write `started_at` now —
/// so the next run is scheduled even if the handler never returns (the
/// surrounding transaction still rolls back whole on a crash, but this
/// keeps the scheduling decision co-located with the rest of the tick
/// rather than deferred to the outcome branch below). A non-cron task is
/// untouched here; its `started_at` is only ever written by the retry path.
pub async fn handle_attributes(conn: &mut PgConnection, task: &Task) -> Result<()> {
    if !task.is_cron() {
        return Ok(());
    }

    let next = next_cron_occurrence(task)?;
    store::update_task_started_at(conn, task.id, next).await
}

fn next_cron_occurrence(task: &Task) -> Result<chrono::DateTime<Utc>> {
    let cron = task
        .attributes
        .cronjob
        .as_ref()
        .expect("next_cron_occurrence called on a non-cron task");

    let schedule = CronSchedule::new(&cron.cron_expression)
        .map_err(|e| AnvilError::BadCronExpression(e.to_string()))?;
    schedule
        .next_after(Utc::now())
        .ok_or_else(|| AnvilError::BadCronExpression(cron.cron_expression.clone()))
}

/// Applies the outcome of one execution attempt. `task` must already carry
/// the attempt count incremented for this run (the worker increments before
/// calling the handler). `hooks`, when given, fires `OnTaskFailed` inside
/// this same connection whenever the task lands on `status = failed`.
///
/// A cron task's `started_at` was already advanced to its next occurrence by
/// [`handle_attributes`] before the handler ran; this function never touches
/// it again for a cron task — it only decides whether to record an event.
pub async fn apply_outcome(
    conn: &mut PgConnection,
    task: &Task,
    result: Result<()>,
    hooks: Option<&HookRegistry>,
) -> Result<Outcome> {
    match result {
        Ok(()) => on_success(conn, task).await,
        Err(AnvilError::Fatal(msg)) => on_terminal_failure(conn, task, &msg, hooks).await,
        Err(AnvilError::RetrySilently(msg)) => on_retry_silently(conn, task, &msg, hooks).await,
        Err(e) => on_failure(conn, task, &e.to_string(), hooks).await,
    }
}

async fn on_success(conn: &mut PgConnection, task: &Task) -> Result<Outcome> {
    if task.is_cron() {
        store::insert_event(&mut *conn, &EventSpec::TaskCompleted { task_id: task.id }).await?;
        return Ok(Outcome::RescheduledCron);
    }

    store::update_task_status(&mut *conn, task.id, TaskStatus::Completed).await?;
    store::insert_event(&mut *conn, &EventSpec::TaskCompleted { task_id: task.id }).await?;
    Ok(Outcome::Completed)
}

/// `Fatal` bypasses the retry policy entirely, but a cron task still comes
/// back around at its next occurrence (already scheduled pre-execution by
/// [`handle_attributes`]).
async fn on_terminal_failure(
    conn: &mut PgConnection,
    task: &Task,
    error: &str,
    hooks: Option<&HookRegistry>,
) -> Result<Outcome> {
    if task.is_cron() {
        record_error_event(&mut *conn, task.id, error).await?;
        return Ok(Outcome::RescheduledCron);
    }

    store::update_task_status(&mut *conn, task.id, TaskStatus::Failed).await?;
    record_error_event(&mut *conn, task.id, error).await?;
    fire_task_failed(conn, task, error, hooks).await?;
    Ok(Outcome::Failed)
}

/// `RetrySilently` reschedules on the normal retry policy but suppresses the
/// `task_error` event (the handler asked not to be noisy about this attempt).
async fn on_retry_silently(
    conn: &mut PgConnection,
    task: &Task,
    error: &str,
    hooks: Option<&HookRegistry>,
) -> Result<Outcome> {
    reschedule_or_fail(conn, task, error, false, hooks).await
}

async fn on_failure(
    conn: &mut PgConnection,
    task: &Task,
    error: &str,
    hooks: Option<&HookRegistry>,
) -> Result<Outcome> {
    reschedule_or_fail(conn, task, error, true, hooks).await
}

async fn reschedule_or_fail(
    conn: &mut PgConnection,
    task: &Task,
    error: &str,
    emit_event: bool,
    hooks: Option<&HookRegistry>,
) -> Result<Outcome> {
    let policy = task.attributes.retry_policy.clone();
    // A zero retry interval can never produce useful backoff; treat it the
    // same as no policy at all, straight to failed.
    let exhausted = policy
        .as_ref()
        .map(|p| p.interval.is_zero() || p.exhausted(task.attempts))
        .unwrap_or(true);

    // A cron task never enters the retry-exhaustion/fatal branch: whether or
    // not it has a retry policy, the next occurrence is already scheduled
    // and the row must stay `pending`.
    if task.is_cron() {
        if emit_event {
            record_error_event(&mut *conn, task.id, error).await?;
        }
        return Ok(Outcome::RescheduledCron);
    }

    if exhausted {
        store::update_task_status(&mut *conn, task.id, TaskStatus::Failed).await?;
        if emit_event {
            record_error_event(&mut *conn, task.id, error).await?;
        }
        fire_task_failed(conn, task, error, hooks).await?;
        return Ok(Outcome::Failed);
    }

    let policy = policy.expect("exhausted() is false only when a policy is present");
    let next_at = Utc::now() + chrono::Duration::from_std(policy.interval).unwrap_or_default();
    store::update_task_started_at(&mut *conn, task.id, next_at).await?;
    if emit_event {
        record_error_event(conn, task.id, error).await?;
    }

    Ok(Outcome::Rescheduled {
        attempt: task.attempts,
    })
}

/// Invokes `OnTaskFailed` for a task that just landed on `status = failed`
/// (never for cron tasks, which have no terminal failure state). A hook
/// failure propagates and aborts the tick's commit, per §4.9's fan-out
/// contract.
async fn fire_task_failed(
    conn: &mut PgConnection,
    task: &Task,
    error: &str,
    hooks: Option<&HookRegistry>,
) -> Result<()> {
    let Some(hooks) = hooks else {
        return Ok(());
    };

    let event = TaskFailedEvent {
        task_id: task.id,
        task_type: task.spec.task_type.clone(),
        error: error.to_string(),
    };
    hooks.fire_task_failed(conn, &event).await
}

async fn record_error_event(conn: &mut PgConnection, task_id: i64, error: &str) -> Result<()> {
    store::insert_event(
        conn,
        &EventSpec::TaskError {
            task_id,
            error: error.to_string(),
        },
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_core::task::RetryPolicy;
    use std::time::Duration;

    fn task_with_retry(attempts: i32, max_attempts: u32) -> Task {
        let mut task = Task::new_pending("noop", vec![]);
        task.attempts = attempts;
        task.attributes.retry_policy =
            Some(RetryPolicy::bounded(Duration::from_secs(30), max_attempts));
        task
    }

    #[test]
    fn exhausted_policy_yields_failed_path() {
        let task = task_with_retry(3, 3);
        let policy = task.attributes.retry_policy.as_ref().unwrap();
        assert!(policy.exhausted(task.attempts));
    }

    #[test]
    fn unexhausted_policy_still_has_budget() {
        let task = task_with_retry(1, 3);
        let policy = task.attributes.retry_policy.as_ref().unwrap();
        assert!(!policy.exhausted(task.attempts));
    }
}
