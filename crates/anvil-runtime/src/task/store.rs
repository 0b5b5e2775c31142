//! C5 Task Store: the only place SQL touches the `task`/`event` tables.
//! Every mutating method takes `impl PgExecutor<'_>` so callers can pass
//! either `storage.pool()` or a live `&mut Transaction` — see
//! `db::Storage::run_transaction` for the transactional entry point.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgExecutor};

use anvil_core::cron::CronSchedule;
use anvil_core::error::{AnvilError, Result};
use anvil_core::task::{CronAttribute, Event, EventSpec, Task, TaskAttributes, TaskSpec, TaskStatus};

/// Raw row shape, mapped by hand rather than `derive(FromRow)` since
/// `attributes`/`spec` are JSONB and `status` is a text enum.
struct TaskRow {
    id: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    task_type: String,
    payload: Vec<u8>,
    attributes: serde_json::Value,
    status: String,
    started_at: Option<DateTime<Utc>>,
    attempts: i32,
    unique_tag: Option<String>,
}

impl TaskRow {
    fn into_task(self) -> Result<Task> {
        let attributes: TaskAttributes = serde_json::from_value(self.attributes)?;
        let status = TaskStatus::from_str(&self.status)
            .ok_or_else(|| AnvilError::Internal(format!("unknown task status: {}", self.status)))?;

        Ok(Task {
            id: self.id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            spec: TaskSpec {
                task_type: self.task_type,
                payload: self.payload,
            },
            attributes,
            status,
            started_at: self.started_at,
            attempts: self.attempts,
            unique_tag: self.unique_tag,
        })
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for TaskRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(TaskRow {
            id: row.try_get("id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            task_type: row.try_get("task_type")?,
            payload: row.try_get("payload")?,
            attributes: row.try_get("attributes")?,
            status: row.try_get("status")?,
            started_at: row.try_get("started_at")?,
            attempts: row.try_get("attempts")?,
            unique_tag: row.try_get("unique_tag")?,
        })
    }
}

const TASK_COLUMNS: &str = "id, created_at, updated_at, task_type, payload, attributes, \
     status, started_at, attempts, unique_tag";

/// `PushTask`: inserts a new row. When `unique_tag` collides with an
/// existing non-null tag, returns the existing task's id instead of erroring
/// (T4's "idempotent enqueue"). Folded into one statement via a CTE so it
/// only needs a single borrow of `executor` — `PgExecutor` is consumed by
/// value, and a `&mut Transaction` can't be borrowed twice.
pub async fn push_task<'e, E>(executor: E, task: &Task) -> Result<i64>
where
    E: PgExecutor<'e>,
{
    let attributes = serde_json::to_value(&task.attributes)?;

    let row: (i64,) = sqlx::query_as(
        "WITH ins AS ( \
             INSERT INTO task (task_type, payload, attributes, status, started_at, attempts, unique_tag) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (unique_tag) DO NOTHING \
             RETURNING id \
         ) \
         SELECT id FROM ins \
         UNION ALL \
         SELECT id FROM task WHERE unique_tag = $7 AND NOT EXISTS (SELECT 1 FROM ins) \
         LIMIT 1",
    )
    .bind(&task.spec.task_type)
    .bind(&task.spec.payload)
    .bind(&attributes)
    .bind(task.status.as_str())
    .bind(task.started_at)
    .bind(task.attempts)
    .bind(&task.unique_tag)
    .fetch_one(executor)
    .await
    .map_err(AnvilError::Sql)?;

    Ok(row.0)
}

/// `GetTaskByID`.
pub async fn get_task_by_id<'e, E>(executor: E, id: i64) -> Result<Task>
where
    E: PgExecutor<'e>,
{
    let row: TaskRow = sqlx::query_as(&format!("SELECT {TASK_COLUMNS} FROM task WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await
        .map_err(AnvilError::Sql)?
        .ok_or_else(|| AnvilError::NotFound(format!("task {id}")))?;

    row.into_task()
}

/// `GetTaskByUniqueTag`.
pub async fn get_task_by_unique_tag<'e, E>(executor: E, tag: &str) -> Result<Option<Task>>
where
    E: PgExecutor<'e>,
{
    let row: Option<TaskRow> =
        sqlx::query_as(&format!("SELECT {TASK_COLUMNS} FROM task WHERE unique_tag = $1"))
            .bind(tag)
            .fetch_optional(executor)
            .await
            .map_err(AnvilError::Sql)?;

    row.map(TaskRow::into_task).transpose()
}

/// `PullTask`: locks and returns the oldest pullable row, or `None` if the
/// queue is empty. `FOR UPDATE SKIP LOCKED` lets concurrent workers pull
/// distinct rows without blocking on each other.
pub async fn pull_task<'e, E>(executor: E, now: DateTime<Utc>) -> Result<Option<Task>>
where
    E: PgExecutor<'e>,
{
    let row: Option<TaskRow> = sqlx::query_as(&format!(
        "SELECT {TASK_COLUMNS} FROM task \
         WHERE status = 'pending' AND (started_at IS NULL OR started_at <= $1) \
         ORDER BY started_at ASC NULLS FIRST \
         FOR UPDATE SKIP LOCKED \
         LIMIT 1"
    ))
    .bind(now)
    .fetch_optional(executor)
    .await
    .map_err(AnvilError::Sql)?;

    row.map(TaskRow::into_task).transpose()
}

/// `PullTaskByID`: same locking semantics as [`pull_task`] but targeting one
/// row, for on-demand execution (§4.9's `RunTask`).
pub async fn pull_task_by_id<'e, E>(executor: E, id: i64, now: DateTime<Utc>) -> Result<Option<Task>>
where
    E: PgExecutor<'e>,
{
    let row: Option<TaskRow> = sqlx::query_as(&format!(
        "SELECT {TASK_COLUMNS} FROM task \
         WHERE id = $1 AND status = 'pending' AND (started_at IS NULL OR started_at <= $2) \
         FOR UPDATE SKIP LOCKED"
    ))
    .bind(id)
    .bind(now)
    .fetch_optional(executor)
    .await
    .map_err(AnvilError::Sql)?;

    row.map(TaskRow::into_task).transpose()
}

/// `UpdateTaskStatus`.
pub async fn update_task_status<'e, E>(executor: E, id: i64, status: TaskStatus) -> Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query("UPDATE task SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(status.as_str())
        .execute(executor)
        .await
        .map_err(AnvilError::Sql)?;
    Ok(())
}

/// `UpdateTaskStartedAt`: reschedules a row, implicitly resetting it to
/// pullable at the new instant (used by retry backoff and cron rescheduling).
pub async fn update_task_started_at<'e, E>(
    executor: E,
    id: i64,
    started_at: DateTime<Utc>,
) -> Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query("UPDATE task SET started_at = $2, status = 'pending', updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(started_at)
        .execute(executor)
        .await
        .map_err(AnvilError::Sql)?;
    Ok(())
}

/// `IncrementAttempts`: bumps the counter and returns the new value, so the
/// caller can compare it against the retry policy without a second read.
pub async fn increment_attempts<'e, E>(executor: E, id: i64) -> Result<i32>
where
    E: PgExecutor<'e>,
{
    let (attempts,): (i32,) = sqlx::query_as(
        "UPDATE task SET attempts = attempts + 1, updated_at = NOW() WHERE id = $1 RETURNING attempts",
    )
    .bind(id)
    .fetch_one(executor)
    .await
    .map_err(AnvilError::Sql)?;

    Ok(attempts)
}

/// `PauseTask`/`ResumeTask`: a no-op (but still `Ok`) if the task is already
/// in the target state, `NotFound` if the row doesn't exist at all. The
/// `UPDATE` runs unconditionally on `id` rather than filtering on the prior
/// status, so `rows_affected() == 0` means exactly one thing: no row with
/// that id.
pub async fn pause_task<'e, E>(executor: E, id: i64) -> Result<()>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query("UPDATE task SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(TaskStatus::Paused.as_str())
        .execute(executor)
        .await
        .map_err(AnvilError::Sql)?;

    if result.rows_affected() == 0 {
        return Err(AnvilError::NotFound(format!("task {id}")));
    }
    Ok(())
}

/// `resume` re-arms `started_at` to now so a paused task does not fire on a
/// stale schedule the moment it is resumed.
pub async fn resume_task<'e, E>(executor: E, id: i64) -> Result<()>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE task SET status = 'pending', started_at = NOW(), updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .execute(executor)
    .await
    .map_err(AnvilError::Sql)?;

    if result.rows_affected() == 0 {
        return Err(AnvilError::NotFound(format!("task {id}")));
    }
    Ok(())
}

/// `UpdateCronJob(ctx, task_id, expr, payload)`: parses `expr` first
/// so an invalid cron expression fails with `BadCronExpression` before
/// anything is written, then overwrites `attributes.cronjob`,
/// `spec.payload`, and `started_at = cron.Next(now())` in one statement.
///
/// Takes `&mut PgConnection` rather than a generic executor because it reads
/// the row before writing it back; a generic `E: PgExecutor<'_>` is consumed
/// by value on first use and can't be reused for the follow-up `UPDATE`.
pub async fn update_cron_job(
    conn: &mut PgConnection,
    id: i64,
    cron_expression: &str,
    payload: Vec<u8>,
) -> Result<Task> {
    let schedule = CronSchedule::new(cron_expression)
        .map_err(|e| AnvilError::BadCronExpression(e.to_string()))?;
    let next = schedule
        .next_after(Utc::now())
        .ok_or_else(|| AnvilError::BadCronExpression(cron_expression.to_string()))?;

    let mut task = get_task_by_id(&mut *conn, id).await?;
    task.attributes.cronjob = Some(CronAttribute {
        cron_expression: cron_expression.to_string(),
    });
    task.spec.payload = payload;
    task.started_at = Some(next);

    let attributes = serde_json::to_value(&task.attributes)?;
    sqlx::query(
        "UPDATE task SET attributes = $2, payload = $3, started_at = $4, updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(&attributes)
    .bind(&task.spec.payload)
    .bind(task.started_at)
    .execute(&mut *conn)
    .await
    .map_err(AnvilError::Sql)?;

    Ok(task)
}

/// Supplemented listing for operational visibility: paginated, optionally
/// filtered by status.
pub async fn list_tasks<'e, E>(
    executor: E,
    status: Option<TaskStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Task>>
where
    E: PgExecutor<'e>,
{
    let rows: Vec<TaskRow> = match status {
        Some(s) => {
            sqlx::query_as(&format!(
                "SELECT {TASK_COLUMNS} FROM task WHERE status = $1 ORDER BY id DESC LIMIT $2 OFFSET $3"
            ))
            .bind(s.as_str())
            .bind(limit)
            .bind(offset)
            .fetch_all(executor)
            .await
        }
        None => {
            sqlx::query_as(&format!(
                "SELECT {TASK_COLUMNS} FROM task ORDER BY id DESC LIMIT $1 OFFSET $2"
            ))
            .bind(limit)
            .bind(offset)
            .fetch_all(executor)
            .await
        }
    }
    .map_err(AnvilError::Sql)?;

    rows.into_iter().map(TaskRow::into_task).collect()
}

/// Supplemented: coarse queue depth, used by operators and by the worker's
/// own backpressure decisions.
pub struct QueueStats {
    pub pending: i64,
    pub failed: i64,
    pub completed: i64,
    pub paused: i64,
}

pub async fn queue_stats<'e, E>(executor: E) -> Result<QueueStats>
where
    E: PgExecutor<'e>,
{
    let (pending, failed, completed, paused): (i64, i64, i64, i64) = sqlx::query_as(
        "SELECT \
           COUNT(*) FILTER (WHERE status = 'pending') , \
           COUNT(*) FILTER (WHERE status = 'failed') , \
           COUNT(*) FILTER (WHERE status = 'completed') , \
           COUNT(*) FILTER (WHERE status = 'paused') \
         FROM task",
    )
    .fetch_one(executor)
    .await
    .map_err(AnvilError::Sql)?;

    Ok(QueueStats {
        pending,
        failed,
        completed,
        paused,
    })
}

/// `InsertEvent`: append-only audit row, written inside the same transaction
/// as the status update that caused it.
pub async fn insert_event<'e, E>(executor: E, spec: &EventSpec) -> Result<i64>
where
    E: PgExecutor<'e>,
{
    let spec_json = serde_json::to_value(spec)?;

    let (id,): (i64,) = sqlx::query_as("INSERT INTO event (spec) VALUES ($1) RETURNING id")
        .bind(&spec_json)
        .fetch_one(executor)
        .await
        .map_err(AnvilError::Sql)?;

    Ok(id)
}

/// Supplemented listing for operational visibility, mirroring [`list_tasks`].
pub async fn list_events<'e, E>(executor: E, limit: i64, offset: i64) -> Result<Vec<Event>>
where
    E: PgExecutor<'e>,
{
    let rows: Vec<(i64, DateTime<Utc>, serde_json::Value)> = sqlx::query_as(
        "SELECT id, created_at, spec FROM event ORDER BY id DESC LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(executor)
    .await
    .map_err(AnvilError::Sql)?;

    rows.into_iter()
        .map(|(id, created_at, spec_json)| {
            let spec: EventSpec = serde_json::from_value(spec_json)?;
            Ok(Event {
                id,
                created_at,
                spec,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_columns_list_matches_row_mapping_fields() {
        for col in [
            "id",
            "created_at",
            "updated_at",
            "task_type",
            "payload",
            "attributes",
            "status",
            "started_at",
            "attempts",
            "unique_tag",
        ] {
            assert!(TASK_COLUMNS.contains(col), "missing column {col}");
        }
    }
}
