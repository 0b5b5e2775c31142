//! Runtime-side target for the generated `Run<Name>`/`Run<Name>WithTx`
//! calls (`anvil_macros::task!` and `anvil-codegen` both emit thin wrappers
//! around [`enqueue`]). Mirrors `forge`'s `JobDispatcher`, but returns the
//! task's row id rather than a client-generated UUID, since uniqueness here
//! is the database sequence, not a caller-minted identifier.

use anvil_core::error::{AnvilError, Result};
use anvil_core::task::{apply_overrides, Task, TaskDef, TaskOverride};
use sqlx::PgExecutor;

use super::store;

/// `Run<Name>(executor, args, overrides...)`: serializes `args`, merges in
/// `T::default_attributes()`, applies `overrides` left to right, then pushes
/// the row via [`store::push_task`]. Takes a generic executor so the
/// generated wrapper works identically against the shared pool or a caller's
/// open transaction (the `WithTx` variant is the same function called with
/// a `&mut Transaction`).
pub async fn enqueue<'e, E, T>(
    executor: E,
    args: T::Args,
    overrides: Vec<TaskOverride>,
) -> Result<i64>
where
    E: PgExecutor<'e>,
    T: TaskDef,
{
    let payload = serde_json::to_vec(&args).map_err(|e| AnvilError::Serialization(e.to_string()))?;

    let mut task = Task::new_pending(T::NAME, payload);
    task.attributes = T::default_attributes();
    if let Some(delay) = T::default_delay() {
        apply_overrides(&mut task, [TaskOverride::WithDelay(delay)]);
    }
    apply_overrides(&mut task, overrides);

    store::push_task(executor, &task).await
}

/// Dynamic counterpart of [`enqueue`], for callers that only know the task
/// type name at runtime (e.g. an operator-facing replay endpoint). The
/// payload is assumed already encoded the way the target task's handler
/// expects to decode it.
pub async fn enqueue_by_name<'e, E>(
    executor: E,
    task_type: &str,
    payload: Vec<u8>,
    default_attributes: anvil_core::task::TaskAttributes,
    overrides: Vec<TaskOverride>,
) -> Result<i64>
where
    E: PgExecutor<'e>,
{
    let mut task = Task::new_pending(task_type, payload);
    task.attributes = default_attributes;
    apply_overrides(&mut task, overrides);

    store::push_task(executor, &task).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_core::task::{TaskAttributes, TaskContext};
    use serde::{Deserialize, Serialize};
    use std::future::Future;
    use std::pin::Pin;

    #[derive(Serialize, Deserialize)]
    struct Args {
        n: u32,
    }

    struct Noop;

    impl TaskDef for Noop {
        type Args = Args;
        type Output = ();
        const NAME: &'static str = "noop";

        fn execute<'a>(
            _ctx: &'a mut TaskContext<'_>,
            _args: Self::Args,
        ) -> Pin<Box<dyn Future<Output = anvil_core::error::Result<Self::Output>> + Send + 'a>>
        {
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn default_attributes_round_trip_for_a_task_def() {
        assert_eq!(Noop::default_attributes(), TaskAttributes::default());
        assert_eq!(Noop::NAME, "noop");
    }

    #[test]
    fn a_task_def_with_no_declared_delay_enqueues_immediately() {
        assert_eq!(Noop::default_delay(), None);
    }
}
