use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;
use crate::task::context::TaskContext;
use crate::task::model::TaskAttributes;

/// Implemented by the marker type generated per declared task (by
/// `anvil_macros::task!` or by `anvil-codegen` from a task-definition file).
/// The runtime registry dispatches on `NAME` against `spec.type` (§4.6/§4.8).
pub trait TaskDef: Send + Sync + 'static {
    /// Task payload type, marshaled to/from `spec.payload`.
    type Args: DeserializeOwned + Serialize + Send + Sync;
    /// Handler return type; only used for in-process `RunTask` callers, since
    /// the persisted outcome is success/failure, not the value itself.
    type Output: Serialize + Send;

    /// Dispatch discriminator, also used as the default `Run<Name>` suffix.
    const NAME: &'static str;

    /// Attributes seeded onto the task at construction time, before any
    /// override is applied (§4.6 step 2).
    fn default_attributes() -> TaskAttributes {
        TaskAttributes::default()
    }

    /// Shifts `started_at` by this amount on enqueue, before overrides are
    /// applied (§6's `delay` task-definition field). `None` means no shift —
    /// the task is pullable as soon as it's pushed.
    fn default_delay() -> Option<Duration> {
        None
    }

    fn execute<'a>(
        ctx: &'a mut TaskContext<'_>,
        args: Self::Args,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Output>> + Send + 'a>>;
}
