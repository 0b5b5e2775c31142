mod context;
mod model;
mod overrides;
mod traits;

pub use context::TaskContext;
pub use model::{
    CronAttribute, Event, EventSpec, MaxAttempts, RetryPolicy, Task, TaskAttributes, TaskSpec,
    TaskStatus,
};
pub use overrides::{apply_overrides, TaskOverride};
pub use traits::TaskDef;
