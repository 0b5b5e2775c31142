mod dispatcher;
mod lifecycle;
mod registry;
mod store;
mod worker;

pub use dispatcher::{enqueue, enqueue_by_name};
pub use lifecycle::{apply_outcome, Outcome};
pub use registry::{BoxedTaskHandler, TaskEntry, TaskRegistry};
pub use store::{
    get_task_by_id, get_task_by_unique_tag, increment_attempts, insert_event, list_events,
    list_tasks, pause_task, pull_task, pull_task_by_id, push_task, queue_stats, resume_task,
    update_cron_job, update_task_started_at, update_task_status, QueueStats,
};
pub use worker::{Worker, WorkerConfig};
