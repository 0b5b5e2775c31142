use sqlx::PgConnection;

/// Context handed to a task handler while it runs inside the worker's
/// per-tick transaction. Handlers reach the shared connection through
/// [`TaskContext::conn`] so nested enqueues/queries participate in the same
/// transaction as the attempts-increment and the eventual lifecycle write.
pub struct TaskContext<'a> {
    pub task_id: i64,
    pub task_type: String,
    /// 1-based attempt number, already incremented for this execution.
    pub attempt: i32,
    conn: &'a mut PgConnection,
}

impl<'a> TaskContext<'a> {
    pub fn new(task_id: i64, task_type: impl Into<String>, attempt: i32, conn: &'a mut PgConnection) -> Self {
        Self {
            task_id,
            task_type: task_type.into(),
            attempt,
            conn,
        }
    }

    /// The live connection, scoped to the worker's transaction.
    pub fn conn(&mut self) -> &mut PgConnection {
        self.conn
    }

    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }
}
