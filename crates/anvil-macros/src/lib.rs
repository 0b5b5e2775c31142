use proc_macro::TokenStream;

mod task;

/// Marks a function as a durable task (§4.6, C6 Task Runner generation
/// strategy #1).
///
/// Expands to a marker struct implementing `anvil_core::task::TaskDef` plus
/// `run_<name>`/`run_<name>_with_tx` functions that enqueue it against any
/// `sqlx::PgExecutor`.
///
/// # Attributes
/// - `name = "..."` - override the task's registered name (defaults to the
///   function name)
/// - `timeout = "30s"` - execution timeout (duration like "30s", "5m", "1h")
/// - `cron = "0 * * * *"` - makes this task a scheduled cronjob
/// - `retry(interval = "30s", max_attempts = 5)` - retry policy;
///   `max_attempts = -1` means unbounded
///
/// # Example
/// ```ignore
/// #[anvil::task(timeout = "5m", retry(interval = "30s", max_attempts = 5))]
/// pub async fn send_welcome_email(ctx: &mut TaskContext<'_>, args: SendEmailInput) -> Result<()> {
///     email::send(&args).await
/// }
/// ```
#[proc_macro_attribute]
pub fn task(attr: TokenStream, item: TokenStream) -> TokenStream {
    task::task_impl(attr, item)
}
