use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::task::model::{RetryPolicy, Task};

/// An override applied, left to right, to the in-memory task before
/// `PushTask`. Composing overrides is just repeated mutation of the
/// task value; there is no interaction with storage until the final push.
#[derive(Debug, Clone)]
pub enum TaskOverride {
    WithRetryPolicy(RetryPolicy),
    WithCronjob(String),
    /// Shifts `started_at` by `d` relative to its current value.
    WithDelay(Duration),
    /// Sets `started_at` to an absolute instant.
    WithStartedAt(DateTime<Utc>),
    WithUniqueTag(String),
}

impl TaskOverride {
    fn apply(self, task: &mut Task) {
        match self {
            TaskOverride::WithRetryPolicy(policy) => {
                task.attributes.retry_policy = Some(policy);
            }
            TaskOverride::WithCronjob(expr) => {
                task.attributes.cronjob = Some(crate::task::model::CronAttribute {
                    cron_expression: expr,
                });
            }
            TaskOverride::WithDelay(d) => {
                let base = task.started_at.unwrap_or_else(Utc::now);
                task.started_at = Some(base + chrono::Duration::from_std(d).unwrap_or_default());
            }
            TaskOverride::WithStartedAt(at) => {
                task.started_at = Some(at);
            }
            TaskOverride::WithUniqueTag(tag) => {
                task.unique_tag = Some(tag);
            }
        }
    }
}

/// Applies `overrides` in order, per §4.6 step 3.
pub fn apply_overrides(task: &mut Task, overrides: impl IntoIterator<Item = TaskOverride>) {
    for o in overrides {
        o.apply(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_compose_left_to_right() {
        let mut task = Task::new_pending("noop", vec![]);
        let fixed_time = Utc::now() + chrono::Duration::hours(2);

        apply_overrides(
            &mut task,
            vec![
                TaskOverride::WithUniqueTag("inc".to_string()),
                TaskOverride::WithStartedAt(fixed_time),
                TaskOverride::WithDelay(Duration::from_secs(60)),
            ],
        );

        assert_eq!(task.unique_tag.as_deref(), Some("inc"));
        assert_eq!(task.started_at, Some(fixed_time + chrono::Duration::seconds(60)));
    }

    #[test]
    fn cronjob_override_sets_attribute() {
        let mut task = Task::new_pending("hourly", vec![]);
        apply_overrides(
            &mut task,
            vec![TaskOverride::WithCronjob("0 0 * * * *".to_string())],
        );
        assert!(task.is_cron());
    }
}
