use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A durable unit of work. See §3 of the design for the full invariant set
/// (T1-T4): only `pending`/`paused` rows are pullable, a pullable row must
/// have `started_at` unset or in the past, cron tasks never self-terminate,
/// and `unique_tag` is globally unique among non-null values.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub spec: TaskSpec,
    pub attributes: TaskAttributes,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub unique_tag: Option<String>,
}

impl Task {
    /// Build the initial row a producer enqueues, before overrides are applied.
    pub fn new_pending(task_type: impl Into<String>, payload: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            created_at: now,
            updated_at: now,
            spec: TaskSpec {
                task_type: task_type.into(),
                payload,
            },
            attributes: TaskAttributes::default(),
            status: TaskStatus::Pending,
            started_at: Some(now),
            attempts: 0,
            unique_tag: None,
        }
    }

    pub fn is_cron(&self) -> bool {
        self.attributes.cronjob.is_some()
    }

    /// T2: pullable iff `status = pending` and `started_at` is unset or past.
    pub fn is_pullable(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending
            && self.started_at.map(|t| t <= now).unwrap_or(true)
    }
}

/// `{ type, payload }` — `type` is the dispatch discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(with = "payload_base64")]
    pub payload: Vec<u8>,
}

mod payload_base64 {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)
    }
}

/// `attributes` per §3: optional timeout, cron schedule, and retry policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskAttributes {
    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,

    #[serde(default)]
    pub cronjob: Option<CronAttribute>,

    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronAttribute {
    pub cron_expression: String,
}

/// Retry configuration. `MaxAttempts` is the normalized internal
/// representation of the two equivalent surfaces the task-definition file
/// exposes (`retryPolicy.always_retry_on_failure = true` and
/// `max_attempts = -1`); see the Open Question resolution in `DESIGN.md`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub max_attempts: MaxAttempts,
}

impl RetryPolicy {
    pub fn bounded(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: MaxAttempts::Bounded(max_attempts),
        }
    }

    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: MaxAttempts::Unbounded,
        }
    }

    /// Whether `attempts` has exhausted this policy's budget (never true for
    /// an unbounded policy).
    pub fn exhausted(&self, attempts: i32) -> bool {
        match self.max_attempts {
            MaxAttempts::Unbounded => false,
            MaxAttempts::Bounded(max) => attempts >= max as i32,
        }
    }
}

/// Wire representation: `-1` means unbounded, matching the task-definition
/// file's literal convention, so the persisted JSON stays legible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxAttempts {
    Unbounded,
    Bounded(u32),
}

impl Serialize for MaxAttempts {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            MaxAttempts::Unbounded => s.serialize_i64(-1),
            MaxAttempts::Bounded(n) => s.serialize_i64(*n as i64),
        }
    }
}

impl<'de> Deserialize<'de> for MaxAttempts {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let n = i64::deserialize(d)?;
        Ok(if n < 0 {
            MaxAttempts::Unbounded
        } else {
            MaxAttempts::Bounded(n as u32)
        })
    }
}

/// `status ∈ {pending, paused, completed, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Paused,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Append-only audit row written by C7 inside the task's updating transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub spec: EventSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventSpec {
    TaskError { task_id: i64, error: String },
    TaskCompleted { task_id: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pullable_requires_pending_and_past_started_at() {
        let mut task = Task::new_pending("noop", vec![]);
        task.started_at = None;
        assert!(task.is_pullable(Utc::now()));

        task.started_at = Some(Utc::now() + chrono::Duration::hours(1));
        assert!(!task.is_pullable(Utc::now()));

        task.status = TaskStatus::Paused;
        task.started_at = None;
        assert!(!task.is_pullable(Utc::now()));
    }

    #[test]
    fn max_attempts_round_trips_through_json() {
        let unbounded = serde_json::to_value(MaxAttempts::Unbounded).unwrap();
        assert_eq!(unbounded, serde_json::json!(-1));
        let parsed: MaxAttempts = serde_json::from_value(unbounded).unwrap();
        assert_eq!(parsed, MaxAttempts::Unbounded);

        let bounded = serde_json::to_value(MaxAttempts::Bounded(5)).unwrap();
        assert_eq!(bounded, serde_json::json!(5));
    }

    #[test]
    fn retry_policy_exhaustion() {
        let bounded = RetryPolicy::bounded(Duration::from_secs(1), 3);
        assert!(!bounded.exhausted(2));
        assert!(bounded.exhausted(3));

        let unbounded = RetryPolicy::unbounded(Duration::from_secs(1));
        assert!(!unbounded.exhausted(1_000_000));
    }

    #[test]
    fn task_attributes_round_trip_through_json() {
        let attrs = TaskAttributes {
            timeout: Some(Duration::from_secs(30)),
            cronjob: Some(CronAttribute {
                cron_expression: "0 0 * * * *".to_string(),
            }),
            retry_policy: Some(RetryPolicy::bounded(Duration::from_secs(60), 3)),
        };
        let json = serde_json::to_string(&attrs).unwrap();
        let parsed: TaskAttributes = serde_json::from_str(&json).unwrap();
        assert_eq!(attrs, parsed);
    }
}
