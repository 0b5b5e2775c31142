//! Parses task-definition files into [`TaskDefinition`]s.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use walkdir::WalkDir;

use crate::Error;

/// One `[[task]]` table from a definition file, fully resolved (durations
/// parsed, defaults filled in).
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub name: String,
    pub description: Option<String>,
    /// Field name -> scalar type. An empty map means "no declared
    /// parameters", which generates a default `{ task_id: i64 }` shape.
    pub parameters: BTreeMap<String, ParamType>,
    pub timeout: Option<String>,
    pub delay: Option<String>,
    pub cron_expression: Option<String>,
    pub retry_interval: Option<String>,
    pub always_retry_on_failure: bool,
    pub on_failed: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    I64,
    F64,
    Bool,
    Bytes,
    Json,
}

impl ParamType {
    fn from_str(s: &str) -> Self {
        match s {
            "i64" | "int" | "integer" => ParamType::I64,
            "f64" | "float" | "number" => ParamType::F64,
            "bool" | "boolean" => ParamType::Bool,
            "bytes" => ParamType::Bytes,
            "json" | "object" => ParamType::Json,
            _ => ParamType::String,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DefinitionFile {
    #[serde(default, rename = "task")]
    tasks: Vec<RawTask>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    name: String,
    description: Option<String>,
    #[serde(default)]
    parameters: BTreeMap<String, String>,
    timeout: Option<String>,
    delay: Option<String>,
    #[serde(default)]
    cronjob: Option<RawCronjob>,
    #[serde(default, rename = "retryPolicy")]
    retry_policy: Option<RawRetryPolicy>,
    #[serde(default)]
    events: Option<RawEvents>,
}

#[derive(Debug, Deserialize)]
struct RawCronjob {
    #[serde(rename = "cronExpression")]
    cron_expression: String,
}

#[derive(Debug, Deserialize)]
struct RawRetryPolicy {
    interval: Option<String>,
    #[serde(default)]
    always_retry_on_failure: bool,
}

#[derive(Debug, Deserialize)]
struct RawEvents {
    #[serde(rename = "onFailed")]
    on_failed: Option<String>,
}

/// Parses a single TOML task-definition file.
pub fn parse_file(path: &Path) -> Result<Vec<TaskDefinition>, Error> {
    let content = std::fs::read_to_string(path)?;
    parse_str(&content)
}

fn parse_str(content: &str) -> Result<Vec<TaskDefinition>, Error> {
    let file: DefinitionFile = toml::from_str(content)?;

    Ok(file
        .tasks
        .into_iter()
        .map(|raw| TaskDefinition {
            name: raw.name,
            description: raw.description,
            parameters: raw
                .parameters
                .into_iter()
                .map(|(name, ty)| (name, ParamType::from_str(&ty)))
                .collect(),
            timeout: raw.timeout,
            delay: raw.delay,
            cron_expression: raw.cronjob.map(|c| c.cron_expression),
            retry_interval: raw.retry_policy.as_ref().and_then(|r| r.interval.clone()),
            always_retry_on_failure: raw
                .retry_policy
                .map(|r| r.always_retry_on_failure)
                .unwrap_or(false),
            on_failed: raw.events.and_then(|e| e.on_failed),
        })
        .collect())
}

/// Walks a directory for `*.toml` task-definition files and collects every
/// declared task, skipping files that fail to parse (logged, not fatal),
/// mirroring `forge_codegen::parser::parse_project`'s tolerant directory
/// scan.
pub fn parse_project(dir: &Path) -> Result<Vec<TaskDefinition>, Error> {
    let mut tasks = Vec::new();

    for entry in WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map(|ext| ext == "toml").unwrap_or(false))
    {
        match parse_file(entry.path()) {
            Ok(mut found) => tasks.append(&mut found),
            Err(e) => tracing::debug!(file = ?entry.path(), error = %e, "failed to parse task definition file"),
        }
    }

    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_task() {
        let toml = r#"
            [[task]]
            name = "PruneExpiredKeys"
        "#;
        let tasks = parse_str(toml).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "PruneExpiredKeys");
        assert!(tasks[0].parameters.is_empty());
        assert!(!tasks[0].always_retry_on_failure);
    }

    #[test]
    fn parses_a_fully_specified_task() {
        let toml = r#"
            [[task]]
            name = "SendWelcomeEmail"
            description = "Sends the welcome email to a new user"
            timeout = "30s"
            delay = "5s"

            [task.parameters]
            user_id = "i64"
            email = "string"

            [task.cronjob]
            cronExpression = "0 0 * * *"

            [task.retryPolicy]
            interval = "1m"
            always_retry_on_failure = true

            [task.events]
            onFailed = "LogWelcomeEmailFailure"
        "#;
        let tasks = parse_str(toml).unwrap();
        assert_eq!(tasks.len(), 1);
        let task = &tasks[0];
        assert_eq!(task.name, "SendWelcomeEmail");
        assert_eq!(task.parameters.get("user_id"), Some(&ParamType::I64));
        assert_eq!(task.parameters.get("email"), Some(&ParamType::String));
        assert_eq!(task.cron_expression.as_deref(), Some("0 0 * * *"));
        assert_eq!(task.retry_interval.as_deref(), Some("1m"));
        assert!(task.always_retry_on_failure);
        assert_eq!(task.on_failed.as_deref(), Some("LogWelcomeEmailFailure"));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = parse_str("not valid toml [[[").unwrap_err();
        assert!(matches!(err, Error::Toml(_)));
    }
}
