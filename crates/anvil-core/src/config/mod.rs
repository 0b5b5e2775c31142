mod database;

pub use database::DatabaseConfig;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{AnvilError, Result};

/// Root configuration for an Anvil application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnvilConfig {
    /// Project metadata.
    #[serde(default)]
    pub project: ProjectConfig,

    /// Database configuration.
    pub database: DatabaseConfig,

    /// Worker configuration.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Auth (macaroon) configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Directory containing user-authored migration files.
    #[serde(default)]
    pub migrations_dir: Option<String>,
}

impl AnvilConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AnvilError::Config(format!("failed to read config file: {e}")))?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string, substituting `${VAR}` references
    /// against the process environment before handing the result to `toml`.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content);

        toml::from_str(&content)
            .map_err(|e| AnvilError::Config(format!("failed to parse config: {e}")))
    }

    /// Build a minimal configuration pointing at the given database URL, with
    /// every other section defaulted.
    pub fn default_with_database_url(url: &str) -> Self {
        Self {
            project: ProjectConfig::default(),
            database: DatabaseConfig {
                url: url.to_string(),
                ..Default::default()
            },
            worker: WorkerConfig::default(),
            auth: AuthConfig::default(),
            migrations_dir: None,
        }
    }
}

/// Project metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_project_name")]
    pub name: String,

    #[serde(default = "default_version")]
    pub version: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_project_name(),
            version: default_version(),
        }
    }
}

fn default_project_name() -> String {
    "anvil-app".to_string()
}

fn default_version() -> String {
    "0.1.0".to_string()
}

/// Worker polling / concurrency configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Interval between poll ticks.
    #[serde(default = "default_poll_interval_ms", with = "duration_millis")]
    pub poll_interval: Duration,

    /// Maximum number of tasks executed concurrently by a single worker process.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(default_poll_interval_ms()),
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_max_concurrent() -> u32 {
    10
}

/// Access/refresh macaroon TTL configuration (defaults: 10 min / 2 h).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_access_ttl_secs")]
    pub access_ttl_secs: u64,

    #[serde(default = "default_refresh_ttl_secs")]
    pub refresh_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_ttl_secs: default_access_ttl_secs(),
            refresh_ttl_secs: default_refresh_ttl_secs(),
        }
    }
}

impl AuthConfig {
    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.access_ttl_secs)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_ttl_secs)
    }

    /// Both TTLs must be strictly positive.
    pub fn validate(&self) -> Result<()> {
        if self.access_ttl_secs == 0 || self.refresh_ttl_secs == 0 {
            return Err(AnvilError::Config(
                "access_ttl_secs and refresh_ttl_secs must be strictly positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_access_ttl_secs() -> u64 {
    10 * 60
}

fn default_refresh_ttl_secs() -> u64 {
    2 * 60 * 60
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

fn substitute_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml = r#"
            [database]
            url = "postgres://localhost/anvil"
        "#;
        let config = AnvilConfig::parse_toml(toml).unwrap();
        assert_eq!(config.database.url, "postgres://localhost/anvil");
        assert_eq!(config.worker.max_concurrent, 10);
        assert_eq!(config.auth.access_ttl_secs, 600);
    }

    #[test]
    fn substitutes_env_vars() {
        std::env::set_var("ANVIL_TEST_DB_URL", "postgres://envhost/anvil");
        let toml = r#"
            [database]
            url = "${ANVIL_TEST_DB_URL}"
        "#;
        let config = AnvilConfig::parse_toml(toml).unwrap();
        assert_eq!(config.database.url, "postgres://envhost/anvil");
        std::env::remove_var("ANVIL_TEST_DB_URL");
    }

    #[test]
    fn rejects_zero_ttl() {
        let config = AuthConfig {
            access_ttl_secs: 0,
            refresh_ttl_secs: 60,
        };
        assert!(config.validate().is_err());
    }
}
