//! Idempotent schema migrations, guarded by a Postgres advisory lock so
//! multiple framework instances can come up against the same database
//! without racing each other.

use std::collections::HashSet;
use std::path::Path;

use anvil_core::error::{AnvilError, Result};
use sqlx::PgPool;
use tracing::{debug, info, warn};

/// Arbitrary but consistent lock id, derived from "ANVIL" ascii values.
const MIGRATION_LOCK_ID: i64 = 0x414E56494C;

/// A single migration with up and optional down SQL.
#[derive(Debug, Clone)]
pub struct Migration {
    pub name: String,
    pub up_sql: String,
    pub down_sql: Option<String>,
}

impl Migration {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            up_sql: sql.into(),
            down_sql: None,
        }
    }

    pub fn with_down(
        name: impl Into<String>,
        up_sql: impl Into<String>,
        down_sql: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            up_sql: up_sql.into(),
            down_sql: Some(down_sql.into()),
        }
    }

    /// Parse migration content that may contain `-- @up`/`-- @down` markers.
    pub fn parse(name: impl Into<String>, content: &str) -> Self {
        let name = name.into();
        let (up_sql, down_sql) = parse_migration_content(content);
        Self {
            name,
            up_sql,
            down_sql,
        }
    }
}

fn parse_migration_content(content: &str) -> (String, Option<String>) {
    let down_marker_patterns = ["-- @down", "--@down", "-- @DOWN", "--@DOWN"];

    for pattern in down_marker_patterns {
        if let Some(idx) = content.find(pattern) {
            let up_part = &content[..idx];
            let down_part = &content[idx + pattern.len()..];

            let up_sql = up_part
                .replace("-- @up", "")
                .replace("--@up", "")
                .replace("-- @UP", "")
                .replace("--@UP", "")
                .trim()
                .to_string();

            let down_sql = down_part.trim().to_string();

            if down_sql.is_empty() {
                return (up_sql, None);
            }
            return (up_sql, Some(down_sql));
        }
    }

    let up_sql = content
        .replace("-- @up", "")
        .replace("--@up", "")
        .replace("-- @UP", "")
        .replace("--@UP", "")
        .trim()
        .to_string();

    (up_sql, None)
}

/// Applies built-in and user migrations idempotently.
pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Acquires the advisory lock, applies any migration not yet recorded in
    /// `anvil_migrations`, then always releases the lock.
    pub async fn run(&self, user_migrations: Vec<Migration>) -> Result<()> {
        self.acquire_lock().await?;
        let result = self.run_migrations_inner(user_migrations).await;

        if let Err(e) = self.release_lock().await {
            warn!(error = %e, "failed to release migration lock");
        }

        result
    }

    async fn run_migrations_inner(&self, user_migrations: Vec<Migration>) -> Result<()> {
        self.ensure_migrations_table().await?;

        let applied = self.get_applied_migrations().await?;
        debug!(?applied, "already-applied migrations");

        for migration in super::builtin::get_builtin_migrations() {
            if !applied.contains(&migration.name) {
                self.apply_migration(&migration).await?;
            }
        }

        for migration in user_migrations {
            if !applied.contains(&migration.name) {
                self.apply_migration(&migration).await?;
            }
        }

        Ok(())
    }

    async fn acquire_lock(&self) -> Result<()> {
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_ID)
            .execute(&self.pool)
            .await
            .map_err(|e| AnvilError::Database(format!("failed to acquire migration lock: {e}")))?;
        Ok(())
    }

    async fn release_lock(&self) -> Result<()> {
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_ID)
            .execute(&self.pool)
            .await
            .map_err(|e| AnvilError::Database(format!("failed to release migration lock: {e}")))?;
        Ok(())
    }

    async fn ensure_migrations_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS anvil_migrations (
                id SERIAL PRIMARY KEY,
                name VARCHAR(255) UNIQUE NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                down_sql TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AnvilError::Database(format!("failed to create migrations table: {e}")))?;

        Ok(())
    }

    async fn get_applied_migrations(&self) -> Result<HashSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM anvil_migrations")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AnvilError::Database(format!("failed to list applied migrations: {e}")))?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn apply_migration(&self, migration: &Migration) -> Result<()> {
        info!(name = %migration.name, "applying migration");

        for statement in split_sql_statements(&migration.up_sql) {
            let statement = statement.trim();
            if is_blank_or_comment_only(statement) {
                continue;
            }

            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    AnvilError::Database(format!(
                        "failed to apply migration '{}': {e}",
                        migration.name
                    ))
                })?;
        }

        sqlx::query("INSERT INTO anvil_migrations (name, down_sql) VALUES ($1, $2)")
            .bind(&migration.name)
            .bind(&migration.down_sql)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AnvilError::Database(format!(
                    "failed to record migration '{}': {e}",
                    migration.name
                ))
            })?;

        Ok(())
    }

    /// Roll back the `count` most recently applied migrations, most recent first.
    pub async fn rollback(&self, count: usize) -> Result<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        self.acquire_lock().await?;
        let result = self.rollback_inner(count).await;

        if let Err(e) = self.release_lock().await {
            warn!(error = %e, "failed to release migration lock");
        }

        result
    }

    async fn rollback_inner(&self, count: usize) -> Result<Vec<String>> {
        self.ensure_migrations_table().await?;

        let rows: Vec<(i32, String, Option<String>)> = sqlx::query_as(
            "SELECT id, name, down_sql FROM anvil_migrations ORDER BY id DESC LIMIT $1",
        )
        .bind(count as i32)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AnvilError::Database(format!("failed to list migrations: {e}")))?;

        let mut rolled_back = Vec::new();

        for (id, name, down_sql) in rows {
            info!(%name, "rolling back migration");

            if let Some(down) = down_sql {
                for statement in split_sql_statements(&down) {
                    let statement = statement.trim();
                    if is_blank_or_comment_only(statement) {
                        continue;
                    }

                    sqlx::query(statement)
                        .execute(&self.pool)
                        .await
                        .map_err(|e| {
                            AnvilError::Database(format!("failed to roll back '{name}': {e}"))
                        })?;
                }
            } else {
                warn!(%name, "migration has no down SQL, removing record only");
            }

            sqlx::query("DELETE FROM anvil_migrations WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| AnvilError::Database(format!("failed to remove record '{name}': {e}")))?;

            rolled_back.push(name);
        }

        Ok(rolled_back)
    }

    pub async fn status(&self, available: &[Migration]) -> Result<MigrationStatus> {
        self.ensure_migrations_table().await?;
        let applied = self.get_applied_migrations().await?;

        let rows: Vec<(String, chrono::DateTime<chrono::Utc>, Option<String>)> =
            sqlx::query_as("SELECT name, applied_at, down_sql FROM anvil_migrations ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| AnvilError::Database(format!("failed to list migrations: {e}")))?;

        let applied_list = rows
            .into_iter()
            .map(|(name, applied_at, down_sql)| AppliedMigration {
                name,
                applied_at,
                has_down: down_sql.is_some(),
            })
            .collect();

        let pending = available
            .iter()
            .filter(|m| !applied.contains(&m.name))
            .map(|m| m.name.clone())
            .collect();

        Ok(MigrationStatus {
            applied: applied_list,
            pending,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub name: String,
    pub applied_at: chrono::DateTime<chrono::Utc>,
    pub has_down: bool,
}

#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub applied: Vec<AppliedMigration>,
    pub pending: Vec<String>,
}

fn is_blank_or_comment_only(statement: &str) -> bool {
    statement.is_empty()
        || statement
            .lines()
            .all(|l| l.trim().is_empty() || l.trim().starts_with("--"))
}

/// Splits SQL into individual statements, respecting dollar-quoted strings
/// (PL/pgSQL function bodies may contain semicolons inside `$$` delimiters).
fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_dollar_quote = false;
    let mut dollar_tag = String::new();
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);

        if c == '$' {
            let mut potential_tag = String::from("$");

            while let Some(&next_c) = chars.peek() {
                if next_c == '$' {
                    potential_tag.push(chars.next().unwrap());
                    current.push('$');
                    break;
                } else if next_c.is_alphanumeric() || next_c == '_' {
                    potential_tag.push(chars.next().unwrap());
                    current.push(potential_tag.chars().last().unwrap());
                } else {
                    break;
                }
            }

            if potential_tag.len() >= 2 && potential_tag.ends_with('$') {
                if in_dollar_quote && potential_tag == dollar_tag {
                    in_dollar_quote = false;
                    dollar_tag.clear();
                } else if !in_dollar_quote {
                    in_dollar_quote = true;
                    dollar_tag = potential_tag;
                }
            }
        }

        if c == ';' && !in_dollar_quote {
            let stmt = current.trim().trim_end_matches(';').trim().to_string();
            if !stmt.is_empty() {
                statements.push(stmt);
            }
            current.clear();
        }
    }

    let stmt = current.trim().trim_end_matches(';').trim().to_string();
    if !stmt.is_empty() {
        statements.push(stmt);
    }

    statements
}

/// Loads migrations named like `0001_create_x.sql`, sorted alphabetically.
pub fn load_migrations_from_dir(dir: &Path) -> Result<Vec<Migration>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut migrations = Vec::new();
    let entries = std::fs::read_dir(dir)?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();

        if path.extension().map(|e| e == "sql").unwrap_or(false) {
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| AnvilError::Config("invalid migration filename".to_string()))?
                .to_string();

            let content = std::fs::read_to_string(&path)?;
            migrations.push(Migration::parse(name, &content));
        }
    }

    migrations.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(migrations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn loads_migrations_sorted_by_name() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("0002_second.sql"), "SELECT 2;").unwrap();
        fs::write(dir.path().join("0001_first.sql"), "SELECT 1;").unwrap();

        let migrations = load_migrations_from_dir(dir.path()).unwrap();
        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].name, "0001_first");
        assert_eq!(migrations[1].name, "0002_second");
    }

    #[test]
    fn missing_dir_yields_no_migrations() {
        let migrations = load_migrations_from_dir(Path::new("/nonexistent/anvil-path")).unwrap();
        assert!(migrations.is_empty());
    }

    #[test]
    fn parses_up_and_down_markers() {
        let content = r#"
-- @up
CREATE TABLE widgets (id INT);

-- @down
DROP TABLE widgets;
"#;
        let m = Migration::parse("0001_widgets", content);
        assert!(m.up_sql.contains("CREATE TABLE widgets"));
        assert!(!m.up_sql.contains("@up"));
        assert_eq!(m.down_sql, Some("DROP TABLE widgets;".to_string()));
    }

    #[test]
    fn splits_dollar_quoted_function_bodies_as_one_statement() {
        let sql = r#"
CREATE FUNCTION notify() RETURNS trigger AS $$
BEGIN
    PERFORM 1;
END;
$$ LANGUAGE plpgsql;

SELECT 1;
"#;
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("CREATE FUNCTION"));
        assert!(stmts[0].contains("$$ LANGUAGE plpgsql"));
    }

    #[test]
    fn splits_simple_statements() {
        let stmts = split_sql_statements("SELECT 1; SELECT 2;");
        assert_eq!(stmts, vec!["SELECT 1", "SELECT 2"]);
    }
}
