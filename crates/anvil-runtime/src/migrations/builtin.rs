//! The framework's own tables (`task`, `event`, `opaque_key`), applied
//! before any user migration regardless of what order the caller passes
//! them in.

use super::runner::Migration;

const INIT_SQL: &str = include_str!("schema/0001_init.sql");

pub fn get_builtin_migrations() -> Vec<Migration> {
    vec![Migration::parse("0000_anvil_init", INIT_SQL)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_migration_creates_expected_tables() {
        let migrations = get_builtin_migrations();
        assert_eq!(migrations.len(), 1);
        let m = &migrations[0];
        assert!(m.up_sql.contains("CREATE TABLE IF NOT EXISTS task"));
        assert!(m.up_sql.contains("CREATE TABLE IF NOT EXISTS event"));
        assert!(m.up_sql.contains("CREATE TABLE IF NOT EXISTS opaque_key"));
        assert!(m.down_sql.is_some());
    }
}
