use std::path::Path;

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;

use anvil_core::config::AnvilConfig;
use anvil_runtime::db::Storage;
use anvil_runtime::migrations::{load_migrations_from_dir, MigrationRunner};

/// Manage database migrations.
#[derive(Parser)]
pub struct MigrateCommand {
    #[command(subcommand)]
    pub action: MigrateAction,

    /// Configuration file path.
    #[arg(short, long, default_value = "anvil.toml", global = true)]
    pub config: String,

    /// Migrations directory path.
    #[arg(short, long, default_value = "migrations", global = true)]
    pub migrations_dir: String,
}

#[derive(Subcommand)]
pub enum MigrateAction {
    /// Run all pending migrations.
    Up,

    /// Rollback the last N migrations.
    Down {
        #[arg(default_value = "1")]
        count: usize,
    },

    /// Show migration status.
    Status,
}

impl MigrateCommand {
    pub async fn execute(self) -> Result<()> {
        dotenvy::dotenv().ok();

        let config_path = Path::new(&self.config);
        if !config_path.exists() {
            anyhow::bail!("configuration file not found: {}", self.config);
        }

        let config = AnvilConfig::from_file(&self.config)?;
        let storage = Storage::connect(&config.database).await?;
        let runner = MigrationRunner::new(storage.pool().clone());

        let migrations_dir = Path::new(&self.migrations_dir);
        let available = load_migrations_from_dir(migrations_dir)?;

        match self.action {
            MigrateAction::Up => {
                println!();
                println!("  {}  {} migrations", style("⚒").bold(), style("anvil").bold().cyan());
                println!();

                if available.is_empty() {
                    println!("  {} no migrations found in {}", style("i").blue(), self.migrations_dir);
                    return Ok(());
                }

                println!("  {} running pending migrations...", style("→").dim());
                runner.run(available).await?;
                println!("  {} migrations complete", style("✓").green());
            }

            MigrateAction::Down { count } => {
                if count == 0 {
                    println!("  {} nothing to rollback (count=0)", style("i").blue());
                    return Ok(());
                }

                println!("  {} rolling back {} migration(s)...", style("→").dim(), count);
                let rolled_back = runner.rollback(count).await?;

                if rolled_back.is_empty() {
                    println!("  {} no migrations to rollback", style("i").blue());
                } else {
                    for name in &rolled_back {
                        println!("  {} rolled back: {}", style("✓").green(), name);
                    }
                }
            }

            MigrateAction::Status => {
                let status = runner.status(&available).await?;

                if status.applied.is_empty() && status.pending.is_empty() {
                    println!("  {} no migrations found", style("i").blue());
                    return Ok(());
                }

                if !status.applied.is_empty() {
                    println!("  {} applied:", style("✓").green());
                    for m in &status.applied {
                        println!(
                            "    {} {} ({})",
                            style("↓").green(),
                            style(&m.name).cyan(),
                            m.applied_at.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }

                if !status.pending.is_empty() {
                    println!("  {} pending:", style("○").yellow());
                    for name in &status.pending {
                        println!("    {} {}", style("→").dim(), style(name).yellow());
                    }
                }

                println!(
                    "  {} {} applied, {} pending",
                    style("i").blue(),
                    status.applied.len(),
                    status.pending.len()
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_migrate_down_with_custom_count() {
        let cmd = MigrateCommand {
            action: MigrateAction::Down { count: 3 },
            config: "anvil.toml".to_string(),
            migrations_dir: "migrations".to_string(),
        };
        match cmd.action {
            MigrateAction::Down { count } => assert_eq!(count, 3),
            _ => panic!("expected Down"),
        }
    }
}
