mod migrate;
mod run;

pub use migrate::MigrateCommand;
pub use run::RunCommand;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Anvil - durable task engine & macaroon capability tokens.
#[derive(Parser)]
#[command(name = "anvil")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands. Deliberately minimal — no project-scaffolding or
/// client-codegen subcommands; this crate is an application runner, not a
/// project generator.
#[derive(Subcommand)]
pub enum Commands {
    /// Run the anvil worker and serve authenticated requests.
    Run(RunCommand),

    /// Manage database migrations.
    Migrate(MigrateCommand),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run(cmd) => cmd.execute().await,
            Commands::Migrate(cmd) => cmd.execute().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_defaults() {
        let cli = Cli::try_parse_from(["anvil", "run"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn parses_migrate_status() {
        let cli = Cli::try_parse_from(["anvil", "migrate", "status"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn rejects_unknown_command() {
        let cli = Cli::try_parse_from(["anvil", "scaffold", "new-app"]);
        assert!(cli.is_err());
    }
}
