use anyhow::Result;
use clap::Parser;
use console::style;
use tracing::info;

use anvil_core::config::AnvilConfig;
use anvil_runtime::AnvilBuilder;

/// Run the anvil worker and auth layer.
#[derive(Parser)]
pub struct RunCommand {
    /// Configuration file path.
    #[arg(short, long, default_value = "anvil.toml")]
    pub config: String,

    /// Enable verbose (debug) logging.
    #[arg(long)]
    pub dev: bool,
}

impl RunCommand {
    pub async fn execute(self) -> Result<()> {
        let log_level = if self.dev { "debug" } else { "info" };
        tracing_subscriber::fmt()
            .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string()))
            .init();

        println!();
        println!("  {}  {} v{}", style("⚒").bold(), style("anvil").bold().cyan(), env!("CARGO_PKG_VERSION"));
        println!();

        let config_path = std::path::Path::new(&self.config);
        if !config_path.exists() {
            anyhow::bail!("configuration file not found: {}", self.config);
        }

        info!(path = %self.config, "loading configuration");
        let config = AnvilConfig::from_file(&self.config)?;

        let anvil = AnvilBuilder::new()
            .config(config)
            .build()
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        println!("  {} worker running, awaiting ctrl-c to shut down", style("→").dim());

        anvil
            .run(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await;

        println!("  {} shut down cleanly", style("✓").green());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_anvil_toml() {
        let cmd = RunCommand {
            config: "anvil.toml".to_string(),
            dev: false,
        };
        assert_eq!(cmd.config, "anvil.toml");
        assert!(!cmd.dev);
    }
}
