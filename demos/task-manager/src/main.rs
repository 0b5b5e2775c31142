//! A minimal demo of the anvil task engine and macaroon auth: two durable
//! tasks (one on-demand, one cron), a user token pair minted through the
//! auth layer, and the worker loop running both.

use anvil_core::config::AnvilConfig;
use anvil_core::error::Result;
use anvil_core::task::TaskContext;
use anvil_runtime::task::TaskRegistry;
use anvil_runtime::AnvilBuilder;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendWelcomeEmailArgs {
    pub user_id: i32,
    pub email: String,
}

#[anvil_macros::task(timeout = "30s", retry(interval = "30s", max_attempts = 5))]
async fn send_welcome_email(ctx: &mut TaskContext<'_>, args: SendWelcomeEmailArgs) -> Result<()> {
    tracing::info!(
        task_id = ctx.task_id,
        user_id = args.user_id,
        email = %args.email,
        "sending welcome email"
    );
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruneExpiredSessionsArgs {}

#[anvil_macros::task(cron = "0 * * * *", timeout = "5m")]
async fn prune_expired_sessions(
    ctx: &mut TaskContext<'_>,
    _args: PruneExpiredSessionsArgs,
) -> Result<()> {
    tracing::info!(task_id = ctx.task_id, "pruning expired sessions");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/task_manager_demo".to_string());
    let config = AnvilConfig::default_with_database_url(&database_url);

    let mut builder = AnvilBuilder::new().config(config);
    {
        let registry: &mut TaskRegistry = builder.task_registry_mut();
        registry.register::<SendWelcomeEmailTask>();
        registry.register::<PruneExpiredSessionsTask>();
    }

    let anvil = builder.build().await.map_err(|e| anyhow::anyhow!("{}", e))?;

    let tokens = anvil
        .auth()
        .create_user_tokens(anvil.storage().pool(), 1, 1, Vec::new())
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    tracing::info!(access_token_len = tokens.access_token.len(), "minted demo user tokens");

    run_send_welcome_email(
        anvil.storage().pool(),
        SendWelcomeEmailArgs {
            user_id: 1,
            email: "demo@example.com".to_string(),
        },
        Vec::new(),
    )
    .await
    .map_err(|e| anyhow::anyhow!("{}", e))?;

    anvil
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    Ok(())
}
