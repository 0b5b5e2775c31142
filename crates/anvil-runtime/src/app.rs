//! C11 Plugin Protocol and application wiring: assembles storage, the
//! caveat/hook/task registries, the auth layer, the worker, and the
//! lifecycle manager into one running application.
//!
//! Grounded on `forge::runtime::{Forge, ForgeBuilder}`'s builder-then-build
//! idiom: a caller accumulates registrations and plugins on [`AnvilBuilder`],
//! then calls `.build()` once to connect to the database, apply plugins, run
//! migrations, and produce the immutable [`Anvil`] handle.

use std::path::PathBuf;
use std::sync::Arc;

use anvil_core::config::AnvilConfig;
use anvil_core::error::{AnvilError, Result};
use anvil_core::macaroon::CaveatRegistry;
use anvil_core::plugin::Plugin;

use crate::auth::Auth;
use crate::db::Storage;
use crate::hooks::HookRegistry;
use crate::lifecycle_manager::LifecycleManager;
use crate::migrations::{load_migrations_from_dir, Migration, MigrationRunner};
use crate::task::{TaskRegistry, Worker, WorkerConfig};

/// Accumulates registrations before the application starts. Each `.plugin(p)`
/// call is applied, in order, at `.build()` time; a plugin failure aborts
/// startup.
pub struct AnvilBuilder {
    config: Option<AnvilConfig>,
    caveat_registry: CaveatRegistry,
    hook_registry: HookRegistry,
    task_registry: TaskRegistry,
    extra_migrations: Vec<Migration>,
    plugins: Vec<Box<dyn Plugin<AnvilBuilder>>>,
}

impl AnvilBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            caveat_registry: CaveatRegistry::new(),
            hook_registry: HookRegistry::new(),
            task_registry: TaskRegistry::new(),
            extra_migrations: Vec::new(),
            plugins: Vec::new(),
        }
    }

    pub fn config(mut self, config: AnvilConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn task_registry_mut(&mut self) -> &mut TaskRegistry {
        &mut self.task_registry
    }

    pub fn hook_registry_mut(&mut self) -> &mut HookRegistry {
        &mut self.hook_registry
    }

    pub fn caveat_registry_mut(&mut self) -> &mut CaveatRegistry {
        &mut self.caveat_registry
    }

    /// Adds a migration that doesn't live in the migrations directory —
    /// useful for plugins that ship their own schema alongside a task type.
    pub fn migration(mut self, name: impl Into<String>, sql: impl Into<String>) -> Self {
        self.extra_migrations.push(Migration::new(name, sql));
        self
    }

    /// Registers a plugin. Plugins are applied in registration order at
    /// `.build()`, each with full mutable access to this builder.
    pub fn plugin(mut self, plugin: impl Plugin<AnvilBuilder> + 'static) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    /// Connects to the database, runs migrations, applies every registered
    /// plugin, and assembles the running application. Plugins run before
    /// migrations so a plugin's `migration()` call takes effect in the same
    /// `build()`.
    pub async fn build(mut self) -> Result<Anvil> {
        let config = self
            .config
            .ok_or_else(|| AnvilError::Config("AnvilBuilder requires a config".to_string()))?;

        config.auth.validate()?;

        let plugins = std::mem::take(&mut self.plugins);
        for plugin in &plugins {
            plugin.plug_to(&mut self)?;
        }

        let storage = Storage::connect(&config.database).await?;

        let migrations_dir = config
            .migrations_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("migrations"));
        let mut user_migrations = load_migrations_from_dir(&migrations_dir)?;
        user_migrations.extend(self.extra_migrations);

        let runner = MigrationRunner::new(storage.pool().clone());
        runner.run(user_migrations).await?;

        let hooks = Arc::new(self.hook_registry);

        let auth = Arc::new(
            Auth::new(storage.clone(), self.caveat_registry, config.auth.clone())?
                .with_hooks(hooks.clone()),
        );

        let worker_config = WorkerConfig {
            poll_interval: config.worker.poll_interval,
            max_concurrent: config.worker.max_concurrent,
        };
        let worker = Arc::new(
            Worker::new(storage.clone(), self.task_registry, worker_config).with_hooks(hooks.clone()),
        );

        let lifecycle = Arc::new(LifecycleManager::new());
        {
            let storage = storage.clone();
            lifecycle.register(Box::new(move || Box::pin(async move {
                storage.close().await;
                Ok(())
            })));
        }

        Ok(Anvil {
            config,
            storage,
            auth,
            hooks,
            worker,
            lifecycle,
        })
    }
}

impl Default for AnvilBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The assembled application: everything a binary needs to run the worker
/// loop and authenticate requests. Immutable once built — registries are
/// read-only from here on (§4.9, §5's "no hooks registered after Start").
pub struct Anvil {
    config: AnvilConfig,
    storage: Storage,
    auth: Arc<Auth>,
    hooks: Arc<HookRegistry>,
    worker: Arc<Worker>,
    lifecycle: Arc<LifecycleManager>,
}

impl Anvil {
    pub fn builder() -> AnvilBuilder {
        AnvilBuilder::new()
    }

    pub fn config(&self) -> &AnvilConfig {
        &self.config
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn auth(&self) -> &Arc<Auth> {
        &self.auth
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    /// Runs the worker loop until `shutdown` resolves, then drains the
    /// lifecycle manager's closers.
    pub async fn run(&self, shutdown: impl std::future::Future<Output = ()>) {
        self.worker.run(shutdown).await;
        self.lifecycle.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn build_without_config_fails() {
        let err = AnvilBuilder::new().build().await.unwrap_err();
        assert!(matches!(err, AnvilError::Config(_)));
    }
}
