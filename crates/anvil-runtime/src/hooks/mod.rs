//! C9 Hook Registry: ordered, user-registered callbacks for organizational
//! events, fanned out in-order within the caller's transaction.
//!
//! Registration only happens during application construction — `register_*`
//! takes `&mut self`, `fire_*` takes `&self`, and the intended usage is to
//! build the registry fully, wrap it in an `Arc`, and never call a
//! `register_*` method again (grounded on `forge_core::function::
//! FunctionRegistry`'s build-then-freeze idiom; hook registration is not
//! supported concurrently with serving requests).

use futures::future::BoxFuture;
use sqlx::PgConnection;

use anvil_core::error::Result;

/// Fired inside the transaction that inserted the org row.
#[derive(Debug, Clone, Copy)]
pub struct OrgCreatedEvent {
    pub org_id: i32,
    pub owner_user_id: i32,
}

/// Fired inside the transaction that inserted the user row.
#[derive(Debug, Clone, Copy)]
pub struct UserCreatedEvent {
    pub user_id: i32,
}

/// What kind of macaroon `OnTokenMinted` just fired for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    Access,
    Refresh,
}

/// Fired by the auth layer immediately after `CreateUserTokens` mints both
/// halves of a pair. Not transaction-scoped: minting a macaroon's
/// root key is its own insert, not something callers typically need to
/// compose with a business-logic transaction the way org/user creation is.
#[derive(Debug, Clone, Copy)]
pub struct TokenMintedEvent {
    pub user_id: i32,
    pub org_id: i32,
    pub key_id: i64,
    pub purpose: TokenPurpose,
}

/// Fired by the worker's lifecycle handling when a task transitions to
/// `failed` (never for a cron task, which has no terminal failure state).
/// Runs inside the same transaction as the status write, so a hook failure
/// aborts the tick's commit — the task stays `pending` with its
/// already-incremented `attempts`, matching the at-least-once retry
/// contract.
#[derive(Debug, Clone)]
pub struct TaskFailedEvent {
    pub task_id: i64,
    pub task_type: String,
    pub error: String,
}

type TxHook<E> =
    Box<dyn for<'c> Fn(&'c mut PgConnection, &'c E) -> BoxFuture<'c, Result<()>> + Send + Sync>;
type Hook<E> = Box<dyn Fn(E) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Ordered callback lists for the four hook classes named in §4.9/§4.7.
/// Firing a class invokes its callbacks in registration order and
/// short-circuits on the first error.
#[derive(Default)]
pub struct HookRegistry {
    on_org_created: Vec<TxHook<OrgCreatedEvent>>,
    on_user_created: Vec<TxHook<UserCreatedEvent>>,
    on_token_minted: Vec<Hook<TokenMintedEvent>>,
    on_task_failed: Vec<TxHook<TaskFailedEvent>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_org_created_with_tx<F>(&mut self, f: F)
    where
        F: for<'c> Fn(&'c mut PgConnection, &'c OrgCreatedEvent) -> BoxFuture<'c, Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.on_org_created.push(Box::new(f));
    }

    pub fn on_user_created_with_tx<F>(&mut self, f: F)
    where
        F: for<'c> Fn(&'c mut PgConnection, &'c UserCreatedEvent) -> BoxFuture<'c, Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.on_user_created.push(Box::new(f));
    }

    pub fn on_token_minted<F>(&mut self, f: F)
    where
        F: Fn(TokenMintedEvent) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.on_token_minted.push(Box::new(f));
    }

    pub fn on_task_failed<F>(&mut self, f: F)
    where
        F: for<'c> Fn(&'c mut PgConnection, &'c TaskFailedEvent) -> BoxFuture<'c, Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.on_task_failed.push(Box::new(f));
    }

    pub async fn fire_org_created(
        &self,
        conn: &mut PgConnection,
        event: &OrgCreatedEvent,
    ) -> Result<()> {
        for hook in &self.on_org_created {
            hook(conn, event).await?;
        }
        Ok(())
    }

    pub async fn fire_user_created(
        &self,
        conn: &mut PgConnection,
        event: &UserCreatedEvent,
    ) -> Result<()> {
        for hook in &self.on_user_created {
            hook(conn, event).await?;
        }
        Ok(())
    }

    pub async fn fire_token_minted(&self, event: TokenMintedEvent) -> Result<()> {
        for hook in &self.on_token_minted {
            hook(event).await?;
        }
        Ok(())
    }

    pub async fn fire_task_failed(
        &self,
        conn: &mut PgConnection,
        event: &TaskFailedEvent,
    ) -> Result<()> {
        for hook in &self.on_task_failed {
            hook(conn, event).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn token_minted_hooks_fire_in_registration_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();

        let order_a = order.clone();
        registry.on_token_minted(move |_event| {
            let order_a = order_a.clone();
            Box::pin(async move {
                order_a.lock().unwrap().push("a");
                Ok(())
            })
        });

        let order_b = order.clone();
        registry.on_token_minted(move |_event| {
            let order_b = order_b.clone();
            Box::pin(async move {
                order_b.lock().unwrap().push("b");
                Ok(())
            })
        });

        registry
            .fire_token_minted(TokenMintedEvent {
                user_id: 1,
                org_id: 1,
                key_id: 1,
                purpose: TokenPurpose::Access,
            })
            .await
            .unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn first_failure_short_circuits_remaining_hooks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = HookRegistry::new();

        registry.on_token_minted(|_event| {
            Box::pin(async { Err(anvil_core::error::AnvilError::Fatal("boom".to_string())) })
        });

        let calls_clone = calls.clone();
        registry.on_token_minted(move |_event| {
            let calls_clone = calls_clone.clone();
            Box::pin(async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });

        let err = registry
            .fire_token_minted(TokenMintedEvent {
                user_id: 1,
                org_id: 1,
                key_id: 1,
                purpose: TokenPurpose::Access,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, anvil_core::error::AnvilError::Fatal(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
