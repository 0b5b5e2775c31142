//! C4 Auth Layer: authenticates inbound requests against C3, and issues the
//! access/refresh pair on login.
//!
//! The middleware function mirrors the shape of
//! `forge_runtime::gateway::auth::auth_middleware` — extract bearer, validate,
//! stash the result into the request's extensions — but validates against the
//! macaroon manager instead of a JWT decoder, and stashes a
//! [`anvil_core::macaroon::RequestContext`] rather than `Claims`. Router
//! wiring itself is external; this crate only supplies the tower middleware
//! fn and the context type a handler above it reads back out.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use sqlx::PgExecutor;

use anvil_core::config::AuthConfig;
use anvil_core::error::{AnvilError, Result};
use anvil_core::macaroon::{CaveatRegistry, RequestContext};
use anvil_core::macaroon::{register_builtin_caveats, RefreshOnly, UserContext};

use crate::hooks::{HookRegistry, TokenMintedEvent, TokenPurpose};
use crate::macaroon::MacaroonManager;

/// A minted access/refresh pair, encoded and ready to hand back to the
/// caller (§4.4's `CreateUserTokens`).
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Owns the macaroon manager, the TTL configuration, and the hook registry
/// `OnTokenMinted` fires through. Constructed once at startup; registers the
/// built-in caveat types on the caller-supplied registry and refuses to start
/// if that registration fails.
#[derive(Clone)]
pub struct Auth {
    manager: MacaroonManager,
    config: AuthConfig,
    hooks: Option<Arc<HookRegistry>>,
}

impl Auth {
    /// Registers the built-in caveat kinds (`user_context`, `refresh_only`,
    /// and `expires_at` — available to application code that wants an
    /// additional per-caveat TTL beyond the root key's own, but not attached
    /// by any path here) on `caveat_registry`, then wraps the manager. Fails
    /// fast if any built-in is already registered — a misconfiguration the
    /// application should not start with.
    pub fn new(
        storage: crate::db::Storage,
        mut caveat_registry: CaveatRegistry,
        config: AuthConfig,
    ) -> Result<Self> {
        config.validate()?;
        register_builtin_caveats(&mut caveat_registry)?;

        Ok(Self {
            manager: MacaroonManager::new(storage, Arc::new(caveat_registry)),
            config,
            hooks: None,
        })
    }

    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn manager(&self) -> &MacaroonManager {
        &self.manager
    }

    /// `CreateUserTokens(user_id, org_id, extra_caveats…)`: mints an access
    /// token carrying `extra_caveats` followed by `user_context{user_id,
    /// org_id}`, and a refresh token carrying a single `refresh_only{user_id,
    /// access_key_id}` caveat bound to the access token's key id. Fires
    /// `OnTokenMinted` once per minted token, outside any caller transaction
    ///.
    pub async fn create_user_tokens<'e, E>(
        &self,
        executor: E,
        user_id: i32,
        org_id: i32,
        extra_caveats: Vec<Box<dyn anvil_core::macaroon::Caveat>>,
    ) -> Result<TokenPair>
    where
        E: PgExecutor<'e> + Clone,
    {
        let mut access_caveats = extra_caveats;
        access_caveats.push(Box::new(UserContext { user_id, org_id }));

        let access = self
            .manager
            .mint(
                executor.clone(),
                access_caveats,
                self.config.access_ttl(),
                Some(user_id),
            )
            .await?;
        let access_key_id = access.key_id;

        self.fire_token_minted(user_id, org_id, access_key_id, TokenPurpose::Access)
            .await?;

        let refresh_caveats: Vec<Box<dyn anvil_core::macaroon::Caveat>> = vec![Box::new(RefreshOnly {
            user_id,
            access_key_id,
        })];
        let refresh = self
            .manager
            .mint(executor, refresh_caveats, self.config.refresh_ttl(), Some(user_id))
            .await?;

        self.fire_token_minted(user_id, org_id, refresh.key_id, TokenPurpose::Refresh)
            .await?;

        Ok(TokenPair {
            access_token: access.encode(),
            refresh_token: refresh.encode(),
        })
    }

    async fn fire_token_minted(
        &self,
        user_id: i32,
        org_id: i32,
        key_id: i64,
        purpose: TokenPurpose,
    ) -> Result<()> {
        let Some(hooks) = &self.hooks else {
            return Ok(());
        };
        hooks
            .fire_token_minted(TokenMintedEvent {
                user_id,
                org_id,
                key_id,
                purpose,
            })
            .await
    }

    /// Extracts the bearer token, parses and verifies it, then walks its
    /// caveats in order invoking `validate(ctx)` — the first failure
    /// short-circuits with `Unauthorized`. The returned context gets
    /// stashed into the request context: handlers above the middleware read
    /// it back out of `http::Extensions`.
    pub async fn authenticate<'e, E>(
        &self,
        executor: E,
        authorization_header: Option<&str>,
        method: &str,
        path: &str,
    ) -> Result<RequestContext>
    where
        E: PgExecutor<'e>,
    {
        let token = extract_bearer(authorization_header)
            .ok_or_else(|| AnvilError::Unauthorized("missing bearer token".to_string()))?;

        let macaroon = self.manager.parse(executor, token).await?;

        let mut ctx = RequestContext::new(method, path);
        for caveat in macaroon.caveats() {
            caveat
                .validate(&mut ctx)
                .map_err(|e| AnvilError::Unauthorized(e.to_string()))?;
        }

        Ok(ctx)
    }

    /// Parses a refresh token and extracts its `refresh_only` caveat. Must
    /// carry exactly one caveat and it must be that type, else
    /// `InvalidRefreshToken`.
    pub async fn parse_refresh_token<'e, E>(&self, executor: E, encoded: &str) -> Result<RefreshOnly>
    where
        E: PgExecutor<'e>,
    {
        let macaroon = self.manager.parse(executor, encoded).await?;
        let caveats = macaroon.caveats();

        if caveats.len() != 1 {
            return Err(AnvilError::InvalidRefreshToken);
        }

        caveats[0]
            .as_any()
            .downcast_ref::<RefreshOnly>()
            .cloned()
            .ok_or(AnvilError::InvalidRefreshToken)
    }
}

fn extract_bearer(header: Option<&str>) -> Option<&str> {
    let header = header?;
    match header.strip_prefix("Bearer ") {
        Some(rest) => Some(rest.trim()),
        None => Some(header.trim()),
    }
}

/// Axum middleware: extracts the bearer token, authenticates it against the
/// shared pool, and stashes the resulting [`RequestContext`] into the
/// request's extensions for downstream handlers. A failure yields
/// `401 Unauthorized` with no body, short-circuiting the handler chain
/// (grounded on `forge_runtime::gateway::auth::auth_middleware`).
pub async fn auth_middleware(
    State(auth): State<Arc<AuthState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let ctx = auth
        .auth
        .authenticate(auth.storage.pool(), header.as_deref(), &method, &path)
        .await;

    match ctx {
        Ok(ctx) => {
            let mut req = req;
            req.extensions_mut().insert(ctx);
            next.run(req).await
        }
        Err(e) => {
            tracing::warn!(error = %e, "request authentication failed");
            Response::builder()
                .status(axum::http::StatusCode::UNAUTHORIZED)
                .body(Body::empty())
                .expect("static response is well-formed")
        }
    }
}

/// State handed to [`auth_middleware`] via axum's `State` extractor.
#[derive(Clone)]
pub struct AuthState {
    pub auth: Arc<Auth>,
    pub storage: crate::db::Storage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bearer_prefixed_token() {
        assert_eq!(extract_bearer(Some("Bearer abc.def.ghi")), Some("abc.def.ghi"));
    }

    #[test]
    fn tolerates_missing_bearer_prefix() {
        assert_eq!(extract_bearer(Some("abc.def.ghi")), Some("abc.def.ghi"));
    }

    #[test]
    fn missing_header_yields_none() {
        assert_eq!(extract_bearer(None), None);
    }
}
