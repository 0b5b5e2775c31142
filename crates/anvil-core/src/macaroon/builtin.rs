use std::any::Any;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AnvilError, Result};
use crate::macaroon::caveat::{Caveat, CaveatRegistry, RequestContext};

/// Binds `user_id`/`org_id` to the request context on validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: i32,
    pub org_id: i32,
}

impl Caveat for UserContext {
    fn caveat_type(&self) -> &'static str {
        "user_context"
    }

    fn body(&self) -> Value {
        serde_json::to_value(self).expect("UserContext serializes")
    }

    fn validate(&self, ctx: &mut RequestContext) -> Result<()> {
        ctx.user_id = Some(self.user_id);
        ctx.org_id = Some(self.org_id);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn construct_user_context(v: &Value) -> Result<Box<dyn Caveat>> {
    let c: UserContext = serde_json::from_value(v.clone())?;
    Ok(Box::new(c))
}

/// Restricts a macaroon to refresh-flow requests: `POST` to a path ending in
/// `/auth/refresh`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshOnly {
    pub user_id: i32,
    pub access_key_id: i64,
}

impl Caveat for RefreshOnly {
    fn caveat_type(&self) -> &'static str {
        "refresh_only"
    }

    fn body(&self) -> Value {
        serde_json::to_value(self).expect("RefreshOnly serializes")
    }

    fn validate(&self, ctx: &mut RequestContext) -> Result<()> {
        if ctx.method.eq_ignore_ascii_case("POST") && ctx.path.ends_with("/auth/refresh") {
            ctx.user_id = Some(self.user_id);
            Ok(())
        } else {
            Err(AnvilError::Unauthorized(
                "refresh_only caveat requires POST to a path ending in /auth/refresh".to_string(),
            ))
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn construct_refresh_only(v: &Value) -> Result<Box<dyn Caveat>> {
    let c: RefreshOnly = serde_json::from_value(v.clone())?;
    Ok(Box::new(c))
}

/// Rejects the token once `not_after` has passed. Minted onto every access
/// and refresh token with the TTL from `AuthConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiresAt {
    pub not_after: DateTime<Utc>,
}

impl Caveat for ExpiresAt {
    fn caveat_type(&self) -> &'static str {
        "expires_at"
    }

    fn body(&self) -> Value {
        serde_json::to_value(self).expect("ExpiresAt serializes")
    }

    fn validate(&self, _ctx: &mut RequestContext) -> Result<()> {
        if Utc::now() > self.not_after {
            Err(AnvilError::InvalidToken)
        } else {
            Ok(())
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn construct_expires_at(v: &Value) -> Result<Box<dyn Caveat>> {
    let c: ExpiresAt = serde_json::from_value(v.clone())?;
    Ok(Box::new(c))
}

/// Registers the built-in caveat kinds. Called once at `Auth` construction
///; the caller refuses to start if this fails.
pub fn register_builtin_caveats(registry: &mut CaveatRegistry) -> Result<()> {
    registry.register("user_context", construct_user_context)?;
    registry.register("refresh_only", construct_refresh_only)?;
    registry.register("expires_at", construct_expires_at)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_context_binds_identity() {
        let caveat = UserContext {
            user_id: 42,
            org_id: 7,
        };
        let mut ctx = RequestContext::new("GET", "/v1/orders");
        caveat.validate(&mut ctx).unwrap();
        assert_eq!(ctx.user_id, Some(42));
        assert_eq!(ctx.org_id, Some(7));
    }

    #[test]
    fn refresh_only_requires_post_to_refresh_path() {
        let caveat = RefreshOnly {
            user_id: 42,
            access_key_id: 1,
        };

        let mut ok_ctx = RequestContext::new("POST", "/v1/auth/refresh");
        assert!(caveat.validate(&mut ok_ctx).is_ok());

        let mut bad_ctx = RequestContext::new("GET", "/v1/auth/refresh");
        assert!(caveat.validate(&mut bad_ctx).is_err());

        let mut wrong_path = RequestContext::new("POST", "/v1/users");
        assert!(caveat.validate(&mut wrong_path).is_err());
    }

    #[test]
    fn registering_both_builtins_succeeds_once() {
        let mut registry = CaveatRegistry::new();
        register_builtin_caveats(&mut registry).unwrap();
        assert!(register_builtin_caveats(&mut registry).is_err());
    }

    #[test]
    fn expires_at_rejects_once_past() {
        let mut ctx = RequestContext::new("GET", "/v1/orders");

        let live = ExpiresAt {
            not_after: Utc::now() + chrono::Duration::minutes(5),
        };
        assert!(live.validate(&mut ctx).is_ok());

        let expired = ExpiresAt {
            not_after: Utc::now() - chrono::Duration::minutes(5),
        };
        assert!(expired.validate(&mut ctx).is_err());
    }
}
