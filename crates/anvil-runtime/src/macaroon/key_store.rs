//! Persistence for the `opaque_key` table — the per-token root-key rows a
//! [`super::manager::MacaroonManager`] mints and deletes (§3's Token Root
//! Key entity, §6's `CreateOpaqueKey`/`GetOpaqueKey`/`DeleteOpaqueKey(s)`).
//!
//! Deleting a row *is* revocation (K1): there is no soft-delete flag here,
//! deliberately, so `InvalidateToken`/`InvalidateUserTokens` need only one
//! statement and `GetOpaqueKey` returning nothing is indistinguishable from
//! "never existed" and "revoked" — both surface as `InvalidToken` at the
//! macaroon manager.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use anvil_core::error::{AnvilError, Result};
use anvil_core::macaroon::RootKey;

/// `CreateOpaqueKey`: persists a freshly minted root key and returns its id.
pub async fn create_opaque_key<'e, E>(
    executor: E,
    user_id: Option<i32>,
    secret: &RootKey,
    expires_at: DateTime<Utc>,
) -> Result<i64>
where
    E: PgExecutor<'e>,
{
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO opaque_key (user_id, secret, expires_at) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(user_id)
    .bind(secret.as_slice())
    .bind(expires_at)
    .fetch_one(executor)
    .await
    .map_err(AnvilError::Sql)?;

    Ok(id)
}

/// `GetOpaqueKey(key_id) -> secret`. A missing row — never created, or
/// revoked — is how revocation manifests to the macaroon manager.
pub async fn get_opaque_key<'e, E>(executor: E, key_id: i64) -> Result<Option<RootKey>>
where
    E: PgExecutor<'e>,
{
    let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT secret FROM opaque_key WHERE id = $1")
        .bind(key_id)
        .fetch_optional(executor)
        .await
        .map_err(AnvilError::Sql)?;

    match row {
        Some((secret,)) => {
            let key: RootKey = secret
                .try_into()
                .map_err(|_| AnvilError::Internal("stored root key is not 32 bytes".to_string()))?;
            Ok(Some(key))
        }
        None => Ok(None),
    }
}

/// Fetches both the secret and its TTL in one round trip — used by the
/// manager's `parse` path, which needs `expires_at` for K2's re-check
/// alongside the secret for the HMAC chain.
pub async fn get_opaque_key_with_expiry<'e, E>(
    executor: E,
    key_id: i64,
) -> Result<Option<(RootKey, DateTime<Utc>)>>
where
    E: PgExecutor<'e>,
{
    let row: Option<(Vec<u8>, DateTime<Utc>)> =
        sqlx::query_as("SELECT secret, expires_at FROM opaque_key WHERE id = $1")
            .bind(key_id)
            .fetch_optional(executor)
            .await
            .map_err(AnvilError::Sql)?;

    match row {
        Some((secret, expires_at)) => {
            let key: RootKey = secret
                .try_into()
                .map_err(|_| AnvilError::Internal("stored root key is not 32 bytes".to_string()))?;
            Ok(Some((key, expires_at)))
        }
        None => Ok(None),
    }
}

/// `DeleteOpaqueKey`: revokes a single token (and every macaroon attenuated
/// from it). Idempotent — deleting an already-absent row is success, not
/// `NotFound`.
pub async fn delete_opaque_key<'e, E>(executor: E, key_id: i64) -> Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query("DELETE FROM opaque_key WHERE id = $1")
        .bind(key_id)
        .execute(executor)
        .await
        .map_err(AnvilError::Sql)?;
    Ok(())
}

/// `DeleteOpaqueKeys(user_id)`: revokes every token minted for a user, e.g.
/// on logout. Also idempotent.
pub async fn delete_opaque_keys<'e, E>(executor: E, user_id: i32) -> Result<u64>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM opaque_key WHERE user_id = $1")
        .bind(user_id)
        .execute(executor)
        .await
        .map_err(AnvilError::Sql)?;
    Ok(result.rows_affected())
}

/// Best-effort sweep of rows past `expires_at` (K2). Not a substitute for
/// cryptographic TTL enforcement — [`super::token::verify_not_expired`]-style
/// checks, if the caller chains an `expires_at` caveat, still apply at parse
/// time; this just keeps the table from growing unboundedly.
pub async fn prune_expired_keys<'e, E>(executor: E) -> Result<u64>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM opaque_key WHERE expires_at <= NOW()")
        .execute(executor)
        .await
        .map_err(AnvilError::Sql)?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_key_slice_conversion_rejects_wrong_length() {
        let short: std::result::Result<RootKey, _> = vec![0u8; 10].try_into();
        assert!(short.is_err());
    }
}
