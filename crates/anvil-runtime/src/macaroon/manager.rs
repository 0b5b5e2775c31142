//! C3 Macaroon Manager: the only place that touches both the cryptographic
//! chain (`anvil_core::macaroon::Macaroon`) and the root-key table. Minting
//! persists a key and signs the first link; parsing fetches the key by id
//! and reconstructs the chain to verify it; revocation just deletes rows
//!.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::RngCore;
use sqlx::PgExecutor;

use anvil_core::error::{AnvilError, Result};
use anvil_core::macaroon::{Caveat, CaveatRegistry, Macaroon, RootKey};

use super::key_store;

/// Owns the process-wide [`CaveatRegistry`] and the database handle needed
/// to persist/fetch/delete root keys. Cheap to clone (an `Arc` around the
/// registry, and `Storage`'s own `Arc`-wrapped pool).
#[derive(Clone)]
pub struct MacaroonManager {
    storage: crate::db::Storage,
    caveat_registry: Arc<CaveatRegistry>,
}

impl MacaroonManager {
    pub fn new(storage: crate::db::Storage, caveat_registry: Arc<CaveatRegistry>) -> Self {
        Self {
            storage,
            caveat_registry,
        }
    }

    pub fn caveat_registry(&self) -> &CaveatRegistry {
        &self.caveat_registry
    }

    /// Mints a macaroon: generates a 32-byte key, persists it via the
    /// executor supplied (pool or an open transaction), signs the chain over
    /// `caveats` in order, and returns the assembled [`Macaroon`] — callers
    /// encode it with [`Macaroon::encode`] for the wire (§4.3 steps 1-5).
    pub async fn mint<'e, E>(
        &self,
        executor: E,
        caveats: Vec<Box<dyn Caveat>>,
        ttl: Duration,
        user_id: Option<i32>,
    ) -> Result<Macaroon>
    where
        E: PgExecutor<'e>,
    {
        let mut key: RootKey = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);

        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
        let key_id = key_store::create_opaque_key(executor, user_id, &key, expires_at).await?;

        let mut macaroon = Macaroon::mint(key_id, &key);
        for caveat in caveats {
            macaroon.add_caveat(caveat)?;
        }

        Ok(macaroon)
    }

    /// Parses and verifies a wire-format token: splits the segments, fetches
    /// the root key by `key_id` (a miss — never minted, or revoked — is
    /// `InvalidToken`, which is how revocation manifests), rejects a root key
    /// whose own TTL has lapsed (K2's cryptographic re-check), recomputes the
    /// HMAC chain, and decodes each caveat through the registry. Does not run
    /// [`Caveat::validate`] — that is the auth layer's job, caveat by caveat,
    /// against the live request context.
    pub async fn parse<'e, E>(&self, executor: E, encoded: &str) -> Result<Macaroon>
    where
        E: PgExecutor<'e>,
    {
        let macaroon = Macaroon::parse(encoded, &self.caveat_registry)?;

        let (key, expires_at) = self.fetch_key_with_expiry(executor, macaroon.key_id).await?;
        if Utc::now() > expires_at {
            return Err(AnvilError::InvalidToken);
        }

        macaroon.verify(&key)?;
        Ok(macaroon)
    }

    async fn fetch_key_with_expiry<'e, E>(
        &self,
        executor: E,
        key_id: i64,
    ) -> Result<(RootKey, chrono::DateTime<Utc>)>
    where
        E: PgExecutor<'e>,
    {
        key_store::get_opaque_key_with_expiry(executor, key_id)
            .await?
            .ok_or(AnvilError::InvalidToken)
    }

    /// `InvalidateToken(key_id)`: revokes a single token and every macaroon
    /// attenuated from it. Idempotent.
    pub async fn invalidate_token<'e, E>(&self, executor: E, key_id: i64) -> Result<()>
    where
        E: PgExecutor<'e>,
    {
        key_store::delete_opaque_key(executor, key_id).await
    }

    /// `InvalidateUserTokens(user_id)`: revokes every token minted for a
    /// user (e.g. on logout). Idempotent.
    pub async fn invalidate_user_tokens<'e, E>(&self, executor: E, user_id: i32) -> Result<u64>
    where
        E: PgExecutor<'e>,
    {
        key_store::delete_opaque_keys(executor, user_id).await
    }

    /// Best-effort sweep for root keys past their TTL (K2).
    pub async fn prune_expired_keys<'e, E>(&self, executor: E) -> Result<u64>
    where
        E: PgExecutor<'e>,
    {
        key_store::prune_expired_keys(executor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_generates_full_length_keys() {
        let mut key: RootKey = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        assert_eq!(key.len(), 32);
        assert_ne!(key, [0u8; 32]);
    }
}
