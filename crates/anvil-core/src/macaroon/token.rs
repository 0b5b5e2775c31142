use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AnvilError, Result};
use crate::macaroon::caveat::{Caveat, CaveatRegistry};

use super::caveat::encode_caveat;

type HmacSha256 = Hmac<Sha256>;

/// 32-byte root key used to derive a macaroon's signature chain.
pub type RootKey = [u8; 32];

/// An in-memory macaroon: a key identifier, its ordered caveat chain, and the
/// running HMAC signature. Caveats may be appended (attenuation) but
/// never removed; every mutation produces a new signature.
pub struct Macaroon {
    pub key_id: i64,
    caveats: Vec<Box<dyn Caveat>>,
    /// The base64 segment for each caveat, in order — retained verbatim
    /// because the signature chain is computed over the *encoded* bytes, and
    /// re-encoding a decoded caveat is not guaranteed to reproduce the same
    /// bytes (e.g. JSON key ordering).
    raw_segments: Vec<String>,
    pub signature: [u8; 32],
}

impl Macaroon {
    /// Step 3 of minting: `s₀ = HMAC-SHA256(k, base64(keyID))`.
    pub fn mint(key_id: i64, key: &RootKey) -> Self {
        let signature = hmac_sha256(key, key_id_segment(key_id).as_bytes());
        Self {
            key_id,
            caveats: Vec::new(),
            raw_segments: Vec::new(),
            signature,
        }
    }

    pub fn caveats(&self) -> &[Box<dyn Caveat>] {
        &self.caveats
    }

    /// Attenuation: append `caveat` and recompute `s = HMAC(s_prev,
    /// encode(caveat))`. Purely offline — no store interaction.
    pub fn add_caveat(&mut self, caveat: Box<dyn Caveat>) -> Result<()> {
        let segment = encode_caveat(caveat.as_ref())?;
        self.signature = hmac_sha256(&self.signature, segment.as_bytes());
        self.raw_segments.push(segment);
        self.caveats.push(caveat);
        Ok(())
    }

    /// `base64(keyID) . encode(C₁) . … . encode(Cₙ) . base64(signature)`.
    pub fn encode(&self) -> String {
        let mut parts = Vec::with_capacity(self.raw_segments.len() + 2);
        parts.push(key_id_segment(self.key_id));
        parts.extend(self.raw_segments.iter().cloned());
        parts.push(base64::engine::general_purpose::STANDARD.encode(self.signature));
        parts.join(".")
    }

    /// Splits and decodes the wire format without verifying the signature;
    /// the caller fetches the root key for `key_id` and calls [`Self::verify`].
    /// Fewer than three segments (key + ≥1 caveat + signature) is
    /// `MalformedToken`.
    pub fn parse(encoded: &str, registry: &CaveatRegistry) -> Result<Self> {
        let parts: Vec<&str> = encoded.split('.').collect();
        if parts.len() < 3 {
            return Err(AnvilError::MalformedToken(
                "token must have at least three segments".to_string(),
            ));
        }

        let key_id = decode_key_id(parts[0])?;
        let signature = decode_signature(parts[parts.len() - 1])?;
        let raw_segments: Vec<String> = parts[1..parts.len() - 1]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let caveats = raw_segments
            .iter()
            .map(|seg| registry.decode(seg))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            key_id,
            caveats,
            raw_segments,
            signature,
        })
    }

    /// Recomputes the chain from `key` and compares against the carried
    /// signature in constant time (M1/M2, and §8's macaroon-chain property).
    pub fn verify(&self, key: &RootKey) -> Result<()> {
        let mut sig = hmac_sha256(key, key_id_segment(self.key_id).as_bytes());
        for seg in &self.raw_segments {
            sig = hmac_sha256(&sig, seg.as_bytes());
        }

        if sig.ct_eq(&self.signature).into() {
            Ok(())
        } else {
            Err(AnvilError::InvalidSignature)
        }
    }
}

fn key_id_segment(key_id: i64) -> String {
    base64::engine::general_purpose::STANDARD.encode(key_id.to_string())
}

fn decode_key_id(segment: &str) -> Result<i64> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(segment)
        .map_err(|e| AnvilError::MalformedToken(e.to_string()))?;
    let s = String::from_utf8(bytes).map_err(|e| AnvilError::MalformedToken(e.to_string()))?;
    s.parse::<i64>()
        .map_err(|e| AnvilError::MalformedToken(e.to_string()))
}

fn decode_signature(segment: &str) -> Result<[u8; 32]> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(segment)
        .map_err(|e| AnvilError::MalformedToken(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| AnvilError::MalformedToken("signature must be 32 bytes".to_string()))
}

fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts a key of any length");
    mac.update(msg);
    mac.finalize().into_bytes().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macaroon::builtin::{register_builtin_caveats, UserContext};

    fn registry() -> CaveatRegistry {
        let mut r = CaveatRegistry::new();
        register_builtin_caveats(&mut r).unwrap();
        r
    }

    #[test]
    fn mint_encode_parse_round_trips() {
        let key: RootKey = [7u8; 32];
        let mut m = Macaroon::mint(99, &key);
        m.add_caveat(Box::new(UserContext {
            user_id: 1,
            org_id: 2,
        }))
        .unwrap();

        let encoded = m.encode();
        let parsed = Macaroon::parse(&encoded, &registry()).unwrap();

        assert_eq!(parsed.key_id, 99);
        assert_eq!(parsed.caveats().len(), 1);
        assert_eq!(parsed.signature, m.signature);
        assert!(parsed.verify(&key).is_ok());
    }

    #[test]
    fn verification_fails_with_wrong_key() {
        let key: RootKey = [1u8; 32];
        let wrong: RootKey = [2u8; 32];
        let mut m = Macaroon::mint(1, &key);
        m.add_caveat(Box::new(UserContext {
            user_id: 1,
            org_id: 2,
        }))
        .unwrap();

        assert!(m.verify(&wrong).is_err());
        assert!(m.verify(&key).is_ok());
    }

    #[test]
    fn reordering_caveats_invalidates_signature() {
        let key: RootKey = [3u8; 32];

        let mut forward = Macaroon::mint(1, &key);
        forward
            .add_caveat(Box::new(UserContext { user_id: 1, org_id: 1 }))
            .unwrap();
        forward
            .add_caveat(Box::new(UserContext { user_id: 2, org_id: 2 }))
            .unwrap();

        // Build the reverse order directly (can't reorder in place — the
        // chain is order-dependent by construction).
        let mut backward = Macaroon::mint(1, &key);
        backward
            .add_caveat(Box::new(UserContext { user_id: 2, org_id: 2 }))
            .unwrap();
        backward
            .add_caveat(Box::new(UserContext { user_id: 1, org_id: 1 }))
            .unwrap();

        assert_ne!(forward.signature, backward.signature);
    }

    #[test]
    fn fewer_than_three_segments_is_malformed() {
        let err = Macaroon::parse("onlytwo.segments", &registry()).unwrap_err();
        assert!(matches!(err, AnvilError::MalformedToken(_)));
    }

    #[test]
    fn attenuation_changes_signature_but_not_key_id() {
        let key: RootKey = [9u8; 32];
        let mut m = Macaroon::mint(5, &key);
        let sig_before = m.signature;
        m.add_caveat(Box::new(UserContext { user_id: 1, org_id: 1 }))
            .unwrap();
        assert_ne!(m.signature, sig_before);
        assert_eq!(m.key_id, 5);
    }
}
