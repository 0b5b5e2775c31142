use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;

use base64::Engine as _;
use serde_json::Value;

use crate::error::{AnvilError, Result};

/// A typed, self-describing restriction appended to a macaroon and evaluated
/// against the request at verification time (§3's polymorphic Caveat entity).
///
/// Implementors are registered in a [`CaveatRegistry`] under the string
/// returned by [`Caveat::caveat_type`]; the registry round-trips instances
/// through [`Caveat::body`] (the caveat's fields, as a JSON object with no
/// `type` key) rather than requiring a closed enum, so application code can
/// add its own caveat kinds without touching this crate.
pub trait Caveat: Debug + Send + Sync {
    fn caveat_type(&self) -> &'static str;

    /// The caveat's own fields, serialized as a JSON object. The registry
    /// adds the `type` discriminator before base64-encoding the segment.
    fn body(&self) -> Value;

    /// Evaluated in caveat order during authentication; the first failure
    /// short-circuits the walk.
    fn validate(&self, ctx: &mut RequestContext) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

/// Per-request state a caveat chain validates against and populates. `method`
/// and `path` describe the inbound request; `user_id`/`org_id` are bound by
/// the caveats that validate successfully (the built-in `user_context` kind
/// sets both).
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub user_id: Option<i32>,
    pub org_id: Option<i32>,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            user_id: None,
            org_id: None,
        }
    }
}

type CaveatConstructor = fn(&Value) -> Result<Box<dyn Caveat>>;

/// Maps a caveat's `type` string to its constructor. Built once and
/// passed explicitly — never a global/lazy static, per the design's
/// process-wide-state note.
pub struct CaveatRegistry {
    constructors: HashMap<&'static str, CaveatConstructor>,
}

impl CaveatRegistry {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Double-registration of a type is a fatal configuration error.
    pub fn register(&mut self, type_name: &'static str, ctor: CaveatConstructor) -> Result<()> {
        if self.constructors.contains_key(type_name) {
            return Err(AnvilError::CaveatAlreadyRegistered(type_name.to_string()));
        }
        self.constructors.insert(type_name, ctor);
        Ok(())
    }

    /// Decodes one `.`-delimited segment: base64 -> JSON -> `{type}` -> looks
    /// up the constructor -> instantiates from the full JSON body. Unknown
    /// types fail with `UnknownCaveatType`.
    pub fn decode(&self, segment: &str) -> Result<Box<dyn Caveat>> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(segment)
            .map_err(|e| AnvilError::MalformedToken(e.to_string()))?;
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| AnvilError::MalformedToken(e.to_string()))?;
        let type_name = value
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AnvilError::MalformedToken("caveat missing type field".to_string()))?;

        let ctor = self
            .constructors
            .get(type_name)
            .ok_or_else(|| AnvilError::UnknownCaveatType(type_name.to_string()))?;
        ctor(&value)
    }
}

impl Default for CaveatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes a caveat as the base64 segment carried on the wire: its body with
/// a `type` key merged in, JSON-serialized, then base64 (standard alphabet).
pub fn encode_caveat(caveat: &dyn Caveat) -> Result<String> {
    let mut value = caveat.body();
    let obj = value
        .as_object_mut()
        .ok_or_else(|| AnvilError::Serialization("caveat body must be a JSON object".to_string()))?;
    obj.insert(
        "type".to_string(),
        Value::String(caveat.caveat_type().to_string()),
    );
    let json = serde_json::to_vec(&value)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(json))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct Marker {
        n: i32,
    }

    impl Caveat for Marker {
        fn caveat_type(&self) -> &'static str {
            "marker"
        }
        fn body(&self) -> Value {
            serde_json::to_value(self).unwrap()
        }
        fn validate(&self, _ctx: &mut RequestContext) -> Result<()> {
            Ok(())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn construct_marker(v: &Value) -> Result<Box<dyn Caveat>> {
        let m: Marker = serde_json::from_value(v.clone())?;
        Ok(Box::new(m))
    }

    #[test]
    fn registers_and_decodes_round_trip() {
        let mut registry = CaveatRegistry::new();
        registry.register("marker", construct_marker).unwrap();

        let caveat = Marker { n: 42 };
        let segment = encode_caveat(&caveat).unwrap();
        let decoded = registry.decode(&segment).unwrap();
        let decoded = decoded.as_any().downcast_ref::<Marker>().unwrap();
        assert_eq!(decoded.n, 42);
    }

    #[test]
    fn double_registration_is_fatal() {
        let mut registry = CaveatRegistry::new();
        registry.register("marker", construct_marker).unwrap();
        let err = registry.register("marker", construct_marker).unwrap_err();
        assert!(matches!(err, AnvilError::CaveatAlreadyRegistered(_)));
    }

    #[test]
    fn unknown_type_fails() {
        let registry = CaveatRegistry::new();
        let segment = base64::engine::general_purpose::STANDARD
            .encode(r#"{"type":"nope"}"#);
        let err = registry.decode(&segment).unwrap_err();
        assert!(matches!(err, AnvilError::UnknownCaveatType(_)));
    }
}
