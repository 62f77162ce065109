//! Key-value pair string encoding: `"k1:v1;k2:v2"` → `{k1: v1, k2: v2}`.
//!
//! Used by `commonNamingPrefix`-adjacent free-form configuration values and by
//! tests exercising the round-trip property from spec §8.

use std::collections::HashMap;

/// Parse a `"k1:v1;k2:v2"`-style string into a map.
///
/// An empty value is allowed (`"k:"` parses to `{k: ""}`). Pairs with no `:`
/// are rejected. The empty string parses to an empty map.
pub fn parse_kv_string(s: &str) -> Result<HashMap<String, String>, KvStringError> {
    let mut map = HashMap::new();
    if s.is_empty() {
        return Ok(map);
    }
    for pair in s.split(';') {
        let (k, v) = pair
            .split_once(':')
            .ok_or_else(|| KvStringError::MissingSeparator(pair.to_string()))?;
        if k.is_empty() {
            return Err(KvStringError::EmptyKey(pair.to_string()));
        }
        map.insert(k.to_string(), v.to_string());
    }
    Ok(map)
}

/// Render a map back into `"k1:v1;k2:v2"` form.
///
/// Iteration order of the input map determines pair order in the output;
/// callers needing a stable order should sort keys first.
pub fn render_kv_string<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}:{v}"))
        .collect::<Vec<_>>()
        .join(";")
}

/// Error parsing a key-value pair string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KvStringError {
    /// A pair contained no `:` separator.
    #[error("pair {0:?} has no ':' separator")]
    MissingSeparator(String),
    /// A pair's key portion was empty.
    #[error("pair {0:?} has an empty key")]
    EmptyKey(String),
}
