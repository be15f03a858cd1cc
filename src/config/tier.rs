//! Tiered application config
//!
//! The store holds a global JSON blob (`etc/global`) and a per-service blob
//! (`etc/<location>`). The service tier is merged over the global tier key
//! by key; nested objects merge recursively, everything else is replaced.

use serde_json::{Map, Value};

/// Merge `overlay` into `base`
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Merge raw tiers in order, lowest priority first; empty tiers are skipped
pub fn merge_tiers<'a, I>(tiers: I) -> Result<Value, serde_json::Error>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut merged = Value::Object(Map::new());
    for raw in tiers {
        if raw.trim().is_empty() {
            continue;
        }
        let tier: Value = serde_json::from_str(raw)?;
        deep_merge(&mut merged, tier);
    }
    Ok(merged)
}
