//! Registration payload schema
//!
//! v2 payload: `{"servs": {<handler>: {"type", "addr", "processor", ...}}, "envGroup": ".."}`.
//! v1 payload is the bare handler map. Manual control lives in its own node:
//! `{"ctrl": {"groups": [..], "weight": 100, "disable": false}}`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Weight applied when an operator override has none
pub const DEFAULT_WEIGHT: i32 = 100;

/// One endpoint a service instance exposes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServInfo {
    /// Protocol kind (`thrift`, `http`, `grpc`, ...)
    #[serde(rename = "type")]
    pub kind: String,

    /// `ip:port`
    pub addr: String,

    /// Processor/handler name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub processor: String,

    /// Arbitrary extra fields
    #[serde(flatten)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ServInfo {
    pub fn new(kind: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            addr: addr.into(),
            processor: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_processor(mut self, processor: impl Into<String>) -> Self {
        self.processor = processor.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Handler name -> endpoint
pub type ServMap = BTreeMap<String, ServInfo>;

/// v2 registration payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegData {
    pub servs: ServMap,

    #[serde(rename = "envGroup", default)]
    pub env_group: String,
}

impl RegData {
    pub fn new(servs: ServMap, env_group: impl Into<String>) -> Self {
        Self {
            servs,
            env_group: env_group.into(),
        }
    }
}

/// Operator override node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManualData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctrl: Option<ServCtrl>,
}

/// Group membership, weight and disable switch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServCtrl {
    #[serde(default)]
    pub groups: Vec<String>,

    #[serde(default)]
    pub weight: i32,

    #[serde(default)]
    pub disable: bool,
}

impl ManualData {
    /// Parse a stored value; a missing or empty node is the default override
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw)
    }

    /// Add `group` (once), default the weight, and set the disable flag
    pub fn apply_group_and_disable(&mut self, group: &str, disable: bool) {
        let ctrl = self.ctrl.get_or_insert_with(ServCtrl::default);

        if !ctrl.groups.iter().any(|g| g == group) {
            ctrl.groups.push(group.to_string());
        }
        if ctrl.weight == 0 {
            ctrl.weight = DEFAULT_WEIGHT;
        }
        ctrl.disable = disable;
    }
}
