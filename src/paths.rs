//! Store path layout
//!
//! Every node the runtime touches lives under one configured base path:
//!
//! ```text
//! <base>/dist/<location>/<id>                  legacy (v1) registration
//! <base>/dist2/<location>/<id>/serve           v2 registration
//! <base>/dist2/<location>/<id>/backdoor        admin endpoint
//! <base>/dist2/<location>/<id>/metrics         metrics endpoint
//! <base>/dist2/<location>/<id>/manual          operator override
//! <base>/skey/<location>                       instance id counter
//! <base>/db/route                              db routing blob
//! <base>/lock/local/<location>/<name>          service-local locks
//! <base>/lock/global/<name>                    cross-service locks
//! <base>/etc, <base>/etc/global                tiered app config
//! ```

use crate::lock::LockScope;
use crate::registry::RegistrationKind;

pub const BASE_LOC_DIST: &str = "dist";
pub const BASE_LOC_DIST_V2: &str = "dist2";
pub const BASE_LOC_ETC: &str = "etc";
pub const BASE_LOC_ETC_GLOBAL: &str = "etc/global";
pub const BASE_LOC_SKEY: &str = "skey";
pub const BASE_LOC_DB: &str = "db/route";
pub const BASE_LOC_LOCAL_DIST_LOCK: &str = "lock/local";
pub const BASE_LOC_GLOBAL_DIST_LOCK: &str = "lock/global";

/// Builds store keys rooted at a base path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathLayout {
    base: String,
}

impl PathLayout {
    /// `base` is normalized to a leading `/` and no trailing `/`
    pub fn new(base: &str) -> Self {
        let trimmed = base.trim_matches('/');
        let base = if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        };
        Self { base }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn join(&self, suffix: &str) -> String {
        format!("{}/{}", self.base, suffix)
    }

    /// Legacy registration node
    pub fn dist_v1(&self, location: &str, sid: u32) -> String {
        self.join(&format!("{BASE_LOC_DIST}/{location}/{sid}"))
    }

    /// v2 registration node for one registration kind
    pub fn dist_v2(&self, location: &str, sid: u32, kind: RegistrationKind) -> String {
        self.join(&format!("{BASE_LOC_DIST_V2}/{location}/{sid}/{}", kind.dir()))
    }

    /// Instance id counter for a service location
    pub fn skey(&self, location: &str) -> String {
        self.join(&format!("{BASE_LOC_SKEY}/{location}"))
    }

    pub fn db_route(&self) -> String {
        self.join(BASE_LOC_DB)
    }

    pub fn etc_global(&self) -> String {
        self.join(BASE_LOC_ETC_GLOBAL)
    }

    pub fn etc_service(&self, location: &str) -> String {
        self.join(&format!("{BASE_LOC_ETC}/{location}"))
    }

    /// Lock node; local locks are namespaced by the owning service location
    pub fn lock(&self, scope: LockScope, location: &str, name: &str) -> String {
        match scope {
            LockScope::Local => self.join(&format!("{BASE_LOC_LOCAL_DIST_LOCK}/{location}/{name}")),
            LockScope::Global => self.join(&format!("{BASE_LOC_GLOBAL_DIST_LOCK}/{name}")),
        }
    }
}
