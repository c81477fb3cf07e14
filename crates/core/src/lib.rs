//! vsync core types: identities, tracked kinds, resources and the error taxonomy.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub mod equality;
pub mod error;
pub mod kind;
pub mod labels;
pub mod resource;

pub use error::{Result, StoreOp, SyncError};
pub use kind::{Mutability, TrackedKind};
pub use resource::Resource;

pub mod prelude {
    pub use super::{
        Domain, Identity, Mutability, Resource, Result, StoreOp, SyncConfig, SyncError, TrackedKind,
    };
}

/// Which side of the sync an object lives on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Domain {
    /// The tenant-facing virtual cluster.
    Virtual,
    /// The host cluster holding the real resources.
    Physical,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Virtual => "virtual",
            Domain::Physical => "physical",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(namespace, name)` pair addressing an object within a domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    pub namespace: String,
    pub name: String,
}

impl Identity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }

    /// `namespace/name`, the form used for index keys.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Parse a `namespace/name` key. Both halves must be non-empty.
    pub fn parse_key(key: &str) -> Option<Self> {
        let (ns, name) = key.split_once('/')?;
        if ns.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(ns, name))
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Default Kubernetes name length limit (DNS-1123 label).
pub const DEFAULT_MAX_NAME_LEN: usize = 63;

/// Runtime settings shared by translators, resolvers and the dispatch loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Host namespace that receives every synced object.
    pub target_namespace: String,
    /// Virtual cluster name; appended to translated names and used as the marker label value.
    pub suffix: String,
    pub max_name_len: usize,
    pub cache_shards: usize,
    pub queue_cap: usize,
    pub requeue_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            target_namespace: "vcluster".to_string(),
            suffix: "vcluster".to_string(),
            max_name_len: DEFAULT_MAX_NAME_LEN,
            cache_shards: 16,
            queue_cap: 4096,
            requeue_ms: 1000,
        }
    }
}

impl SyncConfig {
    pub fn new(target_namespace: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self { target_namespace: target_namespace.into(), suffix: suffix.into(), ..Self::default() }
    }
}
