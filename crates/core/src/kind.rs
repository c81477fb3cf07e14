use serde::{Deserialize, Serialize};

pub const SERVING_GROUP: &str = "serving.knative.dev";
pub const SERVING_VERSION: &str = "v1";
pub const SERVING_API_VERSION: &str = "serving.knative.dev/v1";

/// Whether an object's spec may be rewritten after creation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Mutability {
    Mutable,
    /// Generated children; only status is ever propagated.
    Immutable,
}

/// Knative Serving kinds this syncer understands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackedKind {
    Service,
    Configuration,
    Route,
    Revision,
}

impl TrackedKind {
    pub const ALL: [TrackedKind; 4] =
        [TrackedKind::Service, TrackedKind::Configuration, TrackedKind::Route, TrackedKind::Revision];

    pub fn group(&self) -> &'static str {
        SERVING_GROUP
    }

    pub fn version(&self) -> &'static str {
        SERVING_VERSION
    }

    pub fn api_version(&self) -> &'static str {
        SERVING_API_VERSION
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackedKind::Service => "Service",
            TrackedKind::Configuration => "Configuration",
            TrackedKind::Route => "Route",
            TrackedKind::Revision => "Revision",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            TrackedKind::Service => "services",
            TrackedKind::Configuration => "configurations",
            TrackedKind::Route => "routes",
            TrackedKind::Revision => "revisions",
        }
    }

    pub fn mutability(&self) -> Mutability {
        match self {
            TrackedKind::Revision => Mutability::Immutable,
            _ => Mutability::Mutable,
        }
    }

    /// Map an `(apiVersion, kind)` pair onto a tracked kind.
    pub fn from_type(api_version: &str, kind: &str) -> Option<Self> {
        if api_version != SERVING_API_VERSION {
            return None;
        }
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }
}

impl std::fmt::Display for TrackedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TrackedKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s) || k.plural() == s.to_ascii_lowercase())
            .ok_or_else(|| format!("unknown kind: {} (expect service, configuration, route or revision)", s))
    }
}
