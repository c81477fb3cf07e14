use crate::Identity;

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Store operation that failed, for error reporting and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Get,
    Create,
    Update,
    UpdateStatus,
    Delete,
    List,
}

impl StoreOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreOp::Get => "get",
            StoreOp::Create => "create",
            StoreOp::Update => "update",
            StoreOp::UpdateStatus => "update_status",
            StoreOp::Delete => "delete",
            StoreOp::List => "list",
        }
    }
}

impl std::fmt::Display for StoreOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A name does not follow the expected translation grammar.
    #[error("malformed identity {name:?}: {reason}")]
    MalformedIdentity { name: String, reason: &'static str },

    #[error("{kind} {identity} not found")]
    NotFound { kind: String, identity: Identity },

    #[error("{op} {kind} {identity} failed: {source}")]
    StoreOperationFailed {
        op: StoreOp,
        kind: String,
        identity: Identity,
        /// Set when the store reported a name conflict on create.
        already_exists: bool,
        #[source]
        source: anyhow::Error,
    },

    #[error("{identity} is not managed by this virtual cluster")]
    UnmanagedObject { identity: Identity },

    #[error("unsupported object type {api_version}/{kind}")]
    UnsupportedType { api_version: String, kind: String },

    #[error("invalid object: {0}")]
    InvalidObject(#[from] serde_json::Error),
}

impl SyncError {
    pub fn malformed(name: impl Into<String>, reason: &'static str) -> Self {
        SyncError::MalformedIdentity { name: name.into(), reason }
    }

    pub fn not_found(kind: impl std::fmt::Display, identity: Identity) -> Self {
        SyncError::NotFound { kind: kind.to_string(), identity }
    }

    pub fn store(op: StoreOp, kind: impl std::fmt::Display, identity: Identity, source: anyhow::Error) -> Self {
        SyncError::StoreOperationFailed { op, kind: kind.to_string(), identity, already_exists: false, source }
    }

    pub fn already_exists(kind: impl std::fmt::Display, identity: Identity) -> Self {
        let source = anyhow::anyhow!("{} {} already exists", kind, identity);
        SyncError::StoreOperationFailed { op: StoreOp::Create, kind: kind.to_string(), identity, already_exists: true, source }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, SyncError::StoreOperationFailed { already_exists: true, .. })
    }

    /// Outcomes that only mean "try again on the next notification".
    pub fn is_deferrable(&self) -> bool {
        matches!(
            self,
            SyncError::MalformedIdentity { .. } | SyncError::NotFound { .. } | SyncError::UnmanagedObject { .. }
        )
    }
}
