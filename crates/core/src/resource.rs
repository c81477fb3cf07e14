//! Typed view of a Knative object as it travels between the two domains.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Identity, Result, SyncError, TrackedKind};

/// Kubernetes wire shape; only used at the JSON boundary.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Wire {
    #[serde(default)]
    api_version: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    spec: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    status: Value,
}

/// A tracked object with its two reconciled field groups kept as raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub kind: TrackedKind,
    pub metadata: ObjectMeta,
    pub spec: Value,
    pub status: Value,
}

impl Resource {
    pub fn new(kind: TrackedKind, identity: &Identity) -> Self {
        let metadata = ObjectMeta {
            name: Some(identity.name.clone()),
            namespace: Some(identity.namespace.clone()),
            ..ObjectMeta::default()
        };
        Self { kind, metadata, spec: Value::Null, status: Value::Null }
    }

    /// Decode a wire object. Anything that is not a tracked kind is rejected here.
    pub fn from_json(raw: Value) -> Result<Self> {
        let wire: Wire = serde_json::from_value(raw)?;
        let kind = TrackedKind::from_type(&wire.api_version, &wire.kind).ok_or_else(|| SyncError::UnsupportedType {
            api_version: wire.api_version.clone(),
            kind: wire.kind.clone(),
        })?;
        if wire.metadata.name.as_deref().unwrap_or("").is_empty() {
            return Err(SyncError::malformed("", "object has no metadata.name"));
        }
        Ok(Self { kind, metadata: wire.metadata, spec: wire.spec, status: wire.status })
    }

    pub fn to_json(&self) -> Result<Value> {
        let wire = Wire {
            api_version: self.kind.api_version().to_string(),
            kind: self.kind.as_str().to_string(),
            metadata: self.metadata.clone(),
            spec: self.spec.clone(),
            status: self.status.clone(),
        };
        Ok(serde_json::to_value(wire)?)
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("")
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("")
    }

    pub fn identity(&self) -> Identity {
        Identity::new(self.namespace(), self.name())
    }

    pub fn uid(&self) -> Option<&str> {
        self.metadata.uid.as_deref()
    }

    pub fn owner_references(&self) -> &[OwnerReference] {
        self.metadata.owner_references.as_deref().unwrap_or(&[])
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.as_ref()?.get(key).map(String::as_str)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.as_ref()?.get(key).map(String::as_str)
    }

    /// Top-level string field of `status`, `None` when absent or empty.
    pub fn status_str(&self, field: &str) -> Option<&str> {
        self.status.get(field).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    pub fn set_identity(&mut self, identity: &Identity) {
        self.metadata.name = Some(identity.name.clone());
        self.metadata.namespace = Some(identity.namespace.clone());
    }

    /// Clear fields the store assigns on write, so the object can be created elsewhere.
    pub fn strip_store_fields(&mut self) {
        let m = &mut self.metadata;
        m.resource_version = None;
        m.uid = None;
        m.creation_timestamp = None;
        m.generation = None;
        m.managed_fields = None;
        m.self_link = None;
        m.deletion_timestamp = None;
        m.deletion_grace_period_seconds = None;
    }

    pub fn remove_labels(&mut self, keys: &[&str]) {
        if let Some(labels) = self.metadata.labels.as_mut() {
            labels.retain(|k, _| !keys.contains(&k.as_str()));
            if labels.is_empty() {
                self.metadata.labels = None;
            }
        }
    }

    pub fn remove_annotations(&mut self, keys: &[&str]) {
        if let Some(annotations) = self.metadata.annotations.as_mut() {
            annotations.retain(|k, _| !keys.contains(&k.as_str()));
            if annotations.is_empty() {
                self.metadata.annotations = None;
            }
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.metadata.labels.get_or_insert_with(Default::default).insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.metadata.annotations.get_or_insert_with(Default::default).insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_owner(mut self, owner: OwnerReference) -> Self {
        self.metadata.owner_references.get_or_insert_with(Vec::new).push(owner);
        self
    }

    pub fn with_uid(mut self, uid: &str) -> Self {
        self.metadata.uid = Some(uid.to_string());
        self
    }

    pub fn with_spec(mut self, spec: Value) -> Self {
        self.spec = spec;
        self
    }

    pub fn with_status(mut self, status: Value) -> Self {
        self.status = status;
        self
    }
}

/// Owner reference pointing at `parent`, flagged as controller.
pub fn controller_ref(parent: &Resource) -> OwnerReference {
    OwnerReference {
        api_version: parent.kind.api_version().to_string(),
        kind: parent.kind.as_str().to_string(),
        name: parent.name().to_string(),
        uid: parent.uid().unwrap_or_default().to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}
