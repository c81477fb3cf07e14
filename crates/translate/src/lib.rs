//! vsync translate: pure name mapping between the virtual and physical domains.
//!
//! Two grammars are supported:
//!
//! - simple kinds: `<name>-x-<namespace>-x-<suffix>` in the target namespace
//! - revisions: `<base>-x-<namespace>-x-<suffix>-<number>`, keeping the
//!   revision number as the last segment
//!
//! Names longer than the store limit are shortened by [`safe_concat`], which
//! keeps the semantic tail and replaces the cut part with a hash. Shortened
//! names cannot be parsed back; callers fall back to the name cache.

#![forbid(unsafe_code)]

use vsync_core::labels::{NAMESPACE_ANNOTATION, NAME_ANNOTATION};
use vsync_core::{Identity, Resource, Result};

mod concat;
mod namespaced;
mod revision;

pub use concat::{safe_concat, HASH_LEN};
pub use namespaced::NamespacedTranslator;
pub use revision::{revision_suffix, RevisionTranslator};

/// Marker token placed between the name, the virtual namespace and the suffix.
pub const SEPARATOR: &str = "-x-";

/// Bidirectional identity mapping for one object kind.
pub trait Translate: Send + Sync {
    fn virtual_to_physical(&self, id: &Identity) -> Result<Identity>;
    fn physical_to_virtual(&self, id: &Identity) -> Result<Identity>;
}

/// Virtual identity recorded on a physical object by the syncer that created it.
pub fn from_annotations(obj: &Resource) -> Option<Identity> {
    let name = obj.annotation(NAME_ANNOTATION).filter(|s| !s.is_empty())?;
    let namespace = obj.annotation(NAMESPACE_ANNOTATION).filter(|s| !s.is_empty())?;
    Some(Identity::new(namespace, name))
}

/// DNS-1123 label fragment used to anchor the namespace segment in patterns.
pub(crate) const NAMESPACE_PATTERN: &str = "[a-z0-9](?:[-a-z0-9]*[a-z0-9])?";
