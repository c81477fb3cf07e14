//! Reverse-lookup relations the syncer relies on, declared over virtual objects.

use smallvec::smallvec;
use vsync_core::{Resource, SyncConfig, TrackedKind};
use vsync_store::{IndexKeys, IndexSpec};
use vsync_translate::NamespacedTranslator;

/// Virtual configurations keyed by the physical revisions they currently point at.
pub const INDEX_BY_CONFIGURATION: &str = "indexbyconfiguration";

/// Virtual objects keyed by their derived physical identity.
pub const INDEX_BY_PHYSICAL_NAME: &str = "indexbyphysicalname";

/// `<target ns>/<revision>` for the latest created and latest ready revision.
pub fn revision_keys(target_namespace: &str, config: &Resource) -> IndexKeys {
    let mut keys = IndexKeys::new();
    for field in ["latestCreatedRevisionName", "latestReadyRevisionName"] {
        if let Some(name) = config.status_str(field) {
            let key = format!("{}/{}", target_namespace, name);
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    keys
}

pub fn physical_name_keys(translator: &NamespacedTranslator, obj: &Resource) -> IndexKeys {
    smallvec![format!(
        "{}/{}",
        translator.target_namespace(),
        translator.physical_name(obj.name(), obj.namespace())
    )]
}

/// Index declarations for the virtual store.
pub fn virtual_index_specs(cfg: &SyncConfig) -> Result<Vec<IndexSpec>, regex::Error> {
    let translator = NamespacedTranslator::new(cfg)?;
    let target = cfg.target_namespace.clone();
    let by_name = translator.clone();
    Ok(vec![
        IndexSpec::new(INDEX_BY_CONFIGURATION, TrackedKind::Configuration, move |o| revision_keys(&target, o)),
        IndexSpec::new(INDEX_BY_PHYSICAL_NAME, TrackedKind::Service, move |o| physical_name_keys(&by_name, o)),
        IndexSpec::new(INDEX_BY_PHYSICAL_NAME, TrackedKind::Configuration, move |o| physical_name_keys(&translator, o)),
    ])
}
