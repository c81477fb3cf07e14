use regex::Regex;
use vsync_core::{Identity, Result, SyncConfig, SyncError};

use crate::{safe_concat, Translate, NAMESPACE_PATTERN, SEPARATOR};

/// Translator for kinds whose physical name is derived from the virtual name alone.
#[derive(Debug, Clone)]
pub struct NamespacedTranslator {
    target_namespace: String,
    suffix: String,
    max_len: usize,
    pattern: Regex,
}

impl NamespacedTranslator {
    pub fn new(cfg: &SyncConfig) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!(
            r"^(?P<name>.+){sep}(?P<namespace>{ns}){sep}{suffix}$",
            sep = regex::escape(SEPARATOR),
            ns = NAMESPACE_PATTERN,
            suffix = regex::escape(&cfg.suffix),
        ))?;
        Ok(Self {
            target_namespace: cfg.target_namespace.clone(),
            suffix: cfg.suffix.clone(),
            max_len: cfg.max_name_len,
            pattern,
        })
    }

    pub fn target_namespace(&self) -> &str {
        &self.target_namespace
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Unshortened `<name>-x-<namespace>-x-<suffix>`.
    pub(crate) fn joined(&self, name: &str, namespace: &str) -> String {
        format!("{name}{SEPARATOR}{namespace}{SEPARATOR}{}", self.suffix)
    }

    /// Physical name for a virtual `(name, namespace)`, shortened if needed.
    pub fn physical_name(&self, name: &str, namespace: &str) -> String {
        safe_concat(&self.joined(name, namespace), "", self.max_len)
    }

    pub(crate) fn check_namespace(&self, id: &Identity) -> Result<()> {
        if id.namespace != self.target_namespace {
            return Err(SyncError::malformed(id.key(), "object is outside the target namespace"));
        }
        Ok(())
    }
}

impl Translate for NamespacedTranslator {
    fn virtual_to_physical(&self, id: &Identity) -> Result<Identity> {
        Ok(Identity::new(self.target_namespace.clone(), self.physical_name(&id.name, &id.namespace)))
    }

    fn physical_to_virtual(&self, id: &Identity) -> Result<Identity> {
        self.check_namespace(id)?;
        let caps = self
            .pattern
            .captures(&id.name)
            .ok_or_else(|| SyncError::malformed(id.name.clone(), "name has no -x-<namespace>-x-<suffix> segment"))?;
        Ok(Identity::new(&caps["namespace"], &caps["name"]))
    }
}
