use regex::Regex;
use vsync_core::{Identity, Result, SyncConfig, SyncError};

use crate::{safe_concat, NamespacedTranslator, Translate, NAMESPACE_PATTERN, SEPARATOR};

/// Translator for revisions: `default/hello-00001` <-> `vcluster/hello-x-default-x-vcluster-00001`.
///
/// The revision number is carried as the last segment on both sides and is
/// never cut when the physical name has to be shortened.
#[derive(Debug, Clone)]
pub struct RevisionTranslator {
    parent: NamespacedTranslator,
    physical: Regex,
    virtual_name: Regex,
}

impl RevisionTranslator {
    pub fn new(cfg: &SyncConfig) -> Result<Self, regex::Error> {
        let physical = Regex::new(&format!(
            r"^(?P<base>.+){sep}(?P<namespace>{ns}){sep}{suffix}-(?P<revision>\d+)$",
            sep = regex::escape(SEPARATOR),
            ns = NAMESPACE_PATTERN,
            suffix = regex::escape(&cfg.suffix),
        ))?;
        let virtual_name = Regex::new(r"^(?P<base>.+)-(?P<revision>\d+)$")?;
        Ok(Self { parent: NamespacedTranslator::new(cfg)?, physical, virtual_name })
    }

    /// Translator of the owning configuration.
    pub fn parent(&self) -> &NamespacedTranslator {
        &self.parent
    }

    /// Split a virtual revision name into base and revision number.
    pub fn split_virtual<'a>(&self, name: &'a str) -> Result<(&'a str, &'a str)> {
        let caps = self
            .virtual_name
            .captures(name)
            .ok_or_else(|| SyncError::malformed(name, "revision name has no numeric suffix"))?;
        match (caps.name("base"), caps.name("revision")) {
            (Some(base), Some(rev)) => Ok((base.as_str(), rev.as_str())),
            _ => Err(SyncError::malformed(name, "revision name has no numeric suffix")),
        }
    }
}

impl Translate for RevisionTranslator {
    fn virtual_to_physical(&self, id: &Identity) -> Result<Identity> {
        let (base, revision) = self.split_virtual(&id.name)?;
        let head = self.parent.joined(base, &id.namespace);
        let name = safe_concat(&head, &format!("-{revision}"), self.parent.max_len());
        Ok(Identity::new(self.parent.target_namespace(), name))
    }

    fn physical_to_virtual(&self, id: &Identity) -> Result<Identity> {
        self.parent.check_namespace(id)?;
        let caps = self
            .physical
            .captures(&id.name)
            .ok_or_else(|| SyncError::malformed(id.name.clone(), "name does not follow the revision grammar"))?;
        Ok(Identity::new(&caps["namespace"], format!("{}-{}", &caps["base"], &caps["revision"])))
    }
}

/// Revision suffix (`-00001`) of a physical revision generated for `config_name`.
///
/// The configuration name is stripped as a prefix when present; otherwise the
/// trailing `-<digits>` of the revision name is used.
pub fn revision_suffix(revision_name: &str, config_name: &str) -> Result<String> {
    fn is_suffix(s: &str) -> bool {
        s.len() > 1 && s.starts_with('-') && s[1..].bytes().all(|b| b.is_ascii_digit())
    }
    if let Some(rest) = revision_name.strip_prefix(config_name) {
        if is_suffix(rest) {
            return Ok(rest.to_string());
        }
    }
    match revision_name.rfind('-') {
        Some(i) if is_suffix(&revision_name[i..]) => Ok(revision_name[i..].to_string()),
        _ => Err(SyncError::malformed(revision_name, "revision name has no numeric suffix")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translator() -> RevisionTranslator {
        RevisionTranslator::new(&SyncConfig::new("vcluster", "vcluster")).unwrap()
    }

    #[test]
    fn hello_revision_roundtrip() {
        let t = translator();
        let v = Identity::new("default", "hello-00001");
        let p = t.virtual_to_physical(&v).unwrap();
        assert_eq!(p, Identity::new("vcluster", "hello-x-default-x-vcluster-00001"));
        assert_eq!(t.physical_to_virtual(&p).unwrap(), v);
    }

    #[test]
    fn physical_revision_matches_configuration_prefix() {
        let t = translator();
        let config = t.parent().physical_name("hello", "default");
        let p = t.virtual_to_physical(&Identity::new("default", "hello-00007")).unwrap();
        assert_eq!(p.name, format!("{}-00007", config));
    }

    #[test]
    fn virtual_name_without_number_is_malformed() {
        let t = translator();
        let err = t.virtual_to_physical(&Identity::new("default", "hello")).unwrap_err();
        assert!(matches!(err, SyncError::MalformedIdentity { .. }));
    }

    #[test]
    fn physical_name_outside_grammar_is_malformed() {
        let t = translator();
        for name in ["hello-00001", "hello-x-default-x-vcluster", "hello-x-default-x-other-00001"] {
            let err = t.physical_to_virtual(&Identity::new("vcluster", name)).unwrap_err();
            assert!(matches!(err, SyncError::MalformedIdentity { .. }), "name={}", name);
        }
    }

    #[test]
    fn long_revision_names_keep_number() {
        let t = translator();
        let v = Identity::new("default", format!("{}-00003", "n".repeat(58)));
        let p = t.virtual_to_physical(&v).unwrap();
        assert!(p.name.len() <= 63);
        assert!(p.name.ends_with("-00003"));
        assert!(t.physical_to_virtual(&p).is_err());
    }

    #[test]
    fn suffix_from_prefix_or_trailing_digits() {
        assert_eq!(revision_suffix("hello-x-default-x-vcluster-00001", "hello-x-default-x-vcluster").unwrap(), "-00001");
        assert_eq!(revision_suffix("hello-x-d-x-v-3f2a9c01be-00002", "something-else").unwrap(), "-00002");
        assert!(revision_suffix("hello", "hello").is_err());
        assert!(revision_suffix("hello-", "hello").is_err());
    }
}
