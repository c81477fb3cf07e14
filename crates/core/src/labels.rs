//! Label and annotation keys shared with the virtual cluster runtime.

/// Label set on every physical object the virtual cluster manages; value is the cluster suffix.
pub const MARKER_LABEL: &str = "vcluster.loft.sh/managed-by";

/// Annotation on physical objects naming their virtual counterpart.
pub const NAME_ANNOTATION: &str = "vcluster.loft.sh/object-name";

/// Annotation on physical objects naming the virtual namespace.
pub const NAMESPACE_ANNOTATION: &str = "vcluster.loft.sh/object-namespace";

/// Keys that only make sense on the physical side and are dropped when mirroring up.
pub const PHYSICAL_ONLY_LABELS: &[&str] = &[MARKER_LABEL];
pub const PHYSICAL_ONLY_ANNOTATIONS: &[&str] = &[NAME_ANNOTATION, NAMESPACE_ANNOTATION];
