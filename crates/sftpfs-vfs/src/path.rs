//! Driver path helpers and virtual property paths.
//!
//! Driver paths are absolute and `/`-separated. A final segment of the form
//! `name:SSHFSProperty.<Kind>` addresses a virtual property of `name`
//! instead of a real remote object.

/// Marker that starts every recognized property stream name.
pub const PROPERTY_PREFIX: &str = "SSHFSProperty.";

/// Property kinds addressable through a pseudo-path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    /// Octal permission bits as text.
    Permission,
    /// Opening it flushes every cached result for the base path.
    Cache,
    /// Recognized prefix, unknown kind.
    Other(String),
}

impl Property {
    fn parse(kind: &str) -> Self {
        match kind {
            "Permission" => Property::Permission,
            "Cache" => Property::Cache,
            other => Property::Other(other.to_string()),
        }
    }

    fn as_str(&self) -> &str {
        match self {
            Property::Permission => "Permission",
            Property::Cache => "Cache",
            Property::Other(kind) => kind,
        }
    }
}

/// A path split into its base object and the property it addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyPath<'a> {
    pub base: &'a str,
    pub property: Property,
}

/// Split `path` into base path and property if its final segment carries a
/// recognized property suffix.
///
/// Colons in earlier segments are ignored; a colon-suffixed final segment
/// without [`PROPERTY_PREFIX`] is not a property path.
pub fn split_property(path: &str) -> Option<PropertyPath<'_>> {
    let segment_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    let colon = segment_start + path[segment_start..].find(':')?;
    let kind = path[colon + 1..].strip_prefix(PROPERTY_PREFIX)?;
    Some(PropertyPath {
        base: &path[..colon],
        property: Property::parse(kind),
    })
}

/// Build the pseudo-path addressing `property` of `base`.
pub fn property_path(base: &str, property: &Property) -> String {
    format!("{base}:{PROPERTY_PREFIX}{}", property.as_str())
}

/// Non-empty segments of `path`, top-down.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Parent directory of `path`. The root is its own parent.
pub fn parent(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &trimmed[..i],
    }
}

/// Final segment of `path`, empty for the root.
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(i) => &trimmed[i + 1..],
        None => trimmed,
    }
}

/// Join a directory path and a child name.
pub fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_permission_property() {
        let p = split_property("/docs/a.txt:SSHFSProperty.Permission").unwrap();
        assert_eq!(p.base, "/docs/a.txt");
        assert_eq!(p.property, Property::Permission);
    }

    #[test]
    fn test_split_cache_property() {
        let p = split_property("/docs:SSHFSProperty.Cache").unwrap();
        assert_eq!(p.base, "/docs");
        assert_eq!(p.property, Property::Cache);
    }

    #[test]
    fn test_unknown_property_kind() {
        let p = split_property("/f:SSHFSProperty.Owner").unwrap();
        assert_eq!(p.property, Property::Other("Owner".into()));
    }

    #[test]
    fn test_plain_colon_is_not_property() {
        assert!(split_property("/f:stream").is_none());
        assert!(split_property("/a:SSHFSProperty.Cache/b").is_none());
        assert!(split_property("/plain").is_none());
    }

    #[test]
    fn test_property_path_roundtrip() {
        let path = property_path("/x/y", &Property::Permission);
        assert_eq!(path, "/x/y:SSHFSProperty.Permission");
        assert_eq!(split_property(&path).unwrap().base, "/x/y");
    }

    #[test]
    fn test_parent_and_file_name() {
        assert_eq!(parent("/a/b"), "/a");
        assert_eq!(parent("/a"), "/");
        assert_eq!(parent("/"), "/");
        assert_eq!(file_name("/a/b"), "b");
        assert_eq!(file_name("/"), "");
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
    }

    #[test]
    fn test_segments_skip_empty() {
        let segs: Vec<_> = segments("//a///b/").collect();
        assert_eq!(segs, vec!["a", "b"]);
    }
}
