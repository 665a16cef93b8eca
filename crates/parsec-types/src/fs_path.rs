//! Workspace paths
//!
//! A path is an ordered sequence of entry names rooted at `/`. Parsing
//! normalizes the textual form: empty and `.` segments are dropped and `..`
//! pops the previous segment (never above the root).

use crate::names::EntryName;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when a textual path cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FsPathError {
    /// Paths must start with `/`
    #[error("Path must be absolute")]
    NotAbsolute,
    /// A segment is not a valid entry name
    #[error("Invalid entry name in path")]
    InvalidEntryName,
}

/// Absolute, normalized path within a workspace
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FsPath {
    parts: Vec<EntryName>,
}

impl FsPath {
    /// The workspace root `/`
    pub fn root() -> Self {
        Self { parts: Vec::new() }
    }

    /// Build a path from already validated segments
    pub fn from_parts(parts: Vec<EntryName>) -> Self {
        Self { parts }
    }

    /// Whether this is the workspace root
    pub fn is_root(&self) -> bool {
        self.parts.is_empty()
    }

    /// Segments from the root down
    pub fn parts(&self) -> &[EntryName] {
        &self.parts
    }

    /// Last segment, `None` for the root
    pub fn name(&self) -> Option<&EntryName> {
        self.parts.last()
    }

    /// Parent path; the root is its own parent
    pub fn parent(&self) -> FsPath {
        let mut parts = self.parts.clone();
        parts.pop();
        Self { parts }
    }

    /// Path of a child of this path
    pub fn join(&self, child: EntryName) -> FsPath {
        let mut parts = self.parts.clone();
        parts.push(child);
        Self { parts }
    }

    /// Split into parent path and last segment, `None` for the root
    pub fn into_parent_and_name(mut self) -> Option<(FsPath, EntryName)> {
        let name = self.parts.pop()?;
        Some((self, name))
    }

    /// Whether `self` is `other` or one of its descendants
    pub fn starts_with(&self, other: &FsPath) -> bool {
        self.parts.len() >= other.parts.len() && self.parts[..other.parts.len()] == other.parts[..]
    }
}

impl fmt::Display for FsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parts.is_empty() {
            return f.write_str("/");
        }
        for part in &self.parts {
            write!(f, "/{part}")?;
        }
        Ok(())
    }
}

impl FromStr for FsPath {
    type Err = FsPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let relative = s.strip_prefix('/').ok_or(FsPathError::NotAbsolute)?;
        let mut parts: Vec<EntryName> = Vec::new();
        for segment in relative.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                raw => parts.push(raw.parse().map_err(|_| FsPathError::InvalidEntryName)?),
            }
        }
        Ok(Self { parts })
    }
}

impl TryFrom<String> for FsPath {
    type Error = FsPathError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<FsPath> for String {
    fn from(path: FsPath) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn p(raw: &str) -> FsPath {
        raw.parse().unwrap()
    }

    #[test]
    fn test_parse_normalizes() {
        assert_eq!(p("/"), FsPath::root());
        assert_eq!(p("//a/./b/"), p("/a/b"));
        assert_eq!(p("/a/b/../c"), p("/a/c"));
        assert_eq!(p("/../.."), FsPath::root());
        assert_eq!(p("/a/b").to_string(), "/a/b");
    }

    #[test]
    fn test_parse_rejects_relative() {
        assert_eq!("a/b".parse::<FsPath>(), Err(FsPathError::NotAbsolute));
        assert_eq!("".parse::<FsPath>(), Err(FsPathError::NotAbsolute));
    }

    #[test]
    fn test_parent_and_name() {
        let path = p("/foo/bar");
        assert_eq!(path.parent(), p("/foo"));
        assert_eq!(path.name().map(EntryName::as_str), Some("bar"));
        assert_eq!(FsPath::root().parent(), FsPath::root());
        assert_eq!(FsPath::root().name(), None);
    }

    #[test]
    fn test_starts_with() {
        assert!(p("/a/b/c").starts_with(&p("/a/b")));
        assert!(p("/a/b").starts_with(&p("/a/b")));
        assert!(!p("/a/bc").starts_with(&p("/a/b")));
        assert!(p("/a").starts_with(&FsPath::root()));
    }

    fn segment() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(".".to_string()),
            Just("..".to_string()),
            Just(String::new()),
            "[a-zA-Z0-9 _.-]{1,12}".prop_filter("not a dot segment", |s| s != "." && s != ".."),
        ]
    }

    proptest! {
        #[test]
        fn prop_join_parent_filename_is_normalize(segments in proptest::collection::vec(segment(), 1..8)) {
            let raw = format!("/{}", segments.join("/"));
            let path: FsPath = raw.parse().unwrap();
            if let Some(name) = path.name().cloned() {
                prop_assert_eq!(path.parent().join(name), path.clone());
            }
            let reparsed: FsPath = path.to_string().parse().unwrap();
            prop_assert_eq!(reparsed, path);
        }
    }
}
