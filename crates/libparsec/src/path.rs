//! Workspace path utilities and input validators

use parsec_types::{EntryName, FsPath, InvitationToken};

pub use parsec_types::validators::{
    validate_device_label, validate_email, validate_entry_name, validate_human_handle_label,
    validate_organization_id,
};

pub fn path_join(parent: &FsPath, child: EntryName) -> FsPath {
    parent.join(child)
}

/// Parent and last segment, `None` for the root
pub fn path_split(path: &FsPath) -> Option<(FsPath, EntryName)> {
    path.clone().into_parent_and_name()
}

/// The root is its own parent
pub fn path_parent(path: &FsPath) -> FsPath {
    path.parent()
}

pub fn path_filename(path: &FsPath) -> Option<EntryName> {
    path.name().cloned()
}

/// Canonical form of `path`, paths are kept normalized once parsed
pub fn path_normalize(path: FsPath) -> FsPath {
    FsPath::from_parts(path.parts().to_vec())
}

pub fn validate_path(raw: &str) -> bool {
    raw.parse::<FsPath>().is_ok()
}

pub fn validate_invitation_token(raw: &str) -> bool {
    raw.parse::<InvitationToken>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn p(raw: &str) -> FsPath {
        raw.parse().unwrap()
    }

    #[test]
    fn test_split() {
        assert_eq!(path_split(&FsPath::root()), None);
        let (parent, name) = path_split(&p("/foo/bar.txt")).unwrap();
        assert_eq!(parent, p("/foo"));
        assert_eq!(name.as_str(), "bar.txt");
    }

    #[test]
    fn test_normalize_collapses_dots() {
        assert_eq!(path_normalize(p("/a/./b/../c//")), p("/a/c"));
        assert_eq!(path_normalize(p("/a/c")).to_string(), "/a/c");
    }

    #[test]
    fn test_validators() {
        assert!(validate_path("/foo/bar"));
        assert!(!validate_path("foo/bar"));
        assert!(!validate_invitation_token("not a token"));
        assert!(validate_invitation_token(&InvitationToken::default_new().to_string()));
        assert!(validate_entry_name("foo.txt"));
        assert!(!validate_entry_name(".."));
    }

    fn raw_path() -> impl Strategy<Value = String> {
        proptest::collection::vec(
            prop_oneof![
                Just(".".to_string()),
                Just("..".to_string()),
                "[a-zA-Z0-9_-]{1,10}",
            ],
            1..8,
        )
        .prop_map(|segments| format!("/{}", segments.join("/")))
    }

    proptest! {
        #[test]
        fn prop_join_parent_and_filename_gives_normalized(raw in raw_path()) {
            let path = p(&raw);
            if let Some(filename) = path_filename(&path) {
                prop_assert_eq!(path_join(&path_parent(&path), filename), path_normalize(path.clone()));
            }
        }
    }
}
