//! Module dedicated to mail folders.
//!
//! A folder is an ordered sequence of path segments. Each store
//! renders it with its own hierarchy separator; the reserved name
//! `INBOX` is an alias that stores map to their configured inbox path.

use std::fmt;
use std::{collections::HashMap, path::PathBuf};

/// The reserved inbox folder name.
pub const INBOX: &str = "INBOX";

/// A mail folder name, plus its exclusion state.
#[derive(Clone, Debug, Eq)]
pub struct Mailfolder {
    /// The ordered path segments of the folder name.
    pub name: Vec<String>,

    /// Whether the folder is excluded from synchronization.
    pub excluded: bool,
}

impl Mailfolder {
    pub fn new(name: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into_iter().map(Into::into).collect(),
            excluded: false,
        }
    }

    pub fn inbox() -> Self {
        Self::new([INBOX])
    }

    pub fn is_inbox(&self) -> bool {
        self.name.len() == 1 && self.name[0] == INBOX
    }

    /// Renders the folder name with the given store separator.
    pub fn to_store_path(&self, separator: char) -> String {
        self.name.join(&separator.to_string())
    }

    /// Renders the folder name as a metadata directory path, using the
    /// host OS path separator regardless of any store separator.
    pub fn to_metadata_path(&self) -> PathBuf {
        self.name.iter().collect()
    }
}

/// Equality is componentwise over the name; the exclusion state does
/// not take part.
impl PartialEq for Mailfolder {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl std::hash::Hash for Mailfolder {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for Mailfolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_store_path('/'))
    }
}

/// Merges the folder listings of two stores.
///
/// The result is the union keyed by the rendered name. A folder
/// excluded on either side is excluded in the result; when
/// `ignore_excluded` is set, excluded folders are removed from the
/// result entirely. The output is sorted by name so scheduling order
/// is stable across runs.
pub fn merge_folders(
    folders1: &[Mailfolder],
    folders2: &[Mailfolder],
    ignore_excluded: bool,
) -> Vec<Mailfolder> {
    let mut merged: HashMap<String, Mailfolder> = HashMap::new();

    for folder in folders1 {
        merged.insert(folder.to_string(), folder.clone());
    }

    for folder in folders2 {
        match merged.get_mut(&folder.to_string()) {
            Some(existing) => {
                if folder.excluded {
                    existing.excluded = true;
                }
            }
            None => {
                merged.insert(folder.to_string(), folder.clone());
            }
        }
    }

    let mut folders: Vec<Mailfolder> = merged
        .into_values()
        .filter(|f| !(ignore_excluded && f.excluded))
        .collect();
    folders.sort_by(|a, b| a.name.cmp(&b.name));
    folders
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(name: &str) -> Mailfolder {
        Mailfolder::new(name.split('/'))
    }

    fn excluded(name: &str) -> Mailfolder {
        let mut f = folder(name);
        f.excluded = true;
        f
    }

    fn names(folders: &[Mailfolder]) -> Vec<String> {
        folders.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn display_joins_with_slash() {
        assert_eq!(folder("dir01/child01").to_string(), "dir01/child01");
        assert_eq!(Mailfolder::inbox().to_string(), "INBOX");
    }

    #[test]
    fn store_path_rendering() {
        let f = folder("dir01/child01");
        assert_eq!(f.to_store_path('.'), "dir01.child01");
        assert_eq!(f.to_store_path('/'), "dir01/child01");
    }

    #[test]
    fn equality_ignores_exclusion() {
        assert_eq!(folder("a/b"), excluded("a/b"));
        assert_ne!(folder("a/b"), folder("a/c"));
    }

    #[test]
    fn merge_unions_both_sides() {
        let fs1 = [folder("folder01"), folder("folder02")];
        let fs2 = [folder("folder02"), folder("folder03")];
        let merged = merge_folders(&fs1, &fs2, false);
        assert_eq!(names(&merged), ["folder01", "folder02", "folder03"]);
    }

    #[test]
    fn merge_exclusion_is_contagious() {
        let fs1 = [folder("folder01"), folder("folder05")];
        let fs2 = [excluded("folder05")];

        let merged = merge_folders(&fs1, &fs2, false);
        assert_eq!(names(&merged), ["folder01", "folder05"]);
        assert!(merged[1].excluded);

        let merged = merge_folders(&fs1, &fs2, true);
        assert_eq!(names(&merged), ["folder01"]);
    }

    #[test]
    fn merge_empty_inputs() {
        assert!(merge_folders(&[], &[], false).is_empty());
        let fs1 = [excluded("folder04")];
        assert!(merge_folders(&fs1, &[], true).is_empty());
    }
}
