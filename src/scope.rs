//! Scope partitioning: a record lives either in the user-wide global store
//! or in a per-project store found by walking up from the working directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directories whose presence marks a project root, in precedence order.
pub const PROJECT_MARKERS: &[&str] = &[".mnemon", ".git"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Global,
    Project,
}

impl Scope {
    /// Sort rank: project-scoped items come first everywhere they are
    /// ordered against global ones.
    pub fn rank(self) -> u8 {
        match self {
            Scope::Project => 0,
            Scope::Global => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Project => "project",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Walk parent directories from `start` until a project marker is found.
/// Returns the directory containing the marker, or `None` at the filesystem
/// root. Terminates in bounded steps: `Path::parent` yields `None` at the
/// root.
pub fn resolve_project_root(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(d) = dir {
        for marker in PROJECT_MARKERS {
            if d.join(marker).is_dir() {
                return Some(d.to_path_buf());
            }
        }
        dir = d.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_rank_precedes_global() {
        assert!(Scope::Project.rank() < Scope::Global.rank());
    }

    #[test]
    fn finds_marker_in_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("repo");
        let nested = root.join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();

        assert_eq!(resolve_project_root(&nested), Some(root.clone()));
        assert_eq!(resolve_project_root(&root), Some(root));
    }

    #[test]
    fn mnemon_marker_wins_over_git_in_same_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("repo");
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::create_dir_all(root.join(".mnemon")).unwrap();
        assert_eq!(resolve_project_root(&root), Some(root));
    }

    #[test]
    fn no_marker_returns_none() {
        let tmp = tempfile::tempdir().unwrap();
        let plain = tmp.path().join("plain");
        std::fs::create_dir_all(&plain).unwrap();
        // the walk continues above the tempdir; a marker in "/" or "/tmp"
        // would be a test-environment artifact, so only assert when clean
        if resolve_project_root(tmp.path()).is_none() {
            assert_eq!(resolve_project_root(&plain), None);
        }
    }

    #[test]
    fn marker_file_does_not_count() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("repo");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join(".git"), "gitdir: elsewhere").unwrap();
        // a plain file named .git is not a marker directory
        assert_ne!(resolve_project_root(&root), Some(root));
    }
}
