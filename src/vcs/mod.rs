//! Version-control metadata of the analyzed tree.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::models::{VcsContext, VcsInfo};

pub mod git;

pub trait VersionControlSystem: Send + Sync {
    /// The working tree containing `path`, if it is under version control.
    fn for_directory(&self, path: &Path) -> Option<Box<dyn WorkingTree>>;
}

pub trait WorkingTree {
    fn info(&self) -> VcsInfo;

    /// Repositories nested in this working tree, keyed by their path
    /// relative to [`WorkingTree::root_path`].
    fn nested(&self) -> BTreeMap<String, VcsInfo>;

    fn root_path(&self) -> PathBuf;
}

/// For callers that do not want version-control lookups.
pub struct NoVcs;

impl VersionControlSystem for NoVcs {
    fn for_directory(&self, _path: &Path) -> Option<Box<dyn WorkingTree>> {
        None
    }
}

/// Describe the repository `root` lives in.
///
/// Nested repositories are kept only if they resolve to `root` or a path
/// below it. A root outside version control yields the empty context.
pub fn resolve_context(root: &Path, vcs: &dyn VersionControlSystem) -> VcsContext {
    let Some(tree) = vcs.for_directory(root) else {
        debug!(root = %root.display(), "not under version control");
        return VcsContext::default();
    };

    let tree_root = tree.root_path();
    let root = resolve(root);
    let nested_repositories = tree
        .nested()
        .into_iter()
        .filter(|(path, _)| {
            let inside = resolve(&tree_root.join(path)).starts_with(&root);
            if !inside {
                debug!(path = %path, "nested repository is outside the project root");
            }
            inside
        })
        .collect();

    VcsContext {
        vcs: tree.info(),
        nested_repositories,
    }
}

/// Canonical form of `path`, or its lexical normalization if it does not exist.
fn resolve(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| normalize(path))
}

fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
