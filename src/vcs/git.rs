use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use git2::Repository;
use tracing::debug;

use super::{VersionControlSystem, WorkingTree};
use crate::analyzer::relative_path;
use crate::models::{VcsInfo, VcsType};

/// Git working trees, read with libgit2.
pub struct GitVcs;

impl VersionControlSystem for GitVcs {
    fn for_directory(&self, path: &Path) -> Option<Box<dyn WorkingTree>> {
        let repo = match Repository::discover(path) {
            Ok(repo) => repo,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no git repository found");
                return None;
            }
        };
        // Bare repositories have no working tree to analyze.
        let workdir = repo.workdir()?;
        let workdir = workdir.canonicalize().unwrap_or_else(|_| workdir.to_path_buf());
        let directory = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        Some(Box::new(GitWorkingTree {
            repo,
            workdir,
            directory,
        }))
    }
}

pub struct GitWorkingTree {
    repo: Repository,
    workdir: PathBuf,
    directory: PathBuf,
}

impl GitWorkingTree {
    fn remote_url(&self) -> String {
        let named = |name: &str| {
            self.repo
                .find_remote(name)
                .ok()
                .and_then(|remote| remote.url().map(str::to_string))
        };

        named("origin")
            .or_else(|| {
                let remotes = self.repo.remotes().ok()?;
                let first = remotes.iter().flatten().next()?.to_string();
                named(&first)
            })
            .unwrap_or_default()
    }

    fn head_revision(&self) -> String {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
            .map(|commit| commit.id().to_string())
            .unwrap_or_default()
    }

    fn collect_submodules(&self, prefix: &str, nested: &mut BTreeMap<String, VcsInfo>) {
        let submodules = match self.repo.submodules() {
            Ok(submodules) => submodules,
            Err(e) => {
                debug!(error = %e, "failed to list submodules");
                return;
            }
        };

        for submodule in submodules {
            let path = format!("{}{}", prefix, relative_path(Path::new(""), submodule.path()));
            let revision = submodule
                .workdir_id()
                .or_else(|| submodule.head_id())
                .map(|oid| oid.to_string())
                .unwrap_or_default();
            nested.insert(
                path.clone(),
                VcsInfo {
                    vcs_type: VcsType::Git,
                    url: submodule.url().unwrap_or_default().to_string(),
                    revision,
                    path: String::new(),
                },
            );

            // Uninitialized submodules cannot be opened and have no children.
            if let Ok(repo) = submodule.open() {
                let Some(workdir) = repo.workdir().map(Path::to_path_buf) else {
                    continue;
                };
                let child = GitWorkingTree {
                    repo,
                    directory: workdir.clone(),
                    workdir,
                };
                child.collect_submodules(&format!("{}/", path), nested);
            }
        }
    }
}

impl WorkingTree for GitWorkingTree {
    fn info(&self) -> VcsInfo {
        VcsInfo {
            vcs_type: VcsType::Git,
            url: self.remote_url(),
            revision: self.head_revision(),
            path: relative_path(&self.workdir, &self.directory),
        }
    }

    fn nested(&self) -> BTreeMap<String, VcsInfo> {
        let mut nested = BTreeMap::new();
        self.collect_submodules("", &mut nested);
        nested
    }

    fn root_path(&self) -> PathBuf {
        self.workdir.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use tempfile::TempDir;

    fn commit_all(repo: &Repository) -> String {
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("tester", "tester@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_git_working_tree_info() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        repo.remote("origin", "https://example.com/acme/tools.git").unwrap();
        std::fs::create_dir_all(dir.path().join("services/api")).unwrap();
        std::fs::write(dir.path().join("services/api/pom.xml"), "<project/>").unwrap();
        let revision = commit_all(&repo);

        let tree = GitVcs.for_directory(&dir.path().join("services/api")).unwrap();
        let info = tree.info();
        assert_eq!(info.vcs_type, VcsType::Git);
        assert_eq!(info.url, "https://example.com/acme/tools.git");
        assert_eq!(info.revision, revision);
        assert_eq!(info.path, "services/api");
        assert_eq!(tree.root_path(), dir.path().canonicalize().unwrap());
        assert!(tree.nested().is_empty());
    }

    #[test]
    fn test_directory_outside_git() {
        let dir = TempDir::new().unwrap();
        // Repository::discover walks upward; only assert when nothing above is a repo.
        if Repository::discover(dir.path()).is_err() {
            assert!(GitVcs.for_directory(dir.path()).is_none());
        }
    }
}
