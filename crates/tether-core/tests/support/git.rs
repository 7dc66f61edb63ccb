use std::fs;
use std::path::Path;

use git2::{IndexAddOption, Oid, Repository, Signature};
use tempfile::TempDir;

pub const BRANCH: &str = "master";

/// A working repository that plays the part of the remote.
pub struct Upstream {
    dir: TempDir,
    repo: Repository,
}

impl Upstream {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir should succeed");
        let repo = Repository::init(dir.path()).expect("init should succeed");
        Self { dir, repo }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn url(&self) -> String {
        self.dir.path().to_string_lossy().to_string()
    }

    pub fn write(&self, path: &str, content: &str) {
        let full = self.dir.path().join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).expect("create_dir_all should succeed");
        }
        fs::write(full, content).expect("write should succeed");
    }

    /// Stage everything and commit it on `BRANCH`.
    pub fn commit(&self, message: &str) -> Oid {
        let mut index = self.repo.index().unwrap();
        index
            .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
            .unwrap();
        index.update_all(["*"].iter(), None).unwrap();
        index.write().unwrap();
        let tree = self.repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("tether", "tether@example.com").unwrap();

        let refname = format!("refs/heads/{BRANCH}");
        let parent = self
            .repo
            .find_reference(&refname)
            .ok()
            .and_then(|r| r.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        self.repo
            .commit(Some(&refname), &sig, &sig, message, &tree, &parents)
            .unwrap()
    }

    /// Commit a Procfile with the given `web` command.
    pub fn commit_procfile(&self, web: &str, message: &str) -> Oid {
        self.write("Procfile", &format!("web: {web}\n"));
        self.commit(message)
    }
}
