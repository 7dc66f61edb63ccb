//! Checkout of a revision's tree into the deployment directory.

use std::path::{Path, PathBuf};

use anyhow::Context;
use git2::Repository;
use git2::build::CheckoutBuilder;
use tracing::info;

use super::Revision;

/// Writes the tree of a revision into a fixed target directory.
///
/// Checkout is forced: local modifications and untracked files in the
/// target directory are discarded rather than merged.
#[derive(Debug, Clone)]
pub struct WorkingTreeMaterializer {
    target_dir: PathBuf,
}

impl WorkingTreeMaterializer {
    pub fn new(target_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_dir: target_dir.into(),
        }
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Replace the target directory's contents with the tree of `revision`.
    pub fn materialize(&self, repo: &Repository, revision: &Revision) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.target_dir).with_context(|| {
            format!(
                "Failed to create deployment directory: {}",
                self.target_dir.display()
            )
        })?;

        let commit = repo
            .find_commit(revision.oid())
            .with_context(|| format!("Revision not found in mirror: {}", revision))?;
        let tree = commit
            .tree()
            .with_context(|| format!("Failed to read tree of {}", revision))?;

        let mut checkout = CheckoutBuilder::new();
        checkout
            .force()
            .recreate_missing(true)
            .remove_untracked(true)
            .update_index(false)
            .target_dir(&self.target_dir);

        repo.checkout_tree(tree.as_object(), Some(&mut checkout))
            .with_context(|| {
                format!(
                    "Failed to check out {} into {}",
                    revision,
                    self.target_dir.display()
                )
            })?;

        info!(
            revision = %revision.short(),
            path = %self.target_dir.display(),
            "working tree materialized"
        );
        Ok(())
    }
}
