//! Remote branch tracking over a local bare mirror.

use std::path::PathBuf;

use anyhow::Context;
use git2::{BranchType, ErrorCode, Repository};
use tracing::{debug, info, instrument, warn};

use super::Revision;

const REMOTE_NAME: &str = "origin";

/// Outcome of a successful update check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateCheck {
    /// Whether the local branch pointer moved (or was created).
    pub updated: bool,
    /// The local branch tip after the check.
    pub revision: Revision,
}

/// Tracks one branch of a remote repository in a local mirror.
///
/// The local branch only ever moves to the remote tip; no merge commits
/// are created.
pub struct RevisionTracker {
    repo: Repository,
    mirror_dir: PathBuf,
    remote_url: String,
    branch: String,
}

impl std::fmt::Debug for RevisionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevisionTracker")
            .field("mirror_dir", &self.mirror_dir)
            .field("remote_url", &self.remote_url)
            .field("branch", &self.branch)
            .finish()
    }
}

impl RevisionTracker {
    /// Open the mirror at `mirror_dir`, creating a bare repository with an
    /// `origin` remote if it does not exist yet.
    pub fn open(
        mirror_dir: impl Into<PathBuf>,
        remote_url: impl Into<String>,
        branch: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let mirror_dir = mirror_dir.into();
        let remote_url = remote_url.into();
        let branch = branch.into();

        let repo = if mirror_dir.exists() {
            let repo = Repository::open(&mirror_dir).with_context(|| {
                format!("Failed to open repository mirror: {}", mirror_dir.display())
            })?;
            Self::ensure_remote(&repo, &remote_url)?;
            repo
        } else {
            info!(
                path = %mirror_dir.display(),
                url = %remote_url,
                "initialising repository mirror"
            );
            let repo = Repository::init_bare(&mirror_dir).with_context(|| {
                format!(
                    "Failed to initialise repository mirror: {}",
                    mirror_dir.display()
                )
            })?;
            repo.remote(REMOTE_NAME, &remote_url)
                .with_context(|| format!("Failed to add remote {}", remote_url))?;
            repo
        };

        Ok(Self {
            repo,
            mirror_dir,
            remote_url,
            branch,
        })
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Current tip of the local tracked branch, if it exists.
    pub fn local_revision(&self) -> anyhow::Result<Option<Revision>> {
        match self.repo.find_branch(&self.branch, BranchType::Local) {
            Ok(branch) => Ok(branch.get().target().map(Revision::from)),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
            Err(err) => Err(err).context("Failed to look up local branch"),
        }
    }

    /// Fetch the tracked branch and move the local pointer to the remote tip.
    ///
    /// Reports `updated = false` without touching any ref when the local tip
    /// already equals the remote tip. Errors leave the local branch as it was.
    #[instrument(skip(self), fields(branch = %self.branch))]
    pub fn check_for_update(&self) -> anyhow::Result<UpdateCheck> {
        self.fetch()?;

        let remote_ref = format!("refs/remotes/{}/{}", REMOTE_NAME, self.branch);
        let remote_commit = self
            .repo
            .find_reference(&remote_ref)
            .with_context(|| format!("Remote branch not found: {}", remote_ref))?
            .peel_to_commit()
            .with_context(|| {
                format!("Remote branch does not point at a commit: {}", remote_ref)
            })?;
        let remote_tip = Revision::from(remote_commit.id());

        let mut local = match self.repo.find_branch(&self.branch, BranchType::Local) {
            Ok(branch) => branch,
            Err(err) if err.code() == ErrorCode::NotFound => {
                info!(revision = %remote_tip.short(), "creating local branch");
                let mut branch = self
                    .repo
                    .branch(&self.branch, &remote_commit, false)
                    .with_context(|| format!("Failed to create local branch {}", self.branch))?;
                branch
                    .set_upstream(Some(&format!("{}/{}", REMOTE_NAME, self.branch)))
                    .context("Failed to set upstream for local branch")?;
                return Ok(UpdateCheck {
                    updated: true,
                    revision: remote_tip,
                });
            }
            Err(err) => return Err(err).context("Failed to look up local branch"),
        };

        let local_tip = local
            .get()
            .target()
            .map(Revision::from)
            .ok_or_else(|| anyhow::anyhow!("Local branch {} has no target", self.branch))?;

        if local_tip == remote_tip {
            debug!(revision = %local_tip.short(), "branch is up to date");
            return Ok(UpdateCheck {
                updated: false,
                revision: local_tip,
            });
        }

        let fast_forward = self
            .repo
            .graph_descendant_of(remote_tip.oid(), local_tip.oid())
            .unwrap_or(false);
        if !fast_forward {
            warn!(
                from = %local_tip.short(),
                to = %remote_tip.short(),
                "remote history was rewritten, moving branch to remote tip"
            );
        }

        local
            .get_mut()
            .set_target(
                remote_tip.oid(),
                &format!("tether: fast-forward to {}", remote_tip),
            )
            .with_context(|| format!("Failed to move local branch {}", self.branch))?;

        info!(from = %local_tip.short(), to = %remote_tip.short(), "branch updated");
        Ok(UpdateCheck {
            updated: true,
            revision: remote_tip,
        })
    }

    fn fetch(&self) -> anyhow::Result<()> {
        let mut remote = self
            .repo
            .find_remote(REMOTE_NAME)
            .context("Remote origin is not configured")?;
        let refspec = format!(
            "+refs/heads/{branch}:refs/remotes/{remote}/{branch}",
            branch = self.branch,
            remote = REMOTE_NAME
        );
        remote
            .fetch(&[refspec.as_str()], None, None)
            .with_context(|| format!("Failed to fetch {} from {}", self.branch, self.remote_url))?;
        Ok(())
    }

    fn ensure_remote(repo: &Repository, remote_url: &str) -> anyhow::Result<()> {
        match repo.find_remote(REMOTE_NAME) {
            Ok(remote) => {
                if remote.url() != Some(remote_url) {
                    info!(
                        old = remote.url().unwrap_or("<invalid>"),
                        new = %remote_url,
                        "updating remote url"
                    );
                    repo.remote_set_url(REMOTE_NAME, remote_url)
                        .context("Failed to update remote url")?;
                }
                Ok(())
            }
            Err(err) if err.code() == ErrorCode::NotFound => {
                repo.remote(REMOTE_NAME, remote_url)
                    .with_context(|| format!("Failed to add remote {}", remote_url))?;
                Ok(())
            }
            Err(err) => Err(err).context("Failed to look up remote origin"),
        }
    }
}
