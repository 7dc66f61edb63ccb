//! Git operations for tracking a remote branch and materializing revisions.
//!
//! This module provides the two git-facing halves of a deploy:
//! - Tracking the configured branch of a remote in a local bare mirror
//! - Checking out a resolved revision into the deployment directory

mod materialize;
mod revision;
mod tracker;

pub use materialize::WorkingTreeMaterializer;
pub use revision::Revision;
pub use tracker::{RevisionTracker, UpdateCheck};
