//! Tether Core Library
//!
//! Continuously deploys a single service from a git branch: detects new
//! revisions, materializes them on disk and supervises the resulting
//! process, restarting it on redeploy or crash.

pub mod config;
pub mod git;
pub mod manifest;
pub mod orchestrator;
pub mod runtime;
pub mod scheduler;
pub mod supervisor;
