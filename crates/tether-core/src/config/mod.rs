//! Daemon configuration
//!
//! Values are layered, later layers winning:
//! - Built-in defaults
//! - `tether.toml` (explicit `--config`, project directory, or user config dir)
//! - Command-line flags

pub mod parser;
pub mod paths;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::manifest::MANIFEST_FILE;
use crate::runtime::RuntimeKind;
use crate::supervisor::DEFAULT_MAX_RESTARTS;

pub use parser::{parse_tether_toml, parse_tether_toml_str};
pub use paths::{CONFIG_FILE, ProjectLayout, locate_config_file};

pub const DEFAULT_BRANCH: &str = "master";
pub const DEFAULT_PORT: u16 = 5005;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_PROCESS_TYPE: &str = "web";

/// A partial configuration layer, as read from a file or the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    pub git_repo: Option<String>,
    pub project_dir: Option<PathBuf>,
    pub branch: Option<String>,
    pub port: Option<u16>,
    pub poll_interval_secs: Option<u64>,
    pub process_type: Option<String>,
    pub runtime: Option<RuntimeKind>,
    pub max_restarts: Option<u32>,
    pub manifest: Option<String>,
}

impl ConfigOverrides {
    /// Overlay `other` on top of `self`.
    pub fn merge(self, other: ConfigOverrides) -> ConfigOverrides {
        ConfigOverrides {
            git_repo: other.git_repo.or(self.git_repo),
            project_dir: other.project_dir.or(self.project_dir),
            branch: other.branch.or(self.branch),
            port: other.port.or(self.port),
            poll_interval_secs: other.poll_interval_secs.or(self.poll_interval_secs),
            process_type: other.process_type.or(self.process_type),
            runtime: other.runtime.or(self.runtime),
            max_restarts: other.max_restarts.or(self.max_restarts),
            manifest: other.manifest.or(self.manifest),
        }
    }
}

/// Fully resolved daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub git_repo: String,
    pub project_dir: PathBuf,
    pub branch: String,
    pub port: u16,
    pub poll_interval: Duration,
    pub process_type: String,
    pub runtime: RuntimeKind,
    pub max_restarts: u32,
    pub manifest: String,
}

impl DaemonConfig {
    /// Apply defaults to a merged override set and validate the result.
    pub fn from_overrides(overrides: ConfigOverrides) -> anyhow::Result<Self> {
        let config = Self {
            git_repo: overrides.git_repo.unwrap_or_default(),
            project_dir: overrides.project_dir.unwrap_or_else(|| PathBuf::from(".")),
            branch: overrides
                .branch
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            port: overrides.port.unwrap_or(DEFAULT_PORT),
            poll_interval: Duration::from_secs(
                overrides
                    .poll_interval_secs
                    .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            ),
            process_type: overrides
                .process_type
                .unwrap_or_else(|| DEFAULT_PROCESS_TYPE.to_string()),
            runtime: overrides.runtime.unwrap_or_default(),
            max_restarts: overrides.max_restarts.unwrap_or(DEFAULT_MAX_RESTARTS),
            manifest: overrides
                .manifest
                .unwrap_or_else(|| MANIFEST_FILE.to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration: defaults, then the discovered config file, then `cli`.
    pub fn load(explicit_file: Option<&Path>, cli: ConfigOverrides) -> anyhow::Result<Self> {
        let project_dir = cli
            .project_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let user_config_dir = dirs::config_dir();
        let file = locate_config_file(explicit_file, &project_dir, user_config_dir.as_deref());

        let base = match file {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config file");
                parse_tether_toml(&path)?
            }
            None => ConfigOverrides::default(),
        };

        Self::from_overrides(base.merge(cli))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.git_repo.trim().is_empty() {
            anyhow::bail!("A remote git repository is required (--git-repo or git_repo)");
        }
        if self.branch.trim().is_empty() {
            anyhow::bail!("Branch name must not be empty");
        }
        if self.port == 0 {
            anyhow::bail!("Port must be between 1 and 65535");
        }
        if self.poll_interval.is_zero() {
            anyhow::bail!("Poll interval must be at least one second");
        }
        if self.process_type.trim().is_empty() {
            anyhow::bail!("Process type must not be empty");
        }
        Ok(())
    }

    pub fn layout(&self) -> ProjectLayout {
        ProjectLayout::new(&self.project_dir)
    }
}
