//! Project directory layout and config file discovery.

use std::path::{Path, PathBuf};

/// Config file name looked up in the project directory and the user's
/// config directory.
pub const CONFIG_FILE: &str = "tether.toml";

/// Directories derived from the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Local mirror of the remote repository.
    pub fn mirror_dir(&self) -> PathBuf {
        self.root.join("repo")
    }

    /// Materialized working tree the service runs from.
    pub fn app_dir(&self) -> PathBuf {
        self.root.join("app")
    }

    /// Isolated runtime environment.
    pub fn env_dir(&self) -> PathBuf {
        self.root.join("env")
    }
}

/// Pick the config file to load.
///
/// An explicit path always wins; otherwise `tether.toml` in the project
/// directory, then in the user's config directory. Only existing files are
/// returned for the implicit locations.
pub fn locate_config_file(
    explicit: Option<&Path>,
    project_dir: &Path,
    user_config_dir: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let project_file = project_dir.join(CONFIG_FILE);
    if project_file.is_file() {
        return Some(project_file);
    }
    user_config_dir
        .map(|dir| dir.join("tether").join(CONFIG_FILE))
        .filter(|path| path.is_file())
}
