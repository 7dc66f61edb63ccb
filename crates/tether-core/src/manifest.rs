//! Process manifest (`Procfile`) parsing.
//!
//! The manifest is a YAML mapping from process type to command line:
//!
//! ```text
//! web: gunicorn app:app
//! worker: python worker.py
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Default manifest file name inside the deployment directory.
pub const MANIFEST_FILE: &str = "Procfile";

/// Errors raised while resolving a launch command from a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed manifest: {0}")]
    Malformed(String),

    #[error("cannot find command named {0}")]
    MissingProcessType(String),
}

/// Parsed manifest: process type to command string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    commands: HashMap<String, String>,
}

impl Manifest {
    pub fn parse(content: &[u8]) -> Result<Self, ManifestError> {
        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let commands: HashMap<String, String> = serde_yaml::from_slice(content)
            .map_err(|e| ManifestError::Malformed(e.to_string()))?;
        Ok(Self { commands })
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn command(&self, process_type: &str) -> Result<&str, ManifestError> {
        self.commands
            .get(process_type)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ManifestError::MissingProcessType(process_type.to_string()))
    }

    pub fn process_types(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }
}

/// Read the manifest in `app_dir` and return the command for `process_type`.
pub fn resolve_command(
    app_dir: &Path,
    manifest_file: &str,
    process_type: &str,
) -> Result<String, ManifestError> {
    let manifest = Manifest::load(&app_dir.join(manifest_file))?;
    manifest.command(process_type).map(str::to_string)
}
