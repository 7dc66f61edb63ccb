//! Runtime environments and launch plan resolution.
//!
//! This module turns a manifest command into a concrete [`LaunchRequest`]
//! that the supervisor can start.
//!
//! ## Design
//!
//! - `RuntimeKind` selects how the service's isolated environment is built
//! - `RuntimeEnvironment` provisions that environment once, on first deploy
//! - `LaunchRequest` describes exactly what to start: program, args,
//!   working directory and environment overrides
//!
//! Every launch runs inside a `bash -c` wrapper so environment activation
//! and dependency installation happen in the same process group as the
//! service itself.
//!
//! | RuntimeKind  | Provisioning          | Script prologue                         |
//! |--------------|-----------------------|-----------------------------------------|
//! | `virtualenv` | `virtualenv <env>`    | activate env, install requirements.txt  |
//! | `shell`      | none                  | none                                    |

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Environment variable carrying the assigned listen port.
pub const PORT_ENV: &str = "PORT";

/// How the service's runtime environment is provisioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Python virtualenv under the project's `env/` directory
    #[default]
    Virtualenv,
    /// Plain shell, no isolated environment
    Shell,
}

impl std::str::FromStr for RuntimeKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "virtualenv" => Ok(Self::Virtualenv),
            "shell" => Ok(Self::Shell),
            other => anyhow::bail!("Unknown runtime '{}' (expected virtualenv or shell)", other),
        }
    }
}

/// Immutable description of how to start the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl LaunchRequest {
    /// A request that runs `script` through `bash -c`.
    pub fn shell(script: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: "bash".to_string(),
            args: vec!["-c".to_string(), script.into()],
            working_dir: working_dir.into(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Human-readable command line for log output.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// An isolated runtime environment rooted at `env_dir`.
#[derive(Debug, Clone)]
pub struct RuntimeEnvironment {
    kind: RuntimeKind,
    env_dir: PathBuf,
}

impl RuntimeEnvironment {
    pub fn new(kind: RuntimeKind, env_dir: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            env_dir: env_dir.into(),
        }
    }

    /// Create the environment if it does not exist yet.
    pub fn provision(&self) -> anyhow::Result<()> {
        match self.kind {
            RuntimeKind::Shell => Ok(()),
            RuntimeKind::Virtualenv => {
                if self.env_dir.exists() {
                    return Ok(());
                }
                info!(path = %self.env_dir.display(), "creating virtualenv");
                let output = Command::new("virtualenv")
                    .arg(&self.env_dir)
                    .output()
                    .context("Failed to invoke virtualenv")?;
                if !output.status.success() {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    anyhow::bail!(
                        "Error while creating virtualenv: {}{}",
                        stdout.trim(),
                        stderr.trim()
                    );
                }
                Ok(())
            }
        }
    }

    /// Build the launch request for `command` in `app_dir`.
    pub fn launch_request(&self, app_dir: &Path, port: u16, command: &str) -> LaunchRequest {
        let app = shell_quote(&app_dir.to_string_lossy());
        let script = match self.kind {
            RuntimeKind::Virtualenv => {
                let activate = self.env_dir.join("bin").join("activate");
                let activate = shell_quote(&activate.to_string_lossy());
                format!(
                    "source {activate}\n\
                     cd {app}\n\
                     if [ -f requirements.txt ]; then pip install -r requirements.txt; fi\n\
                     {command}\n"
                )
            }
            RuntimeKind::Shell => format!("cd {app}\n{command}\n"),
        };
        LaunchRequest::shell(script, app_dir).with_env(PORT_ENV, port.to_string())
    }
}

/// Quote a string for safe interpolation into a POSIX shell script.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}
