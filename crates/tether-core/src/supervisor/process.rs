//! OS process-group handling for the managed service.
//!
//! Each launch becomes the leader of a fresh process group, so the whole
//! tree (the `bash -c` wrapper plus whatever it started) can be killed with
//! one `killpg`.

use std::io;
use std::process::{ExitStatus, Stdio};

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::debug;

use super::SupervisorError;
use crate::runtime::LaunchRequest;

/// The single process the supervisor owns.
///
/// Replaced, never reused, when a new launch request arrives.
#[derive(Debug)]
pub(crate) struct ManagedProcess {
    request: LaunchRequest,
    child: Option<Child>,
    group: Option<Pid>,
    failures: u32,
}

impl ManagedProcess {
    pub(crate) fn new(request: LaunchRequest) -> Self {
        Self {
            request,
            child: None,
            group: None,
            failures: 0,
        }
    }

    pub(crate) fn request(&self) -> &LaunchRequest {
        &self.request
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }

    pub(crate) fn record_failure(&mut self) {
        self.failures += 1;
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Spawn the request as a new process group leader.
    ///
    /// Any members left over from a previous run of this request are killed
    /// first.
    pub(crate) fn start(&mut self) -> Result<(), SupervisorError> {
        if let Some(group) = self.take_group() {
            kill_group(group)?;
        }

        let mut command = Command::new(&self.request.program);
        command
            .args(&self.request.args)
            .current_dir(&self.request.working_dir)
            .envs(&self.request.env)
            .stdin(Stdio::null())
            .process_group(0)
            .kill_on_drop(true);

        let child = command.spawn().map_err(|source| SupervisorError::Spawn {
            command: self.request.display_command(),
            source,
        })?;
        let pid = child.id().ok_or_else(|| SupervisorError::Spawn {
            command: self.request.display_command(),
            source: io::Error::other("process exited before its pid was read"),
        })?;
        debug!(pid, "process group started");

        self.group = Some(Pid::from_raw(pid as i32));
        self.child = Some(child);
        Ok(())
    }

    /// Wait for the current child to exit. Pends forever when no child is
    /// running. Cancel safe.
    pub(crate) async fn wait(&mut self) -> io::Result<ExitStatus> {
        let Some(child) = self.child.as_mut() else {
            return std::future::pending().await;
        };
        let status = child.wait().await;
        self.child = None;
        if let Some(group) = self.group
            && !group_alive(group)
        {
            self.group = None;
        }
        status
    }

    /// Kill the whole process group and reap the direct child.
    pub(crate) async fn terminate(&mut self) -> Result<(), SupervisorError> {
        if let Some(group) = self.take_group() {
            kill_group(group)?;
        }
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            child.wait().await.map_err(SupervisorError::Wait)?;
        }
        Ok(())
    }

    /// The recorded group, if it may still have members.
    ///
    /// While the leader is unreaped its pid cannot be reused, so the group
    /// is always safe to signal. Once the leader is gone the group is only
    /// returned while the liveness probe still finds members.
    fn take_group(&mut self) -> Option<Pid> {
        let group = self.group.take()?;
        if self.child.is_none() && !group_alive(group) {
            debug!(pgid = group.as_raw(), "process group already empty");
            return None;
        }
        Some(group)
    }
}

/// Send SIGKILL to every member of `group`. An empty group is not an error.
fn kill_group(group: Pid) -> Result<(), SupervisorError> {
    match killpg(group, Signal::SIGKILL) {
        Ok(()) => {
            debug!(pgid = group.as_raw(), "process group killed");
            Ok(())
        }
        Err(Errno::ESRCH) => Ok(()),
        Err(source) => Err(SupervisorError::Kill {
            pgid: group.as_raw(),
            source,
        }),
    }
}

fn group_alive(group: Pid) -> bool {
    killpg(group, None) != Err(Errno::ESRCH)
}
