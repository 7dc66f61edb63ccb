//! Supervisor state machine and restart policy.
//!
//! Transitions are pure functions over [`SupervisorState`] so the lifecycle
//! can be exercised without spawning processes. The actor in the parent
//! module applies them after performing the matching side effects.

use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use super::SupervisorError;

/// Default number of automatic restarts before a crash loop is fatal.
pub const DEFAULT_MAX_RESTARTS: u32 = 3;

/// Lifecycle of the supervisor actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// No managed process.
    Idle,
    /// A process is alive and being waited on.
    Running,
    /// Tear-down in progress; no further commands are accepted.
    Stopping,
    /// Terminal.
    Stopped,
}

impl SupervisorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }

    /// A launch request arrived.
    pub fn on_launch(self) -> Result<Self, SupervisorError> {
        match self {
            Self::Idle | Self::Running => Ok(Self::Running),
            Self::Stopping | Self::Stopped => Err(SupervisorError::Closed),
        }
    }

    /// The managed process exited and `action` was decided for it.
    pub fn on_exit(self, action: ExitAction) -> Self {
        match action {
            ExitAction::Idle => Self::Idle,
            ExitAction::Restart { .. } => Self::Running,
            ExitAction::Fatal { .. } => Self::Stopped,
        }
    }

    /// A stop request arrived.
    pub fn on_stop(self) -> Self {
        Self::Stopping
    }

    /// Tear-down finished.
    pub fn on_stopped(self) -> Self {
        Self::Stopped
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// How a managed process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    Failed(i32),
    /// Terminated by a signal the supervisor did not send.
    Signaled(i32),
}

impl ExitOutcome {
    pub fn is_failure(self) -> bool {
        !matches!(self, Self::Success)
    }
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(0), _) => Self::Success,
            (Some(code), _) => Self::Failed(code),
            (None, Some(signal)) => Self::Signaled(signal),
            (None, None) => Self::Failed(-1),
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "exit status 0"),
            Self::Failed(code) => write!(f, "exit status {}", code),
            Self::Signaled(signal) => write!(f, "signal {}", signal),
        }
    }
}

/// What to do after the managed process exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    /// Clean exit; wait for the next launch.
    Idle,
    /// Re-launch the same request.
    Restart { attempt: u32 },
    /// Restart budget exhausted.
    Fatal { restarts: u32 },
}

/// Bounded crash-retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_restarts: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: DEFAULT_MAX_RESTARTS,
        }
    }
}

impl RestartPolicy {
    pub fn new(max_restarts: u32) -> Self {
        Self { max_restarts }
    }

    /// Decide the follow-up for an exit, given the consecutive failures so far.
    pub fn decide(&self, outcome: ExitOutcome, failures: u32) -> ExitAction {
        if !outcome.is_failure() {
            ExitAction::Idle
        } else if failures < self.max_restarts {
            ExitAction::Restart {
                attempt: failures + 1,
            }
        } else {
            ExitAction::Fatal { restarts: failures }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_from_idle_and_running_enters_running() {
        assert_eq!(
            SupervisorState::Idle.on_launch().unwrap(),
            SupervisorState::Running
        );
        assert_eq!(
            SupervisorState::Running.on_launch().unwrap(),
            SupervisorState::Running
        );
    }

    #[test]
    fn launch_after_stop_is_rejected() {
        assert!(matches!(
            SupervisorState::Stopping.on_launch(),
            Err(SupervisorError::Closed)
        ));
        assert!(matches!(
            SupervisorState::Stopped.on_launch(),
            Err(SupervisorError::Closed)
        ));
    }

    #[test]
    fn stop_is_terminal_from_any_state() {
        for state in [
            SupervisorState::Idle,
            SupervisorState::Running,
            SupervisorState::Stopping,
        ] {
            let stopping = state.on_stop();
            assert_eq!(stopping, SupervisorState::Stopping);
            assert!(stopping.is_terminal());
            assert_eq!(stopping.on_stopped(), SupervisorState::Stopped);
        }
    }

    #[test]
    fn clean_exit_goes_idle() {
        let policy = RestartPolicy::default();
        let action = policy.decide(ExitOutcome::Success, 2);
        assert_eq!(action, ExitAction::Idle);
        assert_eq!(
            SupervisorState::Running.on_exit(action),
            SupervisorState::Idle
        );
    }

    #[test]
    fn failures_restart_three_times_then_fatal() {
        let policy = RestartPolicy::default();
        let mut failures = 0;
        let mut restarts = 0;
        loop {
            match policy.decide(ExitOutcome::Failed(1), failures) {
                ExitAction::Restart { attempt } => {
                    restarts += 1;
                    failures = attempt;
                }
                ExitAction::Fatal { restarts: reported } => {
                    assert_eq!(reported, 3);
                    break;
                }
                ExitAction::Idle => panic!("failure must not go idle"),
            }
        }
        assert_eq!(restarts, 3);
        assert_eq!(
            SupervisorState::Running.on_exit(ExitAction::Fatal { restarts: 3 }),
            SupervisorState::Stopped
        );
    }

    #[test]
    fn external_signal_counts_as_failure() {
        let policy = RestartPolicy::default();
        assert_eq!(
            policy.decide(ExitOutcome::Signaled(9), 0),
            ExitAction::Restart { attempt: 1 }
        );
    }

    #[test]
    fn zero_restart_budget_is_immediately_fatal() {
        let policy = RestartPolicy::new(0);
        assert_eq!(
            policy.decide(ExitOutcome::Failed(2), 0),
            ExitAction::Fatal { restarts: 0 }
        );
    }

    #[test]
    fn exit_outcome_from_status() {
        assert_eq!(
            ExitOutcome::from(ExitStatus::from_raw(0)),
            ExitOutcome::Success
        );
        // Raw wait status: exit code lives in the second byte.
        assert_eq!(
            ExitOutcome::from(ExitStatus::from_raw(1 << 8)),
            ExitOutcome::Failed(1)
        );
        assert_eq!(
            ExitOutcome::from(ExitStatus::from_raw(9)),
            ExitOutcome::Signaled(9)
        );
    }
}
