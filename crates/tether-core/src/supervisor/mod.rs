//! Process supervisor actor.
//!
//! A single task owns the managed process and serializes everything that
//! can happen to it: launch requests and stop requests arrive on one
//! command queue, exit notifications come from waiting on the child, and
//! both are consumed in arrival order by the same loop. Nothing outside the
//! actor ever touches the OS process handle.
//!
//! Crash handling follows [`RestartPolicy`]: a failing process is restarted
//! with the same request a bounded number of times, after which the actor
//! ends with [`SupervisorError::CrashLoop`].

mod process;
mod state;

use std::io;
use std::process::ExitStatus;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::runtime::LaunchRequest;

use process::ManagedProcess;
pub use state::{
    DEFAULT_MAX_RESTARTS, ExitAction, ExitOutcome, RestartPolicy, SupervisorState,
};

const COMMAND_QUEUE_DEPTH: usize = 8;

/// Errors that end the supervisor or reject a command.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("process failed after {restarts} restarts (last {outcome})")]
    CrashLoop { restarts: u32, outcome: ExitOutcome },

    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to wait for process: {0}")]
    Wait(#[source] io::Error),

    #[error("failed to kill process group {pgid}: {source}")]
    Kill {
        pgid: i32,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("supervisor is no longer accepting commands")]
    Closed,
}

/// Messages consumed by the supervisor loop.
#[derive(Debug)]
pub enum SupervisorCommand {
    Launch(LaunchRequest),
    Stop(oneshot::Sender<()>),
}

/// Snapshot of the supervisor published after every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub state: SupervisorState,
    pub failures: u32,
    pub pid: Option<u32>,
    /// Processes started so far, restarts included.
    pub launches: u64,
    pub command: Option<String>,
}

impl Default for SupervisorStatus {
    fn default() -> Self {
        Self {
            state: SupervisorState::Idle,
            failures: 0,
            pid: None,
            launches: 0,
            command: None,
        }
    }
}

/// Cloneable sender side of the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    commands: mpsc::Sender<SupervisorCommand>,
    status: watch::Receiver<SupervisorStatus>,
}

impl SupervisorHandle {
    /// Queue a launch request. Returns once the actor has accepted it, not
    /// once the new process is healthy.
    pub async fn launch(&self, request: LaunchRequest) -> Result<(), SupervisorError> {
        self.commands
            .send(SupervisorCommand::Launch(request))
            .await
            .map_err(|_| SupervisorError::Closed)
    }

    /// Stop the supervisor and wait until it has torn everything down.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(SupervisorCommand::Stop(ack))
            .await
            .map_err(|_| SupervisorError::Closed)?;
        done.await.map_err(|_| SupervisorError::Closed)
    }

    pub fn status(&self) -> SupervisorStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.clone()
    }
}

enum Event {
    Command(Option<SupervisorCommand>),
    Exited(io::Result<ExitStatus>),
}

/// The actor owning the managed process.
pub struct Supervisor {
    commands: mpsc::Receiver<SupervisorCommand>,
    status: watch::Sender<SupervisorStatus>,
    policy: RestartPolicy,
    state: SupervisorState,
    current: Option<ManagedProcess>,
    launches: u64,
}

impl Supervisor {
    pub fn new(policy: RestartPolicy) -> (Self, SupervisorHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (status_tx, status_rx) = watch::channel(SupervisorStatus::default());
        let supervisor = Self {
            commands: command_rx,
            status: status_tx,
            policy,
            state: SupervisorState::Idle,
            current: None,
            launches: 0,
        };
        let handle = SupervisorHandle {
            commands: command_tx,
            status: status_rx,
        };
        (supervisor, handle)
    }

    /// Start the actor on the current tokio runtime.
    ///
    /// The returned task resolves when the supervisor stops; an `Err` is a
    /// fatal condition the daemon must surface.
    pub fn spawn(
        policy: RestartPolicy,
    ) -> (SupervisorHandle, JoinHandle<Result<(), SupervisorError>>) {
        let (supervisor, handle) = Self::new(policy);
        (handle, tokio::spawn(supervisor.run()))
    }

    pub async fn run(mut self) -> Result<(), SupervisorError> {
        let result = self.event_loop().await;
        if let Err(err) = &result {
            error!(error = %err, "supervisor failed");
            if let Some(process) = self.current.as_mut()
                && let Err(kill_err) = process.terminate().await
            {
                warn!(error = %kill_err, "failed to clean up process group");
            }
            self.state = self.state.on_stop().on_stopped();
            self.publish();
        }
        result
    }

    async fn event_loop(&mut self) -> Result<(), SupervisorError> {
        loop {
            let event = tokio::select! {
                command = self.commands.recv() => Event::Command(command),
                status = wait_current(&mut self.current) => Event::Exited(status),
            };

            match event {
                Event::Command(Some(SupervisorCommand::Launch(request))) => {
                    self.launch(request).await?;
                }
                Event::Command(Some(SupervisorCommand::Stop(ack))) => {
                    self.stop().await?;
                    let _ = ack.send(());
                    return Ok(());
                }
                Event::Command(None) => {
                    info!("all supervisor handles dropped");
                    self.stop().await?;
                    return Ok(());
                }
                Event::Exited(status) => self.handle_exit(status)?,
            }
        }
    }

    async fn launch(&mut self, request: LaunchRequest) -> Result<(), SupervisorError> {
        let next = self.state.on_launch()?;

        if let Some(mut previous) = self.current.take() {
            info!(pid = ?previous.pid(), "killing existing process group");
            previous.terminate().await?;
        }

        let mut process = ManagedProcess::new(request);
        info!(command = %process.request().display_command(), "starting server command");
        process.start()?;

        self.current = Some(process);
        self.state = next;
        self.launches += 1;
        self.publish();
        Ok(())
    }

    fn handle_exit(&mut self, status: io::Result<ExitStatus>) -> Result<(), SupervisorError> {
        let status = status.map_err(SupervisorError::Wait)?;
        let outcome = ExitOutcome::from(status);
        let Some(process) = self.current.as_mut() else {
            return Ok(());
        };

        let action = self.policy.decide(outcome, process.failures());
        self.state = self.state.on_exit(action);

        match action {
            ExitAction::Idle => {
                info!(%outcome, "process exited");
            }
            ExitAction::Restart { attempt } => {
                process.record_failure();
                warn!(
                    %outcome,
                    attempt,
                    max = self.policy.max_restarts,
                    "process failed, restarting"
                );
                process.start()?;
                self.launches += 1;
            }
            ExitAction::Fatal { restarts } => {
                return Err(SupervisorError::CrashLoop { restarts, outcome });
            }
        }

        self.publish();
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SupervisorError> {
        info!("stopping supervisor, killing all subprocesses");
        self.state = self.state.on_stop();
        self.publish();

        if let Some(process) = self.current.as_mut() {
            process.terminate().await?;
        }

        self.state = self.state.on_stopped();
        self.publish();
        Ok(())
    }

    fn publish(&self) {
        let current = self.current.as_ref();
        self.status.send_replace(SupervisorStatus {
            state: self.state,
            failures: current.map(ManagedProcess::failures).unwrap_or(0),
            pid: current.and_then(ManagedProcess::pid),
            launches: self.launches,
            command: current.map(|p| p.request().display_command()),
        });
    }
}

async fn wait_current(current: &mut Option<ManagedProcess>) -> io::Result<ExitStatus> {
    match current {
        Some(process) => process.wait().await,
        None => std::future::pending().await,
    }
}
