use std::path::Path;
use std::time::Duration;

use tether_core::supervisor::{SupervisorHandle, SupervisorStatus};

pub const TIMEOUT: Duration = Duration::from_secs(15);

/// Whether `pid` names a live (non-zombie) process.
pub fn process_alive(pid: i32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // The state field follows the parenthesised command name.
    match stat.rsplit_once(')') {
        Some((_, rest)) => !matches!(rest.trim_start().chars().next(), Some('Z') | Some('X')),
        None => false,
    }
}

/// Poll `check` until it returns true or the timeout elapses.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check()
}

/// Wait until the supervisor publishes a status matching `predicate`.
pub async fn wait_for_status(
    handle: &SupervisorHandle,
    predicate: impl FnMut(&SupervisorStatus) -> bool,
) -> SupervisorStatus {
    let mut rx = handle.subscribe();
    let status = tokio::time::timeout(TIMEOUT, rx.wait_for(predicate))
        .await
        .expect("timed out waiting for supervisor status")
        .expect("supervisor stopped publishing");
    status.clone()
}

/// Wait for `path` to exist and return its trimmed contents.
pub async fn read_when_ready(path: &Path) -> String {
    assert!(
        eventually(|| std::fs::read_to_string(path).is_ok_and(|s| !s.trim().is_empty())).await,
        "{} was never written",
        path.display()
    );
    std::fs::read_to_string(path).unwrap().trim().to_string()
}
