#![cfg(target_os = "linux")]

mod support;

use std::time::Duration;

use tempfile::TempDir;

use tether_core::runtime::LaunchRequest;
use tether_core::supervisor::{
    ExitOutcome, RestartPolicy, Supervisor, SupervisorError, SupervisorHandle, SupervisorState,
};

use support::process::{TIMEOUT, eventually, process_alive, read_when_ready, wait_for_status};

fn script(body: &str, dir: &TempDir) -> LaunchRequest {
    LaunchRequest::shell(body, dir.path())
}

#[tokio::test]
async fn launch_enters_running_with_zero_failures() {
    let dir = TempDir::new().unwrap();
    let (handle, task) = Supervisor::spawn(RestartPolicy::default());

    handle.launch(script("sleep 30", &dir)).await.unwrap();
    let status = wait_for_status(&handle, |s| s.state == SupervisorState::Running).await;

    assert_eq!(status.failures, 0);
    assert_eq!(status.launches, 1);
    let pid = status.pid.expect("running process has a pid") as i32;
    assert!(process_alive(pid));

    handle.stop().await.unwrap();
    assert!(task.await.unwrap().is_ok());
    assert!(eventually(|| !process_alive(pid)).await);
}

#[tokio::test]
async fn launch_passes_environment_and_working_dir() {
    let dir = TempDir::new().unwrap();
    let (handle, task) = Supervisor::spawn(RestartPolicy::default());

    let request =
        script("echo \"$PORT $(pwd)\" > launch.txt; sleep 30", &dir).with_env("PORT", "5005");
    handle.launch(request).await.unwrap();

    let written = read_when_ready(&dir.path().join("launch.txt")).await;
    let canonical = dir.path().canonicalize().unwrap();
    assert_eq!(written, format!("5005 {}", canonical.display()));

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn relaunch_kills_previous_process_group() {
    let dir = TempDir::new().unwrap();
    let (handle, task) = Supervisor::spawn(RestartPolicy::default());

    // The wrapper shell forks a grandchild; killing only the shell would
    // leave it behind.
    handle
        .launch(script("sleep 300 & echo $! > child.pid; wait", &dir))
        .await
        .unwrap();
    let first = wait_for_status(&handle, |s| s.state == SupervisorState::Running).await;
    let shell_pid = first.pid.unwrap() as i32;
    let grandchild: i32 = read_when_ready(&dir.path().join("child.pid"))
        .await
        .parse()
        .unwrap();
    assert!(process_alive(grandchild));

    handle.launch(script("sleep 300", &dir)).await.unwrap();
    let second = wait_for_status(&handle, |s| s.launches == 2).await;

    assert_eq!(second.state, SupervisorState::Running);
    assert_eq!(second.failures, 0);
    assert!(eventually(|| !process_alive(shell_pid)).await);
    assert!(eventually(|| !process_alive(grandchild)).await);
    assert!(process_alive(second.pid.unwrap() as i32));

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn many_launches_leave_only_the_latest_alive() {
    let dir = TempDir::new().unwrap();
    let (handle, task) = Supervisor::spawn(RestartPolicy::default());

    let mut pids = Vec::new();
    for i in 1..=4u64 {
        handle
            .launch(script(&format!("echo {i} > current.txt; sleep 300"), &dir))
            .await
            .unwrap();
        let status = wait_for_status(&handle, |s| s.launches == i).await;
        pids.push(status.pid.unwrap() as i32);
    }

    let latest = *pids.last().unwrap();
    for pid in &pids[..pids.len() - 1] {
        assert!(eventually(|| !process_alive(*pid)).await, "pid {pid} survived");
    }
    assert!(process_alive(latest));
    assert!(eventually(|| {
        std::fs::read_to_string(dir.path().join("current.txt")).is_ok_and(|s| s.trim() == "4")
    })
    .await);

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn clean_exit_goes_idle_without_restart() {
    let dir = TempDir::new().unwrap();
    let (handle, task) = Supervisor::spawn(RestartPolicy::default());

    handle.launch(script("exit 0", &dir)).await.unwrap();
    let status = wait_for_status(&handle, |s| {
        s.launches == 1 && s.state == SupervisorState::Idle
    })
    .await;
    assert_eq!(status.pid, None);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handle.status().launches, 1);

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

/// Launch a wrapper that backgrounds a child and exits cleanly, returning
/// the pid of the child left behind.
async fn leave_orphan_after_clean_exit(
    handle: &SupervisorHandle,
    dir: &TempDir,
) -> i32 {
    handle
        .launch(script("sleep 300 & echo $! > child.pid; exit 0", dir))
        .await
        .unwrap();
    let orphan: i32 = read_when_ready(&dir.path().join("child.pid"))
        .await
        .parse()
        .unwrap();
    let status = wait_for_status(handle, |s| {
        s.launches == 1 && s.state == SupervisorState::Idle
    })
    .await;
    assert_eq!(status.pid, None);
    assert!(process_alive(orphan));
    orphan
}

#[tokio::test]
async fn launch_after_clean_exit_kills_leftover_descendants() {
    let dir = TempDir::new().unwrap();
    let (handle, task) = Supervisor::spawn(RestartPolicy::default());
    let orphan = leave_orphan_after_clean_exit(&handle, &dir).await;

    handle.launch(script("sleep 300", &dir)).await.unwrap();
    let status = wait_for_status(&handle, |s| s.launches == 2).await;

    assert_eq!(status.state, SupervisorState::Running);
    assert!(eventually(|| !process_alive(orphan)).await);
    assert!(process_alive(status.pid.unwrap() as i32));

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn stop_after_clean_exit_kills_leftover_descendants() {
    let dir = TempDir::new().unwrap();
    let (handle, task) = Supervisor::spawn(RestartPolicy::default());
    let orphan = leave_orphan_after_clean_exit(&handle, &dir).await;

    handle.stop().await.unwrap();

    assert!(eventually(|| !process_alive(orphan)).await);
    assert_eq!(handle.status().state, SupervisorState::Stopped);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn relaunch_after_group_emptied_starts_cleanly() {
    let dir = TempDir::new().unwrap();
    let (handle, task) = Supervisor::spawn(RestartPolicy::default());

    handle
        .launch(script("sleep 0.2 & echo $! > child.pid; exit 0", &dir))
        .await
        .unwrap();
    let child: i32 = read_when_ready(&dir.path().join("child.pid"))
        .await
        .parse()
        .unwrap();
    wait_for_status(&handle, |s| s.launches == 1 && s.state == SupervisorState::Idle).await;
    assert!(eventually(|| !process_alive(child)).await);

    handle.launch(script("sleep 300", &dir)).await.unwrap();
    let status = wait_for_status(&handle, |s| s.launches == 2).await;

    assert_eq!(status.state, SupervisorState::Running);
    assert_eq!(status.failures, 0);

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn crash_loop_restarts_three_times_then_fails() {
    let dir = TempDir::new().unwrap();
    let (handle, task) = Supervisor::spawn(RestartPolicy::default());

    handle
        .launch(script("echo run >> runs.log; exit 1", &dir))
        .await
        .unwrap();

    let result = tokio::time::timeout(TIMEOUT, task)
        .await
        .expect("supervisor should give up")
        .unwrap();
    match result {
        Err(SupervisorError::CrashLoop { restarts, outcome }) => {
            assert_eq!(restarts, 3);
            assert_eq!(outcome, ExitOutcome::Failed(1));
        }
        other => panic!("expected crash loop, got {other:?}"),
    }

    let runs = std::fs::read_to_string(dir.path().join("runs.log")).unwrap();
    assert_eq!(runs.lines().count(), 4, "initial run plus three restarts");
    assert_eq!(handle.status().state, SupervisorState::Stopped);
    assert!(matches!(
        handle.launch(script("true", &dir)).await,
        Err(SupervisorError::Closed)
    ));
}

#[tokio::test]
async fn transient_failures_recover_and_new_launch_resets_counter() {
    let dir = TempDir::new().unwrap();
    let (handle, task) = Supervisor::spawn(RestartPolicy::default());

    let flaky = "n=$(cat attempts 2>/dev/null || echo 0); n=$((n+1)); echo $n > attempts; \
                 if [ $n -lt 3 ]; then exit 1; fi; sleep 300";
    handle.launch(script(flaky, &dir)).await.unwrap();
    let status = wait_for_status(&handle, |s| s.launches == 3).await;
    assert_eq!(status.state, SupervisorState::Running);
    assert_eq!(status.failures, 2);

    handle.launch(script("sleep 300", &dir)).await.unwrap();
    let status = wait_for_status(&handle, |s| s.launches == 4).await;
    assert_eq!(status.failures, 0);

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn stop_reaps_descendants_and_is_terminal() {
    let dir = TempDir::new().unwrap();
    let (handle, task) = Supervisor::spawn(RestartPolicy::default());

    handle
        .launch(script("sleep 300 & echo $! > child.pid; wait", &dir))
        .await
        .unwrap();
    let grandchild: i32 = read_when_ready(&dir.path().join("child.pid"))
        .await
        .parse()
        .unwrap();

    handle.stop().await.unwrap();

    assert!(eventually(|| !process_alive(grandchild)).await);
    assert_eq!(handle.status().state, SupervisorState::Stopped);
    assert!(task.await.unwrap().is_ok());
    assert!(matches!(handle.stop().await, Err(SupervisorError::Closed)));
}

#[tokio::test]
async fn stop_without_process_acknowledges() {
    let (handle, task) = Supervisor::spawn(RestartPolicy::default());

    handle.stop().await.unwrap();

    assert_eq!(handle.status().state, SupervisorState::Stopped);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn dropping_every_handle_stops_the_process() {
    let dir = TempDir::new().unwrap();
    let (handle, task) = Supervisor::spawn(RestartPolicy::default());

    handle.launch(script("sleep 300", &dir)).await.unwrap();
    let pid = wait_for_status(&handle, |s| s.state == SupervisorState::Running)
        .await
        .pid
        .unwrap() as i32;
    drop(handle);

    tokio::time::timeout(TIMEOUT, task)
        .await
        .expect("supervisor should stop")
        .unwrap()
        .unwrap();
    assert!(eventually(|| !process_alive(pid)).await);
}

#[tokio::test]
async fn spawn_failure_is_fatal() {
    let dir = TempDir::new().unwrap();
    let (handle, task) = Supervisor::spawn(RestartPolicy::default());

    let request = LaunchRequest {
        program: dir.path().join("no-such-binary").to_string_lossy().to_string(),
        args: vec![],
        working_dir: dir.path().to_path_buf(),
        env: Default::default(),
    };
    handle.launch(request).await.unwrap();

    let result = tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap();
    assert!(matches!(result, Err(SupervisorError::Spawn { .. })));
}
