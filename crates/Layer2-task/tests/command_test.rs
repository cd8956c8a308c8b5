//! Command entry integration tests (unix shells)
//!
//! `cargo test -p taskhost-task --test command_test`

#![cfg(unix)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use taskhost_task::{
    CommandEntry, LogLevel, ParameterDef, ParameterDefs, ParameterKind, Task, TaskState,
    FORCED_STOP_LINE,
};

const WAIT: Duration = Duration::from_secs(10);

fn shell(id: &str, script: &str) -> CommandEntry {
    CommandEntry::new(id, "sh").with_args(["-c", script])
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn test_command_output_is_routed() {
    let entry = shell(
        "printer",
        "echo out; echo err 1>&2; printf '10%%\\r100%%\\n'; printf 'tail'",
    );
    let task = Arc::new(Task::new("printer", Arc::new(entry)));

    task.start().unwrap();
    assert_eq!(task.wait(WAIT), Some(TaskState::Stopped));

    let entries = task.log_entries();
    let stdout: Vec<_> = entries
        .iter()
        .filter(|e| e.level == LogLevel::Stdout)
        .map(|e| e.content.as_str())
        .collect();
    let stderr: Vec<_> = entries
        .iter()
        .filter(|e| e.level == LogLevel::Stderr)
        .map(|e| e.content.as_str())
        .collect();
    assert_eq!(stdout, vec!["out", "100%", "tail"]);
    assert_eq!(stderr, vec!["err"]);
}

#[test]
fn test_parameters_are_exported() {
    let mut params = ParameterDefs::new();
    params.insert(
        "greeting".to_string(),
        ParameterDef::new(ParameterKind::String, "bonjour"),
    );
    params.insert(
        "max-count".to_string(),
        ParameterDef::new(ParameterKind::Integer, 3),
    );
    let entry = shell(
        "env",
        "echo \"$TASKHOST_PARAM_GREETING $TASKHOST_PARAM_MAX_COUNT $PYTHONUNBUFFERED\"",
    )
    .with_parameters(params);
    let task = Arc::new(Task::new("env", Arc::new(entry)));

    task.start().unwrap();
    assert_eq!(task.wait(WAIT), Some(TaskState::Stopped));
    assert_eq!(task.log_lines(), vec!["bonjour 3 1"]);
}

#[test]
fn test_working_dir_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "").unwrap();
    let task = Arc::new(
        Task::new("lister", Arc::new(shell("lister", "ls"))).with_working_dir(dir.path()),
    );

    task.start().unwrap();
    assert_eq!(task.wait(WAIT), Some(TaskState::Stopped));
    assert_eq!(task.log_lines(), vec!["marker.txt"]);
}

#[test]
fn test_nonzero_exit_is_erred() {
    let task = Arc::new(Task::new("failing", Arc::new(shell("failing", "exit 3"))));

    task.start().unwrap();
    assert_eq!(task.wait(WAIT), Some(TaskState::Erred));
    let last = task.log_lines().pop().unwrap_or_default();
    assert!(last.starts_with("Error: sh exited with"), "{}", last);
}

#[test]
fn test_missing_program_is_erred() {
    let entry = CommandEntry::new("ghost", "/nonexistent/taskhost-test-binary");
    let task = Arc::new(Task::new("ghost", Arc::new(entry)));

    task.start().unwrap();
    assert_eq!(task.wait(WAIT), Some(TaskState::Erred));
    assert!(task.log_lines()[0].starts_with("Error: failed to start"));
}

#[test]
fn test_kill_terminates_process() {
    let task = Arc::new(Task::new(
        "sleeper",
        Arc::new(shell("sleeper", "echo started; exec sleep 30")),
    ));

    task.start().unwrap();
    assert!(wait_until(|| task.log_lines() == vec!["started"]));
    assert_eq!(task.subprocess_count(), 1);

    let started = Instant::now();
    task.kill();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(task.state(), TaskState::Stopped);
    assert_eq!(task.subprocess_count(), 0);
    assert_eq!(task.log_lines(), vec!["started", FORCED_STOP_LINE]);
}

#[test]
fn test_interactive_command_reads_input() {
    let entry = shell("asker", "read name; echo \"hi $name\"").with_interactive(true);
    let task = Arc::new(Task::new("asker", Arc::new(entry)));

    task.start().unwrap();
    assert!(wait_until(|| task.is_waiting_for_input()));
    assert!(task.submit_input("ada"));

    assert_eq!(task.wait(WAIT), Some(TaskState::Stopped));
    assert_eq!(task.log_lines(), vec!["hi ada"]);
}

#[test]
fn test_background_child_does_not_hold_task_open() {
    let task = Arc::new(Task::new(
        "forker",
        Arc::new(shell("forker", "sleep 3 & echo hi")),
    ));

    let started = Instant::now();
    task.start().unwrap();
    assert_eq!(
        task.wait(Duration::from_secs(2)),
        Some(TaskState::Stopped)
    );
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(task.log_lines(), vec!["hi"]);
}

#[test]
fn test_kill_reaches_background_children() {
    let dir = tempfile::tempdir().unwrap();
    let task = Arc::new(
        Task::new(
            "spawner",
            Arc::new(shell(
                "spawner",
                "(sleep 1; touch late.txt) & echo started; wait",
            )),
        )
        .with_working_dir(dir.path()),
    );

    task.start().unwrap();
    assert!(wait_until(|| task.log_lines() == vec!["started"]));
    task.kill();
    assert_eq!(task.state(), TaskState::Stopped);

    thread::sleep(Duration::from_millis(1500));
    assert!(!dir.path().join("late.txt").exists());
}
