//! Logging-facade capture through `TaskLogLayer`
//!
//! Kept in its own test binary: it installs the global subscriber.

use std::sync::Arc;
use std::time::Duration;
use taskhost_task::log_sink::{console_filter, LogFormat, TaskLogLayer};
use taskhost_task::{spawn, FnEntry, LogLevel, Task, TaskState};
use tracing_subscriber::layer::{Layer, SubscriberExt};

#[test]
fn test_task_records_land_in_task_log() {
    let subscriber = tracing_subscriber::registry()
        .with(TaskLogLayer::new(LogFormat::new("{level} [{target}] {message}", "%H")))
        .with(tracing_subscriber::fmt::layer().with_filter(console_filter()));
    tracing::subscriber::set_global_default(subscriber).expect("subscriber already set");

    let entry = FnEntry::new("Logger", |_ctx| {
        tracing::info!(target: "job", "\x1b[1mstarting\x1b[0m step {}", 1);
        spawn::spawn(|| tracing::warn!(target: "job", retries = 2, "from child"))?
            .join()
            .map_err(|_| anyhow::anyhow!("child panicked"))?;
        Ok(())
    });
    let task = Arc::new(Task::new("logger", Arc::new(entry)));

    tracing::info!(target: "job", "outside any task");
    task.start().unwrap();
    assert_eq!(task.wait(Duration::from_secs(5)), Some(TaskState::Stopped));

    let entries = task.log_entries();
    assert!(entries.iter().all(|e| e.level == LogLevel::Log));
    let lines: Vec<_> = entries.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(
        lines,
        vec!["INFO [job] starting step 1", "WARN [job] from child retries=2"]
    );
}
