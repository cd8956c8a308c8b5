//! Subcommand implementations

use crate::demo;
use std::collections::{HashSet, VecDeque};
use std::io::BufRead;
use taskhost_task::{
    InputRequest, LoadReport, LogLevel, TaskEvent, TaskId, TaskRegistry, TaskState,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Print load failures without aborting
pub fn report_load(report: &LoadReport) {
    for failure in &report.failures {
        eprintln!("Skipped {}: {}", failure.path.display(), failure.error);
    }
}

/// `taskhost list`
pub async fn list(registry: &TaskRegistry, json: bool) -> anyhow::Result<()> {
    let summaries = registry.list().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if summaries.is_empty() {
        println!("No tasks found in {}", registry.tasks_dir().display());
        return Ok(());
    }

    println!(
        "{:<20} {:<28} {:<10} {:<10} {:<6}",
        "ID", "Name", "State", "Auto", "Order"
    );
    println!("{}", "-".repeat(78));
    for summary in summaries {
        let settings = registry
            .settings()
            .load(summary.id.as_str())
            .unwrap_or_default();
        println!(
            "{:<20} {:<28} {:<10} {:<10} {:<6}",
            summary.id,
            truncate(&summary.name, 28),
            summary.state.to_string(),
            if settings.auto_start { "yes" } else { "no" },
            settings.start_order
        );
    }
    Ok(())
}

/// `taskhost run`
///
/// Starts the requested tasks, prints their events until all of them have
/// finished, forwards stdin lines to the task waiting for input and kills
/// everything on Ctrl-C.
pub async fn run(
    registry: &TaskRegistry,
    ids: Vec<String>,
    all: bool,
    with_demo: bool,
) -> anyhow::Result<()> {
    if with_demo {
        registry.register(demo::TICKER, demo::ticker()).await?;
        registry.register(demo::GREETER, demo::greeter()).await?;
    }

    let mut events = registry.subscribe();
    let started: Vec<TaskId> = if all || (with_demo && ids.is_empty()) {
        registry.start_all().await
    } else if ids.is_empty() {
        registry.auto_start().await
    } else {
        let mut started = Vec::new();
        for id in ids {
            registry.start(&id).await?;
            started.push(TaskId::new(id));
        }
        started
    };

    if started.is_empty() {
        println!("Nothing to run. Name task ids, use --all, or enable auto start.");
        return Ok(());
    }

    let mut running: HashSet<TaskId> = started.into_iter().collect();
    let mut waiting: VecDeque<(TaskId, InputRequest)> = VecDeque::new();
    let mut failed = 0usize;
    let mut lines = stdin_lines();

    while !running.is_empty() {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nStopping {} task(s)...", running.len());
                registry.stop_all().await;
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(id) = handle_event(event, &mut waiting, &mut failed) {
                        running.remove(&id);
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} event(s)", skipped),
                Err(RecvError::Closed) => break,
            },
            Some(line) = lines.recv() => {
                match waiting.pop_front() {
                    Some((id, request)) => {
                        let text = if line.is_empty() {
                            request.default_text.clone()
                        } else {
                            line
                        };
                        if !request.respond(text) {
                            warn!("Task {} is no longer waiting for input", id);
                        }
                    }
                    None => debug!("Ignoring input: no task is waiting"),
                }
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} task(s) failed", failed);
    }
    Ok(())
}

/// Prints an event; returns the task id once it has finished
fn handle_event(
    event: TaskEvent,
    waiting: &mut VecDeque<(TaskId, InputRequest)>,
    failed: &mut usize,
) -> Option<TaskId> {
    match event {
        TaskEvent::OutputProduced {
            task_id,
            line,
            level,
        } => {
            match level {
                LogLevel::Stderr => eprintln!("[{}] {}", task_id, line),
                LogLevel::System => println!("[{}] * {}", task_id, line),
                _ => println!("[{}] {}", task_id, line),
            }
            None
        }
        TaskEvent::ErrorOccurred { task_id, message } => {
            eprintln!("[{}] failed: {}", task_id, message);
            None
        }
        TaskEvent::InputRequested { task_id, request } => {
            let hint = if request.default_text.is_empty() {
                String::new()
            } else {
                format!(" [{}]", request.default_text)
            };
            println!("[{}] input requested{}:", task_id, hint);
            waiting.push_back((task_id, request));
            None
        }
        TaskEvent::StatusChanged { task_id, state } => {
            println!("[{}] {} {}", task_id, state.symbol(), state);
            if !state.is_terminal() {
                return None;
            }
            if state == TaskState::Erred {
                *failed += 1;
            }
            waiting.retain(|(id, _)| id != &task_id);
            Some(task_id)
        }
    }
}

/// Stdin lines, read on a plain thread so a pending read never holds up exit
fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Input forwarding disabled: {}", e);
    }
    rx
}

/// `taskhost update <ID>`
pub async fn update(registry: &TaskRegistry, id: &str) -> anyhow::Result<()> {
    let task = registry.update(id).await?;
    println!("Updated {} ({})", task.id(), task.name());
    Ok(())
}

/// `taskhost uninstall <ID>`
pub async fn uninstall(registry: &TaskRegistry, id: &str) -> anyhow::Result<()> {
    registry.uninstall(id).await?;
    println!("Uninstalled {}", id);
    Ok(())
}

/// Truncate a string for display
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
