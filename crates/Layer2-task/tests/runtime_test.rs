//! Runtime integration tests - routing, input, spawning and lifecycle
//!
//! `cargo test -p taskhost-task --test runtime_test`

use anyhow::bail;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use taskhost_task::{
    input, output, spawn, task_eprintln, task_println, FnEntry, LogLevel, ParameterDef,
    ParameterDefs, ParameterKind, Task, TaskContext, TaskEvent, TaskState, Timer,
    FORCED_STOP_LINE,
};

const WAIT: Duration = Duration::from_secs(5);

fn task<F>(id: &str, run: F) -> Arc<Task>
where
    F: Fn(&TaskContext) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(Task::new(id, Arc::new(FnEntry::new(id, run))))
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

// ============================================================================
// Output routing
// ============================================================================

#[test]
fn test_ticks_then_stopped() {
    let ticker = task("ticker", |_ctx| {
        for i in 1..=5 {
            task_println!("tick {}", i);
        }
        Ok(())
    });

    ticker.start().expect("start failed");
    assert_eq!(ticker.wait(WAIT), Some(TaskState::Stopped));
    assert_eq!(
        ticker.log_lines(),
        vec!["tick 1", "tick 2", "tick 3", "tick 4", "tick 5"]
    );
    assert!(ticker.log_entries().iter().all(|e| e.level == LogLevel::Stdout));
}

#[test]
fn test_carriage_return_from_bound_worker() {
    let progress = task("progress", |_ctx| {
        output::stdout().write_all(b"abc\rdef\n")?;
        Ok(())
    });

    progress.start().unwrap();
    assert_eq!(progress.wait(WAIT), Some(TaskState::Stopped));
    assert_eq!(progress.log_lines(), vec!["def"]);
}

#[test]
fn test_partial_line_is_flushed_at_exit() {
    let partial = task("partial", |_ctx| {
        task_eprintln!("warning");
        write!(output::stdout(), "no newline")?;
        Ok(())
    });

    partial.start().unwrap();
    assert_eq!(partial.wait(WAIT), Some(TaskState::Stopped));
    let entries = partial.log_entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].level, LogLevel::Stderr);
    assert_eq!(entries[0].content, "warning");
    assert_eq!(entries[1].content, "no newline");
}

#[test]
fn test_concurrent_tasks_do_not_mix() {
    let make = |prefix: &'static str| {
        task(prefix, move |_ctx| {
            for i in 0..200 {
                task_println!("{} {}", prefix, i);
                if i % 20 == 0 {
                    thread::yield_now();
                }
            }
            Ok(())
        })
    };
    let a = make("alpha");
    let b = make("beta");

    a.start().unwrap();
    b.start().unwrap();
    assert_eq!(a.wait(WAIT), Some(TaskState::Stopped));
    assert_eq!(b.wait(WAIT), Some(TaskState::Stopped));

    let a_lines = a.log_lines();
    let b_lines = b.log_lines();
    assert_eq!(a_lines.len(), 200);
    assert_eq!(b_lines.len(), 200);
    assert!(a_lines.iter().all(|l| l.starts_with("alpha ")));
    assert!(b_lines.iter().all(|l| l.starts_with("beta ")));
    assert_eq!(a_lines[199], "alpha 199");
}

#[test]
fn test_unbound_thread_output_is_not_captured() {
    let quiet = task("quiet", |ctx| {
        ctx.sleep(Duration::from_millis(50))?;
        Ok(())
    });
    quiet.start().unwrap();

    task_println!("printed by the test thread");
    assert_eq!(quiet.wait(WAIT), Some(TaskState::Stopped));
    assert!(quiet.log_lines().is_empty());
}

// ============================================================================
// Spawn interception
// ============================================================================

#[test]
fn test_spawned_descendants_are_attributed() {
    let parent = task("parent", |_ctx| {
        let child = spawn::spawn(|| {
            task_println!("from child");
            spawn::spawn(|| task_println!("from grandchild"))
                .map(|handle| handle.join())
        })?;
        let _ = child.join();
        Ok(())
    });

    parent.start().unwrap();
    assert_eq!(parent.wait(WAIT), Some(TaskState::Stopped));
    assert_eq!(parent.log_lines(), vec!["from child", "from grandchild"]);
}

#[test]
fn test_timer_callback_is_attributed() {
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let timed = task("timed", move |ctx| {
        let counter = Arc::clone(&counter);
        let timer = Timer::after(Duration::from_millis(20), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            task_println!("timer fired");
        })?;
        while !timer.has_fired() {
            ctx.sleep(Duration::from_millis(5))?;
        }
        Ok(())
    });

    timed.start().unwrap();
    assert_eq!(timed.wait(WAIT), Some(TaskState::Stopped));
    assert!(wait_until(|| timed.log_lines() == vec!["timer fired"]));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_kill_cancels_pending_timer() {
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let delayed = task("delayed", move |ctx| {
        let counter = Arc::clone(&counter);
        ctx.timer(Duration::from_millis(300), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })?;
        loop {
            ctx.sleep(Duration::from_millis(10))?;
        }
    });

    delayed.start().unwrap();
    thread::sleep(Duration::from_millis(30));
    delayed.kill();
    thread::sleep(Duration::from_millis(400));
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Input proxy
// ============================================================================

#[test]
fn test_submit_input_reaches_blocked_read() {
    let reader = task("reader", |_ctx| {
        let line = input::read_line()?;
        if line != "hello\n" {
            bail!("unexpected input {:?}", line);
        }
        task_println!("got {}", line.trim_end());
        Ok(())
    });

    assert!(!reader.submit_input("too early"));
    reader.start().unwrap();
    assert!(wait_until(|| reader.is_waiting_for_input()));
    assert!(reader.submit_input("hello"));

    assert_eq!(reader.wait(WAIT), Some(TaskState::Stopped));
    assert_eq!(reader.log_lines(), vec!["got hello"]);
    assert!(!reader.is_waiting_for_input());
    assert!(!reader.submit_input("too late"));
}

#[tokio::test]
async fn test_input_requested_event_reply() {
    let asker = task("asker", |ctx| {
        let name = ctx.prompt("Name? ")?;
        task_println!("hi {}", name);
        Ok(())
    });
    let mut events = asker.subscribe();
    asker.start().unwrap();

    let request = tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(TaskEvent::InputRequested { request, .. }) => return request,
                Ok(_) => continue,
                Err(e) => panic!("event stream ended: {}", e),
            }
        }
    })
    .await
    .expect("no input request");

    assert_eq!(request.prompt, "Name? ");
    assert!(request.respond("ada"));

    let state = tokio::task::spawn_blocking({
        let asker = Arc::clone(&asker);
        move || asker.wait(WAIT)
    })
    .await
    .unwrap();
    assert_eq!(state, Some(TaskState::Stopped));
    assert_eq!(asker.log_lines(), vec!["Name? ", "hi ada"]);
}

#[test]
fn test_concurrent_readers_are_serialized() {
    let pair = task("pair", |ctx| {
        let other = ctx.clone();
        let second = ctx.spawn(move || -> anyhow::Result<()> {
            let line = other.read_line()?;
            task_println!("got {}", line.trim_end());
            Ok(())
        })?;
        let line = ctx.read_line()?;
        task_println!("got {}", line.trim_end());
        second
            .join()
            .map_err(|_| anyhow::anyhow!("reader panicked"))??;
        task_println!("done");
        Ok(())
    });

    pair.start().unwrap();
    assert!(wait_until(|| pair.is_waiting_for_input()));
    assert!(pair.submit_input("one"));
    assert!(wait_until(|| pair.log_lines().len() == 1));
    assert!(wait_until(|| pair.is_waiting_for_input()));
    assert!(pair.submit_input("two"));

    assert_eq!(pair.wait(WAIT), Some(TaskState::Stopped));
    let mut lines = pair.log_lines();
    assert_eq!(lines.pop().as_deref(), Some("done"));
    lines.sort();
    assert_eq!(lines, vec!["got one", "got two"]);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_kill_is_terminal() {
    let worker = task("worker", |ctx| loop {
        task_println!("working");
        ctx.sleep(Duration::from_millis(5))?;
    });

    worker.start().unwrap();
    assert!(wait_until(|| worker.log_lines().len() >= 3));

    let started = Instant::now();
    worker.kill();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(worker.state(), TaskState::Stopped);
    assert_eq!(worker.log_lines().last().map(String::as_str), Some(FORCED_STOP_LINE));

    let count = worker.log_lines().len();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(worker.log_lines().len(), count);
    assert_eq!(worker.worker_count(), 0);
}

#[test]
fn test_kill_detaches_non_polling_worker() {
    let stubborn = task("stubborn", |_ctx| {
        let until = Instant::now() + Duration::from_secs(2);
        while Instant::now() < until {
            task_println!("ignoring stop");
            thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    });

    stubborn.start().unwrap();
    assert!(wait_until(|| !stubborn.log_lines().is_empty()));

    let started = Instant::now();
    stubborn.kill();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(stubborn.state(), TaskState::Stopped);

    thread::sleep(Duration::from_millis(100));
    assert_eq!(
        stubborn.log_lines().last().map(String::as_str),
        Some(FORCED_STOP_LINE)
    );
}

#[test]
fn test_kill_unblocks_pending_input() {
    let waiting = task("waiting", |_ctx| {
        input::read_line()?;
        task_println!("should not print");
        Ok(())
    });

    waiting.start().unwrap();
    assert!(wait_until(|| waiting.is_waiting_for_input()));
    waiting.kill();

    assert_eq!(waiting.state(), TaskState::Stopped);
    assert!(!waiting.is_waiting_for_input());
    assert_eq!(waiting.log_lines(), vec![FORCED_STOP_LINE]);
}

#[test]
fn test_restart_clears_previous_run() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let again = task("again", move |_ctx| {
        let run = counter.fetch_add(1, Ordering::SeqCst) + 1;
        task_println!("run {}", run);
        let line = input::read_line()?;
        task_println!("read {}", line.trim_end());
        Ok(())
    });

    again.start().unwrap();
    assert!(wait_until(|| again.is_waiting_for_input()));
    again.kill();
    assert_eq!(again.log_lines(), vec!["run 1", FORCED_STOP_LINE]);

    again.start().unwrap();
    assert_eq!(again.state(), TaskState::Running);
    assert!(wait_until(|| again.is_waiting_for_input()));
    assert_eq!(again.log_lines(), vec!["run 2"]);

    assert!(again.submit_input("fresh"));
    assert_eq!(again.wait(WAIT), Some(TaskState::Stopped));
    assert_eq!(again.log_lines(), vec!["run 2", "read fresh"]);
}

#[test]
fn test_start_while_running_is_noop() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let once = task("once", move |ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        ctx.sleep(Duration::from_millis(100))?;
        Ok(())
    });

    once.start().unwrap();
    once.start().unwrap();
    assert_eq!(once.wait(WAIT), Some(TaskState::Stopped));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failure_is_reported_verbatim() {
    let failing = task("failing", |_ctx| {
        task_println!("about to fail");
        bail!("disk on fire");
    });
    let mut events = failing.subscribe();
    failing.start().unwrap();

    let mut seen = Vec::new();
    let mut message = None;
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await.expect("event stream ended") {
                TaskEvent::ErrorOccurred { message: m, .. } => message = Some(m),
                TaskEvent::StatusChanged { state, .. } => {
                    seen.push(state);
                    if state.is_terminal() {
                        break;
                    }
                }
                _ => {}
            }
        }
    })
    .await
    .expect("task did not finish");

    assert_eq!(message.as_deref(), Some("disk on fire"));
    assert_eq!(seen, vec![TaskState::Running, TaskState::Erred]);
    assert_eq!(failing.state(), TaskState::Erred);
    assert_eq!(failing.log_lines(), vec!["about to fail", "Error: disk on fire"]);
}

#[test]
fn test_panic_is_erred() {
    let panicking = task("panicking", |_ctx| -> anyhow::Result<()> {
        panic!("unexpected state");
    });

    panicking.start().unwrap();
    assert_eq!(panicking.wait(WAIT), Some(TaskState::Erred));
    assert_eq!(panicking.log_lines(), vec!["Error: unexpected state"]);
}

#[test]
fn test_failures_are_isolated() {
    let healthy = task("healthy", |ctx| {
        for i in 0..5 {
            task_println!("ok {}", i);
            ctx.sleep(Duration::from_millis(10))?;
        }
        Ok(())
    });
    let broken = task("broken", |_ctx| bail!("boom"));

    healthy.start().unwrap();
    broken.start().unwrap();
    assert_eq!(broken.wait(WAIT), Some(TaskState::Erred));
    assert_eq!(healthy.wait(WAIT), Some(TaskState::Stopped));
    assert_eq!(healthy.log_lines().len(), 5);
}

#[test]
fn test_parameters_reach_context() {
    let mut params = ParameterDefs::new();
    params.insert(
        "interval".to_string(),
        ParameterDef::new(ParameterKind::Integer, 7),
    );
    let entry = FnEntry::new("Params", |ctx| {
        let interval: i64 = ctx.param_as("interval").unwrap_or_default();
        task_println!("interval {}", interval);
        Ok(())
    })
    .with_parameters(params);
    let configured = Arc::new(Task::new("configured", Arc::new(entry)));

    configured.start().unwrap();
    assert_eq!(configured.wait(WAIT), Some(TaskState::Stopped));
    assert_eq!(configured.log_lines(), vec!["interval 7"]);
    assert_eq!(configured.params()["interval"], 7);
}
