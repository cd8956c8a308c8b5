//! Subprocess tracking
//!
//! External processes started by a task are registered so `kill()` can end
//! them: SIGTERM first, SIGKILL once the grace window has passed. On unix a
//! process started through `TaskContext::command` leads its own process
//! group, and signals go to the whole group so background grandchildren end
//! with it.

use parking_lot::Mutex;
use std::io;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, ExitStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

static NEXT_PROCESS_ID: AtomicU64 = AtomicU64::new(1);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Shared handle on a child process
#[derive(Clone)]
pub struct Subprocess {
    id: u64,
    pid: u32,
    group: bool,
    child: Arc<Mutex<Child>>,
}

impl Subprocess {
    pub fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            id: NEXT_PROCESS_ID.fetch_add(1, Ordering::Relaxed),
            pid,
            group: leads_group(pid),
            child: Arc::new(Mutex::new(child)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn take_stdout(&self) -> Option<ChildStdout> {
        self.child.lock().stdout.take()
    }

    pub fn take_stderr(&self) -> Option<ChildStderr> {
        self.child.lock().stderr.take()
    }

    pub fn take_stdin(&self) -> Option<ChildStdin> {
        self.child.lock().stdin.take()
    }

    pub fn try_wait(&self) -> io::Result<Option<ExitStatus>> {
        self.child.lock().try_wait()
    }

    /// Whether the process itself has not exited yet
    pub fn is_running(&self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    /// Whether the process leads its own process group
    pub fn is_group_leader(&self) -> bool {
        self.group
    }

    /// The process, or any member of its group, is still around
    pub fn is_alive(&self) -> bool {
        self.is_running() || self.group_alive()
    }

    /// Hard kill and reap
    pub fn kill(&self) -> io::Result<()> {
        self.signal_group(Signal::Kill);
        let mut child = self.child.lock();
        if child.try_wait()?.is_some() {
            return Ok(());
        }
        child.kill()?;
        child.wait()?;
        Ok(())
    }

    /// Ask the process (and its group) to exit
    #[cfg(unix)]
    fn terminate(&self) {
        if self.signal_group(Signal::Term) {
            return;
        }
        // SAFETY: kill(2) with a pid we spawned and have not reaped yet
        let rc = unsafe { libc::kill(self.pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            debug!(
                "SIGTERM to pid {} failed: {}",
                self.pid,
                io::Error::last_os_error()
            );
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self) {
        debug!("No graceful termination on this platform, killing pid {}", self.pid);
        let _ = self.kill();
    }

    /// Signal every member of the group; false if there is no group to signal
    #[cfg(unix)]
    fn signal_group(&self, signal: Signal) -> bool {
        if !self.group {
            return false;
        }
        let signo = match signal {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        // SAFETY: a negative pid addresses the process group we created
        let rc = unsafe { libc::kill(-(self.pid as libc::pid_t), signo) };
        if rc != 0 {
            debug!(
                "{:?} to group {} failed: {}",
                signal,
                self.pid,
                io::Error::last_os_error()
            );
        }
        rc == 0
    }

    #[cfg(not(unix))]
    fn signal_group(&self, _signal: Signal) -> bool {
        false
    }

    #[cfg(unix)]
    fn group_alive(&self) -> bool {
        // SAFETY: signal 0 only probes for existence
        self.group && unsafe { libc::kill(-(self.pid as libc::pid_t), 0) } == 0
    }

    #[cfg(not(unix))]
    fn group_alive(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn leads_group(pid: u32) -> bool {
    let pid = pid as libc::pid_t;
    // SAFETY: getpgid(2) on a child we have not reaped
    unsafe { libc::getpgid(pid) == pid }
}

#[cfg(not(unix))]
fn leads_group(_pid: u32) -> bool {
    false
}

impl std::fmt::Debug for Subprocess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subprocess")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("group", &self.group)
            .finish()
    }
}

/// Terminate every running process, escalating after `grace`
pub fn terminate_all(processes: &[Subprocess], grace: Duration) {
    let running: Vec<&Subprocess> = processes.iter().filter(|p| p.is_alive()).collect();
    if running.is_empty() {
        return;
    }

    for process in &running {
        process.terminate();
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline && running.iter().any(|p| p.is_alive()) {
        std::thread::sleep(EXIT_POLL_INTERVAL);
    }

    for process in running {
        if process.is_alive() {
            warn!("pid {} ignored SIGTERM for {:?}, killing", process.pid(), grace);
            if let Err(e) = process.kill() {
                warn!("Failed to kill pid {}: {}", process.pid(), e);
            }
        }
    }
}
