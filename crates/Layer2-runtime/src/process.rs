//! Applet processes and their handles
//!
//! Every spawned child is owned by a dedicated reaper task. The task waits on the
//! child, delivers signals sent through the handle and publishes the exit status on a
//! watch channel. Because the signal is sent from the same task that reaps the child,
//! a SIGTERM can never reach a pid that has already been recycled.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Upper bound for reaping a process after SIGKILL
pub const KILL_PASS: Duration = Duration::from_secs(1);

/// How a process ended
#[derive(Debug, Clone)]
pub enum ProcessExit {
    Exited(ExitStatus),
    /// `wait` itself failed; the process is treated as gone
    WaitFailed(String),
}

impl ProcessExit {
    /// Clean exit (status 0)
    pub fn is_clean(&self) -> bool {
        matches!(self, ProcessExit::Exited(status) if status.success())
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ProcessExit::Exited(status) => status.code(),
            ProcessExit::WaitFailed(_) => None,
        }
    }
}

impl std::fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessExit::Exited(status) => write!(f, "{}", status),
            ProcessExit::WaitFailed(e) => write!(f, "wait failed: {}", e),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ProcessSignal {
    Terminate,
    Kill,
}

// ============================================================================
// ProcessHandle
// ============================================================================

/// Cloneable handle to a child owned by its reaper task
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    signals: mpsc::UnboundedSender<ProcessSignal>,
    exit: watch::Receiver<Option<ProcessExit>>,
}

impl ProcessHandle {
    /// Hand a freshly spawned child over to a reaper task
    pub fn spawn(mut child: Child) -> Self {
        let pid = child.id();
        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<ProcessSignal>();
        let (exit_tx, exit_rx) = watch::channel(None);

        tokio::spawn(async move {
            let outcome = loop {
                tokio::select! {
                    status = child.wait() => {
                        break match status {
                            Ok(status) => ProcessExit::Exited(status),
                            Err(e) => ProcessExit::WaitFailed(e.to_string()),
                        };
                    }
                    Some(signal) = signal_rx.recv() => match signal {
                        ProcessSignal::Terminate => {
                            if let Err(e) = send_sigterm(&mut child) {
                                warn!("Failed to send SIGTERM to {:?}: {}", pid, e);
                                let _ = child.start_kill();
                            }
                        }
                        ProcessSignal::Kill => {
                            if let Err(e) = child.start_kill() {
                                warn!("Failed to kill {:?}: {}", pid, e);
                            }
                        }
                    },
                }
            };
            debug!("Process {:?} reaped: {}", pid, outcome);
            let _ = exit_tx.send(Some(outcome));
        });

        Self {
            pid,
            signals: signal_tx,
            exit: exit_rx,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        self.exit.borrow().is_none()
    }

    /// Exit status, if the process has already been reaped
    pub fn try_exit(&self) -> Option<ProcessExit> {
        self.exit.borrow().clone()
    }

    /// Wait until the process has been reaped
    pub async fn wait(&self) -> ProcessExit {
        let mut exit = self.exit.clone();
        let outcome = match exit.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => return ProcessExit::WaitFailed("reaper task stopped".to_string()),
        };
        outcome.unwrap_or_else(|| ProcessExit::WaitFailed("no exit status".to_string()))
    }

    /// Request graceful termination (SIGTERM; hard kill where unsupported)
    pub fn terminate(&self) {
        if self.is_running() {
            let _ = self.signals.send(ProcessSignal::Terminate);
        }
    }

    /// Request immediate termination (SIGKILL)
    pub fn kill(&self) {
        if self.is_running() {
            let _ = self.signals.send(ProcessSignal::Kill);
        }
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL. Returns once the process is reaped
    /// or the kill pass has elapsed.
    pub async fn terminate_with_grace(&self, grace: Duration) -> Option<ProcessExit> {
        if let Some(exit) = self.try_exit() {
            return Some(exit);
        }
        self.terminate();
        if let Ok(exit) = tokio::time::timeout(grace, self.wait()).await {
            return Some(exit);
        }
        debug!("Process {:?} ignored SIGTERM for {:?}, killing", self.pid, grace);
        self.kill();
        tokio::time::timeout(KILL_PASS, self.wait()).await.ok()
    }
}

#[cfg(unix)]
fn send_sigterm(child: &mut Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    // SAFETY: plain kill(2); the pid belongs to a child this task has not reaped yet
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) -> std::io::Result<()> {
    // no graceful signal here, go straight to kill
    child.start_kill()
}

// ============================================================================
// AppletProcess
// ============================================================================

/// One live applet instance
#[derive(Debug)]
pub struct AppletProcess {
    pub applet_id: String,
    pub entry_point: String,
    /// Private channel address
    pub socket_path: PathBuf,
    pub handle: ProcessHandle,
    pub started_at: DateTime<Utc>,
}

impl AppletProcess {
    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.pid()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::process::Command;

    fn spawn_sh(script: &str) -> ProcessHandle {
        let child = Command::new("sh")
            .arg("-c")
            .arg(script)
            .spawn()
            .expect("spawn sh");
        ProcessHandle::spawn(child)
    }

    #[tokio::test]
    async fn test_wait_reports_exit_code() {
        let handle = spawn_sh("exit 3");
        let exit = handle.wait().await;
        assert_eq!(exit.code(), Some(3));
        assert!(!exit.is_clean());
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_clean_exit() {
        let handle = spawn_sh("exit 0");
        assert!(handle.wait().await.is_clean());
    }

    #[tokio::test]
    async fn test_terminate_with_grace_sigterm() {
        let handle = spawn_sh("sleep 30");
        assert!(handle.is_running());
        let exit = handle.terminate_with_grace(Duration::from_secs(2)).await;
        assert!(exit.is_some());
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_terminate_with_grace_escalates_to_kill() {
        let handle = spawn_sh("trap '' TERM; sleep 30");
        // give the shell a moment to install the trap
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = std::time::Instant::now();
        let exit = handle
            .terminate_with_grace(Duration::from_millis(200))
            .await;
        assert!(exit.is_some());
        assert!(!handle.is_running());
        assert!(started.elapsed() < Duration::from_millis(200) + KILL_PASS + Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_signals_after_exit_are_ignored() {
        let handle = spawn_sh("exit 0");
        handle.wait().await;
        handle.terminate();
        handle.kill();
        assert!(handle.try_exit().is_some());
    }
}
