//! Crash monitor and restart policy
//!
//! One monitor task runs per tracked process. When the process exits on its own
//! the monitor restarts it with exponential backoff until a spawn succeeds, the
//! consecutive-restart budget runs out, or the manager shuts down.

use crate::manager::ManagerShared;
use crate::process::AppletProcess;
use crate::state::SupervisorEvent;
use applet_foundation::{Error, RestartConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Backoff and give-up rules for crash restarts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_exponent: u32,
    /// Consecutive failed restarts before giving up
    pub max_attempts: u32,
    /// Upper bound for a single restart (spawn + health)
    pub attempt_timeout: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from_config(&RestartConfig::default())
    }
}

impl RestartPolicy {
    pub fn from_config(config: &RestartConfig) -> Self {
        Self {
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            max_exponent: config.max_exponent,
            max_attempts: config.max_consecutive,
            attempt_timeout: config.attempt_timeout(),
        }
    }

    /// Delay before restart attempt `attempt` (1-based): base, 2x base, 4x base, ...
    /// capped at `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(self.max_exponent);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn should_give_up(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

/// Watch `process` and keep its applet alive
pub(crate) async fn monitor(shared: Arc<ManagerShared>, mut current: Arc<AppletProcess>) {
    let applet_id = current.applet_id.clone();
    let entry_point = current.entry_point.clone();

    loop {
        let exit = tokio::select! {
            exit = current.handle.wait() => exit,
            _ = shared.shutdown.cancelled() => return,
        };

        if shared.is_shutting_down() {
            return;
        }
        if !shared.is_current(&current) {
            debug!("Applet {} was replaced, monitor exiting", applet_id);
            return;
        }

        if exit.is_clean() {
            info!("Applet {} exited", applet_id);
        } else {
            error!("Applet {} crashed: {}", applet_id, exit);
        }

        // retry until a restart sticks
        let restarted = loop {
            let attempt = shared.schedule_retry(&applet_id);
            let delay = shared.policy.delay_for(attempt);
            warn!(
                "Restarting applet {} in {:?} (attempt {}/{})",
                applet_id, delay, attempt, shared.policy.max_attempts
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shared.shutdown.cancelled() => return,
            }

            let lock = shared.start_lock(&applet_id);
            let _guard = lock.lock().await;

            if shared.is_shutting_down() {
                return;
            }
            if let Some(live) = shared.live_process(&applet_id) {
                if !Arc::ptr_eq(&live, &current) {
                    debug!("Applet {} already respawned in the foreground", applet_id);
                    return;
                }
            }

            let result = match shared.engine_socket_path() {
                Some(engine_socket) => {
                    let spawn =
                        shared.spawn_until_shutdown(&applet_id, &entry_point, &engine_socket);
                    match tokio::time::timeout(shared.policy.attempt_timeout, spawn).await {
                        Ok(result) => result,
                        Err(_) => Err(Error::Timeout(format!(
                            "restart of applet {:?} exceeded {:?}",
                            applet_id, shared.policy.attempt_timeout
                        ))),
                    }
                }
                None => Err(Error::ControlPlane("control plane is not running".into())),
            };

            match result {
                Ok(process) => break process,
                Err(_) if shared.is_shutting_down() => return,
                Err(e) => {
                    let attempts = shared.restart_attempts(&applet_id);
                    error!(
                        "Restart attempt {} for applet {} failed: {}",
                        attempts, applet_id, e
                    );
                    shared.transition(
                        &applet_id,
                        SupervisorEvent::RestartFailed {
                            attempts,
                            max: shared.policy.max_attempts,
                        },
                    );
                    if shared.policy.should_give_up(attempts) {
                        error!(
                            "Applet {} exceeded {} restart attempts, giving up",
                            applet_id, shared.policy.max_attempts
                        );
                        return;
                    }
                }
            }
        };

        if !shared.register_process(&restarted) {
            restarted
                .handle
                .terminate_with_grace(shared.config.shutdown_grace())
                .await;
            return;
        }

        info!(
            "Applet {} restarted (pid {:?})",
            applet_id,
            restarted.pid()
        );
        current = restarted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence() {
        let policy = RestartPolicy::default();
        let delays: Vec<u64> = (1..=8).map(|n| policy.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn test_backoff_never_exceeds_cap() {
        let policy = RestartPolicy {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
            max_exponent: 5,
            max_attempts: 10,
            attempt_timeout: Duration::from_secs(30),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(3));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(3));
    }

    #[test]
    fn test_give_up_threshold() {
        let policy = RestartPolicy::default();
        assert!(!policy.should_give_up(9));
        assert!(policy.should_give_up(10));
        assert!(policy.should_give_up(11));
    }
}
