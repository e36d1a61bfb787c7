//! Health probe - readiness gate for freshly spawned applets
//!
//! Polls `GET /__health` on the private channel at a fixed interval until a 2xx
//! arrives, the overall timeout elapses, or the process exits on its own.

use crate::client::ChannelClient;
use crate::process::ProcessHandle;
use crate::protocol::PATH_HEALTH;
use applet_foundation::HealthConfig;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::debug;

/// Why a probe did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// No 2xx within the timeout
    TimedOut(Duration),
    /// The process exited before it became healthy
    Exited(String),
}

impl std::fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeFailure::TimedOut(timeout) => write!(
                f,
                "health endpoint {} not ready within {:?}",
                PATH_HEALTH, timeout
            ),
            ProbeFailure::Exited(status) => {
                write!(f, "process exited before becoming healthy ({})", status)
            }
        }
    }
}

/// Polls one private channel until ready
#[derive(Clone)]
pub struct HealthProbe {
    client: ChannelClient,
    timeout: Duration,
    poll_interval: Duration,
}

impl HealthProbe {
    pub fn new(config: &HealthConfig) -> Self {
        Self {
            client: ChannelClient::new(),
            timeout: config.timeout(),
            poll_interval: config.poll_interval(),
        }
    }

    /// Single probe: `true` on a 2xx
    pub async fn check(&self, socket_path: &Path) -> bool {
        match self.client.get(socket_path, PATH_HEALTH).await {
            Ok(response) => response.is_success(),
            Err(_) => false,
        }
    }

    /// Poll until healthy. Dropping the future stops polling.
    pub async fn wait_ready(
        &self,
        socket_path: &Path,
        process: &ProcessHandle,
    ) -> std::result::Result<(), ProbeFailure> {
        let deadline = Instant::now() + self.timeout;
        let mut attempts = 0u32;

        loop {
            let now = Instant::now();
            if now >= deadline {
                debug!(
                    "Health probe on {} gave up after {} attempts",
                    socket_path.display(),
                    attempts
                );
                return Err(ProbeFailure::TimedOut(self.timeout));
            }
            attempts += 1;

            let remaining = deadline - now;
            tokio::select! {
                exit = process.wait() => {
                    return Err(ProbeFailure::Exited(exit.to_string()));
                }
                probe = tokio::time::timeout(remaining, self.check(socket_path)) => {
                    if matches!(probe, Ok(true)) {
                        return Ok(());
                    }
                }
            }

            let sleep_for = self.poll_interval.min(deadline.saturating_duration_since(Instant::now()));
            tokio::select! {
                exit = process.wait() => {
                    return Err(ProbeFailure::Exited(exit.to_string()));
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }
}
