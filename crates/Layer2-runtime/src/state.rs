//! Applet supervision state machine
//!
//! Every lifecycle change goes through [`AppletState::next`], so the restart,
//! backoff and give-up rules read as one table instead of scattered counters.

use serde::{Deserialize, Serialize};

/// Supervision state of one applet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppletState {
    /// First spawn in flight
    Starting,

    /// A healthy process is tracked
    Running,

    /// Waiting out the backoff before restart attempt `attempt`
    Restarting { attempt: u32 },

    /// The crash monitor stopped retrying
    GivenUp,
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// A process passed its health probe and was registered
    Spawned,

    /// The monitor scheduled restart attempt `attempt` (after an exit or a failed restart)
    RetryScheduled { attempt: u32 },

    /// A restart attempt failed; `attempts` consecutive failures so far
    RestartFailed { attempts: u32, max: u32 },
}

impl AppletState {
    /// Transition table
    pub fn next(self, event: SupervisorEvent) -> AppletState {
        use AppletState::*;
        use SupervisorEvent::*;

        match (self, event) {
            // a foreground ensure can revive a given-up applet
            (_, Spawned) => Running,

            (GivenUp, _) => GivenUp,

            (Starting | Running | Restarting { .. }, RetryScheduled { attempt }) => {
                Restarting { attempt }
            }

            (Running, RestartFailed { .. }) => Running,
            (Starting | Restarting { .. }, RestartFailed { attempts, max }) => {
                if attempts >= max {
                    GivenUp
                } else {
                    Restarting { attempt: attempts }
                }
            }
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AppletState::Starting => "Starting",
            AppletState::Running => "Running",
            AppletState::Restarting { .. } => "Restarting",
            AppletState::GivenUp => "GivenUp",
        }
    }
}

impl std::fmt::Display for AppletState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppletState::Restarting { attempt } => write!(f, "Restarting (attempt {})", attempt),
            other => write!(f, "{}", other.display_name()),
        }
    }
}
