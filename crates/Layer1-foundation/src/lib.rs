//! # applet-foundation
//!
//! Foundation layer for the applet runtime:
//! - Error: shared error taxonomy (`Error`, `PublicCallError`)
//! - Config: runtime settings (`RuntimeConfig`, `Launcher`, health/restart policy),
//!   loaded from global + project JSON files
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  appletd (Layer4-cli)                                   │
//! │                     │                                   │
//! │                     ▼                                   │
//! │  AppletManager (Layer2-runtime)                         │
//! │  ├── Spawner + Health Probe                             │
//! │  ├── Crash Monitor (state machine + backoff)            │
//! │  ├── Control Plane (rpc, files)                         │
//! │  └── Bridges (job, public rpc, websocket)               │
//! │                     │                                   │
//! │                     ▼                                   │
//! │  applet-foundation (Error, RuntimeConfig)               │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, PublicCallError, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    AppletEntry, HealthConfig, Launcher, RestartConfig, RuntimeConfig, ENV_BASE_DIR, ENV_LAUNCHER,
    RUNTIME_CONFIG_FILE,
};
