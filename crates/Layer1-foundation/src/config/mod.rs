//! Config - runtime settings
//!
//! - `runtime.rs` - RuntimeConfig, launcher, health/restart policy

mod runtime;

pub use runtime::{
    AppletEntry, HealthConfig, Launcher, RestartConfig, RuntimeConfig, ENV_BASE_DIR, ENV_LAUNCHER,
    RUNTIME_CONFIG_FILE,
};
