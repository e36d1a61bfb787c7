//! # applet-runtime
//!
//! Supervises applet processes for a host server. Each applet runs as a child
//! process that serves HTTP on its own Unix socket; the host calls it through
//! fixed endpoints and applets call back through one shared control-plane socket.
//!
//! ```text
//! ┌──────────────────────── AppletManager ────────────────────────┐
//! │ ensure_started ─► ProcessSpawner ─► HealthProbe (/__health)    │
//! │                         │                                      │
//! │                   crash monitor ─► RestartPolicy (backoff)     │
//! │                                                                │
//! │ dispatch_job / call_public_method / dispatch_websocket_event   │
//! │        └──► ChannelClient ──► <applet>.sock                    │
//! │                                                                │
//! │ ControlPlane (engine.sock): /rpc, /files/{store,get,delete}    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - Lazy, deduplicated start per applet
//! - Health gate before a process is handed out
//! - Crash restarts with exponential backoff and a give-up threshold
//! - **Bounded shutdown** with SIGTERM → SIGKILL escalation

pub mod bridge;
pub mod client;
pub mod control_plane;
pub mod dispatch;
pub mod health;
pub mod manager;
pub mod process;
pub mod protocol;
pub mod socket;
pub mod spawner;
pub mod state;
pub mod storage;
pub mod supervisor;

// Manager
pub use manager::AppletManager;
pub use process::{AppletProcess, ProcessExit, ProcessHandle};
pub use state::{AppletState, SupervisorEvent};
pub use supervisor::RestartPolicy;

// Plumbing
pub use client::{ChannelClient, ChannelResponse};
pub use control_plane::{ControlPlane, ControlPlaneLimits};
pub use health::{HealthProbe, ProbeFailure};
pub use socket::{SocketPathResolver, MAX_SOCKET_PATH};
pub use spawner::ProcessSpawner;

// External seams
pub use dispatch::{DispatchRequest, DispatchResponse, NullDispatcher, RpcDispatcher};
pub use storage::{FileContext, FileStore, FileStoreLookup};
