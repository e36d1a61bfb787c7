//! Wire contract between the host and applet processes
//!
//! Environment handed to every applet, header names and fixed endpoint paths.

// ============================================================================
// Bootstrap environment
// ============================================================================

/// The applet's own identifier
pub const ENV_APPLET_ID: &str = "APPLET_ID";

/// Address of the shared control-plane socket
pub const ENV_ENGINE_SOCKET: &str = "APPLET_ENGINE_SOCKET";

/// Address the applet must serve its private channel on
pub const ENV_APPLET_SOCKET: &str = "APPLET_SOCKET";

// ============================================================================
// Headers
// ============================================================================

pub const HEADER_APPLET_ID: &str = "x-applet-id";
pub const HEADER_TENANT_ID: &str = "x-tenant-id";
pub const HEADER_USER_ID: &str = "x-user-id";
pub const HEADER_PERMISSIONS: &str = "x-permissions";
pub const HEADER_REQUEST_ID: &str = "x-request-id";
pub const HEADER_FILE_NAME: &str = "x-file-name";
pub const HEADER_CONTENT_TYPE: &str = "x-content-type";

/// Caller headers copied onto public method calls; nothing else is forwarded
pub const PUBLIC_FORWARD_HEADERS: [&str; 6] = [
    HEADER_TENANT_ID,
    HEADER_USER_ID,
    HEADER_PERMISSIONS,
    HEADER_REQUEST_ID,
    "cookie",
    "authorization",
];

// ============================================================================
// Private channel (served by the applet)
// ============================================================================

pub const PATH_HEALTH: &str = "/__health";
pub const PATH_JOB: &str = "/__job";
pub const PATH_PUBLIC_RPC: &str = "/__public_rpc";
pub const PATH_WEBSOCKET: &str = "/__ws";

// ============================================================================
// Control plane (served by the host)
// ============================================================================

pub const PATH_RPC: &str = "/rpc";
pub const PATH_FILES_STORE: &str = "/files/store";
pub const PATH_FILES_GET: &str = "/files/get";
pub const PATH_FILES_DELETE: &str = "/files/delete";

/// Control-plane socket file name under the runtime directory
pub const ENGINE_SOCKET_FILE: &str = "engine.sock";

/// Private socket file name for an applet
pub fn applet_socket_file(applet_id: &str) -> String {
    format!("{}.sock", applet_id)
}
