//! Applet Manager - lifecycle of applet processes
//!
//! Features:
//! - Lazy, deduplicated start (`ensure_started`)
//! - Crash monitoring with exponential backoff restarts
//! - Shared control-plane socket for applet → host calls
//! - Bounded shutdown of everything it spawned

use crate::client::ChannelClient;
use crate::control_plane::{ControlPlane, ControlPlaneLimits};
use crate::dispatch::RpcDispatcher;
use crate::process::{AppletProcess, KILL_PASS};
use crate::protocol::{applet_socket_file, ENGINE_SOCKET_FILE};
use crate::spawner::ProcessSpawner;
use crate::state::{AppletState, SupervisorEvent};
use crate::storage::{FileStore, FileStoreLookup};
use crate::supervisor::{self, RestartPolicy};
use applet_foundation::{Error, Result, RuntimeConfig};
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bookkeeping guarded by one lock. Never held across an await.
#[derive(Default)]
pub(crate) struct ManagerState {
    processes: HashMap<String, Arc<AppletProcess>>,
    restart_attempts: HashMap<String, u32>,
    states: HashMap<String, AppletState>,
    entry_points: HashMap<String, String>,
    file_stores: HashMap<String, Arc<dyn FileStore>>,
    start_locks: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
    control_plane: Option<ControlPlane>,
    engine_socket: Option<PathBuf>,
    job_cancel: Option<CancellationToken>,
    shutting_down: bool,
}

/// State shared between the manager handle, crash monitors and the control plane
pub(crate) struct ManagerShared {
    pub(crate) config: Arc<RuntimeConfig>,
    pub(crate) spawner: ProcessSpawner,
    pub(crate) policy: RestartPolicy,
    pub(crate) client: ChannelClient,
    pub(crate) shutdown: CancellationToken,
    dispatcher: Arc<dyn RpcDispatcher>,
    state: Mutex<ManagerState>,
}

impl ManagerShared {
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    pub(crate) fn live_process(&self, applet_id: &str) -> Option<Arc<AppletProcess>> {
        self.state
            .lock()
            .processes
            .get(applet_id)
            .filter(|process| process.is_running())
            .cloned()
    }

    /// `true` while `process` is still the tracked instance for its applet
    pub(crate) fn is_current(&self, process: &Arc<AppletProcess>) -> bool {
        self.state
            .lock()
            .processes
            .get(&process.applet_id)
            .map_or(false, |tracked| Arc::ptr_eq(tracked, process))
    }

    pub(crate) fn start_lock(&self, applet_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.state
            .lock()
            .start_locks
            .entry(applet_id.to_string())
            .or_default()
            .clone()
    }

    /// Spawn through the health gate. Shutdown abandons the spawn, which kills the
    /// child and removes its socket.
    pub(crate) async fn spawn_until_shutdown(
        &self,
        applet_id: &str,
        entry_point: &str,
        engine_socket: &Path,
    ) -> Result<Arc<AppletProcess>> {
        tokio::select! {
            result = self.spawner.spawn(applet_id, entry_point, engine_socket) => result,
            _ = self.shutdown.cancelled() => {
                debug!("Shutdown began while {} was starting, abandoning spawn", applet_id);
                let resolver = self.spawner.resolver();
                resolver.remove_stale(&resolver.resolve(&applet_socket_file(applet_id)));
                Err(Error::ShuttingDown)
            }
        }
    }

    pub(crate) fn engine_socket_path(&self) -> Option<PathBuf> {
        self.state.lock().engine_socket.clone()
    }

    pub(crate) fn restart_attempts(&self, applet_id: &str) -> u32 {
        self.state
            .lock()
            .restart_attempts
            .get(applet_id)
            .copied()
            .unwrap_or(0)
    }

    /// Increment the consecutive-restart counter and move into `Restarting`
    pub(crate) fn schedule_retry(&self, applet_id: &str) -> u32 {
        let mut state = self.state.lock();
        let counter = state
            .restart_attempts
            .entry(applet_id.to_string())
            .or_insert(0);
        *counter += 1;
        let attempt = *counter;
        apply_event(
            &mut state,
            applet_id,
            SupervisorEvent::RetryScheduled { attempt },
        );
        attempt
    }

    pub(crate) fn transition(&self, applet_id: &str, event: SupervisorEvent) -> Option<AppletState> {
        let mut state = self.state.lock();
        apply_event(&mut state, applet_id, event)
    }

    /// Track a healthy process and reset its restart counter. Returns `false` when
    /// shutdown has begun, in which case the caller owns the process and must stop it.
    pub(crate) fn register_process(&self, process: &Arc<AppletProcess>) -> bool {
        let mut state = self.state.lock();
        if state.shutting_down {
            return false;
        }
        let applet_id = process.applet_id.clone();
        state.processes.insert(applet_id.clone(), process.clone());
        state.restart_attempts.insert(applet_id.clone(), 0);
        apply_event(&mut state, &applet_id, SupervisorEvent::Spawned);
        true
    }

    /// Start the control plane if it is not serving yet
    fn ensure_control_plane(self: &Arc<Self>) -> Result<PathBuf> {
        let mut state = self.state.lock();
        if state.shutting_down {
            return Err(Error::ShuttingDown);
        }
        if let Some(path) = &state.engine_socket {
            return Ok(path.clone());
        }

        self.spawner.prepare_runtime_dir()?;
        let resolver = self.spawner.resolver();
        let socket_path = resolver.resolve(ENGINE_SOCKET_FILE);
        resolver.prepare(&socket_path).map_err(|e| {
            Error::ControlPlane(format!("prepare {}: {}", socket_path.display(), e))
        })?;
        resolver.remove_stale(&socket_path);

        let stores = Arc::downgrade(self) as std::sync::Weak<dyn FileStoreLookup>;
        let limits = ControlPlaneLimits {
            max_upload_bytes: self.config.max_upload_bytes,
            max_rpc_body_bytes: self.config.max_rpc_body_bytes,
        };
        let control_plane =
            ControlPlane::start(&socket_path, self.dispatcher.clone(), stores, limits)?;

        info!("Control plane listening on {}", socket_path.display());
        state.control_plane = Some(control_plane);
        state.engine_socket = Some(socket_path.clone());
        Ok(socket_path)
    }
}

impl FileStoreLookup for ManagerShared {
    fn file_store(&self, applet_id: &str) -> Option<Arc<dyn FileStore>> {
        self.state.lock().file_stores.get(applet_id).cloned()
    }
}

fn apply_event(
    state: &mut ManagerState,
    applet_id: &str,
    event: SupervisorEvent,
) -> Option<AppletState> {
    let current = state.states.get(applet_id).copied()?;
    let next = current.next(event);
    if next != current {
        debug!("Applet {}: {} -> {}", applet_id, current, next);
    }
    state.states.insert(applet_id.to_string(), next);
    Some(next)
}

/// Applet ids end up in socket file names
fn validate_applet_id(applet_id: &str) -> Result<()> {
    let valid = !applet_id.is_empty()
        && applet_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && applet_id != "."
        && applet_id != "..";
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "invalid applet id {:?}",
            applet_id
        )))
    }
}

// ============================================================================
// AppletManager
// ============================================================================

/// Handle to the runtime. Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct AppletManager {
    pub(crate) shared: Arc<ManagerShared>,
}

impl AppletManager {
    pub fn new(config: RuntimeConfig, dispatcher: Arc<dyn RpcDispatcher>) -> Self {
        let config = Arc::new(config);
        let mut state = ManagerState::default();
        for applet in &config.applets {
            state
                .entry_points
                .insert(applet.id.clone(), applet.entry_point.clone());
        }

        Self {
            shared: Arc::new(ManagerShared {
                spawner: ProcessSpawner::new(config.clone()),
                policy: RestartPolicy::from_config(&config.restart),
                client: ChannelClient::new(),
                shutdown: CancellationToken::new(),
                dispatcher,
                state: Mutex::new(state),
                config,
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// Remember the entry point used when `ensure_started` is called without one
    pub fn register_applet(&self, applet_id: impl Into<String>, entry_point: impl Into<String>) {
        self.shared
            .state
            .lock()
            .entry_points
            .insert(applet_id.into(), entry_point.into());
    }

    /// Attach the storage backend served on `/files/*` for this applet
    pub fn register_file_store(&self, applet_id: impl Into<String>, store: Arc<dyn FileStore>) {
        self.shared
            .state
            .lock()
            .file_stores
            .insert(applet_id.into(), store);
    }

    /// Cancelled as part of shutdown
    pub fn set_job_cancel(&self, token: CancellationToken) {
        self.shared.state.lock().job_cancel = Some(token);
    }

    /// Control-plane socket address, once serving
    pub fn engine_socket_path(&self) -> Option<PathBuf> {
        self.shared.engine_socket_path()
    }

    /// Start the control plane if needed and return its address
    pub fn ensure_control_plane(&self) -> Result<PathBuf> {
        self.shared.ensure_control_plane()
    }

    /// Tracked process for `applet_id`, live or not
    pub fn process(&self, applet_id: &str) -> Option<Arc<AppletProcess>> {
        self.shared.state.lock().processes.get(applet_id).cloned()
    }

    pub fn applet_state(&self, applet_id: &str) -> Option<AppletState> {
        self.shared.state.lock().states.get(applet_id).copied()
    }

    pub fn restart_attempts(&self, applet_id: &str) -> u32 {
        self.shared.restart_attempts(applet_id)
    }

    /// Ids of applets with a live process, sorted
    pub fn running_applets(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .shared
            .state
            .lock()
            .processes
            .iter()
            .filter(|(_, process)| process.is_running())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Return the live process for `applet_id`, starting it first if needed.
    ///
    /// Concurrent callers for the same applet share one spawn. `entry_point` falls
    /// back to the registered one.
    pub async fn ensure_started(
        &self,
        applet_id: &str,
        entry_point: Option<&str>,
    ) -> Result<Arc<AppletProcess>> {
        validate_applet_id(applet_id)?;
        let entry_point = self.resolve_entry_point(applet_id, entry_point)?;
        let engine_socket = self.shared.ensure_control_plane()?;

        if let Some(process) = self.shared.live_process(applet_id) {
            return Ok(process);
        }

        let lock = self.shared.start_lock(applet_id);
        let _guard = lock.lock().await;

        if self.shared.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }
        if let Some(process) = self.shared.live_process(applet_id) {
            return Ok(process);
        }

        let first_start = {
            let mut state = self.shared.state.lock();
            match state.states.get(applet_id) {
                Some(_) => false,
                None => {
                    state
                        .states
                        .insert(applet_id.to_string(), AppletState::Starting);
                    true
                }
            }
        };

        let process = match self
            .shared
            .spawn_until_shutdown(applet_id, &entry_point, &engine_socket)
            .await
        {
            Ok(process) => process,
            Err(e) => {
                if first_start {
                    let mut state = self.shared.state.lock();
                    if state.states.get(applet_id) == Some(&AppletState::Starting) {
                        state.states.remove(applet_id);
                    }
                }
                return Err(e);
            }
        };

        if !self.shared.register_process(&process) {
            warn!(
                "Shutdown began while {} was starting, stopping it",
                applet_id
            );
            process
                .handle
                .terminate_with_grace(self.shared.config.shutdown_grace())
                .await;
            return Err(Error::ShuttingDown);
        }

        tokio::spawn(supervisor::monitor(self.shared.clone(), process.clone()));
        Ok(process)
    }

    fn resolve_entry_point(&self, applet_id: &str, entry_point: Option<&str>) -> Result<String> {
        let given = entry_point.map(str::trim).filter(|e| !e.is_empty());
        if let Some(entry_point) = given {
            return Ok(entry_point.to_string());
        }
        self.shared
            .state
            .lock()
            .entry_points
            .get(applet_id)
            .filter(|e| !e.trim().is_empty())
            .cloned()
            .ok_or_else(|| {
                Error::Config(format!(
                    "entry point is required for applet {:?}",
                    applet_id
                ))
            })
    }

    /// Stop everything: monitors, processes, the control plane and the job token.
    ///
    /// Processes get SIGTERM and up to the shutdown grace (or `deadline`, if
    /// shorter) before SIGKILL. Later `ensure_started` calls fail.
    pub async fn shutdown(&self, deadline: Option<Duration>) -> Result<()> {
        let (processes, control_plane, job_cancel) = {
            let mut state = self.shared.state.lock();
            if state.shutting_down && state.processes.is_empty() && state.control_plane.is_none()
            {
                return Ok(());
            }
            state.shutting_down = true;
            let processes: Vec<Arc<AppletProcess>> =
                state.processes.drain().map(|(_, process)| process).collect();
            (processes, state.control_plane.take(), state.job_cancel.take())
        };

        self.shared.shutdown.cancel();
        if let Some(token) = job_cancel {
            token.cancel();
        }

        info!("Shutting down {} applet process(es)", processes.len());

        for process in &processes {
            process.handle.terminate();
        }

        let grace = self.shared.config.shutdown_grace();
        let window = deadline.map_or(grace, |deadline| deadline.min(grace));
        let all_exited = join_all(processes.iter().map(|process| process.handle.wait()));
        if tokio::time::timeout(window, all_exited).await.is_err() {
            for process in processes.iter().filter(|process| process.is_running()) {
                warn!(
                    "Applet {} (pid {:?}) ignored SIGTERM, killing",
                    process.applet_id,
                    process.pid()
                );
                process.handle.kill();
            }
            let reaped = join_all(processes.iter().map(|process| process.handle.wait()));
            if tokio::time::timeout(KILL_PASS, reaped).await.is_err() {
                warn!("Some applet processes were not reaped after SIGKILL");
            }
        }

        for process in &processes {
            self.shared.spawner.resolver().remove_stale(&process.socket_path);
        }

        if let Some(control_plane) = control_plane {
            control_plane.stop().await;
        }

        info!("Applet runtime stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::NullDispatcher;

    fn manager() -> AppletManager {
        AppletManager::new(RuntimeConfig::default(), Arc::new(NullDispatcher))
    }

    #[test]
    fn test_validate_applet_id() {
        assert!(validate_applet_id("bichat").is_ok());
        assert!(validate_applet_id("my-app_2.v1").is_ok());
        assert!(validate_applet_id("").is_err());
        assert!(validate_applet_id("..").is_err());
        assert!(validate_applet_id("a/b").is_err());
        assert!(validate_applet_id("a b").is_err());
    }

    #[test]
    fn test_entry_point_resolution() {
        let manager = manager();
        assert!(manager.resolve_entry_point("bichat", None).is_err());
        assert!(manager.resolve_entry_point("bichat", Some("  ")).is_err());

        manager.register_applet("bichat", "/srv/bichat/main.ts");
        assert_eq!(
            manager.resolve_entry_point("bichat", None).unwrap(),
            "/srv/bichat/main.ts"
        );
        assert_eq!(
            manager
                .resolve_entry_point("bichat", Some("/tmp/other.ts"))
                .unwrap(),
            "/tmp/other.ts"
        );
    }

    #[test]
    fn test_configured_applets_are_registered() {
        let config = RuntimeConfig::default().with_applet("crm", "/srv/crm/index.ts");
        let manager = AppletManager::new(config, Arc::new(NullDispatcher));
        assert_eq!(
            manager.resolve_entry_point("crm", None).unwrap(),
            "/srv/crm/index.ts"
        );
    }

    #[tokio::test]
    async fn test_missing_entry_point_is_rejected_before_any_work() {
        let manager = manager();
        let err = manager.ensure_started("bichat", None).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)), "unexpected error: {}", err);
        assert!(err.to_string().contains("entry point is required"));
        assert!(manager.engine_socket_path().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_without_processes_is_idempotent() {
        let manager = manager();
        manager.shutdown(None).await.unwrap();
        manager.shutdown(None).await.unwrap();
        assert!(manager.running_applets().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_job_token() {
        let manager = manager();
        let token = CancellationToken::new();
        manager.set_job_cancel(token.clone());
        manager.shutdown(None).await.unwrap();
        assert!(token.is_cancelled());
    }
}
