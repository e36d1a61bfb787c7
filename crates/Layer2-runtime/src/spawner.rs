//! Process spawner - launch one applet and gate it on health

use crate::health::HealthProbe;
use crate::process::{AppletProcess, ProcessHandle};
use crate::protocol::{applet_socket_file, ENV_APPLET_ID, ENV_APPLET_SOCKET, ENV_ENGINE_SOCKET};
use crate::socket::SocketPathResolver;
use applet_foundation::{Error, Result, RuntimeConfig};
use chrono::Utc;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Kills the child when a spawn is abandoned before it is handed off
struct KillOnDrop(Option<ProcessHandle>);

impl KillOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            debug!("Spawn abandoned, killing pid {:?}", handle.pid());
            handle.kill();
        }
    }
}

/// Launches applet processes
pub struct ProcessSpawner {
    config: Arc<RuntimeConfig>,
    resolver: SocketPathResolver,
    probe: HealthProbe,
}

impl ProcessSpawner {
    pub fn new(config: Arc<RuntimeConfig>) -> Self {
        let resolver = SocketPathResolver::new(config.runtime_dir());
        let probe = HealthProbe::new(&config.health);
        Self {
            config,
            resolver,
            probe,
        }
    }

    pub fn resolver(&self) -> &SocketPathResolver {
        &self.resolver
    }

    /// Create the runtime directory
    pub fn prepare_runtime_dir(&self) -> Result<()> {
        let dir = self.resolver.base_dir();
        std::fs::create_dir_all(dir).map_err(|e| {
            Error::Spawn(format!(
                "create runtime directory {}: {}",
                dir.display(),
                e
            ))
        })
    }

    /// Start `entry_point` for `applet_id` and wait until it reports healthy.
    ///
    /// On any failure the child is terminated before the error is returned, and
    /// dropping the returned future kills it as well.
    pub async fn spawn(
        &self,
        applet_id: &str,
        entry_point: &str,
        engine_socket: &Path,
    ) -> Result<Arc<AppletProcess>> {
        self.prepare_runtime_dir()?;

        let socket_path = self.resolver.resolve(&applet_socket_file(applet_id));
        self.resolver
            .prepare(&socket_path)
            .map_err(|e| Error::spawn(applet_id, format!("prepare socket directory: {}", e)))?;
        self.resolver.remove_stale(&socket_path);

        let (program, args) = self.config.launcher.command_line(entry_point);
        let mut command = Command::new(&program);
        command
            .args(&args)
            .envs(&self.config.extra_env)
            .env(ENV_APPLET_ID, applet_id)
            .env(ENV_ENGINE_SOCKET, engine_socket)
            .env(ENV_APPLET_SOCKET, &socket_path)
            .stdin(Stdio::null());

        if self.config.inherit_stdio {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let child = command
            .spawn()
            .map_err(|e| Error::spawn(applet_id, format!("launch {}: {}", program, e)))?;
        let handle = ProcessHandle::spawn(child);
        let guard = KillOnDrop(Some(handle.clone()));

        debug!(
            "Spawned applet {} (pid {:?}), waiting for health on {}",
            applet_id,
            handle.pid(),
            socket_path.display()
        );

        if let Err(failure) = self.probe.wait_ready(&socket_path, &handle).await {
            warn!("Applet {} failed health check: {}", applet_id, failure);
            handle
                .terminate_with_grace(self.config.shutdown_grace())
                .await;
            guard.disarm();
            self.resolver.remove_stale(&socket_path);
            return Err(Error::HealthCheck(format!(
                "applet {:?}: {}",
                applet_id, failure
            )));
        }
        guard.disarm();

        info!(
            "Applet {} started (pid {:?}, socket {})",
            applet_id,
            handle.pid(),
            socket_path.display()
        );

        Ok(Arc::new(AppletProcess {
            applet_id: applet_id.to_string(),
            entry_point: entry_point.to_string(),
            socket_path,
            handle,
            started_at: Utc::now(),
        }))
    }
}
