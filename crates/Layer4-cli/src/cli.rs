//! Serve mode - run the runtime until Ctrl-C

use applet_foundation::RuntimeConfig;
use applet_runtime::{AppletManager, NullDispatcher};
use std::sync::Arc;
use tracing::{error, info};

/// Start the control plane and any eager applets, then wait for Ctrl-C
pub async fn serve(
    config: RuntimeConfig,
    applets: &[(String, String)],
    start: &[String],
) -> anyhow::Result<()> {
    // method registry is external; every /rpc call gets "method not found"
    let manager = AppletManager::new(config, Arc::new(NullDispatcher));
    for (id, entry_point) in applets {
        manager.register_applet(id.as_str(), entry_point.as_str());
    }

    let engine_socket = manager.ensure_control_plane()?;
    println!("appletd control plane: {}", engine_socket.display());

    for id in start {
        match manager.ensure_started(id, None).await {
            Ok(process) => info!(
                "Started {} (pid {:?}) on {}",
                id,
                process.pid(),
                process.socket_path.display()
            ),
            Err(e) => error!("Failed to start {}: {}", id, e),
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C, shutting down");

    manager.shutdown(None).await?;
    Ok(())
}
