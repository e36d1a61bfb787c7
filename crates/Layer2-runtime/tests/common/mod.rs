//! Shared fixtures for the runtime integration tests

#![allow(dead_code)]

use applet_foundation::{HealthConfig, Launcher, RestartConfig, Result, RuntimeConfig};
use applet_runtime::{AppletManager, FileContext, FileStore, NullDispatcher};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const APPLET: &str = "echo";

/// Path of the fixture applet built alongside the tests
pub fn echo_applet() -> String {
    env!("CARGO_BIN_EXE_echo-applet").to_string()
}

/// Fast timings, quiet children, everything under `dir`
pub fn test_config(dir: &Path) -> RuntimeConfig {
    let mut config = RuntimeConfig::default()
        .with_base_dir(dir.join("rt"))
        .with_launcher(Launcher::Direct);
    config.inherit_stdio = false;
    config.health = HealthConfig {
        timeout_ms: 5_000,
        poll_interval_ms: 20,
    };
    config.restart = RestartConfig {
        max_consecutive: 3,
        base_delay_ms: 50,
        max_delay_ms: 200,
        max_exponent: 5,
        attempt_timeout_ms: 5_000,
    };
    config.shutdown_grace_ms = 500;
    config.call_timeout_ms = 5_000;
    config
}

pub struct Harness {
    pub dir: TempDir,
    pub manager: AppletManager,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    pub fn with_config(customize: impl FnOnce(RuntimeConfig) -> RuntimeConfig) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = customize(test_config(dir.path()));
        let manager = AppletManager::new(config, Arc::new(NullDispatcher));
        manager.register_applet(APPLET, echo_applet());
        Self { dir, manager }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|content| content.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

pub fn read_events(path: &Path) -> Vec<Value> {
    read_lines(path)
        .iter()
        .map(|line| serde_json::from_str(line).expect("event line is JSON"))
        .collect()
}

/// `true` while a process with this pid exists
pub fn pid_alive(pid: u32) -> bool {
    // SAFETY: signal 0 only checks for existence
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

// ============================================================================
// In-memory file store
// ============================================================================

#[derive(Default)]
pub struct MemoryFileStore {
    files: Mutex<HashMap<String, Value>>,
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn store(
        &self,
        ctx: &FileContext,
        name: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<Value> {
        let mut files = self.files.lock();
        let id = format!("f-{}", files.len() + 1);
        let metadata = json!({
            "id": id,
            "name": name,
            "contentType": content_type,
            "size": data.len(),
            "appletId": ctx.applet_id,
            "tenantId": ctx.tenant_id,
        });
        files.insert(id, metadata.clone());
        Ok(metadata)
    }

    async fn get(&self, _ctx: &FileContext, id: &str) -> Result<Option<Value>> {
        Ok(self.files.lock().get(id).cloned())
    }

    async fn delete(&self, _ctx: &FileContext, id: &str) -> Result<bool> {
        Ok(self.files.lock().remove(id).is_some())
    }
}
