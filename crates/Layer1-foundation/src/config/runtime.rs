//! Runtime Config - applet runtime settings
//!
//! Every field has a default, so an empty `{}` file is a valid configuration.
//! Durations are stored as milliseconds to keep the JSON readable.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Config file name
pub const RUNTIME_CONFIG_FILE: &str = "config.json";

/// Environment override for the runtime directory
pub const ENV_BASE_DIR: &str = "APPLETD_BASE_DIR";

/// Environment override for the launcher (`direct` or a program name)
pub const ENV_LAUNCHER: &str = "APPLETD_LAUNCHER";

/// Directory under the user config dir holding the global config
const GLOBAL_DIR_NAME: &str = "appletd";

/// Directory under a project root holding the project config
const PROJECT_DIR_NAME: &str = ".appletd";

/// Default runtime directory name under the system temp dir
const DEFAULT_RUNTIME_DIR: &str = "applet-engine";

// ============================================================================
// Launcher
// ============================================================================

/// How an applet entry point is turned into a process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Launcher {
    /// Run `program args... <entry_point>`
    Interpreter {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Execute the entry point itself
    Direct,
}

impl Default for Launcher {
    fn default() -> Self {
        Self::Interpreter {
            program: "bun".to_string(),
            args: vec!["run".to_string()],
        }
    }
}

impl Launcher {
    /// Parse the `APPLETD_LAUNCHER` / `--launcher` form
    pub fn from_spec(spec: &str) -> Self {
        let spec = spec.trim();
        if spec.is_empty() {
            return Self::default();
        }
        if spec.eq_ignore_ascii_case("direct") {
            return Self::Direct;
        }
        let mut parts = spec.split_whitespace().map(str::to_string);
        // split_whitespace on a non-empty trimmed string yields at least one part
        let program = parts.next().unwrap_or_default();
        Self::Interpreter {
            program,
            args: parts.collect(),
        }
    }

    /// Program and arguments for a given entry point
    pub fn command_line(&self, entry_point: &str) -> (String, Vec<String>) {
        match self {
            Self::Interpreter { program, args } => {
                let mut argv = args.clone();
                argv.push(entry_point.to_string());
                (program.clone(), argv)
            }
            Self::Direct => (entry_point.to_string(), Vec::new()),
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Health probe timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthConfig {
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 8_000,
            poll_interval_ms: 150,
        }
    }
}

impl HealthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Crash restart policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RestartConfig {
    /// Consecutive failed restarts before the monitor gives up
    pub max_consecutive: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Exponent cap for the doubling backoff
    pub max_exponent: u32,
    /// Upper bound for one restart spawn (health probe included)
    pub attempt_timeout_ms: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            max_consecutive: 10,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_exponent: 5,
            attempt_timeout_ms: 30_000,
        }
    }
}

impl RestartConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// An applet registered at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppletEntry {
    pub id: String,
    pub entry_point: String,
}

// ============================================================================
// Runtime Config
// ============================================================================

/// Applet runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    /// Runtime directory for sockets (defaults to `$TMP/applet-engine`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,

    pub launcher: Launcher,

    /// Extra environment handed to every spawned applet
    pub extra_env: HashMap<String, String>,

    /// Inherit stdout/stderr from the host
    pub inherit_stdio: bool,

    pub health: HealthConfig,

    pub restart: RestartConfig,

    pub shutdown_grace_ms: u64,

    pub call_timeout_ms: u64,

    pub max_upload_bytes: usize,

    pub max_rpc_body_bytes: usize,

    pub applets: Vec<AppletEntry>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            launcher: Launcher::default(),
            extra_env: HashMap::new(),
            inherit_stdio: true,
            health: HealthConfig::default(),
            restart: RestartConfig::default(),
            shutdown_grace_ms: 3_000,
            call_timeout_ms: 30_000,
            max_upload_bytes: 50 << 20,
            max_rpc_body_bytes: 1 << 20,
            applets: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn with_launcher(mut self, launcher: Launcher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.insert(key.into(), value.into());
        self
    }

    pub fn with_applet(mut self, id: impl Into<String>, entry_point: impl Into<String>) -> Self {
        self.applets.push(AppletEntry {
            id: id.into(),
            entry_point: entry_point.into(),
        });
        self
    }

    /// Effective runtime directory
    pub fn runtime_dir(&self) -> PathBuf {
        match &self.base_dir {
            Some(dir) if !dir.as_os_str().is_empty() => dir.clone(),
            _ => std::env::temp_dir().join(DEFAULT_RUNTIME_DIR),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// `<config dir>/appletd/config.json`
    pub fn global_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(GLOBAL_DIR_NAME).join(RUNTIME_CONFIG_FILE))
    }

    /// `<root>/.appletd/config.json`
    pub fn project_path(root: &Path) -> PathBuf {
        root.join(PROJECT_DIR_NAME).join(RUNTIME_CONFIG_FILE)
    }

    /// Global + project merge, then environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::new();

        if let Some(path) = Self::global_path() {
            if let Some(global) = Self::read_optional(&path)? {
                debug!("Loaded global config from {}", path.display());
                config = global;
            }
        }

        if let Ok(cwd) = std::env::current_dir() {
            let path = Self::project_path(&cwd);
            if let Some(project) = Self::read_optional(&path)? {
                debug!("Merging project config from {}", path.display());
                config.merge(project);
            }
        }

        config.apply_env();
        Ok(config)
    }

    /// Load a single explicit file, then environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let mut config = Self::parse_file(path, &content)?;
        config.apply_env();
        Ok(config)
    }

    /// `None` when the file does not exist; parse errors still surface
    pub fn read_optional(path: &Path) -> Result<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse_file(path, &content).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Config(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Write as pretty JSON, creating the parent directory
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| {
                Error::Config(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write {}: {}", path.display(), e)))
    }

    fn parse_file(path: &Path, content: &str) -> Result<Self> {
        Self::from_json(content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Project settings win; applet lists are concatenated with project entries
    /// replacing global ones of the same id.
    pub fn merge(&mut self, other: RuntimeConfig) {
        let mut applets = std::mem::take(&mut self.applets);
        applets.retain(|existing| !other.applets.iter().any(|a| a.id == existing.id));
        applets.extend(other.applets.iter().cloned());

        let mut extra_env = std::mem::take(&mut self.extra_env);
        extra_env.extend(other.extra_env.clone());

        let base_dir = other.base_dir.clone().or_else(|| self.base_dir.take());

        *self = other;
        self.applets = applets;
        self.extra_env = extra_env;
        self.base_dir = base_dir;
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(ENV_BASE_DIR) {
            if !dir.trim().is_empty() {
                self.base_dir = Some(PathBuf::from(dir.trim()));
            }
        }
        if let Ok(spec) = std::env::var(ENV_LAUNCHER) {
            if !spec.trim().is_empty() {
                self.launcher = Launcher::from_spec(&spec);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.health.timeout(), Duration::from_secs(8));
        assert_eq!(config.health.poll_interval(), Duration::from_millis(150));
        assert_eq!(config.restart.max_consecutive, 10);
        assert_eq!(config.restart.max_delay(), Duration::from_secs(30));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(3));
        assert_eq!(config.max_upload_bytes, 50 * 1024 * 1024);
        assert_eq!(
            config.launcher.command_line("index.ts"),
            ("bun".to_string(), vec!["run".to_string(), "index.ts".to_string()])
        );
    }

    #[test]
    fn test_empty_json_is_default() {
        let config = RuntimeConfig::from_json("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn test_parse_camel_case() {
        let config = RuntimeConfig::from_json(
            r#"{
                "baseDir": "/var/run/applets",
                "launcher": {"kind": "direct"},
                "restart": {"maxConsecutive": 3},
                "applets": [{"id": "bichat", "entryPoint": "modules/bichat/index.ts"}]
            }"#,
        )
        .unwrap();

        assert_eq!(config.runtime_dir(), PathBuf::from("/var/run/applets"));
        assert_eq!(config.launcher, Launcher::Direct);
        assert_eq!(config.restart.max_consecutive, 3);
        assert_eq!(config.restart.base_delay_ms, 1_000);
        assert_eq!(config.applets[0].entry_point, "modules/bichat/index.ts");
    }

    #[test]
    fn test_launcher_from_spec() {
        assert_eq!(Launcher::from_spec("direct"), Launcher::Direct);
        assert_eq!(
            Launcher::from_spec("node --enable-source-maps"),
            Launcher::Interpreter {
                program: "node".to_string(),
                args: vec!["--enable-source-maps".to_string()],
            }
        );
        assert_eq!(Launcher::from_spec("  "), Launcher::default());
        assert_eq!(
            Launcher::Direct.command_line("/opt/applets/bin"),
            ("/opt/applets/bin".to_string(), Vec::new())
        );
    }

    #[test]
    fn test_merge_project_over_global() {
        let mut global = RuntimeConfig::new()
            .with_base_dir("/global")
            .with_applet("a", "a-global.ts")
            .with_applet("b", "b.ts")
            .with_env("SHARED", "global");
        let project = RuntimeConfig::new()
            .with_applet("a", "a-project.ts")
            .with_env("ONLY_PROJECT", "1");

        global.merge(project);

        assert_eq!(global.base_dir, Some(PathBuf::from("/global")));
        assert_eq!(global.applets.len(), 2);
        assert!(global
            .applets
            .iter()
            .any(|a| a.id == "a" && a.entry_point == "a-project.ts"));
        assert_eq!(global.extra_env.get("SHARED").map(String::as_str), Some("global"));
        assert_eq!(global.extra_env.get("ONLY_PROJECT").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_save_and_read_optional() {
        let dir = tempfile::tempdir().unwrap();
        let path = RuntimeConfig::project_path(dir.path());
        assert!(path.ends_with(".appletd/config.json"));

        assert!(RuntimeConfig::read_optional(&path).unwrap().is_none());

        let config = RuntimeConfig::new().with_applet("bichat", "index.ts");
        config.save_to(&path).unwrap();

        assert_eq!(RuntimeConfig::read_optional(&path).unwrap(), Some(config));
    }

    #[test]
    fn test_unparseable_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RUNTIME_CONFIG_FILE);
        std::fs::write(&path, "{not json").unwrap();

        let err = RuntimeConfig::read_optional(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(RuntimeConfig::load_from(&path).is_err());
    }
}
