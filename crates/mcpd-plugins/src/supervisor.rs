//! Plugin process supervision.
//!
//! The supervisor owns every plugin's process, Unix socket file, and gRPC
//! channel. Startup runs a fixed ladder per plugin — spawn, wait for the
//! socket, dial, configure, validate, readiness-check, register — and any
//! failure rolls back every plugin already started in the same call.
//! Shutdown is graceful first (Stop RPC), then forced (kill after a short
//! exit wait), and always removes the socket file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use mcpd_config::{PluginEntry, PluginsConfig};
use mcpd_core::discover::discover_executables;

use crate::error::{PluginError, PluginResult};
use crate::instance::PluginInstance;
use crate::pipeline::PluginPipeline;
use crate::proto::v1::PluginConfig;
use crate::rpc::{GrpcPlugin, PluginRpc, connect_uds};

/// Deadline for a plugin to open its socket after spawn.
const START_TIMEOUT: Duration = Duration::from_secs(10);
/// Interval between socket dial attempts during startup.
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Per-attempt dial timeout during startup.
const SOCKET_DIAL_TIMEOUT: Duration = Duration::from_millis(100);
/// How long a stopped plugin gets to exit before being killed.
const EXIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Monotonic counter feeding socket path generation.
static SOCKET_SEQ: AtomicU64 = AtomicU64::new(0);

/// Generate a per-process-unique socket path for a plugin.
///
/// The counter is taken modulo one million to bound path length; spaces in
/// the plugin name are sanitized to hyphens.
#[allow(clippy::arithmetic_side_effects)]
fn next_socket_path(name: &str) -> PathBuf {
    let seq = SOCKET_SEQ.fetch_add(1, Ordering::Relaxed) % 1_000_000;
    let sanitized = name.replace(' ', "-");
    std::env::temp_dir().join(format!("mcpd-plugin-{sanitized}-{seq}.sock"))
}

/// Health report for one supervised plugin.
#[derive(Debug, Clone)]
pub struct PluginHealth {
    /// Plugin name.
    pub name: String,
    /// Whether the health probe succeeded.
    pub healthy: bool,
    /// Probe error, when unhealthy.
    pub error: Option<String>,
}

/// One tracked plugin: its pipeline instance, child process, and socket.
struct SupervisedPlugin {
    instance: Arc<PluginInstance>,
    process: Mutex<Child>,
    socket_path: PathBuf,
}

/// Supervises the full lifecycle of the configured plugins.
pub struct PluginSupervisor {
    config: PluginsConfig,
    pipeline: Arc<PluginPipeline>,
    plugins: RwLock<HashMap<String, SupervisedPlugin>>,
}

impl PluginSupervisor {
    /// Create a supervisor for the given plugin configuration, registering
    /// started plugins with `pipeline`.
    #[must_use]
    pub fn new(config: PluginsConfig, pipeline: Arc<PluginPipeline>) -> Self {
        Self {
            config,
            pipeline,
            plugins: RwLock::new(HashMap::new()),
        }
    }

    /// The pipeline this supervisor registers plugins with.
    #[must_use]
    pub fn pipeline(&self) -> Arc<PluginPipeline> {
        Arc::clone(&self.pipeline)
    }

    /// Names of the currently tracked plugins.
    pub async fn plugin_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Discover, start, and register every configured plugin.
    ///
    /// Plugins start in category order, then declaration order. Any
    /// failure stops every plugin already started by this call before the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotFound`] when a configured plugin has no
    /// executable, or the failing plugin's start error.
    pub async fn start_plugins(&self) -> PluginResult<()> {
        if self.config.entries.is_empty() {
            debug!("no plugins configured");
            return Ok(());
        }

        let names = self.config.plugin_names();
        let discovered = discover_executables(&self.config.dir, Some(&names)).map_err(|e| {
            warn!(dir = %self.config.dir.display(), error = %e, "plugin discovery failed");
            PluginError::NotFound {
                dir: self.config.dir.clone(),
                names: {
                    let mut sorted: Vec<String> = names.iter().cloned().collect();
                    sorted.sort();
                    sorted
                },
            }
        })?;

        let mut missing: Vec<String> = names
            .iter()
            .filter(|name| !discovered.contains_key(*name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            missing.sort();
            return Err(PluginError::NotFound {
                dir: self.config.dir.clone(),
                names: missing,
            });
        }

        for entry in self.config.entries_in_category_order() {
            let binary = &discovered[&entry.name];
            match self.start_plugin(entry, binary).await {
                Ok(supervised) => {
                    self.plugins
                        .write()
                        .await
                        .insert(entry.name.clone(), supervised);
                }
                Err(e) => {
                    warn!(plugin = %entry.name, error = %e, "plugin start failed, rolling back");
                    if let Err(stop_err) = self.stop_plugins().await {
                        warn!(error = %stop_err, "rollback produced shutdown errors");
                    }
                    return Err(e);
                }
            }
        }

        info!(count = self.plugins.read().await.len(), "all plugins started");
        Ok(())
    }

    /// Run the per-plugin start ladder.
    async fn start_plugin(
        &self,
        entry: &PluginEntry,
        binary: &Path,
    ) -> PluginResult<SupervisedPlugin> {
        let socket_path = next_socket_path(&entry.name);
        info!(
            plugin = %entry.name,
            binary = %binary.display(),
            socket = %socket_path.display(),
            "starting plugin"
        );

        let mut child = Command::new(binary)
            .arg("--address")
            .arg(&socket_path)
            .arg("--network")
            .arg("unix")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| PluginError::SpawnFailed {
                name: entry.name.clone(),
                source,
            })?;
        forward_output(&entry.name, &mut child);

        if let Err(e) = wait_for_socket(&socket_path, START_TIMEOUT).await {
            abort_start(&entry.name, &mut child, &socket_path).await;
            return Err(PluginError::SocketTimeout {
                name: entry.name.clone(),
                path: socket_path,
                timeout: e,
            });
        }

        let channel = match connect_uds(&socket_path).await {
            Ok(channel) => channel,
            Err(source) => {
                abort_start(&entry.name, &mut child, &socket_path).await;
                return Err(PluginError::DialFailed {
                    name: entry.name.clone(),
                    source,
                });
            }
        };

        let rpc: Arc<dyn PluginRpc> = Arc::new(GrpcPlugin::new(channel));
        let instance = Arc::new(PluginInstance::new(entry.name.clone(), rpc));

        if let Err(source) = instance.configure(PluginConfig::default()).await {
            abort_start(&entry.name, &mut child, &socket_path).await;
            return Err(PluginError::ConfigureFailed {
                name: entry.name.clone(),
                source,
            });
        }

        if let Some(expected) = entry.commit_hash.as_deref().filter(|h| !h.is_empty()) {
            let metadata = match instance.metadata().await {
                Ok(metadata) => metadata,
                Err(source) => {
                    abort_start(&entry.name, &mut child, &socket_path).await;
                    return Err(PluginError::MetadataFailed {
                        name: entry.name.clone(),
                        source,
                    });
                }
            };
            if metadata.commit_hash != expected {
                abort_start(&entry.name, &mut child, &socket_path).await;
                return Err(PluginError::ValidationFailed {
                    name: entry.name.clone(),
                    expected: expected.to_string(),
                    actual: metadata.commit_hash,
                });
            }
        }

        if let Err(source) = instance.check_ready().await {
            abort_start(&entry.name, &mut child, &socket_path).await;
            return Err(PluginError::NotReady {
                name: entry.name.clone(),
                source,
            });
        }

        instance.set_required(entry.required).await;
        instance.set_flows(entry.flows.iter().copied()).await;
        self.pipeline
            .register(entry.category, Arc::clone(&instance))
            .await;

        info!(plugin = %entry.name, category = %entry.category, "plugin running");
        Ok(SupervisedPlugin {
            instance,
            process: Mutex::new(child),
            socket_path,
        })
    }

    /// Stop every tracked plugin.
    ///
    /// The tracked map and the pipeline registration are cleared
    /// unconditionally; stop failures are collected and joined.
    ///
    /// # Errors
    ///
    /// Returns the single failure, or [`PluginError::ShutdownErrors`]
    /// joining several.
    pub async fn stop_plugins(&self) -> PluginResult<()> {
        let drained: Vec<(String, SupervisedPlugin)> = {
            let mut tracked = self.plugins.write().await;
            tracked.drain().collect()
        };
        self.pipeline.clear().await;

        let mut errors = Vec::new();
        for (name, plugin) in drained {
            if let Err(e) = stop_plugin(&name, &plugin).await {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.swap_remove(0))
        } else {
            Err(PluginError::ShutdownErrors { errors })
        }
    }

    /// Probe every tracked plugin's health, in name order.
    pub async fn check_health(&self) -> Vec<PluginHealth> {
        let instances: Vec<(String, Arc<PluginInstance>)> = {
            let tracked = self.plugins.read().await;
            let mut pairs: Vec<(String, Arc<PluginInstance>)> = tracked
                .iter()
                .map(|(name, plugin)| (name.clone(), Arc::clone(&plugin.instance)))
                .collect();
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            pairs
        };

        let mut reports = Vec::with_capacity(instances.len());
        for (name, instance) in instances {
            let report = match instance.check_health().await {
                Ok(()) => PluginHealth {
                    name,
                    healthy: true,
                    error: None,
                },
                Err(e) => PluginHealth {
                    name,
                    healthy: false,
                    error: Some(e.to_string()),
                },
            };
            reports.push(report);
        }
        reports
    }
}

impl std::fmt::Debug for PluginSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSupervisor")
            .field("dir", &self.config.dir)
            .finish_non_exhaustive()
    }
}

/// Forward the child's stdout/stderr lines into tracing, tagged with the
/// plugin name.
fn forward_output(name: &str, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        let name = name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(target: "mcpd::plugin", plugin = %name, "{line}");
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let name = name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(target: "mcpd::plugin", plugin = %name, "{line}");
            }
        });
    }
}

/// Poll-dial the socket until it accepts a connection or the deadline
/// passes. Returns the deadline on timeout.
async fn wait_for_socket(path: &Path, deadline: Duration) -> Result<(), Duration> {
    let started = tokio::time::Instant::now();
    loop {
        if let Ok(Ok(_probe)) =
            tokio::time::timeout(SOCKET_DIAL_TIMEOUT, UnixStream::connect(path)).await
        {
            return Ok(());
        }
        if started.elapsed() >= deadline {
            return Err(deadline);
        }
        tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
    }
}

/// Tear down a plugin that failed mid-start: kill the process, drain its
/// exit, and remove the socket file. Log-only; the start error is what the
/// caller surfaces.
async fn abort_start(name: &str, child: &mut Child, socket_path: &Path) {
    if let Err(e) = child.start_kill() {
        debug!(plugin = name, error = %e, "kill during aborted start failed");
    }
    if let Err(e) = child.wait().await {
        debug!(plugin = name, error = %e, "wait during aborted start failed");
    }
    remove_socket(name, socket_path);
}

/// Run the per-plugin stop ladder.
async fn stop_plugin(name: &str, plugin: &SupervisedPlugin) -> PluginResult<()> {
    // Graceful stop; the process may already be signaled, so failures are
    // only debug-logged.
    if let Err(e) = plugin.instance.stop().await {
        debug!(plugin = name, error = %e, "stop rpc failed");
    }

    let status = {
        let mut child = plugin.process.lock().await;
        match tokio::time::timeout(EXIT_TIMEOUT, child.wait()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(plugin = name, "plugin did not exit in time, killing");
                if let Err(e) = child.start_kill() {
                    debug!(plugin = name, error = %e, "force kill failed");
                }
                child.wait().await
            }
        }
    };

    remove_socket(name, &plugin.socket_path);

    match status {
        Ok(status) => {
            if expected_exit(&status) {
                debug!(plugin = name, %status, "plugin exited");
                Ok(())
            } else {
                Err(PluginError::ShutdownAnomaly {
                    name: name.to_string(),
                    code: status.code().unwrap_or(-1),
                })
            }
        }
        Err(e) => {
            // The wait itself failed; the process state is unknown but the
            // socket is already gone. Surface as an anomaly.
            warn!(plugin = name, error = %e, "waiting for plugin exit failed");
            Err(PluginError::ShutdownAnomaly {
                name: name.to_string(),
                code: -1,
            })
        }
    }
}

/// Exit code 0 and signal termination are expected shutdown conditions.
fn expected_exit(status: &std::process::ExitStatus) -> bool {
    if status.success() {
        return true;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if status.signal().is_some() {
            return true;
        }
    }
    false
}

fn remove_socket(name: &str, path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(plugin = name, socket = %path.display(), "socket removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(plugin = name, socket = %path.display(), error = %e, "socket removal failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_paths_are_unique() {
        let a = next_socket_path("auth");
        let b = next_socket_path("auth");
        assert_ne!(a, b);
    }

    #[test]
    fn test_socket_path_sanitizes_spaces() {
        let path = next_socket_path("my plugin");
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("mcpd-plugin-my-plugin-"));
        assert!(name.ends_with(".sock"));
        assert!(!name.contains(' '));
    }

    #[tokio::test]
    async fn test_empty_plugin_set_starts_cleanly() {
        let pipeline = Arc::new(PluginPipeline::new());
        let supervisor = PluginSupervisor::new(PluginsConfig::default(), Arc::clone(&pipeline));

        supervisor.start_plugins().await.unwrap();
        assert!(supervisor.plugin_names().await.is_empty());
        assert_eq!(pipeline.registered_count().await, 0);
    }
}
