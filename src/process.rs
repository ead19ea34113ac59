//! Server process supervisor and install/uninstall lifecycle (C10).
//!
//! Grounded on this codebase's `ProcessManager` (`Arc<RwLock<Option<Child>>>`,
//! stdin-write-then-timeout stop, stdout/stderr piped to a reader task),
//! generalized into an explicit state machine and connected to the console
//! ring (C1) and the shared restart-pending flag (C6) instead of a bare
//! Minecraft-specific command builder.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::RwLock;

use crate::config::Settings;
use crate::console_streamer::ConsoleRing;
use crate::error::{kind, Result};
use crate::restart_pending::RestartPending;
use crate::server_running::ServerRunningState;

const STOP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    NotInstalled,
    Installed,
    Starting,
    Running,
    Stopping,
}

struct Running {
    child: Child,
    pid: u32,
}

pub struct ServerSupervisor {
    settings: Arc<Settings>,
    console: Arc<ConsoleRing>,
    restart_pending: Arc<RestartPending>,
    server_running: Arc<ServerRunningState>,
    state: RwLock<ServerState>,
    running: RwLock<Option<Running>>,
}

impl ServerSupervisor {
    pub fn new(
        settings: Arc<Settings>,
        console: Arc<ConsoleRing>,
        restart_pending: Arc<RestartPending>,
        server_running: Arc<ServerRunningState>,
    ) -> Self {
        let initial_state = if settings.current_version_path().exists() {
            ServerState::Installed
        } else {
            ServerState::NotInstalled
        };
        Self {
            settings,
            console,
            restart_pending,
            server_running,
            state: RwLock::new(initial_state),
            running: RwLock::new(None),
        }
    }

    pub async fn state(&self) -> ServerState {
        *self.state.read().await
    }

    /// Extracts a previously-downloaded server archive into the server
    /// directory and records the installed version marker.
    pub async fn install_server(&self, archive_path: &PathBuf, version: &str) -> Result<()> {
        if *self.state.read().await != ServerState::NotInstalled {
            return Err(kind::server_running("Server is already installed"));
        }
        let server_dir = self.settings.server_dir();
        tokio::fs::create_dir_all(&server_dir).await?;

        let archive_path = archive_path.clone();
        let dest = server_dir.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let file = std::fs::File::open(&archive_path)?;
            let mut zip = zip::ZipArchive::new(file).map_err(|e| kind::internal(e.to_string()))?;
            zip.extract(&dest).map_err(|e| kind::internal(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| kind::internal(e.to_string()))??;

        tokio::fs::write(self.settings.current_version_path(), version).await?;
        *self.state.write().await = ServerState::Installed;
        tracing::info!(version, "server_installed");
        Ok(())
    }

    pub async fn uninstall_server(&self) -> Result<()> {
        let state = *self.state.read().await;
        if matches!(state, ServerState::Running | ServerState::Starting | ServerState::Stopping) {
            return Err(kind::server_running("Stop the server before uninstalling"));
        }
        if state == ServerState::NotInstalled {
            return Err(kind::server_not_installed("Server is not installed"));
        }
        tokio::fs::remove_dir_all(self.settings.server_dir()).await.or_else(|e| {
            if e.kind() == std::io::ErrorKind::NotFound { Ok(()) } else { Err(e) }
        })?;
        let _ = tokio::fs::remove_file(self.settings.current_version_path()).await;
        *self.state.write().await = ServerState::NotInstalled;
        tracing::info!("server_uninstalled");
        Ok(())
    }

    /// Spawns the server executable, piping stdout/stderr lines into the
    /// console ring, and arms a background task that watches for process
    /// exit and walks the state back to `installed`.
    pub async fn start_server(self: &Arc<Self>, executable: &str, args: &[String]) -> Result<()> {
        {
            let state = *self.state.read().await;
            if state != ServerState::Installed {
                return Err(kind::server_running(format!("Cannot start from state {state:?}")));
            }
        }
        *self.state.write().await = ServerState::Starting;

        let mut command = Command::new(executable);
        command
            .args(args)
            .current_dir(self.settings.server_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                *self.state.write().await = ServerState::Installed;
                return Err(kind::internal(format!("failed to spawn server process: {e}")));
            }
        };

        let pid = child.id().ok_or_else(|| kind::internal("spawned child has no pid"))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        *self.running.write().await = Some(Running { child, pid });
        *self.state.write().await = ServerState::Running;
        self.server_running.set_running(true).await;
        self.restart_pending.clear_restart().await;
        tracing::info!(pid, "server_started");

        if let Some(stdout) = stdout {
            let console = self.console.clone();
            tokio::spawn(async move { pipe_lines(stdout, console).await });
        }
        if let Some(stderr) = stderr {
            let console = self.console.clone();
            tokio::spawn(async move { pipe_lines(stderr, console).await });
        }

        let supervisor = self.clone();
        tokio::spawn(async move { supervisor.watch_for_exit(pid).await });

        Ok(())
    }

    async fn watch_for_exit(self: Arc<Self>, expected_pid: u32) {
        let status = {
            let mut running = self.running.write().await;
            match running.as_mut() {
                Some(r) if r.pid == expected_pid => r.child.wait().await,
                _ => return,
            }
        };
        match status {
            Ok(status) => tracing::info!(pid = expected_pid, code = ?status.code(), "server_process_exited"),
            Err(e) => tracing::warn!(pid = expected_pid, error = %e, "server_process_wait_failed"),
        }
        *self.running.write().await = None;
        *self.state.write().await = ServerState::Installed;
        self.server_running.set_running(false).await;
    }

    /// Writes `stop` to the child's stdin and waits up to 30s for a clean
    /// exit, killing it outright if that deadline passes.
    pub async fn stop_server(&self) -> Result<()> {
        {
            let state = *self.state.read().await;
            if state != ServerState::Running {
                return Err(kind::server_not_running("Server is not running"));
            }
        }
        *self.state.write().await = ServerState::Stopping;

        let stdin_write = {
            let mut running = self.running.write().await;
            match running.as_mut() {
                Some(r) => r.child.stdin.as_mut().map(|s| async move { s.write_all(b"stop\n").await }),
                None => None,
            }
        };
        if let Some(write) = stdin_write {
            let _ = write.await;
        }

        let exited = tokio::time::timeout(STOP_TIMEOUT, async {
            loop {
                if self.running.read().await.is_none() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        if exited.is_err() {
            tracing::warn!("server_stop_timed_out_killing");
            if let Some(mut running) = self.running.write().await.take() {
                let _ = running.child.kill().await;
            }
            *self.state.write().await = ServerState::Installed;
        }
        Ok(())
    }

    /// Sends a raw console command to the running server's stdin, echoing it
    /// into the console ring first. Never throws on a broken pipe or a
    /// missing child - returns `false` instead.
    pub async fn send_command(&self, command: &str) -> bool {
        let mut running = self.running.write().await;
        let Some(running) = running.as_mut() else { return false };
        let Some(stdin) = running.child.stdin.as_mut() else { return false };

        self.console.append(format!("\x1b[36m[CMD] {command}\x1b[0m")).await;

        if stdin.write_all(command.as_bytes()).await.is_err() {
            return false;
        }
        stdin.write_all(b"\n").await.is_ok()
    }

    /// Narrow accessor used by the metrics sampler; does not expose the
    /// underlying `Child`.
    pub async fn child_pid(&self) -> Option<u32> {
        self.running.read().await.as_ref().map(|r| r.pid)
    }
}

async fn pipe_lines<R: tokio::io::AsyncRead + Unpin>(reader: R, console: Arc<ConsoleRing>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => console.append(line).await,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "console_reader_failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings(dir: &std::path::Path) -> Settings {
        Settings {
            debug: false,
            log_level: "info".into(),
            api_key_admin: "admin".into(),
            api_key_monitor: None,
            game_version: "stable".into(),
            data_dir: dir.to_path_buf(),
            cors_origins: vec!["http://localhost:5173".into()],
            console_history_lines: 100,
            disk_space_warning_threshold_gb: 1.0,
            mod_cache_max_size_mb: 500,
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }

    #[tokio::test]
    async fn starts_not_installed_without_version_marker() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(test_settings(dir.path()));
        let supervisor = ServerSupervisor::new(
            settings,
            Arc::new(ConsoleRing::new(10)),
            Arc::new(RestartPending::new()),
            Arc::new(ServerRunningState::new()),
        );
        assert_eq!(supervisor.state().await, ServerState::NotInstalled);
    }

    #[tokio::test]
    async fn stop_on_non_running_server_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(test_settings(dir.path()));
        let supervisor = ServerSupervisor::new(
            settings,
            Arc::new(ConsoleRing::new(10)),
            Arc::new(RestartPending::new()),
            Arc::new(ServerRunningState::new()),
        );
        let err = supervisor.stop_server().await.unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ServerNotRunning);
    }

    #[tokio::test]
    async fn uninstall_without_install_is_server_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(test_settings(dir.path()));
        let supervisor = ServerSupervisor::new(
            settings,
            Arc::new(ConsoleRing::new(10)),
            Arc::new(RestartPending::new()),
            Arc::new(ServerRunningState::new()),
        );
        let err = supervisor.uninstall_server().await.unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ServerNotInstalled);
    }

    #[tokio::test]
    async fn send_command_without_running_server_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(test_settings(dir.path()));
        let supervisor = ServerSupervisor::new(
            settings,
            Arc::new(ConsoleRing::new(10)),
            Arc::new(RestartPending::new()),
            Arc::new(ServerRunningState::new()),
        );
        assert!(!supervisor.send_command("help").await);
    }
}
