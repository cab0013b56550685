use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use log::{error, info};
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::monitor::{log_sink, monitor_process};
use super::readiness::{wait_for_port, Readiness};
use super::state::{BackendState, SharedState};

const OUTPUT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("backend already started")]
    AlreadyStarted,

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("backend did not accept connections on port {port} within {}s", .timeout.as_secs_f32())]
    ReadinessTimeout { port: u16, timeout: Duration },

    #[error("backend exited before becoming ready (exit code {code:?})")]
    ExitedEarly { code: Option<i32> },

    #[error("failed to stop backend: {0}")]
    Terminate(String),
}

/// How to launch the inference backend and where it listens.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub program: String,
    pub args: Vec<String>,
    pub host: String,
    pub port: u16,
    pub readiness_timeout: Duration,
}

impl BackendConfig {
    /// `llama-server -hf <model> --port <port>` style launch.
    pub fn llama_server(
        program: impl Into<String>,
        model: &str,
        host: impl Into<String>,
        port: u16,
        readiness_timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args: vec![
                "-hf".to_string(),
                model.to_string(),
                "--port".to_string(),
                port.to_string(),
            ],
            host: host.into(),
            port,
            readiness_timeout,
        }
    }

    /// Short name used to prefix forwarded output lines.
    pub fn label(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.clone())
    }
}

/// Sole owner of the backend process.
pub struct BackendSupervisor {
    config: BackendConfig,
    state: SharedState,
    cancel_token: Option<CancellationToken>,
    monitor: Option<JoinHandle<io::Result<ExitStatus>>>,
    sink: Option<JoinHandle<()>>,
}

impl BackendSupervisor {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            state: SharedState::default(),
            cancel_token: None,
            monitor: None,
            sink: None,
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn state(&self) -> BackendState {
        self.state.get()
    }

    /// Launches the process and blocks until its port accepts connections.
    /// Any error leaves no process behind and the state at `Failed`.
    pub async fn start(&mut self) -> Result<(), SupervisorError> {
        if self.monitor.is_some() {
            return Err(SupervisorError::AlreadyStarted);
        }

        self.state.set(BackendState::Starting);
        let label = self.config.label();

        let child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                self.state
                    .set(BackendState::Failed(format!("spawn failed: {source}")));
                SupervisorError::Spawn {
                    program: self.config.program.clone(),
                    source,
                }
            })?;

        info!(
            "Started {} process (pid {}), waiting for it to be ready...",
            label,
            child.id().map_or_else(|| "?".to_string(), |pid| pid.to_string())
        );

        let (line_tx, line_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let cancel_token = CancellationToken::new();
        self.sink = Some(tokio::spawn(log_sink(label.clone(), line_rx)));
        self.monitor = Some(tokio::spawn(monitor_process(
            child,
            line_tx,
            self.state.clone(),
            cancel_token.clone(),
        )));
        self.cancel_token = Some(cancel_token);

        let readiness = {
            let monitor = self.monitor.as_ref();
            wait_for_port(
                &self.config.host,
                self.config.port,
                self.config.readiness_timeout,
                || monitor.map_or(true, |handle| handle.is_finished()),
            )
            .await
        };

        match readiness {
            Readiness::Ready => {
                self.state.set(BackendState::Ready);
                info!("{} is ready on port {}", label, self.config.port);
                Ok(())
            }
            Readiness::TimedOut => {
                error!("Timeout waiting for {} to start", label);
                // Best effort; the readiness failure is what gets reported.
                let _ = self.shutdown().await;
                self.state
                    .set(BackendState::Failed("readiness timeout".to_string()));
                Err(SupervisorError::ReadinessTimeout {
                    port: self.config.port,
                    timeout: self.config.readiness_timeout,
                })
            }
            Readiness::Abandoned => {
                let code = match self.shutdown().await {
                    Ok(status) => status.and_then(|s| s.code()),
                    Err(_) => None,
                };
                error!("{} exited before becoming ready (code {:?})", label, code);
                self.state.set(BackendState::Failed(format!(
                    "exited before ready (code {code:?})"
                )));
                Err(SupervisorError::ExitedEarly { code })
            }
        }
    }

    /// Called once the proxy starts serving traffic.
    pub fn mark_running(&self) {
        if self.state.get() == BackendState::Ready {
            self.state.set(BackendState::Running);
        }
    }

    /// Terminates the process (SIGTERM, then SIGKILL after a grace period) and
    /// waits for it. Stopping a backend that was never started is a no-op.
    pub async fn stop(&mut self) -> Result<BackendState, SupervisorError> {
        match self.shutdown().await {
            Ok(Some(status)) => {
                info!("{} stopped with {}", self.config.label(), status);
                self.state.set(BackendState::Terminated(status.code()));
            }
            Ok(None) => {}
            Err(err) => {
                self.state.set(BackendState::Failed(err.to_string()));
                return Err(err);
            }
        }
        Ok(self.state.get())
    }

    async fn shutdown(&mut self) -> Result<Option<ExitStatus>, SupervisorError> {
        let Some(monitor) = self.monitor.take() else {
            return Ok(None);
        };

        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        let status = monitor
            .await
            .map_err(|err| SupervisorError::Terminate(format!("monitor task failed: {err}")))?
            .map_err(|err| SupervisorError::Terminate(err.to_string()))?;

        if let Some(sink) = self.sink.take() {
            if let Err(err) = sink.await {
                error!("backend log sink failed: {err}");
            }
        }

        Ok(Some(status))
    }
}
