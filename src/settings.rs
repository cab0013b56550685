//! Runtime configuration.
//!
//! Resolved with the following priority:
//! 1. CLI flags / `FRAMEGATE_*` environment variables (highest)
//! 2. JSON file passed with `--config`
//! 3. Defaults (lowest)

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::backend::BackendConfig;
use crate::fingerprint::DEFAULT_THRESHOLD;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Host both the proxy and the backend bind to.
    pub host: String,
    pub proxy_port: u16,
    pub backend_port: u16,
    pub backend_binary: String,
    pub backend_model: String,
    pub readiness_timeout_secs: u64,
    /// Hamming distances below this reuse the previous answer.
    pub similarity_threshold: u32,
    pub events_db: PathBuf,
    /// Log lines are also appended here when set.
    pub log_file: Option<PathBuf>,
    /// Upper bound on one backend round trip; 0 waits forever.
    pub backend_timeout_secs: u64,
    pub max_body_mb: usize,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            proxy_port: 8080,
            backend_port: 8081,
            backend_binary: "llama-server".into(),
            backend_model: "ggml-org/SmolVLM-500M-Instruct-GGUF".into(),
            readiness_timeout_secs: 30,
            similarity_threshold: DEFAULT_THRESHOLD,
            events_db: PathBuf::from("events.db"),
            log_file: Some(PathBuf::from("server.log")),
            backend_timeout_secs: 300,
            max_body_mb: 32,
        }
    }
}

#[derive(Debug, Default, Parser)]
#[command(name = "framegate", about = "Similarity-gated caching proxy for a vision-language backend")]
pub struct Cli {
    /// JSON settings file
    #[arg(long, env = "FRAMEGATE_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "FRAMEGATE_HOST")]
    pub host: Option<String>,

    /// Port the proxy listens on
    #[arg(long, env = "FRAMEGATE_PROXY_PORT")]
    pub proxy_port: Option<u16>,

    /// Port the backend is started on
    #[arg(long, env = "FRAMEGATE_BACKEND_PORT")]
    pub backend_port: Option<u16>,

    /// Backend executable
    #[arg(long, env = "FRAMEGATE_BACKEND_BINARY")]
    pub backend_binary: Option<String>,

    /// Model passed to the backend with `-hf`
    #[arg(long, env = "FRAMEGATE_BACKEND_MODEL")]
    pub backend_model: Option<String>,

    /// Seconds to wait for the backend port to open
    #[arg(long, env = "FRAMEGATE_READINESS_TIMEOUT")]
    pub readiness_timeout: Option<u64>,

    #[arg(long, env = "FRAMEGATE_SIMILARITY_THRESHOLD")]
    pub similarity_threshold: Option<u32>,

    #[arg(long, env = "FRAMEGATE_EVENTS_DB")]
    pub events_db: Option<PathBuf>,

    #[arg(long, env = "FRAMEGATE_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Log to stdout only
    #[arg(long, conflicts_with = "log_file")]
    pub no_log_file: bool,

    /// Seconds before a backend call is abandoned (0 disables)
    #[arg(long, env = "FRAMEGATE_BACKEND_TIMEOUT")]
    pub backend_timeout: Option<u64>,

    /// Maximum request body size in MiB
    #[arg(long, env = "FRAMEGATE_MAX_BODY_MB")]
    pub max_body_mb: Option<usize>,
}

impl ProxySettings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    pub fn load(cli: &Cli) -> Result<Self> {
        let mut settings = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_cli(cli);
        Ok(settings)
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.host = host.clone();
        }
        if let Some(port) = cli.proxy_port {
            self.proxy_port = port;
        }
        if let Some(port) = cli.backend_port {
            self.backend_port = port;
        }
        if let Some(binary) = &cli.backend_binary {
            self.backend_binary = binary.clone();
        }
        if let Some(model) = &cli.backend_model {
            self.backend_model = model.clone();
        }
        if let Some(secs) = cli.readiness_timeout {
            self.readiness_timeout_secs = secs;
        }
        if let Some(threshold) = cli.similarity_threshold {
            self.similarity_threshold = threshold;
        }
        if let Some(path) = &cli.events_db {
            self.events_db = path.clone();
        }
        if let Some(path) = &cli.log_file {
            self.log_file = Some(path.clone());
        }
        if cli.no_log_file {
            self.log_file = None;
        }
        if let Some(secs) = cli.backend_timeout {
            self.backend_timeout_secs = secs;
        }
        if let Some(mb) = cli.max_body_mb {
            self.max_body_mb = mb;
        }
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig::llama_server(
            self.backend_binary.clone(),
            &self.backend_model,
            self.host.clone(),
            self.backend_port,
            Duration::from_secs(self.readiness_timeout_secs),
        )
    }

    pub fn backend_timeout(&self) -> Option<Duration> {
        (self.backend_timeout_secs > 0).then(|| Duration::from_secs(self.backend_timeout_secs))
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_mb.saturating_mul(1024 * 1024)
    }
}
