//! Configuration management
//!
//! Settings arrive as editor-style JSON, either a bare object or nested under a
//! `traverse` key. Users usually set one or two fields, so partial sections are merged
//! over the defaults instead of replacing the whole configuration. A section that fails
//! to parse is skipped on its own without discarding the rest.
//!
//! The analyzer binary override can also come from `TRAVERSE_LSP_PATH`, which wins over
//! the settings file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};
use tracing::{debug, info, warn};

pub const BINARY_PATH_ENV: &str = "TRAVERSE_LSP_PATH";
pub const LOG_LEVEL_ENV: &str = "RUST_LOG";
pub const TRACE_ENV: &str = "TRAVERSE_LSP_TRACE";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub server: ServerConfig,

    pub output: OutputConfig,

    pub sequence: SequenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Explicit analyzer binary. Checked before anything bundled.
    pub path: Option<PathBuf>,

    /// Directory holding the packaged `traverse-lsp-<os>-<arch>` binaries.
    pub bundle_dir: Option<PathBuf>,

    pub development_paths: Vec<PathBuf>,

    pub log_level: String,

    pub trace: TraceLevel,

    pub shutdown_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    #[default]
    Off,
    Messages,
    Verbose,
}

impl TraceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Messages => "messages",
            Self::Verbose => "verbose",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Workspace-relative directory all artifacts go under.
    pub root: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SequenceConfig {
    pub no_chunk: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            path: None,
            bundle_dir: None,
            development_paths: vec![
                PathBuf::from("target/release/traverse-lsp"),
                PathBuf::from("target/debug/traverse-lsp"),
                PathBuf::from("../traverse-lsp/target/release/traverse-lsp"),
                PathBuf::from("../traverse-lsp/target/debug/traverse-lsp"),
            ],
            log_level: "info".to_string(),
            trace: TraceLevel::Off,
            shutdown_timeout_ms: 5000,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("traverse-output"),
        }
    }
}

impl ClientConfig {
    pub fn from_settings_value(value: serde_json::Value) -> Self {
        let settings = match value.get("traverse") {
            Some(nested) => nested.clone(),
            None => value,
        };

        let mut config = ClientConfig::default();
        config.update_from_value(&settings);
        config
    }

    /// Merges every recognised section of `value` into `self`.
    pub fn update_from_value(&mut self, value: &serde_json::Value) {
        if let Some(server) = value.get("server") {
            match merge_section(&self.server, server) {
                Ok(merged) => {
                    self.server = merged;
                    debug!("Updated server configuration");
                }
                Err(e) => warn!("Ignoring invalid server settings: {}", e),
            }
        }

        if let Some(output) = value.get("output") {
            match merge_section(&self.output, output) {
                Ok(merged) => {
                    self.output = merged;
                    debug!("Updated output configuration");
                }
                Err(e) => warn!("Ignoring invalid output settings: {}", e),
            }
        }

        if let Some(sequence) = value.get("sequence") {
            match merge_section(&self.sequence, sequence) {
                Ok(merged) => {
                    self.sequence = merged;
                    debug!("Updated sequence configuration");
                }
                Err(e) => warn!("Ignoring invalid sequence settings: {}", e),
            }
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&text)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?;

        info!("Loaded settings from {}", path.display());
        Ok(Self::from_settings_value(value))
    }

    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup(BINARY_PATH_ENV).filter(|p| !p.trim().is_empty()) {
            info!("Using analyzer binary from {}: {}", BINARY_PATH_ENV, path);
            self.server.path = Some(PathBuf::from(path));
        }
    }

    /// Environment forwarded unchanged to the analyzer process.
    pub fn server_env(&self) -> Vec<(String, String)> {
        vec![
            (LOG_LEVEL_ENV.to_string(), self.server.log_level.clone()),
            (TRACE_ENV.to_string(), self.server.trace.as_str().to_string()),
        ]
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.server.shutdown_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.output.root.as_os_str().is_empty() {
            return Err("output.root must not be empty".to_string());
        }

        if self.output.root.is_absolute() {
            return Err("output.root must be relative to the workspace".to_string());
        }

        if self.server.log_level.trim().is_empty() {
            return Err("server.log_level must not be empty".to_string());
        }

        Ok(())
    }
}

fn merge_section<T>(current: &T, patch: &serde_json::Value) -> Result<T, serde_json::Error>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    let mut base = serde_json::to_value(current)?;
    if let (Some(base_map), Some(patch_map)) = (base.as_object_mut(), patch.as_object()) {
        for (key, value) in patch_map {
            base_map.insert(key.clone(), value.clone());
        }
    } else {
        base = patch.clone();
    }
    serde_json::from_value(base)
}
