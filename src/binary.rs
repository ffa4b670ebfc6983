//! Analyzer binary discovery
//!
//! Candidates are checked in a fixed priority order: the user's override, the packaged
//! per-platform binary, then development build outputs. The first path that exists
//! wins. Finding none is fatal for the session.

use crate::{commands::ClientError, config::ServerConfig};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

pub const PRODUCT: &str = "traverse-lsp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    Override,
    Bundled,
    Development,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub source: CandidateSource,
    pub path: PathBuf,
}

/// `traverse-lsp-<os>-<arch>[.exe]`, using the platform names the packaged builds ship under.
pub fn platform_binary_name() -> String {
    binary_name_for(std::env::consts::OS, std::env::consts::ARCH)
}

pub fn binary_name_for(os: &str, arch: &str) -> String {
    let os_name = match os {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    };
    let arch_name = match arch {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        "x86" => "ia32",
        other => other,
    };
    let extension = if os == "windows" { ".exe" } else { "" };

    format!("{PRODUCT}-{os_name}-{arch_name}{extension}")
}

#[derive(Debug, Clone)]
pub struct BinaryLocator {
    override_path: Option<PathBuf>,
    bundle_dir: Option<PathBuf>,
    development_paths: Vec<PathBuf>,
    binary_name: String,
    base_dir: PathBuf,
}

impl BinaryLocator {
    /// Relative development paths are resolved against `base_dir`.
    pub fn new(config: &ServerConfig, base_dir: &Path) -> Self {
        Self {
            override_path: config.path.clone(),
            bundle_dir: config.bundle_dir.clone().or_else(default_bundle_dir),
            development_paths: config.development_paths.clone(),
            binary_name: platform_binary_name(),
            base_dir: base_dir.to_path_buf(),
        }
    }

    pub fn with_binary_name(mut self, name: impl Into<String>) -> Self {
        self.binary_name = name.into();
        self
    }

    pub fn candidates(&self) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        if let Some(path) = &self.override_path {
            candidates.push(Candidate {
                source: CandidateSource::Override,
                path: path.clone(),
            });
        }

        if let Some(dir) = &self.bundle_dir {
            candidates.push(Candidate {
                source: CandidateSource::Bundled,
                path: dir.join(&self.binary_name),
            });
        }

        for path in &self.development_paths {
            let path = if path.is_absolute() {
                path.clone()
            } else {
                self.base_dir.join(path)
            };
            candidates.push(Candidate {
                source: CandidateSource::Development,
                path,
            });
        }

        candidates
    }

    pub fn resolve(&self) -> Result<Candidate, ClientError> {
        self.resolve_with(|path| path.is_file())
    }

    /// Same as [`resolve`](Self::resolve) with an injectable existence check.
    pub fn resolve_with(&self, exists: impl Fn(&Path) -> bool) -> Result<Candidate, ClientError> {
        let candidates = self.candidates();

        for candidate in &candidates {
            debug!("Checking analyzer candidate {:?}: {}", candidate.source, candidate.path.display());
            if exists(&candidate.path) {
                info!(
                    "Using {:?} analyzer binary at {}",
                    candidate.source,
                    candidate.path.display()
                );
                return Ok(candidate.clone());
            }
        }

        error!("No analyzer binary found in {} candidate location(s)", candidates.len());
        Err(ClientError::ActivationFailure {
            searched: candidates.into_iter().map(|c| c.path).collect(),
        })
    }
}

/// Packaged builds sit in a `bin/` directory next to the client executable.
fn default_bundle_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("bin")))
}
