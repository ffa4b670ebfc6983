//! Workspace management
//!
//! Tracks the open workspace folders and picks the target of a command: an explicit
//! argument when the action was invoked on a specific folder, otherwise the first open
//! folder. Several open folders are not an error; the first one wins.

use crate::commands::ClientError;
use lsp_types::{Url, WorkspaceFolder};
use std::{
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct WorkspaceManager {
    workspace_folders: Arc<RwLock<Vec<WorkspaceFolder>>>,
}

impl WorkspaceManager {
    pub fn new(folders: Vec<WorkspaceFolder>) -> Self {
        if !folders.is_empty() {
            info!(
                "Workspace folders: {:?}",
                folders.iter().map(|f| f.uri.as_str()).collect::<Vec<_>>()
            );
        }

        Self {
            workspace_folders: Arc::new(RwLock::new(folders)),
        }
    }

    /// Relative paths are resolved against `cwd`; paths that cannot become file URIs
    /// are skipped with a warning.
    pub fn from_paths(paths: &[PathBuf], cwd: &Path) -> Self {
        let folders = paths
            .iter()
            .filter_map(|path| {
                let absolute = absolutize(path, cwd);
                match folder_for(&absolute) {
                    Some(folder) => Some(folder),
                    None => {
                        warn!("Ignoring workspace folder {}", absolute.display());
                        None
                    }
                }
            })
            .collect();

        Self::new(folders)
    }

    pub fn get_workspace_folders(&self) -> Vec<WorkspaceFolder> {
        self.workspace_folders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update_workspace_folders(&self, folders: Vec<WorkspaceFolder>) {
        info!(
            "Updating workspace folders: {:?}",
            folders.iter().map(|f| f.uri.as_str()).collect::<Vec<_>>()
        );
        *self
            .workspace_folders
            .write()
            .unwrap_or_else(PoisonError::into_inner) = folders;
    }

    pub fn get_workspace_root(&self) -> Option<PathBuf> {
        self.workspace_folders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find_map(|folder| folder.uri.to_file_path().ok())
            .map(|path| path.components().collect())
    }

    /// Explicit target first (a `file://` URI or a plain path), then the first open folder.
    pub fn resolve(&self, explicit: Option<&str>) -> Result<PathBuf, ClientError> {
        if let Some(target) = explicit.map(str::trim).filter(|t| !t.is_empty()) {
            let path = parse_target(target).ok_or(ClientError::NoWorkspace)?;
            debug!("Using explicit workspace target {}", path.display());
            return Ok(path);
        }

        self.get_workspace_root().ok_or(ClientError::NoWorkspace)
    }
}

fn parse_target(target: &str) -> Option<PathBuf> {
    if target.starts_with("file:") {
        return Url::parse(target).ok()?.to_file_path().ok();
    }

    let path = PathBuf::from(target);
    if path.is_absolute() {
        Some(path)
    } else {
        std::env::current_dir().ok().map(|cwd| cwd.join(path))
    }
}

fn absolutize(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

fn folder_for(path: &Path) -> Option<WorkspaceFolder> {
    let uri = Url::from_directory_path(path).ok()?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Some(WorkspaceFolder { uri, name })
}
