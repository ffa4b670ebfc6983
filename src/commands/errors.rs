//! Client errors
//!
//! Uses thiserror so the front end can match on the failure class: activation problems
//! disable the client for the session, everything else is reported and forgotten.

use crate::transport::TransportError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Traverse analyzer binary not found (searched: {})", display_paths(.searched))]
    ActivationFailure { searched: Vec<PathBuf> },

    #[error("Traverse analyzer is not ready yet, please wait")]
    ClientNotReady,

    #[error("No workspace folder is open")]
    NoWorkspace,

    #[error("{0}")]
    RequestFailed(String),

    #[error("Failed to save {path}: {source}")]
    PersistenceFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Traverse analyzer is not running")]
    NotRunning,

    #[error("Failed to start Traverse analyzer: {0}")]
    StartFailed(#[source] TransportError),

    #[error("Invalid Traverse settings: {0}")]
    InvalidConfig(String),
}

impl ClientError {
    /// Fatal errors disable the client; the rest are reported once and dropped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ActivationFailure { .. } | Self::InvalidConfig(_))
    }
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        ClientError::RequestFailed(err.to_string())
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
