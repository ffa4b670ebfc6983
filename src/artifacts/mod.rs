//! Artifacts
//!
//! An artifact is one file worth of analyzer output. Classification turns a command
//! result into artifacts without touching the disk; the store decides where each one
//! lands and writes it.

pub mod classify;
pub mod store;

pub use classify::{classify, sniff_format};
pub use store::{ArtifactStore, PersistFailure, PersistOutcome};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    CallGraph,
    SequenceDiagram,
    StorageReport,
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    Dot,
    Mermaid,
    Markdown,
}

impl ArtifactFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Dot => "dot",
            Self::Mermaid => "mmd",
            Self::Markdown => "md",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub format: ArtifactFormat,
    pub content: String,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, format: ArtifactFormat, content: impl Into<String>) -> Self {
        Self {
            kind,
            format,
            content: content.into(),
        }
    }

    pub fn with_kind(mut self, kind: ArtifactKind) -> Self {
        self.kind = kind;
        self
    }
}
