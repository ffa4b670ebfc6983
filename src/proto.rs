//! Protocol types
//!
//! Stable wire shapes for the analyzer's workspace commands. The analyzer answers every
//! command through `workspace/executeCommand`, so the payload is an untyped JSON value
//! on the transport; these types give it a schema on our side.
//!
//! Two response shapes exist in the wild: the structured `data` bundle and an older
//! single `diagram` string. Both deserialize into [`CommandResult`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const GENERATE_CALL_GRAPH_WORKSPACE: &str = "traverse.generateCallGraph.workspace";
pub const GENERATE_SEQUENCE_DIAGRAM_WORKSPACE: &str = "traverse.generateSequenceDiagram.workspace";
pub const GENERATE_ALL_WORKSPACE: &str = "traverse.generateAll.workspace";
pub const ANALYZE_STORAGE_WORKSPACE: &str = "traverse.analyzeStorage.workspace";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    GenerateCallGraph,
    GenerateSequenceDiagram,
    GenerateAll,
    AnalyzeStorage,
}

impl CommandKind {
    pub const ALL: [CommandKind; 4] = [
        CommandKind::GenerateCallGraph,
        CommandKind::GenerateSequenceDiagram,
        CommandKind::GenerateAll,
        CommandKind::AnalyzeStorage,
    ];

    pub fn command_id(&self) -> &'static str {
        match self {
            Self::GenerateCallGraph => GENERATE_CALL_GRAPH_WORKSPACE,
            Self::GenerateSequenceDiagram => GENERATE_SEQUENCE_DIAGRAM_WORKSPACE,
            Self::GenerateAll => GENERATE_ALL_WORKSPACE,
            Self::AnalyzeStorage => ANALYZE_STORAGE_WORKSPACE,
        }
    }

    /// Human-readable title. Artifact routing and file names derive from it.
    pub fn title(&self) -> &'static str {
        match self {
            Self::GenerateCallGraph => "Workspace Call Graph",
            Self::GenerateSequenceDiagram => "Workspace Sequence Diagram",
            Self::GenerateAll => "Workspace Diagrams",
            Self::AnalyzeStorage => "Workspace Storage Analysis",
        }
    }

    pub fn progress_message(&self) -> &'static str {
        match self {
            Self::GenerateCallGraph => "Generating call graph...",
            Self::GenerateSequenceDiagram => "Generating sequence diagram...",
            Self::GenerateAll => "Generating all diagrams...",
            Self::AnalyzeStorage => "Analyzing storage...",
        }
    }

    /// Short name used for progress tokens and typed actions.
    pub fn action_name(&self) -> &'static str {
        match self {
            Self::GenerateCallGraph => "call-graph",
            Self::GenerateSequenceDiagram => "sequence",
            Self::GenerateAll => "all",
            Self::AnalyzeStorage => "storage",
        }
    }

    pub fn from_action_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.action_name() == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOptions {
    /// Only meaningful for sequence diagrams. `None` keeps server-side chunking on.
    pub no_chunk: Option<bool>,
}

/// One invocation of an analyzer workspace command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceCommand {
    kind: CommandKind,
    workspace_folder: String,
    no_chunk: Option<bool>,
}

impl WorkspaceCommand {
    pub fn new(kind: CommandKind, workspace_folder: impl Into<String>, options: CommandOptions) -> Self {
        let no_chunk = match kind {
            CommandKind::GenerateSequenceDiagram => Some(options.no_chunk.unwrap_or(false)),
            _ => None,
        };

        Self {
            kind,
            workspace_folder: workspace_folder.into(),
            no_chunk,
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn workspace_folder(&self) -> &str {
        &self.workspace_folder
    }

    pub fn no_chunk(&self) -> Option<bool> {
        self.no_chunk
    }

    pub fn args(&self) -> WorkspaceArgs {
        WorkspaceArgs {
            workspace_folder: self.workspace_folder.clone(),
            no_chunk: self.no_chunk,
        }
    }

    /// Argument vector for `workspace/executeCommand`: a single object.
    pub fn arguments(&self) -> serde_json::Result<Vec<serde_json::Value>> {
        Ok(vec![serde_json::to_value(self.args())?])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceArgs {
    pub workspace_folder: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_chunk: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    #[serde(default)]
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<DiagramBundle>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagram: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandResult {
    pub fn is_chunked(&self) -> bool {
        self.data.as_ref().map(|d| d.is_chunked).unwrap_or(false)
    }

    pub fn chunk_dir(&self) -> Option<&PathBuf> {
        self.data.as_ref().and_then(|d| d.chunk_dir.as_ref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagramBundle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dot: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mermaid: Option<String>,

    #[serde(default)]
    pub is_chunked: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<Vec<MermaidChunk>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MermaidChunk {
    pub id: usize,
    pub content: String,
    pub filename: Option<String>,
}
