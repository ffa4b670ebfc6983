//! Traverse client
//!
//! Drives the Traverse Solidity analyzer from the editor side. The analyzer runs as a
//! separate language-server process and does all of the parsing and diagram work; this
//! crate launches it, sends workspace commands, turns the answers into files under the
//! workspace and tells the user where they went.
//!
//! The analyzer sits behind [`transport::AnalyzerTransport`] so the session and the
//! dispatcher can be exercised without a real process. Front ends talk to the user only
//! through [`ui::EditorSurface`].

pub mod artifacts;
pub mod binary;
pub mod client;
pub mod commands;
pub mod config;
pub mod proto;
pub mod session;
pub mod transport;
pub mod ui;
pub mod workspace;

pub use artifacts::{Artifact, ArtifactFormat, ArtifactKind, ArtifactStore};
pub use binary::BinaryLocator;
pub use client::TraverseClient;
pub use commands::{ClientError, ClientResult, CommandDispatcher};
pub use config::ClientConfig;
pub use proto::{CommandKind, CommandOptions, CommandResult, WorkspaceCommand};
pub use session::{AnalyzerSession, SessionState};
pub use transport::{AnalyzerTransport, LspTransport, TransportError};
pub use ui::{ConsoleSurface, EditorSurface};
pub use workspace::WorkspaceManager;
