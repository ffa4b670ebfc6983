//! Command dispatch
//!
//! One editor action is resolve workspace → execute → classify → persist → notify.
//! Every failure along the way ends in exactly one notification and one log line;
//! nothing retries. Concurrent actions share the session's transport and are paired
//! with their responses by request id, so the dispatcher holds no queue of its own.

pub mod errors;
pub mod stats;

pub use errors::{ClientError, ClientResult};
pub use stats::{CommandStats, KindStats, StatsSnapshot};

use crate::{
    artifacts::{classify, ArtifactKind, ArtifactStore, PersistOutcome},
    config::OutputConfig,
    proto::{CommandKind, CommandOptions, CommandResult, WorkspaceCommand},
    session::AnalyzerSession,
    ui::{EditorSurface, FollowUp, Progress},
    workspace::WorkspaceManager,
};
use lsp_types::MessageType;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, error, info, warn};

pub struct CommandDispatcher {
    session: Arc<AnalyzerSession>,
    workspace: WorkspaceManager,
    output: OutputConfig,
    surface: Arc<dyn EditorSurface>,
    stats: CommandStats,
    default_no_chunk: bool,
}

impl CommandDispatcher {
    pub fn new(
        session: Arc<AnalyzerSession>,
        workspace: WorkspaceManager,
        output: OutputConfig,
        surface: Arc<dyn EditorSurface>,
    ) -> Self {
        Self {
            session,
            workspace,
            output,
            surface,
            stats: CommandStats::new(),
            default_no_chunk: false,
        }
    }

    /// Chunking preference used when an action does not say otherwise.
    pub fn with_default_no_chunk(mut self, no_chunk: bool) -> Self {
        self.default_no_chunk = no_chunk;
        self
    }

    pub fn session(&self) -> &Arc<AnalyzerSession> {
        &self.session
    }

    pub fn workspace(&self) -> &WorkspaceManager {
        &self.workspace
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Sends one workspace command and validates the response envelope.
    ///
    /// The progress indicator covers exactly the round-trip and ends once whether the
    /// analyzer answers, rejects or disappears.
    pub async fn execute(&self, command: &WorkspaceCommand) -> ClientResult<CommandResult> {
        let transport = self.session.transport()?;
        let kind = command.kind();
        let arguments = command
            .arguments()
            .map_err(|e| ClientError::RequestFailed(format!("Invalid command arguments: {e}")))?;

        debug!("Executing {} with {:?}", kind.command_id(), arguments);
        let progress = Progress::begin(
            Arc::clone(&self.surface),
            kind.action_name(),
            kind.progress_message(),
        );
        let response = transport.execute_command(kind.command_id(), arguments).await;
        progress.finish(None);

        let value = response?;
        if value.is_null() {
            return Err(ClientError::RequestFailed(
                "analyzer returned no result (no Solidity files found?)".to_string(),
            ));
        }

        let result: CommandResult = serde_json::from_value(value).map_err(|e| {
            ClientError::RequestFailed(format!("invalid response from analyzer: {e}"))
        })?;

        if !result.success {
            return Err(ClientError::RequestFailed(
                result
                    .message
                    .clone()
                    .unwrap_or_else(|| "analyzer reported failure".to_string()),
            ));
        }

        Ok(result)
    }

    /// The full editor action. Returns every path written; failures have already been
    /// shown to the user by the time this returns.
    pub async fn run(
        &self,
        kind: CommandKind,
        explicit_target: Option<&str>,
        options: CommandOptions,
    ) -> ClientResult<Vec<PathBuf>> {
        let run = self.stats.begin(kind);

        match self.run_action(kind, explicit_target, options).await {
            Ok(outcome) => {
                run.succeeded(outcome.written.len(), outcome.failures.len());
                Ok(outcome.written)
            }
            Err(e) => {
                run.failed();
                self.report(kind, &e);
                Err(e)
            }
        }
    }

    async fn run_action(
        &self,
        kind: CommandKind,
        explicit_target: Option<&str>,
        options: CommandOptions,
    ) -> ClientResult<PersistOutcome> {
        let workspace = self.workspace.resolve(explicit_target)?;
        let options = CommandOptions {
            no_chunk: options.no_chunk.or(Some(self.default_no_chunk)),
        };
        let command = WorkspaceCommand::new(kind, workspace.to_string_lossy(), options);
        info!("Running {} on {}", kind.title(), workspace.display());

        let result = self.execute(&command).await?;

        let mut artifacts = classify(&result);
        if artifacts.is_empty() {
            return Err(ClientError::RequestFailed(
                "analyzer response contained no output".to_string(),
            ));
        }
        if kind == CommandKind::AnalyzeStorage {
            artifacts = artifacts
                .into_iter()
                .map(|artifact| match artifact.kind {
                    ArtifactKind::Generic => artifact.with_kind(ArtifactKind::StorageReport),
                    _ => artifact,
                })
                .collect();
        }
        debug!(
            "Classified {} artifact(s): {:?}",
            artifacts.len(),
            artifacts.iter().map(|a| (a.kind, a.format)).collect::<Vec<_>>()
        );

        let store = ArtifactStore::for_workspace(&workspace, &self.output);
        let outcome = store.persist(kind.title(), &artifacts).await;

        // The store logs each failure; only the user still needs telling.
        for failure in &outcome.failures {
            self.surface
                .show_message(MessageType::ERROR, &failure.error.to_string(), &[]);
        }

        if !outcome.is_empty() {
            let dir = store.output_dir(kind.title());
            let mut follow_ups: Vec<FollowUp> = outcome
                .written
                .iter()
                .cloned()
                .map(FollowUp::OpenFile)
                .collect();
            follow_ups.push(FollowUp::RevealInFolder(dir.clone()));

            self.surface.show_message(
                MessageType::INFO,
                &format!("{} saved to {}", kind.title(), dir.display()),
                &follow_ups,
            );
        }

        if result.is_chunked() {
            self.notify_chunked(&workspace, result.chunk_dir().map(PathBuf::as_path));
        }

        Ok(outcome)
    }

    fn notify_chunked(&self, workspace: &Path, chunk_dir: Option<&Path>) {
        match chunk_dir {
            Some(dir) => {
                let dir = if dir.is_absolute() {
                    dir.to_path_buf()
                } else {
                    workspace.join(dir)
                };
                info!("Sequence diagram chunks written to {}", dir.display());
                self.surface.show_message(
                    MessageType::INFO,
                    &format!(
                        "Sequence diagram was split into chunks in {}",
                        dir.display()
                    ),
                    &[FollowUp::RevealInFolder(dir)],
                );
            }
            None => self.surface.show_message(
                MessageType::INFO,
                "Sequence diagram was split into chunks",
                &[],
            ),
        }
    }

    fn report(&self, kind: CommandKind, err: &ClientError) {
        let (typ, text) = match err {
            ClientError::RequestFailed(message) => (
                MessageType::ERROR,
                format!("Failed to generate {}: {}", kind.title(), message),
            ),
            ClientError::ClientNotReady | ClientError::NoWorkspace => {
                (MessageType::WARNING, err.to_string())
            }
            _ => (MessageType::ERROR, err.to_string()),
        };

        if typ == MessageType::WARNING {
            warn!("{} not run: {}", kind.title(), err);
        } else {
            error!("{} failed: {}", kind.title(), err);
        }
        self.surface.show_message(typ, &text, &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        session::testing::FakeLauncher,
        transport::TransportError,
        ui::testing::{Event, RecordingSurface},
    };
    use lsp_types::{Url, WorkspaceFolder};
    use serde_json::{json, Value};
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    struct Harness {
        launcher: Arc<FakeLauncher>,
        surface: Arc<RecordingSurface>,
        dispatcher: CommandDispatcher,
        dir: TempDir,
    }

    async fn harness<F>(reply: F) -> Harness
    where
        F: Fn(&str, &[Value]) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        let dir = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new(reply);
        let session = Arc::new(AnalyzerSession::new(launcher.clone()));
        session.start().await.unwrap();

        let workspace = WorkspaceManager::new(vec![WorkspaceFolder {
            uri: Url::from_directory_path(dir.path()).unwrap(),
            name: "project".to_string(),
        }]);
        let surface = Arc::new(RecordingSurface::default());
        let dispatcher = CommandDispatcher::new(
            session,
            workspace,
            OutputConfig::default(),
            surface.clone(),
        );

        Harness {
            launcher,
            surface,
            dispatcher,
            dir,
        }
    }

    fn file_names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.extension().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_call_graph_is_saved_and_announced() {
        let h = harness(|_, _| Ok(json!({"success": true, "data": {"dot": "digraph G {}"}}))).await;

        let written = h
            .dispatcher
            .run(CommandKind::GenerateCallGraph, None, CommandOptions::default())
            .await
            .unwrap();

        assert_eq!(written.len(), 1);
        assert_eq!(
            written[0].parent().unwrap(),
            h.dir.path().join("traverse-output/call-graphs")
        );
        assert_eq!(std::fs::read_to_string(&written[0]).unwrap(), "digraph G {}");

        let calls = h.launcher.last().calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "traverse.generateCallGraph.workspace");
        assert_eq!(calls[0].1.len(), 1);
        assert_eq!(
            Path::new(calls[0].1[0]["workspace_folder"].as_str().unwrap()),
            h.dir.path()
        );
        assert!(calls[0].1[0].get("no_chunk").is_none());

        assert_eq!(h.surface.begin_count(), 1);
        assert_eq!(h.surface.end_count(), 1);
        let events = h.surface.events();
        assert!(matches!(
            events.last(),
            Some(Event::Message { typ, follow_ups, .. })
                if *typ == MessageType::INFO
                    && follow_ups[0] == FollowUp::OpenFile(written[0].clone())
                    && matches!(follow_ups[1], FollowUp::RevealInFolder(_))
        ));
    }

    #[tokio::test]
    async fn test_generate_all_writes_both_formats() {
        let h = harness(|_, _| {
            Ok(json!({
                "success": true,
                "data": {"dot": "digraph {}", "mermaid": "sequenceDiagram", "is_chunked": false}
            }))
        })
        .await;

        let written = h
            .dispatcher
            .run(CommandKind::GenerateAll, None, CommandOptions::default())
            .await
            .unwrap();

        assert_eq!(file_names(&written), vec!["dot", "mmd"]);
        assert!(written
            .iter()
            .all(|p| p.parent().unwrap() == h.dir.path().join("traverse-output/diagrams")));
    }

    #[tokio::test]
    async fn test_sequence_sends_chunk_flag_and_reports_chunks() {
        let h = harness(|_, _| {
            Ok(json!({
                "success": true,
                "data": {"mermaid": "sequenceDiagram", "is_chunked": true, "chunk_dir": "mermaid-chunks"}
            }))
        })
        .await;

        h.dispatcher
            .run(CommandKind::GenerateSequenceDiagram, None, CommandOptions::default())
            .await
            .unwrap();

        let calls = h.launcher.last().calls.lock().unwrap().clone();
        assert_eq!(calls[0].1[0]["no_chunk"], json!(false));

        let chunk_dir = h.dir.path().join("mermaid-chunks");
        assert!(h.surface.events().iter().any(|e| matches!(
            e,
            Event::Message { follow_ups, .. }
                if follow_ups == &vec![FollowUp::RevealInFolder(chunk_dir.clone())]
        )));
    }

    #[tokio::test]
    async fn test_default_no_chunk_and_explicit_override() {
        let mut h = harness(|_, _| Ok(json!({"success": true, "data": {"mermaid": "sequenceDiagram"}}))).await;
        h.dispatcher = h.dispatcher.with_default_no_chunk(true);

        h.dispatcher
            .run(CommandKind::GenerateSequenceDiagram, None, CommandOptions::default())
            .await
            .unwrap();
        h.dispatcher
            .run(
                CommandKind::GenerateSequenceDiagram,
                None,
                CommandOptions { no_chunk: Some(false) },
            )
            .await
            .unwrap();

        let calls = h.launcher.last().calls.lock().unwrap().clone();
        assert_eq!(calls[0].1[0]["no_chunk"], json!(true));
        assert_eq!(calls[1].1[0]["no_chunk"], json!(false));
    }

    #[tokio::test]
    async fn test_storage_report_lands_in_storage_reports() {
        let h = harness(|_, _| Ok(json!({"success": true, "diagram": "# Storage Access Analysis"}))).await;

        let written = h
            .dispatcher
            .run(CommandKind::AnalyzeStorage, None, CommandOptions::default())
            .await
            .unwrap();

        assert_eq!(file_names(&written), vec!["md"]);
        assert_eq!(
            written[0].parent().unwrap(),
            h.dir.path().join("traverse-output/storage-reports")
        );
    }

    #[tokio::test]
    async fn test_explicit_target_overrides_workspace() {
        let h = harness(|_, _| Ok(json!({"success": true, "data": {"dot": "digraph {}"}}))).await;
        let other = tempfile::tempdir().unwrap();
        let target = other.path().to_string_lossy().into_owned();

        let written = h
            .dispatcher
            .run(CommandKind::GenerateCallGraph, Some(&target), CommandOptions::default())
            .await
            .unwrap();

        assert!(written[0].starts_with(other.path()));
    }

    #[tokio::test]
    async fn test_not_ready_before_session_start() {
        let h = harness(|_, _| Ok(Value::Null)).await;
        h.dispatcher.session().stop().await.unwrap();

        let err = h
            .dispatcher
            .run(CommandKind::GenerateCallGraph, None, CommandOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::ClientNotReady));
        assert_eq!(h.surface.begin_count(), 0);
        assert_eq!(
            h.surface.messages(),
            vec![(MessageType::WARNING, err.to_string())]
        );
    }

    #[tokio::test]
    async fn test_no_workspace() {
        let h = harness(|_, _| Ok(Value::Null)).await;
        h.dispatcher.workspace().update_workspace_folders(Vec::new());

        let err = h
            .dispatcher
            .run(CommandKind::GenerateAll, None, CommandOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::NoWorkspace));
        assert!(h.launcher.last().calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsuccessful_response_is_reported_once() {
        let h = harness(|_, _| Ok(json!({"success": false, "message": "parse error in Token.sol"}))).await;

        let err = h
            .dispatcher
            .run(CommandKind::GenerateCallGraph, None, CommandOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::RequestFailed(ref m) if m == "parse error in Token.sol"));
        assert_eq!(h.surface.end_count(), 1);
        assert_eq!(
            h.surface.messages(),
            vec![(
                MessageType::ERROR,
                "Failed to generate Workspace Call Graph: parse error in Token.sol".to_string()
            )]
        );
        assert!(!h.dir.path().join("traverse-output").exists());
    }

    #[tokio::test]
    async fn test_null_result_is_request_failure() {
        let h = harness(|_, _| Ok(Value::Null)).await;

        let err = h
            .dispatcher
            .run(CommandKind::GenerateCallGraph, None, CommandOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::RequestFailed(_)));
        assert_eq!(h.surface.begin_count(), 1);
        assert_eq!(h.surface.end_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_request_failure() {
        let h = harness(|_, _| Err(TransportError::Disconnected)).await;

        let err = h
            .dispatcher
            .run(CommandKind::AnalyzeStorage, None, CommandOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::RequestFailed(ref m) if m == "analyzer connection closed"));
        assert_eq!(h.surface.end_count(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_request_fails_on_restart() {
        let h = harness(|_, _| Ok(json!({"success": true, "data": {"dot": "digraph G {}"}}))).await;
        h.launcher.gates.hang_requests.store(true, Ordering::SeqCst);
        let first = h.launcher.last();
        let command = WorkspaceCommand::new(
            CommandKind::GenerateCallGraph,
            h.dir.path().to_string_lossy(),
            CommandOptions::default(),
        );

        let (outcome, restarted) = tokio::join!(h.dispatcher.execute(&command), async {
            while first.calls.lock().unwrap().is_empty() {
                tokio::task::yield_now().await;
            }
            h.dispatcher.session().restart().await
        });

        restarted.unwrap();
        assert!(matches!(outcome, Err(ClientError::RequestFailed(ref m)) if m == "analyzer connection closed"));
        assert_eq!(h.surface.end_count(), 1);
        assert_eq!(first.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(h.launcher.last().generation, 2);
    }

    #[tokio::test]
    async fn test_empty_response_reports_failure() {
        let h = harness(|_, _| Ok(json!({"success": true}))).await;

        let err = h
            .dispatcher
            .run(CommandKind::GenerateCallGraph, None, CommandOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::RequestFailed(_)));
        let messages = h.surface.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].1.starts_with("Failed to generate Workspace Call Graph"));
    }

    #[tokio::test]
    async fn test_persistence_failure_is_reported_per_artifact() {
        let h = harness(|_, _| {
            Ok(json!({"success": true, "data": {"dot": "digraph {}", "mermaid": "sequenceDiagram"}}))
        })
        .await;
        // A plain file where the output root should be makes every write fail.
        std::fs::write(h.dir.path().join("traverse-output"), b"").unwrap();

        let written = h
            .dispatcher
            .run(CommandKind::GenerateAll, None, CommandOptions::default())
            .await
            .unwrap();

        assert!(written.is_empty());
        let messages = h.surface.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|(typ, _)| *typ == MessageType::ERROR));

        let stats = h.dispatcher.stats().get(CommandKind::GenerateAll);
        assert_eq!((stats.failed, stats.artifacts_written, stats.persist_failures), (0, 0, 2));
    }

    #[tokio::test]
    async fn test_stats_track_outcomes() {
        let h = harness(|command, _| match command {
            "traverse.generateCallGraph.workspace" => {
                Ok(json!({"success": true, "data": {"dot": "digraph {}"}}))
            }
            _ => Ok(json!({"success": false})),
        })
        .await;

        let _ = h
            .dispatcher
            .run(CommandKind::GenerateCallGraph, None, CommandOptions::default())
            .await;
        let _ = h
            .dispatcher
            .run(CommandKind::AnalyzeStorage, None, CommandOptions::default())
            .await;

        let stats = h.dispatcher.stats();
        assert_eq!((stats.total_runs(), stats.total_failed(), stats.in_flight), (2, 1, 0));
        assert_eq!(stats.get(CommandKind::GenerateCallGraph).artifacts_written, 1);
        assert_eq!(stats.get(CommandKind::AnalyzeStorage).failed, 1);
    }
}
