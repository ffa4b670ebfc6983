//! Client composition root
//!
//! Owns the analyzer session and hands it to the dispatcher. Nothing here is global:
//! a front end activates one [`TraverseClient`] and keeps it for as long as it runs.

use crate::{
    binary::BinaryLocator,
    commands::{ClientError, ClientResult, CommandDispatcher},
    config::{ClientConfig, TraceLevel},
    session::AnalyzerSession,
    transport::{ServerLaunch, StdioLauncher, TransportLauncher},
    ui::EditorSurface,
    workspace::WorkspaceManager,
};
use crossbeam_channel::Sender;
use lsp_types::{
    ClientCapabilities, ClientInfo, InitializeParams, ShowMessageParams, TraceValue,
    WindowClientCapabilities,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    thread,
};
use tracing::{debug, error, info};

pub const CLIENT_NAME: &str = "traverse-client";

pub struct TraverseClient {
    config: ClientConfig,
    session: Arc<AnalyzerSession>,
    dispatcher: Arc<CommandDispatcher>,
    binary: Option<PathBuf>,
}

impl TraverseClient {
    /// Locates the analyzer, launches it and completes the handshake.
    ///
    /// `base_dir` anchors relative development paths. A missing binary or invalid
    /// settings are fatal; a binary that exists but fails to launch is `StartFailed`.
    pub async fn activate(
        config: ClientConfig,
        workspace: WorkspaceManager,
        surface: Arc<dyn EditorSurface>,
        base_dir: &Path,
    ) -> ClientResult<Self> {
        config.validate().map_err(ClientError::InvalidConfig)?;

        let candidate = BinaryLocator::new(&config.server, base_dir).resolve()?;
        let launch = ServerLaunch {
            binary: candidate.path.clone(),
            args: Vec::new(),
            env: config.server_env(),
            working_dir: workspace.get_workspace_root(),
            shutdown_timeout: config.shutdown_timeout(),
            log_traffic: config.server.trace == TraceLevel::Verbose,
        };
        let launcher = StdioLauncher::new(
            launch,
            initialize_params(&config, &workspace),
            Some(relay_server_messages(Arc::clone(&surface))),
        );

        let mut client = Self::with_launcher(config, workspace, surface, Arc::new(launcher)).await?;
        client.binary = Some(candidate.path);
        Ok(client)
    }

    /// Builds the client around any launcher and starts the session.
    pub async fn with_launcher(
        config: ClientConfig,
        workspace: WorkspaceManager,
        surface: Arc<dyn EditorSurface>,
        launcher: Arc<dyn TransportLauncher>,
    ) -> ClientResult<Self> {
        let session = Arc::new(AnalyzerSession::new(launcher));
        let dispatcher = Arc::new(
            CommandDispatcher::new(
                Arc::clone(&session),
                workspace,
                config.output.clone(),
                surface,
            )
            .with_default_no_chunk(config.sequence.no_chunk),
        );

        session.start().await?;
        info!("Traverse client activated");

        Ok(Self {
            config,
            session,
            dispatcher,
            binary: None,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<AnalyzerSession> {
        &self.session
    }

    pub fn dispatcher(&self) -> Arc<CommandDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Analyzer binary in use, when it was discovered on disk.
    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }

    pub async fn restart(&self) -> ClientResult<()> {
        self.session.restart().await
    }

    pub async fn deactivate(self) -> ClientResult<()> {
        info!("Deactivating Traverse client");
        self.session.stop().await
    }
}

fn initialize_params(config: &ClientConfig, workspace: &WorkspaceManager) -> InitializeParams {
    let folders = workspace.get_workspace_folders();
    let trace = match config.server.trace {
        TraceLevel::Off => TraceValue::Off,
        TraceLevel::Messages => TraceValue::Messages,
        TraceLevel::Verbose => TraceValue::Verbose,
    };

    InitializeParams {
        process_id: Some(std::process::id()),
        capabilities: ClientCapabilities {
            window: Some(WindowClientCapabilities {
                work_done_progress: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        },
        trace: Some(trace),
        workspace_folders: if folders.is_empty() { None } else { Some(folders) },
        client_info: Some(ClientInfo {
            name: CLIENT_NAME.to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }),
        ..Default::default()
    }
}

/// Forwards analyzer notices to the user until every sender is gone.
pub(crate) fn relay_server_messages(surface: Arc<dyn EditorSurface>) -> Sender<ShowMessageParams> {
    let (tx, rx) = crossbeam_channel::unbounded::<ShowMessageParams>();

    let spawned = thread::Builder::new()
        .name("traverse-show-message".to_string())
        .spawn(move || {
            for params in rx {
                debug!("Analyzer message: {}", params.message);
                surface.show_message(params.typ, &params.message, &[]);
            }
        });
    if let Err(e) = spawned {
        error!("Failed to start analyzer message relay: {}", e);
    }

    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        session::{testing::FakeLauncher, SessionState},
        ui::testing::RecordingSurface,
    };
    use lsp_types::MessageType;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_activation_fails_without_binary() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ClientConfig::default();
        config.server.path = Some(dir.path().join("missing/traverse-lsp"));
        config.server.bundle_dir = Some(dir.path().join("bin"));
        config.server.development_paths = vec![PathBuf::from("target/debug/traverse-lsp")];

        let result = TraverseClient::activate(
            config,
            WorkspaceManager::default(),
            Arc::new(RecordingSurface::default()),
            dir.path(),
        )
        .await;

        match result {
            Err(err @ ClientError::ActivationFailure { .. }) => {
                assert!(err.is_fatal());
                if let ClientError::ActivationFailure { searched } = err {
                    assert_eq!(searched.len(), 3);
                    assert_eq!(searched[2], dir.path().join("target/debug/traverse-lsp"));
                }
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("activation should fail"),
        }
    }

    #[tokio::test]
    async fn test_invalid_settings_are_fatal() {
        let mut config = ClientConfig::default();
        config.output.root = PathBuf::new();

        let result = TraverseClient::activate(
            config,
            WorkspaceManager::default(),
            Arc::new(RecordingSurface::default()),
            Path::new("/"),
        )
        .await;

        assert!(matches!(result, Err(ClientError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_with_launcher_starts_session() {
        let launcher = FakeLauncher::new(|_, _| Ok(serde_json::Value::Null));
        let client = TraverseClient::with_launcher(
            ClientConfig::default(),
            WorkspaceManager::default(),
            Arc::new(RecordingSurface::default()),
            launcher.clone(),
        )
        .await
        .unwrap();

        assert_eq!(client.session().state(), SessionState::Running);
        assert!(client.binary().is_none());

        client.restart().await.unwrap();
        assert_eq!(client.session().state(), SessionState::Running);

        let session = Arc::clone(client.session());
        client.deactivate().await.unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_failed_launch_is_start_failure() {
        let launcher = FakeLauncher::new(|_, _| Ok(serde_json::Value::Null));
        launcher
            .fail
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let result = TraverseClient::with_launcher(
            ClientConfig::default(),
            WorkspaceManager::default(),
            Arc::new(RecordingSurface::default()),
            launcher,
        )
        .await;

        match result {
            Err(err) => assert!(matches!(err, ClientError::StartFailed(_)) && !err.is_fatal()),
            Ok(_) => panic!("start should fail"),
        }
    }

    #[test]
    fn test_server_messages_reach_the_surface() {
        let surface = Arc::new(RecordingSurface::default());
        let tx = relay_server_messages(surface.clone());

        tx.send(ShowMessageParams {
            typ: MessageType::INFO,
            message: "Analyzing 3 files...".to_string(),
        })
        .unwrap();
        drop(tx);

        let deadline = Instant::now() + Duration::from_secs(5);
        while surface.messages().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(
            surface.messages(),
            vec![(MessageType::INFO, "Analyzing 3 files...".to_string())]
        );
    }

    #[test]
    fn test_initialize_params_advertise_progress() {
        let workspace = WorkspaceManager::from_paths(&[PathBuf::from("/work/project")], Path::new("/"));
        let params = initialize_params(&ClientConfig::default(), &workspace);

        assert_eq!(
            params.capabilities.window.unwrap().work_done_progress,
            Some(true)
        );
        assert_eq!(params.workspace_folders.unwrap().len(), 1);
        assert_eq!(params.client_info.unwrap().name, CLIENT_NAME);
        assert_eq!(params.trace, Some(TraceValue::Off));
    }
}
