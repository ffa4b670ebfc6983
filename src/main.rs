//! Traverse client entry point
//!
//! One-shot commands run a single workspace action and exit. `interactive` keeps the
//! analyzer alive and reads editor actions from stdin, running workspace commands
//! concurrently the way an editor would fire them.

use anyhow::Result;
use clap::{Parser, Subcommand};
use lsp_types::MessageType;
use std::{env, path::PathBuf, process::ExitCode, sync::Arc};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    task::JoinSet,
};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use traverse_client::{
    ClientConfig, CommandKind, CommandOptions, ConsoleSurface, EditorSurface,
    TraverseClient, WorkspaceManager,
};

/// Generate call graphs, sequence diagrams and storage reports for a Solidity workspace
#[derive(Parser, Debug)]
#[command(name = "traverse", version, about)]
struct Cli {
    /// Settings file (JSON, bare or nested under "traverse")
    #[arg(long)]
    config: Option<PathBuf>,

    /// Workspace folder; may be repeated, the first one is the default target
    #[arg(long = "workspace", short = 'w')]
    workspaces: Vec<PathBuf>,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Generate the workspace call graph (.dot)
    CallGraph { target: Option<String> },

    /// Generate the workspace sequence diagram (.mmd)
    Sequence {
        /// Ask the analyzer not to split large diagrams
        #[arg(long)]
        no_chunk: bool,
        target: Option<String>,
    },

    /// Generate every diagram in one request
    All { target: Option<String> },

    /// Analyze storage access (.md)
    Storage { target: Option<String> },

    /// Read actions from stdin until `quit`
    Interactive,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_from_file(path)?,
        None => ClientConfig::default(),
    };
    config.apply_env();

    let cwd = env::current_dir()?;
    let folders = if cli.workspaces.is_empty() {
        vec![cwd.clone()]
    } else {
        cli.workspaces.clone()
    };
    let workspace = WorkspaceManager::from_paths(&folders, &cwd);
    let surface: Arc<dyn EditorSurface> = Arc::new(ConsoleSurface::default());

    info!("Starting Traverse client");
    let client = match TraverseClient::activate(config, workspace, Arc::clone(&surface), &cwd).await {
        Ok(client) => Some(client),
        Err(e) => {
            surface.show_message(MessageType::ERROR, &e.to_string(), &[]);
            if !(e.is_fatal() && matches!(cli.command, Action::Interactive)) {
                return Ok(ExitCode::FAILURE);
            }
            warn!("Continuing without an analyzer: {}", e);
            None
        }
    };

    let (kind, target, options) = match cli.command {
        Action::Interactive => return run_interactive(client, surface).await,
        Action::CallGraph { target } => (CommandKind::GenerateCallGraph, target, CommandOptions::default()),
        Action::Sequence { no_chunk, target } => (
            CommandKind::GenerateSequenceDiagram,
            target,
            CommandOptions {
                no_chunk: no_chunk.then_some(true),
            },
        ),
        Action::All { target } => (CommandKind::GenerateAll, target, CommandOptions::default()),
        Action::Storage { target } => (CommandKind::AnalyzeStorage, target, CommandOptions::default()),
    };

    let Some(client) = client else {
        return Ok(ExitCode::FAILURE);
    };

    let outcome = client.dispatcher().run(kind, target.as_deref(), options).await;
    client.deactivate().await?;

    Ok(match outcome {
        Ok(written) if !written.is_empty() => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Run {
        kind: CommandKind,
        target: Option<String>,
        options: CommandOptions,
    },
    Restart,
    Status,
    Quit,
}

fn parse_input(line: &str) -> Option<Result<Input, String>> {
    let mut words = line.split_whitespace();
    let action = words.next()?;

    let input = match action {
        "quit" | "exit" => Input::Quit,
        "restart" => Input::Restart,
        "status" => Input::Status,
        name => match CommandKind::from_action_name(name) {
            Some(kind) => {
                let mut target = None;
                let mut options = CommandOptions::default();
                for word in words {
                    match word {
                        "--no-chunk" => options.no_chunk = Some(true),
                        other if target.is_none() => target = Some(other.to_string()),
                        other => return Some(Err(format!("Unexpected argument: {other}"))),
                    }
                }
                Input::Run {
                    kind,
                    target,
                    options,
                }
            }
            None => return Some(Err(format!("Unknown action: {name}"))),
        },
    };

    Some(Ok(input))
}

async fn run_interactive(
    client: Option<TraverseClient>,
    surface: Arc<dyn EditorSurface>,
) -> Result<ExitCode> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();
    let mut unavailable_reported = false;

    while let Some(line) = lines.next_line().await? {
        let input = match parse_input(&line) {
            None => continue,
            Some(Ok(input)) => input,
            Some(Err(message)) => {
                surface.show_message(MessageType::WARNING, &message, &[]);
                continue;
            }
        };

        if input == Input::Quit {
            break;
        }

        let Some(client) = &client else {
            // Without an analyzer every action is a no-op; say so once.
            if !unavailable_reported {
                surface.show_message(
                    MessageType::ERROR,
                    "Traverse analyzer is unavailable; commands are disabled",
                    &[],
                );
                unavailable_reported = true;
            }
            continue;
        };

        match input {
            Input::Run {
                kind,
                target,
                options,
            } => {
                let dispatcher = client.dispatcher();
                tasks.spawn(async move {
                    let _ = dispatcher.run(kind, target.as_deref(), options).await;
                });
            }
            Input::Restart => match client.restart().await {
                Ok(()) => surface.show_message(MessageType::INFO, "Traverse analyzer restarted", &[]),
                Err(e) => surface.show_message(MessageType::ERROR, &e.to_string(), &[]),
            },
            Input::Status => {
                let stats = client.dispatcher().stats();
                let binary = client
                    .binary()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "-".to_string());
                let mut lines = vec![format!(
                    "analyzer {} ({}); {} running",
                    client.session().state().as_str(),
                    binary,
                    stats.in_flight
                )];
                lines.extend(stats.summary_lines().into_iter().map(|line| format!("  {line}")));
                surface.show_message(MessageType::INFO, &lines.join("\n"), &[]);
            }
            Input::Quit => break,
        }

        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                warn!("Command task failed: {}", e);
            }
        }
    }

    debug!("Waiting for {} running command(s)", tasks.len());
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!("Command task failed: {}", e);
        }
    }

    match client {
        Some(client) => {
            client.deactivate().await?;
            Ok(ExitCode::SUCCESS)
        }
        None => Ok(ExitCode::FAILURE),
    }
}
