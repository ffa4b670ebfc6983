//! Artifact persistence
//!
//! Output lands under `<workspace>/<output root>/<kind dir>/<slug>-<date>.<ext>`. The
//! kind directory and the slug both come from the command title, and the date has no
//! time component, so re-running a command on the same day overwrites the previous
//! file instead of piling up copies.
//!
//! Artifacts of one result are written independently. A failed write is reported for
//! that artifact only; files already written stay on disk.

use super::{Artifact, ArtifactFormat};
use crate::{commands::ClientError, config::OutputConfig};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

#[derive(Debug)]
pub struct PersistFailure {
    pub format: ArtifactFormat,
    pub error: ClientError,
}

#[derive(Debug, Default)]
pub struct PersistOutcome {
    pub written: Vec<PathBuf>,
    pub failures: Vec<PersistFailure>,
}

impl PersistOutcome {
    pub fn is_empty(&self) -> bool {
        self.written.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn for_workspace(workspace: &Path, output: &OutputConfig) -> Self {
        Self::new(workspace.join(&output.root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn output_dir(&self, title: &str) -> PathBuf {
        self.root.join(kind_dir(title))
    }

    pub fn artifact_path(&self, title: &str, date: NaiveDate, format: ArtifactFormat) -> PathBuf {
        self.output_dir(title).join(file_name(title, date, format))
    }

    /// Writes `artifacts` stamped with today's (UTC) date.
    pub async fn persist(&self, title: &str, artifacts: &[Artifact]) -> PersistOutcome {
        self.persist_on(title, artifacts, chrono::Utc::now().date_naive())
            .await
    }

    pub async fn persist_on(
        &self,
        title: &str,
        artifacts: &[Artifact],
        date: NaiveDate,
    ) -> PersistOutcome {
        let mut outcome = PersistOutcome::default();
        if artifacts.is_empty() {
            return outcome;
        }

        let dir = self.output_dir(title);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            error!("Failed to create output directory {}: {}", dir.display(), e);
            for artifact in artifacts {
                outcome.failures.push(PersistFailure {
                    format: artifact.format,
                    error: ClientError::PersistenceFailure {
                        path: dir.join(file_name(title, date, artifact.format)),
                        source: std::io::Error::new(e.kind(), e.to_string()),
                    },
                });
            }
            return outcome;
        }

        for artifact in artifacts {
            let path = dir.join(file_name(title, date, artifact.format));
            match tokio::fs::write(&path, artifact.content.as_bytes()).await {
                Ok(()) => {
                    debug!("Wrote {} bytes to {}", artifact.content.len(), path.display());
                    outcome.written.push(path);
                }
                Err(source) => {
                    error!("Failed to write {}: {}", path.display(), source);
                    outcome.failures.push(PersistFailure {
                        format: artifact.format,
                        error: ClientError::PersistenceFailure { path, source },
                    });
                }
            }
        }

        info!(
            "Saved {} of {} artifact(s) for {}",
            outcome.written.len(),
            artifacts.len(),
            title
        );
        outcome
    }
}

/// Case-insensitive routing on the title.
pub fn kind_dir(title: &str) -> &'static str {
    let title = title.to_lowercase();
    if title.contains("call graph") {
        "call-graphs"
    } else if title.contains("sequence") {
        "sequence-diagrams"
    } else if title.contains("storage") {
        "storage-reports"
    } else {
        "diagrams"
    }
}

pub fn slug(title: &str) -> String {
    title
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

pub fn file_name(title: &str, date: NaiveDate, format: ArtifactFormat) -> String {
    format!(
        "{}-{}.{}",
        slug(title),
        date.format("%Y-%m-%d"),
        format.extension()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactKind;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn dot(content: &str) -> Artifact {
        Artifact::new(ArtifactKind::CallGraph, ArtifactFormat::Dot, content)
    }

    fn mermaid(content: &str) -> Artifact {
        Artifact::new(ArtifactKind::SequenceDiagram, ArtifactFormat::Mermaid, content)
    }

    #[test]
    fn test_directory_routing() {
        let store = ArtifactStore::new("/ws/traverse-output");

        assert_eq!(
            store.output_dir("Workspace Call Graph"),
            PathBuf::from("/ws/traverse-output/call-graphs")
        );
        assert_eq!(
            store.output_dir("Workspace Sequence Diagram"),
            PathBuf::from("/ws/traverse-output/sequence-diagrams")
        );
        assert_eq!(
            store.output_dir("Workspace Storage Analysis"),
            PathBuf::from("/ws/traverse-output/storage-reports")
        );
        assert_eq!(
            store.output_dir("Workspace Diagrams"),
            PathBuf::from("/ws/traverse-output/diagrams")
        );
    }

    #[test]
    fn test_routing_is_case_insensitive_and_ordered() {
        assert_eq!(kind_dir("CALL GRAPH"), "call-graphs");
        assert_eq!(kind_dir("call graph of a sequence"), "call-graphs");
        assert_eq!(kind_dir("Storage sequence"), "sequence-diagrams");
        assert_eq!(kind_dir("callgraph"), "diagrams");
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Workspace Call Graph"), "workspace-call-graph");
        assert_eq!(slug("Workspace   Storage\tAnalysis"), "workspace-storage-analysis");
        assert_eq!(slug("single"), "single");
    }

    #[test]
    fn test_file_name() {
        assert_eq!(
            file_name("Workspace Call Graph", date(), ArtifactFormat::Dot),
            "workspace-call-graph-2026-10-16.dot"
        );
        assert_eq!(
            file_name("Workspace Storage Analysis", date(), ArtifactFormat::Markdown),
            "workspace-storage-analysis-2026-10-16.md"
        );
    }

    #[tokio::test]
    async fn test_persist_writes_each_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("traverse-output"));

        let outcome = store
            .persist_on(
                "Workspace Diagrams",
                &[dot("digraph {}"), mermaid("sequenceDiagram")],
                date(),
            )
            .await;

        assert!(outcome.failures.is_empty());
        assert_eq!(
            outcome.written,
            vec![
                dir.path()
                    .join("traverse-output/diagrams/workspace-diagrams-2026-10-16.dot"),
                dir.path()
                    .join("traverse-output/diagrams/workspace-diagrams-2026-10-16.mmd"),
            ]
        );
        assert_eq!(std::fs::read_to_string(&outcome.written[0]).unwrap(), "digraph {}");
        assert_eq!(
            std::fs::read_to_string(&outcome.written[1]).unwrap(),
            "sequenceDiagram"
        );
    }

    #[tokio::test]
    async fn test_same_day_rerun_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let first = store
            .persist_on("Workspace Call Graph", &[dot("digraph v1 {}")], date())
            .await;
        let second = store
            .persist_on("Workspace Call Graph", &[dot("digraph v2 {}")], date())
            .await;

        assert_eq!(first.written, second.written);
        let files: Vec<_> = std::fs::read_dir(store.output_dir("Workspace Call Graph"))
            .unwrap()
            .collect();
        assert_eq!(files.len(), 1);
        assert_eq!(
            std::fs::read_to_string(&second.written[0]).unwrap(),
            "digraph v2 {}"
        );
    }

    #[tokio::test]
    async fn test_failed_write_does_not_abort_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        // A directory squatting on the .dot target makes that one write fail.
        let blocked = store.artifact_path("Workspace Diagrams", date(), ArtifactFormat::Dot);
        std::fs::create_dir_all(&blocked).unwrap();

        let outcome = store
            .persist_on(
                "Workspace Diagrams",
                &[dot("digraph {}"), mermaid("sequenceDiagram")],
                date(),
            )
            .await;

        assert_eq!(outcome.written.len(), 1);
        assert!(outcome.written[0].to_string_lossy().ends_with(".mmd"));
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].format, ArtifactFormat::Dot);
        assert!(matches!(
            &outcome.failures[0].error,
            ClientError::PersistenceFailure { path, .. } if *path == blocked
        ));
    }

    #[tokio::test]
    async fn test_unwritable_root_fails_every_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"").unwrap();
        let store = ArtifactStore::new(&file);

        let outcome = store
            .persist_on("Workspace Diagrams", &[dot("a"), mermaid("b")], date())
            .await;

        assert!(outcome.is_empty());
        assert_eq!(outcome.failures.len(), 2);
    }

    #[tokio::test]
    async fn test_nothing_to_persist_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("out"));

        let outcome = store.persist_on("Workspace Call Graph", &[], date()).await;

        assert!(outcome.is_empty());
        assert!(outcome.failures.is_empty());
        assert!(!store.root().exists());
    }

    #[test]
    fn test_for_workspace() {
        let store = ArtifactStore::for_workspace(Path::new("/ws"), &OutputConfig::default());
        assert_eq!(store.root(), Path::new("/ws/traverse-output"));
    }
}
