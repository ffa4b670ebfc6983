//! Result classification
//!
//! Pure mapping from a command result to the artifacts it carries. Structured `data`
//! responses name their formats; legacy `diagram` strings need their format sniffed
//! from the content. The sniffing is kept to [`sniff_format`] so it can go once every
//! analyzer build answers with `data`.

use super::{Artifact, ArtifactFormat, ArtifactKind};
use crate::proto::{CommandResult, DiagramBundle};

const DOT_MARKERS: [&str; 2] = ["digraph", "strict graph"];
const MERMAID_MARKERS: [&str; 4] = ["sequenceDiagram", "graph TD", "graph LR", "flowchart"];

/// Failed results never produce artifacts, whatever payload they carry.
pub fn classify(result: &CommandResult) -> Vec<Artifact> {
    if !result.success {
        return Vec::new();
    }

    if let Some(data) = &result.data {
        let artifacts = from_bundle(data);
        if !artifacts.is_empty() {
            return artifacts;
        }
    }

    match &result.diagram {
        Some(diagram) => vec![from_legacy(diagram)],
        None => Vec::new(),
    }
}

fn from_bundle(data: &DiagramBundle) -> Vec<Artifact> {
    let mut artifacts = Vec::new();

    if let Some(dot) = &data.dot {
        artifacts.push(Artifact::new(ArtifactKind::CallGraph, ArtifactFormat::Dot, dot.as_str()));
    }

    if let Some(mermaid) = &data.mermaid {
        artifacts.push(Artifact::new(
            ArtifactKind::SequenceDiagram,
            ArtifactFormat::Mermaid,
            mermaid.as_str(),
        ));
    }

    artifacts
}

fn from_legacy(diagram: &str) -> Artifact {
    let format = sniff_format(diagram);
    let kind = match format {
        ArtifactFormat::Dot => ArtifactKind::CallGraph,
        ArtifactFormat::Mermaid => ArtifactKind::SequenceDiagram,
        ArtifactFormat::Markdown => ArtifactKind::Generic,
    };

    Artifact::new(kind, format, diagram)
}

/// First match wins: GraphViz markers, then Mermaid markers, else Markdown.
pub fn sniff_format(content: &str) -> ArtifactFormat {
    if DOT_MARKERS.iter().any(|m| content.contains(m)) {
        ArtifactFormat::Dot
    } else if MERMAID_MARKERS.iter().any(|m| content.contains(m)) {
        ArtifactFormat::Mermaid
    } else {
        ArtifactFormat::Markdown
    }
}
