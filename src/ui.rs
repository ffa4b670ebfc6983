//! User surface
//!
//! Everything the user sees goes through [`EditorSurface`]: progress indicators and
//! notifications with follow-up actions. Messages reuse the LSP window types so an
//! editor front end can forward them as-is.

use lsp_types::{MessageType, WorkDoneProgressBegin, WorkDoneProgressEnd};
use std::{
    io::Write,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    OpenFile(PathBuf),
    RevealInFolder(PathBuf),
}

impl FollowUp {
    pub fn label(&self) -> &'static str {
        match self {
            Self::OpenFile(_) => "Open",
            Self::RevealInFolder(_) => "Show in Folder",
        }
    }

    pub fn target(&self) -> &PathBuf {
        match self {
            Self::OpenFile(path) | Self::RevealInFolder(path) => path,
        }
    }
}

pub trait EditorSurface: Send + Sync {
    fn progress_begin(&self, token: &str, progress: WorkDoneProgressBegin);

    fn progress_end(&self, token: &str, progress: WorkDoneProgressEnd);

    fn show_message(&self, typ: MessageType, message: &str, follow_ups: &[FollowUp]);
}

/// Indeterminate, non-cancellable progress. Ends exactly once, on [`finish`](Self::finish)
/// or drop, whichever comes first.
pub struct Progress {
    surface: Arc<dyn EditorSurface>,
    token: String,
    finished: bool,
}

impl Progress {
    pub fn begin(surface: Arc<dyn EditorSurface>, prefix: &str, title: &str) -> Self {
        let token = format!("traverse-{}-{}", prefix, Uuid::new_v4());
        surface.progress_begin(
            &token,
            WorkDoneProgressBegin {
                title: title.to_string(),
                cancellable: Some(false),
                message: None,
                percentage: None,
            },
        );

        Self {
            surface,
            token,
            finished: false,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn finish(mut self, message: Option<String>) {
        self.end(message);
    }

    fn end(&mut self, message: Option<String>) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.surface
            .progress_end(&self.token, WorkDoneProgressEnd { message });
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        self.end(None);
    }
}

/// Terminal rendering: progress and messages on stderr, written paths on stdout.
pub struct ConsoleSurface {
    out: Mutex<Box<dyn Write + Send>>,
    err: Mutex<Box<dyn Write + Send>>,
}

impl Default for ConsoleSurface {
    fn default() -> Self {
        Self::new(Box::new(std::io::stdout()), Box::new(std::io::stderr()))
    }
}

impl ConsoleSurface {
    pub fn new(out: Box<dyn Write + Send>, err: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            err: Mutex::new(err),
        }
    }

    fn write_err(&self, line: &str) {
        let mut err = self.err.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = writeln!(err, "{line}");
    }
}

impl EditorSurface for ConsoleSurface {
    fn progress_begin(&self, token: &str, progress: WorkDoneProgressBegin) {
        debug!("Progress {} started", token);
        self.write_err(&format!("… {}", progress.title));
    }

    fn progress_end(&self, token: &str, progress: WorkDoneProgressEnd) {
        debug!("Progress {} ended", token);
        if let Some(message) = progress.message {
            self.write_err(&format!("… {message}"));
        }
    }

    fn show_message(&self, typ: MessageType, message: &str, follow_ups: &[FollowUp]) {
        let prefix = match typ {
            MessageType::ERROR => "error",
            MessageType::WARNING => "warning",
            _ => "info",
        };
        self.write_err(&format!("{prefix}: {message}"));

        // Files to open go to stdout so scripts can pick them up.
        for follow_up in follow_ups {
            match follow_up {
                FollowUp::OpenFile(path) => {
                    let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
                    let _ = writeln!(out, "{}", path.display());
                }
                FollowUp::RevealInFolder(_) => self.write_err(&format!(
                    "  {}: {}",
                    follow_up.label(),
                    follow_up.target().display()
                )),
            }
        }
    }
}
