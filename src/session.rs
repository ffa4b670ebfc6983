//! Analyzer session lifecycle
//!
//! `Stopped → Starting → Running → Stopping → Stopped`, plus `Running → Restarting →
//! Running` where a restart is a full stop followed by a fresh launch.
//!
//! The session is the only writer of its state. Lifecycle operations are serialized
//! through one async lock; readers take a snapshot of the current transport and never
//! wait on that lock. Anything asking for the transport while the session is not
//! `Running` gets `ClientNotReady`. Requests already in flight on a connection that
//! gets torn down fail on their own with a disconnect.

use crate::{
    commands::{ClientError, ClientResult},
    transport::{AnalyzerTransport, TransportLauncher},
};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Restarting,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Restarting => "restarting",
        }
    }
}

struct Current {
    state: SessionState,
    transport: Option<Arc<dyn AnalyzerTransport>>,
}

pub struct AnalyzerSession {
    launcher: Arc<dyn TransportLauncher>,
    lifecycle: Mutex<()>,
    current: RwLock<Current>,
    transitions: broadcast::Sender<SessionState>,
}

impl AnalyzerSession {
    pub fn new(launcher: Arc<dyn TransportLauncher>) -> Self {
        let (transitions, _) = broadcast::channel(16);
        Self {
            launcher,
            lifecycle: Mutex::new(()),
            current: RwLock::new(Current {
                state: SessionState::Stopped,
                transport: None,
            }),
            transitions,
        }
    }

    pub fn state(&self) -> SessionState {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Every state change, in order, from the moment of subscribing.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionState> {
        self.transitions.subscribe()
    }

    pub fn transport(&self) -> ClientResult<Arc<dyn AnalyzerTransport>> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        match (&current.state, &current.transport) {
            (SessionState::Running, Some(transport)) => Ok(Arc::clone(transport)),
            (state, _) => {
                debug!("Rejecting request while session is {}", state.as_str());
                Err(ClientError::ClientNotReady)
            }
        }
    }

    pub async fn start(&self) -> ClientResult<()> {
        let _guard = self.lifecycle.lock().await;
        if self.state() == SessionState::Running {
            debug!("Analyzer session already running");
            return Ok(());
        }

        self.launch().await
    }

    pub async fn stop(&self) -> ClientResult<()> {
        let _guard = self.lifecycle.lock().await;
        if self.state() == SessionState::Stopped {
            return Ok(());
        }

        self.set_state(SessionState::Stopping);
        self.teardown().await;
        Ok(())
    }

    /// Full stop-then-start. Fails with `NotRunning` when there is nothing to restart.
    pub async fn restart(&self) -> ClientResult<()> {
        let _guard = self.lifecycle.lock().await;
        if self.state() == SessionState::Stopped {
            return Err(ClientError::NotRunning);
        }

        info!("Restarting analyzer session");
        self.set_state(SessionState::Restarting);
        self.teardown().await;
        self.launch().await
    }

    async fn launch(&self) -> ClientResult<()> {
        self.set_state(SessionState::Starting);

        match self.launcher.launch().await {
            Ok(transport) => {
                {
                    let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
                    current.transport = Some(transport);
                }
                self.set_state(SessionState::Running);
                info!("Analyzer session running");
                Ok(())
            }
            Err(e) => {
                error!("Failed to start analyzer: {}", e);
                self.set_state(SessionState::Stopped);
                Err(ClientError::StartFailed(e))
            }
        }
    }

    /// Shuts the current transport down and leaves the session `Stopped`.
    async fn teardown(&self) {
        let transport = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .transport
            .take();

        if let Some(transport) = transport {
            if let Err(e) = transport.shutdown().await {
                warn!("Analyzer shutdown was not clean: {}", e);
            }
        }

        self.set_state(SessionState::Stopped);
        info!("Analyzer session stopped");
    }

    fn set_state(&self, state: SessionState) {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .state = state;
        debug!("Session state: {}", state.as_str());
        let _ = self.transitions.send(state);
    }
}
