//! Analyzer transport
//!
//! The analyzer is a separate process speaking the language-server protocol over its
//! stdin/stdout. Two I/O threads turn the byte streams into `lsp_server::Message`s on
//! crossbeam channels, the same shape `lsp_server::Connection` gives a server, and a
//! dispatch thread pairs responses with the futures waiting on them.
//!
//! Every call is a suspension point and can fail with a disconnect: when the analyzer
//! exits, all pending requests resolve to [`TransportError::Disconnected`].

use async_trait::async_trait;
use crossbeam_channel::{Receiver, Sender};
use dashmap::DashMap;
use lsp_server::{Connection, Message, Notification, Request, RequestId, Response};
use lsp_types::{
    notification::{Exit, Initialized, LogMessage, Notification as LspNotification, ShowMessage},
    request::{ExecuteCommand, Initialize, Request as LspRequest, Shutdown},
    ExecuteCommandParams, InitializeParams, InitializeResult, InitializedParams,
    LogMessageParams, ShowMessageParams,
};
use std::{
    io::BufReader,
    path::PathBuf,
    process::{Child, Command, Stdio},
    sync::{
        atomic::{AtomicBool, AtomicI32, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to spawn {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("analyzer connection closed")]
    Disconnected,

    #[error("{message}")]
    Rejected { code: i32, message: String },

    #[error("Invalid analyzer response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the rest of the client needs from the analyzer connection.
#[async_trait]
pub trait AnalyzerTransport: Send + Sync {
    /// Sends `workspace/executeCommand` and waits for the single response.
    async fn execute_command(
        &self,
        command: &str,
        arguments: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, TransportError>;

    /// Graceful `shutdown`/`exit` followed by reaping the process.
    async fn shutdown(&self) -> Result<(), TransportError>;
}

/// Creates fresh, initialized connections. The session calls it on every (re)start.
#[async_trait]
pub trait TransportLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn AnalyzerTransport>, TransportError>;
}

#[derive(Debug, Clone)]
pub struct ServerLaunch {
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
    pub shutdown_timeout: Duration,
    pub log_traffic: bool,
}

type PendingRequests = Arc<DashMap<RequestId, oneshot::Sender<Response>>>;

pub struct LspTransport {
    sender: Sender<Message>,
    pending: PendingRequests,
    closed: Arc<AtomicBool>,
    next_id: AtomicI32,
    child: Mutex<Option<Child>>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    shutdown_timeout: Duration,
    log_traffic: bool,
}

impl LspTransport {
    /// Wraps an already established message connection. `child` is reaped on shutdown.
    pub fn connect(
        connection: Connection,
        child: Option<Child>,
        server_messages: Option<Sender<ShowMessageParams>>,
    ) -> Self {
        let Connection { sender, receiver } = connection;
        let pending: PendingRequests = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let dispatcher = {
            let sender = sender.clone();
            let pending = Arc::clone(&pending);
            let closed = Arc::clone(&closed);
            thread::spawn(move || {
                dispatch_incoming(receiver, sender, &pending, server_messages);
                closed.store(true, Ordering::SeqCst);
                if !pending.is_empty() {
                    warn!(
                        "Analyzer connection closed with {} request(s) in flight",
                        pending.len()
                    );
                }
                pending.clear();
            })
        };

        Self {
            sender,
            pending,
            closed,
            next_id: AtomicI32::new(1),
            child: Mutex::new(child),
            threads: Mutex::new(vec![dispatcher]),
            shutdown_timeout: Duration::from_secs(5),
            log_traffic: false,
        }
    }

    /// Spawns the analyzer binary and bridges its stdio to a message connection.
    pub fn spawn(
        launch: &ServerLaunch,
        server_messages: Option<Sender<ShowMessageParams>>,
    ) -> Result<Self, TransportError> {
        let mut command = Command::new(&launch.binary);
        command
            .args(&launch.args)
            .envs(launch.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(dir) = &launch.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| TransportError::Spawn {
            binary: launch.binary.clone(),
            source,
        })?;
        info!("Spawned analyzer {} (pid {})", launch.binary.display(), child.id());

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "analyzer stdio is not piped",
                )));
            }
        };

        let (writer_tx, writer_rx) = crossbeam_channel::unbounded::<Message>();
        thread::Builder::new()
            .name("traverse-writer".to_string())
            .spawn(move || {
                let mut stdin = stdin;
                for msg in writer_rx {
                    if let Err(e) = msg.write(&mut stdin) {
                        debug!("Analyzer stdin closed: {}", e);
                        break;
                    }
                }
            })?;

        let (reader_tx, reader_rx) = crossbeam_channel::bounded::<Message>(0);
        let reader = thread::Builder::new()
            .name("traverse-reader".to_string())
            .spawn(move || {
                let mut stdout = BufReader::new(stdout);
                loop {
                    match Message::read(&mut stdout) {
                        Ok(Some(msg)) => {
                            if reader_tx.send(msg).is_err() {
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!("Analyzer stdout reached EOF");
                            break;
                        }
                        Err(e) => {
                            warn!("Failed to read analyzer message: {}", e);
                            break;
                        }
                    }
                }
            })?;

        let connection = Connection {
            sender: writer_tx,
            receiver: reader_rx,
        };
        let mut transport = Self::connect(connection, Some(child), server_messages);
        transport.shutdown_timeout = launch.shutdown_timeout;
        transport.log_traffic = launch.log_traffic;
        transport
            .threads
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reader);

        Ok(transport)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn request<R: LspRequest>(
        &self,
        params: R::Params,
    ) -> Result<R::Result, TransportError> {
        let id = RequestId::from(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);

        if self.is_closed() {
            self.pending.remove(&id);
            return Err(TransportError::Disconnected);
        }

        if self.log_traffic {
            debug!("--> {} ({:?})", R::METHOD, id);
        }
        let request = Request::new(id.clone(), R::METHOD.to_string(), params);
        if self.sender.send(request.into()).is_err() {
            self.pending.remove(&id);
            return Err(TransportError::Disconnected);
        }

        let response = rx.await.map_err(|_| TransportError::Disconnected)?;
        if self.log_traffic {
            debug!("<-- {} ({:?})", R::METHOD, id);
        }

        if let Some(err) = response.error {
            return Err(TransportError::Rejected {
                code: err.code,
                message: err.message,
            });
        }

        Ok(serde_json::from_value(
            response.result.unwrap_or(serde_json::Value::Null),
        )?)
    }

    pub fn notify<N: LspNotification>(&self, params: N::Params) -> Result<(), TransportError> {
        if self.log_traffic {
            debug!("--> {}", N::METHOD);
        }
        let notification = Notification::new(N::METHOD.to_string(), params);
        self.sender
            .send(notification.into())
            .map_err(|_| TransportError::Disconnected)
    }

    /// LSP handshake: `initialize` request then `initialized` notification.
    pub async fn initialize(
        &self,
        params: InitializeParams,
    ) -> Result<InitializeResult, TransportError> {
        let result = self.request::<Initialize>(params).await?;
        self.notify::<Initialized>(InitializedParams {})?;

        if let Some(server_info) = &result.server_info {
            info!(
                "Connected to {} {}",
                server_info.name,
                server_info.version.as_deref().unwrap_or("")
            );
        }

        Ok(result)
    }

    async fn reap_child(&self) {
        let child = self
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut child) = child else {
            return;
        };

        let timeout = self.shutdown_timeout;
        let _ = tokio::task::spawn_blocking(move || wait_or_kill(&mut child, timeout)).await;
    }

    /// Marks the connection closed and fails every request still waiting on it.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if !self.pending.is_empty() {
            debug!("Failing {} in-flight request(s)", self.pending.len());
        }
        self.pending.clear();
    }

    /// Threads that outlive the timeout are left detached.
    async fn join_threads(&self) {
        let handles: Vec<_> = self
            .threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        // Off the blocking pool: runtime shutdown waits on that pool.
        let (done_tx, done_rx) = oneshot::channel();
        thread::spawn(move || {
            for handle in handles {
                if handle.join().is_err() {
                    warn!("Transport thread panicked");
                }
            }
            let _ = done_tx.send(());
        });
        if tokio::time::timeout(self.shutdown_timeout, done_rx).await.is_err() {
            warn!("Transport threads still running after shutdown");
        }
    }
}

#[async_trait]
impl AnalyzerTransport for LspTransport {
    async fn execute_command(
        &self,
        command: &str,
        arguments: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, TransportError> {
        let params = ExecuteCommandParams {
            command: command.to_string(),
            arguments,
            work_done_progress_params: Default::default(),
        };

        let result = self.request::<ExecuteCommand>(params).await?;
        Ok(result.unwrap_or(serde_json::Value::Null))
    }

    /// Bounded by `shutdown_timeout` at every step: an analyzer that never answers
    /// `shutdown` is killed, and requests still waiting on it fail with a disconnect.
    async fn shutdown(&self) -> Result<(), TransportError> {
        let acknowledged =
            match tokio::time::timeout(self.shutdown_timeout, self.request::<Shutdown>(())).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        "Analyzer did not answer shutdown within {}ms",
                        self.shutdown_timeout.as_millis()
                    );
                    Err(TransportError::Disconnected)
                }
            };
        match &acknowledged {
            Ok(()) => {
                let _ = self.notify::<Exit>(());
            }
            Err(TransportError::Disconnected) => debug!("Analyzer already disconnected"),
            Err(e) => warn!("Analyzer did not acknowledge shutdown: {}", e),
        }

        self.close();
        self.reap_child().await;
        self.join_threads().await;

        match acknowledged {
            Err(TransportError::Disconnected) | Ok(()) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for LspTransport {
    fn drop(&mut self) {
        let child = self
            .child
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut child) = child {
            debug!("Killing analyzer process {} on drop", child.id());
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn dispatch_incoming(
    receiver: Receiver<Message>,
    sender: Sender<Message>,
    pending: &DashMap<RequestId, oneshot::Sender<Response>>,
    server_messages: Option<Sender<ShowMessageParams>>,
) {
    for msg in receiver {
        match msg {
            Message::Response(response) => match pending.remove(&response.id) {
                Some((_, tx)) => {
                    let _ = tx.send(response);
                }
                None => warn!("Response for unknown request {:?}", response.id),
            },
            Message::Request(req) => {
                debug!("Acknowledging analyzer request: {}", req.method);
                let ack = Response::new_ok(req.id, serde_json::Value::Null);
                if sender.send(ack.into()).is_err() {
                    break;
                }
            }
            Message::Notification(not) => handle_notification(not, server_messages.as_ref()),
        }
    }
}

fn handle_notification(not: Notification, server_messages: Option<&Sender<ShowMessageParams>>) {
    match not.method.as_str() {
        ShowMessage::METHOD => match serde_json::from_value::<ShowMessageParams>(not.params) {
            Ok(params) => {
                info!("Analyzer: {}", params.message);
                if let Some(tx) = server_messages {
                    let _ = tx.send(params);
                }
            }
            Err(e) => warn!("Malformed showMessage from analyzer: {}", e),
        },
        LogMessage::METHOD => {
            if let Ok(params) = serde_json::from_value::<LogMessageParams>(not.params) {
                debug!("Analyzer log: {}", params.message);
            }
        }
        method => trace!("Ignoring analyzer notification {}", method),
    }
}

fn wait_or_kill(child: &mut Child, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("Analyzer exited with {}", status);
                return;
            }
            Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(50)),
            Ok(None) => {
                warn!(
                    "Analyzer did not exit within {}ms, killing it",
                    timeout.as_millis()
                );
                let _ = child.kill();
                let _ = child.wait();
                return;
            }
            Err(e) => {
                warn!("Failed to wait for analyzer: {}", e);
                return;
            }
        }
    }
}

/// Spawns the configured binary and performs the handshake on every launch.
pub struct StdioLauncher {
    launch: ServerLaunch,
    init_params: InitializeParams,
    server_messages: Option<Sender<ShowMessageParams>>,
}

impl StdioLauncher {
    pub fn new(
        launch: ServerLaunch,
        init_params: InitializeParams,
        server_messages: Option<Sender<ShowMessageParams>>,
    ) -> Self {
        Self {
            launch,
            init_params,
            server_messages,
        }
    }
}

#[async_trait]
impl TransportLauncher for StdioLauncher {
    async fn launch(&self) -> Result<Arc<dyn AnalyzerTransport>, TransportError> {
        let transport = LspTransport::spawn(&self.launch, self.server_messages.clone())?;
        transport.initialize(self.init_params.clone()).await?;
        Ok(Arc::new(transport))
    }
}
