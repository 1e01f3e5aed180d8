//! Sandbox transport: launch a tool server inside a sandbox and speak
//! line-delimited JSON-RPC over its stdio.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    futures::StreamExt,
    serde_json::json,
    tokio::{io::AsyncWriteExt, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, trace, warn},
};

use crate::{
    correlator::Correlator,
    error::{McpError, Result},
    framer::OutputFramer,
    sandbox::{InputSink, OutputStream, Sandbox, SandboxProcess},
    state::SessionEvent,
    types::{
        CallToolResult, FileSet, JsonRpcMessage, ProcessConfig, Tool, ToolsCallParams,
        ToolsListResult,
    },
};

/// What to run inside the sandbox.
#[derive(Debug, Clone)]
pub enum LaunchSpec {
    /// Mount `files`, run the install step, then `<runtime> <entrypoint>`.
    Files { files: FileSet, entrypoint: String },
    /// Spawn a command directly.
    Spawn(ProcessConfig),
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub request_timeout: Duration,
    /// Empty skips the install step.
    pub install_command: Vec<String>,
    pub runtime: String,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            install_command: vec!["npm".into(), "install".into()],
            runtime: "node".into(),
        }
    }
}

impl From<&mcpbox_config::TransportConfig> for TransportOptions {
    fn from(config: &mcpbox_config::TransportConfig) -> Self {
        Self {
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            install_command: config.install_command.clone(),
            runtime: config.runtime.clone(),
        }
    }
}

/// Everything a transport reports to its owner.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A launch stage completed.
    Lifecycle(SessionEvent),
    /// One raw output line, JSON or not.
    Output(String),
    /// A parsed envelope, whether or not it answered a pending request.
    Message(JsonRpcMessage),
    Error(String),
    /// The server's output ended without `close()` being called.
    Closed,
}

pub type OnTransportEvent = Arc<dyn Fn(TransportEvent) + Send + Sync>;

struct Inner {
    correlator: Correlator,
    input: tokio::sync::Mutex<Option<InputSink>>,
    handler: RwLock<Option<OnTransportEvent>>,
    kill: Mutex<Option<CancellationToken>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    closed: AtomicBool,
    /// Cancelled by `close()`; aborts a launch still in progress.
    cancel: CancellationToken,
}

impl Inner {
    fn emit(&self, event: TransportEvent) {
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    fn handle_line(&self, line: &str) {
        if line.is_empty() {
            return;
        }
        trace!(raw = %line, "server -> client");
        self.emit(TransportEvent::Output(line.to_string()));
        if let Some(message) = self.correlator.dispatch(line) {
            self.emit(TransportEvent::Message(message));
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One server process in one sandbox. Not restartable: a fresh start needs a
/// fresh transport.
pub struct SandboxTransport {
    sandbox: Arc<dyn Sandbox>,
    launch: LaunchSpec,
    options: TransportOptions,
    inner: Arc<Inner>,
}

impl SandboxTransport {
    pub fn new(sandbox: Arc<dyn Sandbox>, launch: LaunchSpec, options: TransportOptions) -> Self {
        Self {
            sandbox,
            launch,
            options,
            inner: Arc::new(Inner {
                correlator: Correlator::new(),
                input: tokio::sync::Mutex::new(None),
                handler: RwLock::new(None),
                kill: Mutex::new(None),
                reader: Mutex::new(None),
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn set_event_handler(&self, handler: OnTransportEvent) {
        *self
            .inner
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn backend_name(&self) -> &'static str {
        self.sandbox.backend_name()
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// Boot the sandbox and launch the server. Returns once the process is
    /// spawned and its output is being read.
    ///
    /// A `close()` while this is still booting, mounting or installing makes
    /// it return [`McpError::TransportClosed`].
    pub async fn start(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(McpError::AlreadyStarted);
        }

        let cancel = self.inner.cancel.clone();
        let process = tokio::select! {
            process = self.launch_process() => process?,
            () = cancel.cancelled() => {
                debug!("launch abandoned, transport closed");
                return Err(McpError::TransportClosed);
            },
        };

        if self.inner.closed.load(Ordering::SeqCst) {
            process.kill();
            return Err(McpError::TransportClosed);
        }
        self.attach(process).await;
        info!(backend = self.sandbox.backend_name(), "sandbox server started");
        Ok(())
    }

    async fn launch_process(&self) -> Result<SandboxProcess> {
        self.sandbox.boot().await?;
        self.inner.emit(TransportEvent::Lifecycle(SessionEvent::Booted));

        match &self.launch {
            LaunchSpec::Files { files, entrypoint } => {
                self.sandbox.mount(files).await?;
                self.inner
                    .emit(TransportEvent::Lifecycle(SessionEvent::FilesMounted));
                self.install().await?;
                self.inner
                    .emit(TransportEvent::Lifecycle(SessionEvent::InstallSucceeded));
                self.sandbox
                    .spawn(&self.options.runtime, &[entrypoint.clone()], &HashMap::new())
                    .await
            },
            LaunchSpec::Spawn(config) => {
                let mut banner = vec![config.command.as_str()];
                banner.extend(config.args.iter().map(String::as_str));
                self.inner
                    .emit(TransportEvent::Output(format!("Running {}...", banner.join(" "))));
                let process = self
                    .sandbox
                    .spawn(&config.command, &config.args, &config.env)
                    .await?;
                self.inner
                    .emit(TransportEvent::Lifecycle(SessionEvent::Spawned));
                Ok(process)
            },
        }
    }

    async fn install(&self) -> Result<()> {
        let Some((command, args)) = self.options.install_command.split_first() else {
            return Ok(());
        };
        debug!(%command, ?args, "installing dependencies");
        let mut process = self.sandbox.spawn(command, args, &HashMap::new()).await?;

        // Reachable by close() for as long as the install runs.
        *lock(&self.inner.kill) = Some(process.kill_handle());
        if self.inner.closed.load(Ordering::SeqCst) {
            process.kill();
            return Err(McpError::TransportClosed);
        }

        let mut framer = OutputFramer::new();
        while let Some(chunk) = process.output.next().await {
            match chunk {
                Ok(text) => {
                    for line in framer.push(&text) {
                        self.emit_install_line(&line);
                    }
                },
                Err(e) => warn!(error = %e, "error reading install output"),
            }
        }
        if let Some(line) = framer.finish() {
            self.emit_install_line(&line);
        }

        let code = process.wait().await;
        lock(&self.inner.kill).take();
        if code != 0 {
            return Err(McpError::Install { code });
        }
        Ok(())
    }

    fn emit_install_line(&self, line: &str) {
        if !line.is_empty() {
            debug!(line, "install");
            self.inner.emit(TransportEvent::Output(line.to_string()));
        }
    }

    async fn attach(&self, process: SandboxProcess) {
        let kill = process.kill_handle();
        let SandboxProcess { output, input, .. } = process;

        *self.inner.input.lock().await = Some(input);
        *lock(&self.inner.kill) = Some(kill);
        let handle = tokio::spawn(read_loop(Arc::clone(&self.inner), output));
        *lock(&self.inner.reader) = Some(handle);
    }

    /// Write one envelope as a single `\n`-terminated JSON line.
    pub async fn send(&self, message: &JsonRpcMessage) -> Result<()> {
        let mut payload = serde_json::to_string(message)?;
        payload.push('\n');

        let mut input = self.inner.input.lock().await;
        let sink = input.as_mut().ok_or(McpError::NotInitialized)?;
        trace!(method = ?message.method, id = ?message.id, "client -> server");
        sink.write_all(payload.as_bytes()).await?;
        sink.flush().await?;
        Ok(())
    }

    /// Send a request and wait for its result.
    pub async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let correlator = &self.inner.correlator;
        let id = correlator.next_id();
        let rx = correlator.register(id)?;
        if let Err(e) = self.send(&JsonRpcMessage::request(id, method, params)).await {
            correlator.cancel(id);
            return Err(e);
        }
        correlator.wait(id, rx, self.options.request_timeout).await
    }

    /// Send `tools/list` without waiting; the reply arrives as a
    /// [`TransportEvent::Message`]. Returns the request id.
    pub async fn list_tools(&self) -> Result<u64> {
        let id = self.inner.correlator.next_id();
        self.send(&JsonRpcMessage::request(id, "tools/list", json!({})))
            .await?;
        Ok(id)
    }

    pub async fn fetch_tools(&self) -> Result<Vec<Tool>> {
        let value = self.request("tools/list", json!({})).await?;
        let list: ToolsListResult =
            serde_json::from_value(value).map_err(|e| McpError::Decode(e.to_string()))?;
        Ok(list.tools)
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult> {
        let params = serde_json::to_value(ToolsCallParams {
            name: name.to_string(),
            arguments,
        })?;
        let value = self.request("tools/call", params).await?;
        if value.get("content").is_none() {
            return Err(McpError::Decode("tools/call result has no content".into()));
        }
        serde_json::from_value(value).map_err(|e| McpError::Decode(e.to_string()))
    }

    /// Tear down: abandon a launch in progress, kill the process, stop
    /// reading, drop the handler and fail every pending request with
    /// [`McpError::TransportClosed`].
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        *self
            .inner
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.inner.cancel.cancel();

        let kill = lock(&self.inner.kill).take();
        if let Some(kill) = kill {
            kill.cancel();
        }
        let reader = lock(&self.inner.reader).take();
        if let Some(reader) = reader {
            reader.abort();
        }
        self.inner.input.lock().await.take();

        let rejected = self
            .inner
            .correlator
            .reject_all(|| McpError::TransportClosed);
        info!(backend = self.sandbox.backend_name(), rejected, "transport closed");
    }
}

impl Drop for SandboxTransport {
    fn drop(&mut self) {
        if let Some(kill) = lock(&self.inner.kill).take() {
            kill.cancel();
        }
        if let Some(reader) = lock(&self.inner.reader).take() {
            reader.abort();
        }
    }
}

async fn read_loop(inner: Arc<Inner>, mut output: OutputStream) {
    let mut framer = OutputFramer::new();
    while let Some(chunk) = output.next().await {
        match chunk {
            Ok(text) => {
                for line in framer.push(&text) {
                    inner.handle_line(&line);
                }
            },
            Err(e) => {
                warn!(error = %e, "error reading server output");
                inner.emit(TransportEvent::Error(e.to_string()));
            },
        }
    }
    if let Some(line) = framer.finish() {
        inner.handle_line(&line);
    }

    if inner.closed.load(Ordering::SeqCst) {
        return;
    }
    inner.input.lock().await.take();
    let rejected = inner.correlator.reject_all(|| McpError::TransportClosed);
    debug!(rejected, "server output closed");
    inner.emit(TransportEvent::Closed);
}
