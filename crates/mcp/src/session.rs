//! Session controller: one state machine, one transport per start.
//!
//! A [`McpSession`] is built once and shared by `Arc` with whatever needs it
//! (CLI commands, the chat loop). Observers follow it through
//! [`McpSession::subscribe`] or poll [`McpSession::snapshot`].

use std::{
    path::Path,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    tokio::sync::broadcast,
    tracing::{debug, error, info, warn},
};

use crate::{
    error::{McpError, Result},
    sandbox::{Sandbox, create_sandbox},
    server_files::{self, DEFAULT_ENTRYPOINT},
    state::{SessionEvent, SessionState, SessionStatus},
    transport::{LaunchSpec, SandboxTransport, TransportEvent, TransportOptions},
    types::{CallToolResult, FileSet, JsonRpcMessage, ProcessConfig, Tool},
};

const UPDATE_CAPACITY: usize = 256;

/// Change notifications for session observers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Status(SessionStatus),
    /// Text appended to the output log.
    Output(String),
    Tools(Vec<Tool>),
    ToolResult(CallToolResult),
    Error(String),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    state: Mutex<SessionState>,
    updates: broadcast::Sender<SessionUpdate>,
    /// Bumped on every start and stop; events from older transports are dropped.
    generation: AtomicU64,
}

impl Shared {
    fn notify(&self, update: SessionUpdate) {
        // No subscribers is fine.
        let _ = self.updates.send(update);
    }

    fn apply(&self, event: SessionEvent) -> Result<SessionStatus> {
        let status = lock(&self.state).apply(event)?;
        self.notify(SessionUpdate::Status(status));
        Ok(status)
    }

    fn fail(&self, message: &str) {
        match self.apply(SessionEvent::Failed(message.to_string())) {
            Ok(_) => {
                self.notify(SessionUpdate::Output(format!("\nError: {message}")));
                self.notify(SessionUpdate::Error(message.to_string()));
            },
            Err(e) => debug!(error = %e, "failure while already failed"),
        }
    }

    /// A failure scoped to one operation; the status is left alone.
    fn record_error(&self, message: &str) {
        lock(&self.state).record_error(message);
        self.notify(SessionUpdate::Output(format!("\nError: {message}")));
        self.notify(SessionUpdate::Error(message.to_string()));
    }

    fn append_line(&self, line: &str) {
        lock(&self.state).append_line(line);
        self.notify(SessionUpdate::Output(format!("{line}\n")));
    }

    fn set_tools(&self, tools: Vec<Tool>) {
        let changed = {
            let mut state = lock(&self.state);
            let changed = state.tools() != tools.as_slice();
            state.set_tools(tools.clone());
            changed
        };
        if changed {
            self.notify(SessionUpdate::Tools(tools));
        }
    }

    fn set_tool_result(&self, result: CallToolResult) {
        let changed = {
            let mut state = lock(&self.state);
            let changed = state.active_tool_result() != &result;
            state.set_active_tool_result(result.clone());
            changed
        };
        if changed {
            self.notify(SessionUpdate::ToolResult(result));
        }
    }

    fn handle_message(&self, message: JsonRpcMessage) {
        if let Some(tools) = message.tools() {
            debug!(count = tools.len(), "tool list received");
            self.set_tools(tools);
        } else if let Some(result) = message.call_result() {
            self.set_tool_result(result);
        }
    }

    fn handle_event(&self, generation: u64, event: TransportEvent) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        match event {
            TransportEvent::Lifecycle(event) => {
                if let Err(e) = self.apply(event) {
                    warn!(error = %e, "ignoring lifecycle event");
                }
            },
            TransportEvent::Output(line) => self.append_line(&line),
            TransportEvent::Message(message) => self.handle_message(message),
            TransportEvent::Error(message) => {
                error!(error = %message, "transport error");
                self.fail(&message);
            },
            TransportEvent::Closed => {
                info!("server process exited");
                self.append_line("Server process exited.");
                if let Err(e) = self.apply(SessionEvent::ProcessClosed) {
                    debug!(error = %e, "process closed outside running state");
                }
            },
        }
    }
}

/// Build the launch plan described by `[server]` config.
pub fn launch_from_config(server: &mcpbox_config::ServerConfig) -> Result<LaunchSpec> {
    if let Some(ref command) = server.command {
        return Ok(LaunchSpec::Spawn(ProcessConfig {
            command: command.clone(),
            args: server.args.clone(),
            env: server.env.clone(),
        }));
    }
    let files = match server.files_dir {
        Some(ref dir) => server_files::load_dir(dir)?,
        None => server_files::default_files(),
    };
    Ok(LaunchSpec::Files {
        files,
        entrypoint: server.entrypoint.clone(),
    })
}

pub struct McpSession {
    sandbox: Arc<dyn Sandbox>,
    options: TransportOptions,
    default_launch: LaunchSpec,
    shared: Arc<Shared>,
    transport: Mutex<Option<Arc<SandboxTransport>>>,
    /// Serializes start and stop.
    lifecycle: tokio::sync::Mutex<()>,
}

impl McpSession {
    /// A session that launches the embedded demo server by default.
    pub fn new(sandbox: Arc<dyn Sandbox>, options: TransportOptions) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            sandbox,
            options,
            default_launch: LaunchSpec::Files {
                files: server_files::default_files(),
                entrypoint: DEFAULT_ENTRYPOINT.into(),
            },
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::new()),
                updates,
                generation: AtomicU64::new(0),
            }),
            transport: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Sandbox, timeouts and launch plan all taken from config.
    pub fn from_config(config: &mcpbox_config::McpboxConfig) -> Result<Self> {
        let sandbox = create_sandbox(&config.sandbox)?;
        let launch = launch_from_config(&config.server)?;
        Ok(Self::new(sandbox, TransportOptions::from(&config.transport)).with_launch(launch))
    }

    /// Replace what [`start`](Self::start) launches.
    pub fn with_launch(mut self, launch: LaunchSpec) -> Self {
        self.default_launch = launch;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.sandbox.backend_name()
    }

    pub async fn start(&self) -> Result<()> {
        self.launch(self.default_launch.clone()).await
    }

    pub async fn start_with_files(&self, files: FileSet, entrypoint: &str) -> Result<()> {
        self.launch(LaunchSpec::Files {
            files,
            entrypoint: entrypoint.into(),
        })
        .await
    }

    /// Mount the server found in `dir` and start it.
    pub async fn start_from_dir(&self, dir: &Path, entrypoint: &str) -> Result<()> {
        let files = server_files::load_dir(dir)?;
        self.start_with_files(files, entrypoint).await
    }

    pub async fn start_from_command(&self, config: ProcessConfig) -> Result<()> {
        self.launch(LaunchSpec::Spawn(config)).await
    }

    async fn launch(&self, launch: LaunchSpec) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        let previous = lock(&self.transport).take();
        if let Some(previous) = previous {
            previous.close().await;
        }

        // Retire the old transport's events before the reset clears the log.
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.apply(SessionEvent::StartRequested)?;

        let transport = Arc::new(SandboxTransport::new(
            Arc::clone(&self.sandbox),
            launch,
            self.options.clone(),
        ));
        let shared = Arc::clone(&self.shared);
        transport.set_event_handler(Arc::new(move |event| {
            shared.handle_event(generation, event);
        }));
        *lock(&self.transport) = Some(Arc::clone(&transport));

        info!(backend = self.sandbox.backend_name(), "starting session");
        if let Err(e) = transport.start().await {
            transport.close().await;
            if self.shared.generation.load(Ordering::SeqCst) != generation {
                info!("start abandoned by stop");
                return Err(e);
            }
            let message = e.to_string();
            error!(error = %message, "session failed to start");
            lock(&self.transport).take();
            self.shared.fail(&message);
            return Err(e);
        }

        if let Err(e) = transport.list_tools().await {
            warn!(error = %e, "initial tools/list failed");
        }
        Ok(())
    }

    async fn close_transport(&self) {
        let transport = lock(&self.transport).take();
        if let Some(transport) = transport {
            transport.close().await;
        }
    }

    /// Close the transport and return to idle. Also cancels a start that is
    /// still booting, mounting or installing.
    pub async fn stop(&self) -> Result<()> {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.close_transport().await;

        let _guard = self.lifecycle.lock().await;
        // A launch that had not yet published its transport when we closed.
        self.close_transport().await;
        if self.status() == SessionStatus::Running {
            self.shared.apply(SessionEvent::UnmountRequested)?;
        }
        self.shared.apply(SessionEvent::StopRequested)?;
        info!("session stopped");
        Ok(())
    }

    fn running_transport(&self) -> Result<Arc<SandboxTransport>> {
        lock(&self.shared.state).ensure_running()?;
        lock(&self.transport).clone().ok_or(McpError::NotInitialized)
    }

    /// Ask for the tool list without waiting; the session picks up the reply.
    pub async fn list_tools(&self) -> Result<()> {
        self.running_transport()?.list_tools().await?;
        Ok(())
    }

    /// Fetch the tool list and store it.
    pub async fn refresh_tools(&self) -> Result<Vec<Tool>> {
        let tools = self.running_transport()?.fetch_tools().await?;
        self.shared.set_tools(tools.clone());
        Ok(tools)
    }

    /// Call one tool. A failure is logged to the session but does not
    /// change its status.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult> {
        let transport = self.running_transport()?;
        lock(&self.shared.state).set_active_tool(name);
        debug!(tool = name, "calling tool");

        match transport.call_tool(name, arguments).await {
            Ok(result) => {
                self.shared.set_tool_result(result.clone());
                Ok(result)
            },
            Err(e) => {
                warn!(tool = name, error = %e, "tool call failed");
                self.shared.record_error(&e.to_string());
                Err(e)
            },
        }
    }

    pub fn snapshot(&self) -> SessionState {
        lock(&self.shared.state).clone()
    }

    pub fn status(&self) -> SessionStatus {
        lock(&self.shared.state).status()
    }

    pub fn tools(&self) -> Vec<Tool> {
        lock(&self.shared.state).tools().to_vec()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.shared.updates.subscribe()
    }
}
