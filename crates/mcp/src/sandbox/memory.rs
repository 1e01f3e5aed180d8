use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    async_trait::async_trait,
    futures::{FutureExt, StreamExt, future::BoxFuture},
    serde_json::json,
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream},
        sync::{mpsc, oneshot},
    },
    tokio_stream::wrappers::ReceiverStream,
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

use super::{Sandbox, SandboxProcess, pump_output, validate_mount_path};
use crate::{
    error::{McpError, Result},
    types::{FileSet, JsonRpcMessage, ToolsCallParams},
};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Everything an in-memory program gets when it is spawned.
pub struct ProgramIo {
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// Snapshot of the files mounted at spawn time.
    pub files: FileSet,
    pub stdin: DuplexStream,
    pub stdout: DuplexStream,
}

/// An in-memory program: gets its stdio, resolves with an exit code.
pub type Program = Arc<dyn Fn(ProgramIo) -> BoxFuture<'static, i32> + Send + Sync>;

/// Wrap an async function as a [`Program`].
pub fn program<F, Fut>(f: F) -> Program
where
    F: Fn(ProgramIo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = i32> + Send + 'static,
{
    Arc::new(move |io: ProgramIo| f(io).boxed())
}

/// Sandbox whose "processes" are async Rust functions wired to in-memory pipes.
///
/// Commands are looked up by name; anything unregistered fails to spawn.
pub struct MemorySandbox {
    programs: HashMap<String, Program>,
    files: Mutex<FileSet>,
    booted: AtomicBool,
    boot_error: Option<String>,
}

impl Default for MemorySandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySandbox {
    pub fn new() -> Self {
        Self {
            programs: HashMap::new(),
            files: Mutex::new(FileSet::new()),
            booted: AtomicBool::new(false),
            boot_error: None,
        }
    }

    /// `npm install` and `node <entry>` backed by the built-in demo server.
    pub fn with_node_emulation() -> Self {
        Self::new()
            .with_program("npm", program(fake_npm))
            .with_program("node", program(fake_node))
    }

    pub fn with_program(mut self, command: &str, program: Program) -> Self {
        self.programs.insert(command.to_string(), program);
        self
    }

    /// Make every `boot` fail with `message`.
    pub fn with_boot_failure(mut self, message: &str) -> Self {
        self.boot_error = Some(message.to_string());
        self
    }

    pub fn is_booted(&self) -> bool {
        self.booted.load(Ordering::SeqCst)
    }

    pub fn files(&self) -> FileSet {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Sandbox for MemorySandbox {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn boot(&self) -> Result<()> {
        if let Some(ref message) = self.boot_error {
            return Err(McpError::Boot(message.clone()));
        }
        self.booted.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn mount(&self, files: &FileSet) -> Result<()> {
        if !self.is_booted() {
            return Err(McpError::Boot("sandbox not booted".into()));
        }
        for (path, _) in files.iter() {
            validate_mount_path(path)?;
        }
        let mut mounted = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        for (path, contents) in files.iter() {
            mounted.insert(path, contents);
        }
        Ok(())
    }

    async fn spawn(
        &self,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<SandboxProcess> {
        if !self.is_booted() {
            return Err(McpError::Boot("sandbox not booted".into()));
        }
        let program = self
            .programs
            .get(command)
            .ok_or_else(|| McpError::Spawn {
                command: command.into(),
                reason: "command not found".into(),
            })?;

        let (input, program_stdin) = tokio::io::duplex(PIPE_CAPACITY);
        let (program_stdout, output) = tokio::io::duplex(PIPE_CAPACITY);
        let run = program(ProgramIo {
            args: args.to_vec(),
            env: env.clone(),
            files: self.files(),
            stdin: program_stdin,
            stdout: program_stdout,
        });

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(pump_output(output, tx));

        let kill = CancellationToken::new();
        let token = kill.clone();
        let (exit_tx, exit_rx) = oneshot::channel();
        let name = command.to_string();
        tokio::spawn(async move {
            let code = tokio::select! {
                code = run => code,
                () = token.cancelled() => -1,
            };
            debug!(command = %name, code, "in-memory program exited");
            let _ = exit_tx.send(code);
        });

        Ok(SandboxProcess::new(
            ReceiverStream::new(rx).boxed(),
            Box::pin(input),
            exit_rx,
            kill,
        ))
    }
}

/// The demo tool server (`whoami`, `echo`) as an in-memory program.
pub fn demo_server() -> Program {
    program(|io: ProgramIo| serve_demo(io.stdin, io.stdout))
}

async fn serve_demo(stdin: DuplexStream, mut stdout: DuplexStream) -> i32 {
    let mut lines = BufReader::new(stdin).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(request) = serde_json::from_str::<JsonRpcMessage>(line.trim()) else {
            continue;
        };
        let Some(id) = request.id else {
            continue;
        };
        let Ok(mut payload) = serde_json::to_string(&demo_response(id, &request)) else {
            return 1;
        };
        payload.push('\n');
        if stdout.write_all(payload.as_bytes()).await.is_err() {
            return 1;
        }
    }
    0
}

fn demo_response(id: u64, request: &JsonRpcMessage) -> JsonRpcMessage {
    match request.method.as_deref() {
        Some("tools/list") => JsonRpcMessage::response(
            id,
            json!({
                "tools": [
                    {
                        "name": "whoami",
                        "inputSchema": {"type": "object", "properties": {}}
                    },
                    {
                        "name": "echo",
                        "inputSchema": {
                            "type": "object",
                            "properties": {"message": {"type": "string"}},
                            "required": ["message"]
                        }
                    }
                ]
            }),
        ),
        Some("tools/call") => {
            let params: Option<ToolsCallParams> = request
                .params
                .clone()
                .and_then(|p| serde_json::from_value(p).ok());
            let Some(params) = params else {
                return JsonRpcMessage::error_response(id, -32602, "invalid tools/call params");
            };
            let text = match params.name.as_str() {
                "whoami" => "mcpbox demo server".to_string(),
                "echo" => match params.arguments.get("message").and_then(|m| m.as_str()) {
                    Some(message) => message.to_string(),
                    None => {
                        return JsonRpcMessage::error_response(
                            id,
                            -32602,
                            "missing required argument: message",
                        );
                    },
                },
                other => {
                    return JsonRpcMessage::error_response(
                        id,
                        -32602,
                        format!("unknown tool: {other}"),
                    );
                },
            };
            JsonRpcMessage::response(id, json!({"content": [{"type": "text", "text": text}]}))
        },
        other => JsonRpcMessage::error_response(
            id,
            -32601,
            format!("method not found: {}", other.unwrap_or_default()),
        ),
    }
}

async fn fake_npm(mut io: ProgramIo) -> i32 {
    if io.args.first().map(String::as_str) != Some("install") {
        let _ = io.stdout.write_all(b"npm ERR! unsupported command\n").await;
        return 1;
    }
    if !io.files.contains("package.json") {
        let _ = io
            .stdout
            .write_all(b"npm ERR! enoent Could not read package.json\n")
            .await;
        return 254;
    }
    let _ = io
        .stdout
        .write_all(b"Installing dependencies...\nup to date, audited 1 package\n")
        .await;
    0
}

async fn fake_node(mut io: ProgramIo) -> i32 {
    let entry = io.args.first().cloned().unwrap_or_default();
    if !io.files.contains(&entry) {
        let message = format!("Error: Cannot find module '/{entry}'\n");
        let _ = io.stdout.write_all(message.as_bytes()).await;
        return 1;
    }
    serve_demo(io.stdin, io.stdout).await
}
