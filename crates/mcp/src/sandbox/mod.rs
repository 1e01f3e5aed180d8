//! Sandbox providers: somewhere to mount files and spawn the tool server.

mod host;
mod memory;

use std::{collections::HashMap, path::Component, pin::Pin, sync::Arc};

use {
    async_trait::async_trait,
    futures::stream::BoxStream,
    tokio::{
        io::{AsyncRead, AsyncReadExt, AsyncWrite},
        sync::{mpsc, oneshot},
    },
    tokio_util::sync::CancellationToken,
    tracing::warn,
};

pub use {
    host::HostSandbox,
    memory::{MemorySandbox, Program, ProgramIo, demo_server, program},
};

use crate::{
    error::{McpError, Result},
    types::FileSet,
};

/// Text from the process in whole lines, stdout and stderr interleaved.
pub type OutputStream = BoxStream<'static, std::io::Result<String>>;

/// Writable end of the process's stdin.
pub type InputSink = Pin<Box<dyn AsyncWrite + Send>>;

/// A process running inside a sandbox.
pub struct SandboxProcess {
    pub output: OutputStream,
    pub input: InputSink,
    /// Resolves with the exit code; `-1` when killed or unknown.
    pub exit: oneshot::Receiver<i32>,
    kill: CancellationToken,
}

impl SandboxProcess {
    pub fn new(
        output: OutputStream,
        input: InputSink,
        exit: oneshot::Receiver<i32>,
        kill: CancellationToken,
    ) -> Self {
        Self {
            output,
            input,
            exit,
            kill,
        }
    }

    /// Token that terminates the process when cancelled.
    pub fn kill_handle(&self) -> CancellationToken {
        self.kill.clone()
    }

    pub fn kill(&self) {
        self.kill.cancel();
    }

    /// Wait for the process to exit.
    pub async fn wait(self) -> i32 {
        self.exit.await.unwrap_or(-1)
    }
}

/// Trait for sandbox implementations.
///
/// `boot` is idempotent: a sandbox is booted once and reused by later
/// sessions, which mount and spawn into the same environment.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Human-readable backend name (e.g. "host", "memory").
    fn backend_name(&self) -> &'static str;

    async fn boot(&self) -> Result<()>;

    /// Write `files` relative to the sandbox root.
    async fn mount(&self, files: &FileSet) -> Result<()>;

    async fn spawn(
        &self,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<SandboxProcess>;
}

/// Create the backend named in config.
pub fn create_sandbox(config: &mcpbox_config::SandboxConfig) -> Result<Arc<dyn Sandbox>> {
    match config.backend.as_str() {
        "host" => Ok(Arc::new(HostSandbox::new(config.root.clone()))),
        "memory" => Ok(Arc::new(MemorySandbox::with_node_emulation())),
        other => Err(McpError::Boot(format!("unknown sandbox backend: {other}"))),
    }
}

/// Reject absolute paths and anything that would escape the mount root.
pub(crate) fn validate_mount_path(path: &str) -> Result<()> {
    let p = std::path::Path::new(path);
    let ok = !path.is_empty()
        && p.components().count() > 0
        && p.components().all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(())
    } else {
        Err(McpError::Mount(format!("invalid file path: {path:?}")))
    }
}

/// Forward a byte stream to `tx` as UTF-8 text, one or more whole lines per
/// message.
///
/// Only complete lines are sent, so stdout and stderr pumped into the same
/// channel interleave at line boundaries and never split a JSON line. A
/// trailing partial line is sent, newline-terminated, at end of stream or
/// before a read error. Multi-byte characters split across reads are decoded
/// once the rest arrives; invalid bytes become U+FFFD.
pub(crate) async fn pump_output<R>(mut reader: R, tx: mpsc::Sender<std::io::Result<String>>)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = encoding_rs::UTF_8.new_decoder_without_bom_handling();
    let mut buf = vec![0u8; 8192];
    let mut partial = String::new();
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "error reading sandbox process output");
                if !partial.is_empty() {
                    partial.push('\n');
                    let _ = tx.send(Ok(partial)).await;
                }
                let _ = tx.send(Err(e)).await;
                return;
            },
        };
        let last = n == 0;
        let capacity = decoder.max_utf8_buffer_length(n).unwrap_or(n * 3 + 4);
        partial.reserve(capacity);
        let _ = decoder.decode_to_string(&buf[..n], &mut partial, last);

        if last {
            if !partial.is_empty() {
                if !partial.ends_with('\n') {
                    partial.push('\n');
                }
                let _ = tx.send(Ok(partial)).await;
            }
            return;
        }
        if let Some(end) = partial.rfind('\n') {
            let rest = partial.split_off(end + 1);
            let lines = std::mem::replace(&mut partial, rest);
            if tx.send(Ok(lines)).await.is_err() {
                return;
            }
        }
    }
}
