use std::{collections::HashMap, path::PathBuf, process::Stdio};

use {
    async_trait::async_trait,
    futures::StreamExt,
    tokio::{
        process::Command,
        sync::{Mutex, mpsc, oneshot},
    },
    tokio_stream::wrappers::ReceiverStream,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

use super::{Sandbox, SandboxProcess, pump_output, validate_mount_path};
use crate::{
    error::{McpError, Result},
    types::FileSet,
};

enum Workdir {
    Temp(tempfile::TempDir),
    Fixed(PathBuf),
}

impl Workdir {
    fn path(&self) -> PathBuf {
        match self {
            Self::Temp(dir) => dir.path().to_path_buf(),
            Self::Fixed(path) => path.clone(),
        }
    }
}

/// Runs processes directly on the host inside a private working directory.
///
/// The directory is temporary (removed on drop) unless a fixed root is given.
pub struct HostSandbox {
    root: Option<PathBuf>,
    workdir: Mutex<Option<Workdir>>,
}

impl HostSandbox {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            root,
            workdir: Mutex::new(None),
        }
    }

    /// Working directory, once booted.
    pub async fn workdir(&self) -> Option<PathBuf> {
        self.workdir.lock().await.as_ref().map(Workdir::path)
    }

    async fn require_workdir(&self) -> Result<PathBuf> {
        self.workdir()
            .await
            .ok_or_else(|| McpError::Boot("sandbox not booted".into()))
    }
}

#[async_trait]
impl Sandbox for HostSandbox {
    fn backend_name(&self) -> &'static str {
        "host"
    }

    async fn boot(&self) -> Result<()> {
        let mut workdir = self.workdir.lock().await;
        if workdir.is_some() {
            return Ok(());
        }
        let dir = match &self.root {
            Some(root) => {
                tokio::fs::create_dir_all(root)
                    .await
                    .map_err(|e| McpError::Boot(format!("{}: {e}", root.display())))?;
                Workdir::Fixed(root.clone())
            },
            None => tempfile::Builder::new()
                .prefix("mcpbox-")
                .tempdir()
                .map(Workdir::Temp)
                .map_err(|e| McpError::Boot(e.to_string()))?,
        };
        info!(workdir = %dir.path().display(), "host sandbox booted");
        *workdir = Some(dir);
        Ok(())
    }

    async fn mount(&self, files: &FileSet) -> Result<()> {
        let root = self.require_workdir().await?;
        for (path, contents) in files.iter() {
            validate_mount_path(path)?;
            let target = root.join(path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| McpError::Mount(format!("{path}: {e}")))?;
            }
            tokio::fs::write(&target, contents)
                .await
                .map_err(|e| McpError::Mount(format!("{path}: {e}")))?;
        }
        debug!(count = files.len(), root = %root.display(), "mounted files");
        Ok(())
    }

    async fn spawn(
        &self,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<SandboxProcess> {
        let root = self.require_workdir().await?;

        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .current_dir(&root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::Spawn {
                command: command.into(),
                reason: e.to_string(),
            })?;

        let spawn_err = |what: &str| McpError::Spawn {
            command: command.into(),
            reason: format!("failed to capture {what}"),
        };
        let stdin = child.stdin.take().ok_or_else(|| spawn_err("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| spawn_err("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| spawn_err("stderr"))?;

        // Both pumps forward whole lines, so the merged stream stays line-framed.
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(pump_output(stdout, tx.clone()));
        tokio::spawn(pump_output(stderr, tx));

        let kill = CancellationToken::new();
        let token = kill.clone();
        let (exit_tx, exit_rx) = oneshot::channel();
        let name = command.to_string();
        tokio::spawn(async move {
            let code = tokio::select! {
                status = child.wait() => status.ok().and_then(|s| s.code()).unwrap_or(-1),
                () = token.cancelled() => {
                    let _ = child.kill().await;
                    -1
                },
            };
            debug!(command = %name, code, "sandbox process exited");
            let _ = exit_tx.send(code);
        });

        debug!(command, ?args, "spawned host process");
        Ok(SandboxProcess::new(
            ReceiverStream::new(rx).boxed(),
            Box::pin(stdin),
            exit_rx,
            kill,
        ))
    }
}

#[cfg(test)]
mod tests {
    use {super::*, tokio::io::AsyncWriteExt};

    #[tokio::test]
    async fn spawn_before_boot_fails() {
        let sandbox = HostSandbox::new(None);
        let err = sandbox
            .spawn("cat", &[], &HashMap::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, McpError::Boot(_)));
    }

    #[tokio::test]
    async fn mount_writes_nested_files_under_workdir() {
        let sandbox = HostSandbox::new(None);
        sandbox.boot().await.unwrap();
        sandbox.boot().await.unwrap();

        let files: FileSet = [("package.json", "{}"), ("lib/tool.js", "module.exports = 1;")]
            .into_iter()
            .collect();
        sandbox.mount(&files).await.unwrap();

        let root = sandbox.workdir().await.unwrap();
        assert_eq!(std::fs::read_to_string(root.join("package.json")).unwrap(), "{}");
        assert!(root.join("lib/tool.js").exists());
    }

    #[tokio::test]
    async fn mount_rejects_escaping_paths() {
        let sandbox = HostSandbox::new(None);
        sandbox.boot().await.unwrap();
        let files: FileSet = [("../outside.txt", "x")].into_iter().collect();
        assert!(matches!(
            sandbox.mount(&files).await,
            Err(McpError::Mount(_))
        ));
    }

    #[tokio::test]
    async fn fixed_root_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested/work");
        let sandbox = HostSandbox::new(Some(root.clone()));
        sandbox.boot().await.unwrap();
        assert_eq!(sandbox.workdir().await, Some(root.clone()));
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn spawn_echoes_through_cat_and_reports_exit() {
        let sandbox = HostSandbox::new(None);
        sandbox.boot().await.unwrap();
        let mut process = sandbox.spawn("cat", &[], &HashMap::new()).await.unwrap();

        process.input.write_all(b"hello\n").await.unwrap();
        process.input.flush().await.unwrap();
        let chunk = process.output.next().await.unwrap().unwrap();
        assert_eq!(chunk, "hello\n");

        process.kill();
        assert_eq!(process.wait().await, -1);
    }

    #[tokio::test]
    async fn stderr_never_splits_a_stdout_line() {
        let sandbox = HostSandbox::new(None);
        sandbox.boot().await.unwrap();
        let script = r#"printf '{"jsonrpc":"2.0",'; sleep 0.1; echo 'npm WARN deprecated' >&2; sleep 0.1; printf '"id":1,"result":{"tools":[]}}\n'"#;
        let mut process = sandbox
            .spawn("sh", &["-c".into(), script.into()], &HashMap::new())
            .await
            .unwrap();

        let mut text = String::new();
        while let Some(chunk) = process.output.next().await {
            text.push_str(&chunk.unwrap());
        }
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2, "{text:?}");
        assert!(lines.contains(&r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#));
        assert!(lines.contains(&"npm WARN deprecated"));
    }

    #[tokio::test]
    async fn spawn_nonexistent_command() {
        let sandbox = HostSandbox::new(None);
        sandbox.boot().await.unwrap();
        let err = sandbox
            .spawn("nonexistent_command_xyz_42", &[], &HashMap::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, McpError::Spawn { .. }));
    }

    #[tokio::test]
    async fn exit_code_is_reported() {
        let sandbox = HostSandbox::new(None);
        sandbox.boot().await.unwrap();
        let process = sandbox
            .spawn("sh", &["-c".into(), "exit 3".into()], &HashMap::new())
            .await
            .unwrap();
        assert_eq!(process.wait().await, 3);
    }
}
