use std::{path::PathBuf, sync::Arc};

use {
    anyhow::{Context, Result},
    clap::Args,
    mcpbox_config::McpboxConfig,
    mcpbox_mcp::{LaunchSpec, McpSession, ProcessConfig, SessionUpdate, server_files},
    tokio::sync::broadcast::error::RecvError,
    tracing::{debug, info},
};

/// Where the server comes from. Overrides `[server]` in the config file.
#[derive(Args, Debug, Default)]
pub struct LaunchArgs {
    /// Mount the server files found in this directory.
    #[arg(long, conflicts_with = "command")]
    pub dir: Option<PathBuf>,

    /// Entry file to run after installing dependencies.
    #[arg(long)]
    pub entrypoint: Option<String>,

    /// Spawn this command directly instead of mounting files.
    #[arg(long)]
    pub command: Option<String>,

    /// Arguments for `--command`, after `--`.
    #[arg(last = true, value_name = "ARGS")]
    pub command_args: Vec<String>,
}

impl LaunchArgs {
    fn launch_spec(&self, config: &McpboxConfig) -> Result<Option<LaunchSpec>> {
        if let Some(ref command) = self.command {
            return Ok(Some(LaunchSpec::Spawn(ProcessConfig {
                command: command.clone(),
                args: self.command_args.clone(),
                env: config.server.env.clone(),
            })));
        }
        let entrypoint = self
            .entrypoint
            .clone()
            .unwrap_or_else(|| config.server.entrypoint.clone());
        match self.dir {
            Some(ref dir) => Ok(Some(LaunchSpec::Files {
                files: server_files::load_dir(dir)
                    .with_context(|| format!("loading server files from {}", dir.display()))?,
                entrypoint,
            })),
            None if self.entrypoint.is_some() => Ok(Some(LaunchSpec::Files {
                files: server_files::default_files(),
                entrypoint,
            })),
            None => Ok(None),
        }
    }
}

/// Build a session from config plus command-line overrides and start it.
pub async fn start_session(config: &McpboxConfig, launch: &LaunchArgs) -> Result<Arc<McpSession>> {
    let mut session = McpSession::from_config(config)?;
    if let Some(spec) = launch.launch_spec(config)? {
        session = session.with_launch(spec);
    }
    let session = Arc::new(session);
    info!(backend = session.backend_name(), "starting MCP server");
    session.start().await?;
    Ok(session)
}

/// Print server output until Ctrl-C or until the server stops.
pub async fn run(config: &McpboxConfig, launch: &LaunchArgs) -> Result<()> {
    let session = start_session(config, launch).await?;
    let mut updates = session.subscribe();

    // Anything logged before we subscribed.
    print!("{}", session.snapshot().output());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            },
            update = updates.recv() => match update {
                Ok(SessionUpdate::Output(text)) => print!("{text}"),
                Ok(SessionUpdate::Tools(tools)) => {
                    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
                    info!(tools = %names.join(", "), "server tools");
                },
                Ok(SessionUpdate::Status(status)) => {
                    debug!(?status, "session status");
                    if !status.is_active() {
                        break;
                    }
                },
                Ok(_) => {},
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "output updates lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.stop().await?;
    Ok(())
}

pub async fn list_tools(config: &McpboxConfig, launch: &LaunchArgs, json: bool) -> Result<()> {
    let session = start_session(config, launch).await?;
    let tools = session.refresh_tools().await;
    session.stop().await?;
    let tools = tools?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }
    if tools.is_empty() {
        println!("The server exposes no tools.");
        return Ok(());
    }
    for tool in &tools {
        println!(
            "{:<24} {}",
            tool.name,
            tool.description.as_deref().unwrap_or("No description")
        );
    }
    Ok(())
}

pub async fn call_tool(
    config: &McpboxConfig,
    launch: &LaunchArgs,
    name: &str,
    arguments: &str,
) -> Result<()> {
    let arguments: serde_json::Value =
        serde_json::from_str(arguments).context("tool arguments must be a JSON object")?;
    anyhow::ensure!(arguments.is_object(), "tool arguments must be a JSON object");

    let session = start_session(config, launch).await?;
    let result = session.call_tool(name, arguments).await;
    session.stop().await?;
    let result = result?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_overrides_keeps_config_launch() {
        let config = McpboxConfig::default();
        assert!(LaunchArgs::default().launch_spec(&config).unwrap().is_none());
    }

    #[test]
    fn command_override_spawns_directly() {
        let mut config = McpboxConfig::default();
        config.server.env.insert("TOKEN".into(), "x".into());
        let args = LaunchArgs {
            command: Some("uvx".into()),
            command_args: vec!["mcp-server-time".into()],
            ..Default::default()
        };
        match args.launch_spec(&config).unwrap() {
            Some(LaunchSpec::Spawn(process)) => {
                assert_eq!(process.command, "uvx");
                assert_eq!(process.args, ["mcp-server-time"]);
                assert_eq!(process.env["TOKEN"], "x");
            },
            other => panic!("expected spawn, got {other:?}"),
        }
    }

    #[test]
    fn entrypoint_override_uses_bundled_files() {
        let args = LaunchArgs {
            entrypoint: Some("main.js".into()),
            ..Default::default()
        };
        match args.launch_spec(&McpboxConfig::default()).unwrap() {
            Some(LaunchSpec::Files { files, entrypoint }) => {
                assert_eq!(entrypoint, "main.js");
                assert!(files.contains("package.json"));
            },
            other => panic!("expected files, got {other:?}"),
        }
    }
}
