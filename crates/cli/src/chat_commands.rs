use std::{io::Write, sync::Arc};

use {
    anyhow::Result,
    async_trait::async_trait,
    mcpbox_agents::{
        ChatEvent, ChatMessage, ChatRole, ChatSession, LoadProgress, OpenAiCompatModel,
        ToolInvoker, model_by_id,
    },
    mcpbox_config::McpboxConfig,
    tokio::io::{AsyncBufReadExt, BufReader},
    tracing::{info, warn},
};

use crate::server_commands::{LaunchArgs, start_session};

const HELP: &str = "Commands: /tools, /reset, /help, /quit";

fn print_message(message: &ChatMessage) {
    match message.role {
        ChatRole::User => {},
        ChatRole::Assistant => println!("{}", message.text),
        ChatRole::Tool => println!("  {}", message.text),
    }
}

/// Interactive chat against a model, with the server's tools available.
pub async fn chat(config: &McpboxConfig, launch: &LaunchArgs, no_tools: bool) -> Result<()> {
    let model_config = &config.model;
    match model_by_id(&model_config.selected) {
        Some(entry) => info!(
            model = entry.id,
            size = entry.size,
            category = %entry.category,
            "using model"
        ),
        None => warn!(model = %model_config.selected, "model is not in the catalog"),
    }

    let model = OpenAiCompatModel::from_config(model_config)
        .with_progress(Box::new(|p: LoadProgress| eprintln!("Loading model: {}", p.status)));
    let mut chat =
        ChatSession::new(Arc::new(model)).with_event_handler(Box::new(|event: ChatEvent| {
            match event {
                ChatEvent::Thinking => eprint!("…\r"),
                ChatEvent::ToolCallStart { name } => eprintln!("calling {name}"),
                ChatEvent::ThinkingDone | ChatEvent::ToolCallEnd { .. } => {},
            }
        }));

    let session = if no_tools {
        None
    } else {
        Some(start_session(config, launch).await?)
    };
    let tools = match session {
        Some(ref s) => s.refresh_tools().await.unwrap_or_else(|e| {
            warn!(error = %e, "could not list tools, chatting without them");
            Vec::new()
        }),
        None => Vec::new(),
    };

    println!(
        "Chatting with {} ({} tools). {HELP}",
        model_config.selected,
        tools.len()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/help" => {
                println!("{HELP}");
                continue;
            },
            "/tools" => {
                for tool in &tools {
                    println!(
                        "{}: {}",
                        tool.name,
                        tool.description.as_deref().unwrap_or("No description")
                    );
                }
                continue;
            },
            "/reset" => {
                chat.reset().await?;
                println!("Chat cleared.");
                continue;
            },
            _ => {},
        }

        let added = match session {
            Some(ref s) => chat.send_message(input, &tools, s.as_ref()).await,
            None => chat.send_message(input, &[], &NoTools).await,
        };
        added.iter().for_each(print_message);
    }

    if let Some(session) = session {
        session.stop().await?;
    }
    Ok(())
}

/// Invoker for chats started without a server.
struct NoTools;

#[async_trait]
impl ToolInvoker for NoTools {
    async fn call_tool(
        &self,
        name: &str,
        _arguments: serde_json::Value,
    ) -> Result<serde_json::Value> {
        anyhow::bail!("no MCP server is running, cannot call {name}")
    }
}
