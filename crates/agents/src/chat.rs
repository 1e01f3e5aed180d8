//! Chat turns that can call tools on the running server.

use std::sync::Arc;

use {
    async_trait::async_trait,
    mcpbox_mcp::{McpSession, Tool},
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::{debug, info, warn},
};

use crate::{
    model::ChatModel,
    prompt::build_system_prompt,
    tool_calls::{parse_tool_calls, remove_tool_calls},
};

const NOT_UNDERSTOOD: &str = "I'm sorry, I didn't understand that.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            text: text.into(),
        }
    }

    pub fn tool(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            text: text.into(),
        }
    }
}

/// Something that can run a named tool.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn call_tool(&self, name: &str, arguments: Value) -> anyhow::Result<Value>;
}

#[async_trait]
impl ToolInvoker for McpSession {
    async fn call_tool(&self, name: &str, arguments: Value) -> anyhow::Result<Value> {
        let result = McpSession::call_tool(self, name, arguments).await?;
        Ok(serde_json::to_value(result)?)
    }
}

/// Progress of a chat turn.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// Waiting on the model.
    Thinking,
    ThinkingDone,
    ToolCallStart { name: String },
    ToolCallEnd { name: String, success: bool },
}

pub type OnChatEvent = Box<dyn Fn(ChatEvent) + Send + Sync>;

/// Conversation state for one chat.
pub struct ChatSession {
    model: Arc<dyn ChatModel>,
    messages: Vec<ChatMessage>,
    on_event: Option<OnChatEvent>,
}

impl ChatSession {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            messages: Vec::new(),
            on_event: None,
        }
    }

    pub fn with_event_handler(mut self, on_event: OnChatEvent) -> Self {
        self.on_event = Some(on_event);
        self
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    fn emit(&self, event: ChatEvent) {
        if let Some(ref cb) = self.on_event {
            cb(event);
        }
    }

    /// Run one user turn and return the messages it added.
    ///
    /// Model failures become an `Error: ...` assistant message rather than
    /// an error return.
    pub async fn send_message(
        &mut self,
        input: &str,
        tools: &[Tool],
        invoker: &dyn ToolInvoker,
    ) -> &[ChatMessage] {
        let history = self.messages.clone();
        let start = self.messages.len();
        self.messages.push(ChatMessage::user(input));

        if let Err(e) = self.respond(input, tools, &history, invoker).await {
            warn!(error = %e, "chat turn failed");
            self.emit(ChatEvent::ThinkingDone);
            self.messages.push(ChatMessage::assistant(format!("Error: {e}")));
        }
        &self.messages[start..]
    }

    async fn respond(
        &mut self,
        input: &str,
        tools: &[Tool],
        history: &[ChatMessage],
        invoker: &dyn ToolInvoker,
    ) -> anyhow::Result<()> {
        let system_prompt = build_system_prompt(tools);

        self.emit(ChatEvent::Thinking);
        debug!(model = self.model.id(), history = history.len(), "calling model");
        let completion = self
            .model
            .complete(&system_prompt, tools, history, input)
            .await?;
        self.emit(ChatEvent::ThinkingDone);

        let Some(content) = completion.content().filter(|c| !c.is_empty()) else {
            self.messages.push(ChatMessage::assistant(NOT_UNDERSTOOD));
            return Ok(());
        };

        let calls = parse_tool_calls(content);
        let text = remove_tool_calls(content);
        if !text.is_empty() {
            self.messages.push(ChatMessage::assistant(text));
        }

        for call in calls {
            self.emit(ChatEvent::ToolCallStart {
                name: call.name.clone(),
            });
            match invoker.call_tool(&call.name, call.arguments.clone()).await {
                Ok(result) => {
                    info!(tool = %call.name, "tool called from chat");
                    let rendered = match result {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    self.messages.push(ChatMessage::assistant(format!(
                        "🔧 Called {} with {}",
                        call.name, call.arguments
                    )));
                    self.messages
                        .push(ChatMessage::tool(format!("{}: {rendered}", call.name)));
                    self.emit(ChatEvent::ToolCallEnd {
                        name: call.name,
                        success: true,
                    });
                },
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "tool call from chat failed");
                    self.messages.push(ChatMessage::assistant(format!(
                        "❌ Error calling {}: {e}",
                        call.name
                    )));
                    self.emit(ChatEvent::ToolCallEnd {
                        name: call.name,
                        success: false,
                    });
                },
            }
        }
        Ok(())
    }

    /// Reset the model's memory and clear the transcript.
    pub async fn reset(&mut self) -> anyhow::Result<()> {
        self.model.reset().await?;
        self.messages.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::model::ChatCompletion,
        serde_json::json,
        std::sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    /// Replies with canned completions and records what it was asked.
    struct ScriptedModel {
        replies: Mutex<Vec<anyhow::Result<ChatCompletion>>>,
        seen_history: Mutex<Vec<usize>>,
        resets: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(replies: Vec<anyhow::Result<ChatCompletion>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                seen_history: Mutex::new(Vec::new()),
                resets: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn id(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _system_prompt: &str,
            _tools: &[Tool],
            history: &[ChatMessage],
            _input: &str,
        ) -> anyhow::Result<ChatCompletion> {
            self.seen_history.lock().unwrap().push(history.len());
            self.replies.lock().unwrap().remove(0)
        }

        async fn reset(&self) -> anyhow::Result<()> {
            self.resets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeTools;

    #[async_trait]
    impl ToolInvoker for FakeTools {
        async fn call_tool(&self, name: &str, arguments: Value) -> anyhow::Result<Value> {
            match name {
                "echo" => Ok(json!({"echoed": arguments["message"]})),
                "whoami" => Ok(Value::String("demo".into())),
                other => anyhow::bail!("unknown tool: {other}"),
            }
        }
    }

    #[tokio::test]
    async fn tool_calls_are_invoked_and_recorded() {
        let model = ScriptedModel::new(vec![Ok(ChatCompletion::from_text(
            "On it.\n<tool_call>{\"name\": \"echo\", \"arguments\": {\"message\": \"hi\"}}</tool_call>\n<tool_call>{\"name\": \"whoami\", \"arguments\": {}}</tool_call>",
        ))]);
        let mut chat = ChatSession::new(model);

        let added = chat.send_message("say hi", &[], &FakeTools).await.to_vec();
        let texts: Vec<&str> = added.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, [
            "say hi",
            "On it.",
            "🔧 Called echo with {\"message\":\"hi\"}",
            "echo: {\"echoed\":\"hi\"}",
            "🔧 Called whoami with {}",
            "whoami: demo",
        ]);
        assert_eq!(added[3].role, ChatRole::Tool);
    }

    #[tokio::test]
    async fn failures_become_messages() {
        let model = ScriptedModel::new(vec![
            Ok(ChatCompletion::from_text(
                "<tool_call>{\"name\": \"rm\", \"arguments\": {}}</tool_call>",
            )),
            Ok(ChatCompletion::default()),
            Err(anyhow::anyhow!("connection refused")),
        ]);
        let mut chat = ChatSession::new(model.clone());

        let added = chat.send_message("delete it", &[], &FakeTools).await;
        assert_eq!(added.last().unwrap().text, "❌ Error calling rm: unknown tool: rm");

        let added = chat.send_message("hmm", &[], &FakeTools).await;
        assert_eq!(added.last().unwrap().text, NOT_UNDERSTOOD);

        let added = chat.send_message("again", &[], &FakeTools).await;
        assert_eq!(added.last().unwrap().text, "Error: connection refused");

        // Each turn sees the history before its own input.
        assert_eq!(*model.seen_history.lock().unwrap(), [0, 2, 4]);
    }

    #[tokio::test]
    async fn reset_clears_transcript_and_model() {
        let model = ScriptedModel::new(vec![Ok(ChatCompletion::from_text("hello"))]);
        let mut chat = ChatSession::new(model.clone());
        chat.send_message("hi", &[], &FakeTools).await;
        assert_eq!(chat.messages().len(), 2);

        chat.reset().await.unwrap();
        assert!(chat.messages().is_empty());
        assert_eq!(model.resets.load(Ordering::SeqCst), 1);
    }
}
