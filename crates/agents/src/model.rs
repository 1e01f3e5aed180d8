use {
    async_trait::async_trait,
    mcpbox_mcp::Tool,
    serde::{Deserialize, Serialize},
};

use crate::chat::ChatMessage;

/// Chat-completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier (e.g. "Llama-3.1-8B-Instruct-q4f32_1-MLC").
    fn id(&self) -> &str;

    /// Complete one turn. `history` holds the messages before `input`.
    async fn complete(
        &self,
        system_prompt: &str,
        tools: &[Tool],
        history: &[ChatMessage],
        input: &str,
    ) -> anyhow::Result<ChatCompletion>;

    /// Forget any conversation state held by the backend.
    async fn reset(&self) -> anyhow::Result<()>;
}

/// The subset of an OpenAI-style completion response that is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

impl ChatCompletion {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            choices: vec![Choice {
                message: CompletionMessage {
                    content: Some(text.into()),
                },
            }],
        }
    }

    /// Content of the first choice, if any.
    pub fn content(&self) -> Option<&str> {
        self.choices.first()?.message.content.as_deref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub message: CompletionMessage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// Model warm-up progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadProgress {
    /// 0 to 100.
    pub progress: u8,
    pub status: String,
}

impl LoadProgress {
    pub fn idle() -> Self {
        Self {
            progress: 0,
            status: "Idle".into(),
        }
    }

    pub fn percent(progress: u8) -> Self {
        let progress = progress.min(100);
        let icon = if progress == 100 { "🚀" } else { "🔄" };
        Self {
            progress,
            status: format!("{icon} {progress}%"),
        }
    }
}

pub type OnProgress = Box<dyn Fn(LoadProgress) + Send + Sync>;
