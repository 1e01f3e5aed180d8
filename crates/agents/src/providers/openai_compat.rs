use std::sync::atomic::{AtomicBool, Ordering};

use {
    async_trait::async_trait,
    mcpbox_config::ModelConfig,
    mcpbox_mcp::Tool,
    secrecy::{ExposeSecret, Secret},
    serde_json::json,
    tracing::debug,
};

use crate::{
    chat::{ChatMessage, ChatRole},
    model::{ChatCompletion, ChatModel, LoadProgress, OnProgress},
};

/// Any server speaking the OpenAI chat-completions API (llama.cpp, vLLM,
/// Ollama, MLC serve, ...).
pub struct OpenAiCompatModel {
    model: String,
    base_url: String,
    api_key: Option<Secret<String>>,
    history_window: usize,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
    ready: AtomicBool,
    on_progress: Option<OnProgress>,
}

impl std::fmt::Debug for OpenAiCompatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatModel")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl OpenAiCompatModel {
    pub fn new(model: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self::from_config(&ModelConfig {
            selected: model.into(),
            base_url: base_url.into(),
            ..Default::default()
        })
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            model: config.selected.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().map(Secret::new),
            history_window: config.history_window,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client: reqwest::Client::new(),
            ready: AtomicBool::new(false),
            on_progress: None,
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: Secret<String>) -> Self {
        self.api_key = Some(api_key);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, on_progress: OnProgress) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    fn report(&self, progress: LoadProgress) {
        if let Some(ref cb) = self.on_progress {
            cb(progress);
        }
    }

    /// System prompt, the recent user/assistant history, then the new input.
    ///
    /// The window is taken before filtering, so tool messages inside it
    /// shrink the context rather than pulling in older turns.
    fn build_messages(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        input: &str,
    ) -> Vec<serde_json::Value> {
        let recent = &history[history.len().saturating_sub(self.history_window)..];
        let mut messages = Vec::with_capacity(recent.len() + 2);
        messages.push(json!({"role": "system", "content": system_prompt}));
        for msg in recent {
            let role = match msg.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
                ChatRole::Tool => continue,
            };
            messages.push(json!({"role": role, "content": msg.text}));
        }
        messages.push(json!({"role": "user", "content": input}));
        messages
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatModel {
    fn id(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        system_prompt: &str,
        _tools: &[Tool],
        history: &[ChatMessage],
        input: &str,
    ) -> anyhow::Result<ChatCompletion> {
        let first_use = !self.ready.load(Ordering::Acquire);
        if first_use {
            self.report(LoadProgress::percent(0));
        }

        let body = json!({
            "model": self.model,
            "messages": self.build_messages(system_prompt, history, input),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false,
        });
        debug!(model = %self.model, base_url = %self.base_url, "requesting chat completion");

        let mut req = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("content-type", "application/json")
            .json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key.expose_secret());
        }

        let completion = req
            .send()
            .await?
            .error_for_status()?
            .json::<ChatCompletion>()
            .await?;

        if first_use && !self.ready.swap(true, Ordering::AcqRel) {
            self.report(LoadProgress::percent(100));
        }
        Ok(completion)
    }

    async fn reset(&self) -> anyhow::Result<()> {
        // The server keeps no conversation state between requests.
        debug!(model = %self.model, "chat reset");
        Ok(())
    }
}
