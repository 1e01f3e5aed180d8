//! Chat with a local model that can call the tools of a sandboxed MCP server.

pub mod catalog;
pub mod chat;
pub mod model;
pub mod prompt;
pub mod providers;
pub mod tool_calls;

pub use {
    catalog::{ModelCategory, ModelInfo, model_by_id},
    chat::{ChatEvent, ChatMessage, ChatRole, ChatSession, OnChatEvent, ToolInvoker},
    model::{ChatCompletion, ChatModel, LoadProgress, OnProgress},
    providers::OpenAiCompatModel,
};
