//! Config schema: which server to launch, how to talk to it, where it runs,
//! and which chat model to use.

use std::{collections::HashMap, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Model id used when nothing has been selected yet.
pub const DEFAULT_MODEL: &str = "Llama-3.1-8B-Instruct-q4f32_1-MLC";

const REDACTED: &str = "[REDACTED]";

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct McpboxConfig {
    pub server: ServerConfig,
    pub transport: TransportConfig,
    pub sandbox: SandboxConfig,
    pub model: ModelConfig,
}

impl McpboxConfig {
    /// Reject values that would only fail later, at launch or at the first
    /// request.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.command.is_none() && self.server.entrypoint.trim().is_empty() {
            anyhow::bail!("server.entrypoint must be set when server.command is not");
        }
        if self.server.command.as_deref().is_some_and(|c| c.trim().is_empty()) {
            anyhow::bail!("server.command must not be empty");
        }
        if self.transport.request_timeout_secs == 0 {
            anyhow::bail!("transport.request_timeout_secs must be at least 1");
        }
        if self.transport.install_command.iter().any(|part| part.is_empty()) {
            anyhow::bail!("transport.install_command has an empty element");
        }
        if self.transport.runtime.trim().is_empty() {
            anyhow::bail!("transport.runtime must not be empty");
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            anyhow::bail!(
                "model.temperature must be between 0 and 2, got {}",
                self.model.temperature
            );
        }
        if self.model.max_tokens == 0 {
            anyhow::bail!("model.max_tokens must be at least 1");
        }
        Ok(())
    }

    /// Copy safe to print: the API key and server env values are masked.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.model.api_key.is_some() {
            config.model.api_key = Some(REDACTED.into());
        }
        for value in config.server.env.values_mut() {
            *value = REDACTED.into();
        }
        config
    }
}

/// Which tool server to launch.
///
/// With `command` set the server is spawned directly; otherwise the files in
/// `files_dir` (or the embedded demo server) are mounted and installed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub files_dir: Option<PathBuf>,
    pub entrypoint: String,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            files_dir: None,
            entrypoint: "index.js".into(),
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// How long a tool call may wait for its response.
    pub request_timeout_secs: u64,
    /// Run after mounting files, before the entrypoint. Empty skips install.
    pub install_command: Vec<String>,
    /// Interpreter that runs the entrypoint.
    pub runtime: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            install_command: vec!["npm".into(), "install".into()],
            runtime: "node".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// `"host"` (default) runs real processes; `"memory"` runs the built-in
    /// demo server in-process.
    pub backend: String,
    /// Fixed working directory. A temporary one is used when unset.
    pub root: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: "host".into(),
            root: None,
        }
    }
}

/// Chat model settings. Any OpenAI-compatible chat completions endpoint works.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub selected: String,
    pub base_url: String,
    pub api_key: Option<String>,
    /// Number of prior messages sent along with each prompt.
    pub history_window: usize,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            selected: DEFAULT_MODEL.into(),
            base_url: "http://127.0.0.1:8080".into(),
            api_key: None,
            history_window: 10,
            temperature: 0.7,
            max_tokens: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: McpboxConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.transport.request_timeout_secs, 30);
        assert_eq!(cfg.transport.install_command, ["npm", "install"]);
        assert_eq!(cfg.server.entrypoint, "index.js");
        assert_eq!(cfg.sandbox.backend, "host");
        assert_eq!(cfg.model.selected, DEFAULT_MODEL);
        assert_eq!(cfg.model.history_window, 10);
    }

    #[test]
    fn defaults_are_valid() {
        McpboxConfig::default().validate().unwrap();
    }

    #[test]
    fn validation_names_the_bad_field() {
        let mut cfg = McpboxConfig::default();
        cfg.server.entrypoint = " ".into();
        assert!(cfg.validate().unwrap_err().to_string().contains("server.entrypoint"));
        cfg.server.command = Some("uvx".into());
        cfg.validate().unwrap();

        let mut cfg = McpboxConfig::default();
        cfg.transport.install_command = vec!["npm".into(), String::new()];
        assert!(cfg.validate().unwrap_err().to_string().contains("install_command"));

        let mut cfg = McpboxConfig::default();
        cfg.model.temperature = -0.1;
        assert!(cfg.validate().unwrap_err().to_string().contains("temperature"));
    }

    #[test]
    fn redacted_masks_secrets_only() {
        let mut cfg = McpboxConfig::default();
        cfg.model.api_key = Some("sk-live".into());
        cfg.server.env.insert("API_TOKEN".into(), "abc".into());

        let shown = cfg.redacted();
        assert_eq!(shown.model.api_key.as_deref(), Some("[REDACTED]"));
        assert_eq!(shown.server.env["API_TOKEN"], "[REDACTED]");
        assert_eq!(shown.model.selected, cfg.model.selected);
        assert!(McpboxConfig::default().redacted().model.api_key.is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg: McpboxConfig = toml::from_str(
            r#"
            [server]
            command = "npx"
            args = ["-y", "@modelcontextprotocol/server-everything"]

            [server.env]
            API_TOKEN = "abc"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.command.as_deref(), Some("npx"));
        assert_eq!(cfg.server.args.len(), 2);
        assert_eq!(cfg.server.env["API_TOKEN"], "abc");
        assert_eq!(cfg.server.entrypoint, "index.js");
        assert_eq!(cfg.transport.runtime, "node");
    }
}
