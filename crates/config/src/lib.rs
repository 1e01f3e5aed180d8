//! Configuration loading for mcpbox.
//!
//! Config files are discovered as `mcpbox.{toml,yaml,yml,json}` in the
//! working directory, then in the user config directory (`~/.config/mcpbox`
//! on Linux). `${VAR}` and `${VAR:-default}` placeholders are substituted
//! before parsing; edits made through [`update_config`] keep them intact.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        ConfigSearch, config_value, discover_and_load, find_or_default_config_path, load_config,
        update_config, update_config_file, user_config_dir,
    },
    schema::{
        DEFAULT_MODEL, McpboxConfig, ModelConfig, SandboxConfig, ServerConfig, TransportConfig,
    },
};
