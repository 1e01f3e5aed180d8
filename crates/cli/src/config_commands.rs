use std::path::{Path, PathBuf};

use {
    anyhow::{Result, anyhow},
    clap::Subcommand,
    mcpbox_agents::catalog,
    mcpbox_config::{
        McpboxConfig, config_value, find_or_default_config_path, update_config,
        update_config_file,
    },
    tracing::warn,
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective config, or one dotted key (e.g. `model.selected`).
    /// Secrets are masked.
    Get { key: Option<String> },
    /// Choose the chat model.
    SetModel {
        /// Model id (see `mcpbox models`).
        id: String,
    },
    /// Print the path of the config file that would be written.
    Path,
}

/// `file` is the `--config` override, if any; edits go there instead of the
/// discovered file.
pub fn handle_config(
    action: &ConfigAction,
    config: &McpboxConfig,
    file: Option<&Path>,
) -> Result<()> {
    match action {
        ConfigAction::Get { key: None } => {
            print!("{}", toml::to_string_pretty(&config.redacted())?);
            Ok(())
        },
        ConfigAction::Get { key: Some(key) } => {
            let value =
                config_value(config, key).ok_or_else(|| anyhow!("no such config key: {key}"))?;
            match value {
                serde_json::Value::String(s) => println!("{s}"),
                other => println!("{other}"),
            }
            Ok(())
        },
        ConfigAction::SetModel { id } => set_model(id, file),
        ConfigAction::Path => {
            let path = file.map_or_else(find_or_default_config_path, Path::to_path_buf);
            println!("{}", path.display());
            Ok(())
        },
    }
}

fn set_model(id: &str, file: Option<&Path>) -> Result<()> {
    if catalog::model_by_id(id).is_none() {
        warn!(model = id, "model is not in the catalog, saving anyway");
    }
    let id = id.to_string();
    let path: PathBuf = match file {
        Some(file) => {
            update_config_file(file, move |config| config.model.selected = id)?;
            file.to_path_buf()
        },
        None => update_config(move |config| config.model.selected = id)?,
    };
    println!("Saved to {}", path.display());
    Ok(())
}
