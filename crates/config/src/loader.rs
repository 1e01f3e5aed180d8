use std::path::{Path, PathBuf};

use {
    anyhow::Context,
    tracing::{debug, warn},
};

use crate::{
    env_subst::{required_vars, substitute_env},
    schema::McpboxConfig,
};

/// Config file names, checked in order within each directory.
const CONFIG_FILENAMES: &[&str] = &["mcpbox.toml", "mcpbox.yaml", "mcpbox.yml", "mcpbox.json"];

/// Per-user config directory (`~/.config/mcpbox` on Linux).
pub fn user_config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "mcpbox").map(|d| d.config_dir().to_path_buf())
}

/// Where config files are looked for, and where a new one is written.
#[derive(Debug, Clone)]
pub struct ConfigSearch {
    dirs: Vec<PathBuf>,
    home: PathBuf,
}

impl ConfigSearch {
    /// The working directory, then the user config directory. New files go
    /// to the user config directory.
    pub fn standard() -> Self {
        let home = user_config_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            dirs: vec![PathBuf::from("."), home.clone()],
            home,
        }
    }

    /// Only `dir`, for both discovery and writing.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            dirs: vec![dir.clone()],
            home: dir,
        }
    }

    /// First existing config file.
    pub fn find(&self) -> Option<PathBuf> {
        self.dirs
            .iter()
            .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)))
            .find(|p| p.is_file())
    }

    /// The file `update` would write: the existing one, else a new TOML file.
    pub fn target(&self) -> PathBuf {
        self.find().unwrap_or_else(|| self.home.join("mcpbox.toml"))
    }

    /// Load the first config file found.
    ///
    /// With no file, defaults are written to the home directory so there is
    /// something to edit. A file that fails to load is reported and defaults
    /// are used instead.
    pub fn load(&self) -> McpboxConfig {
        let Some(path) = self.find() else {
            let config = McpboxConfig::default();
            let path = self.home.join("mcpbox.toml");
            match write_config(&path, &config) {
                Ok(()) => debug!(path = %path.display(), "wrote default config"),
                Err(e) => warn!(path = %path.display(), error = %e, "could not write default config"),
            }
            return config;
        };
        debug!(path = %path.display(), "loading config");
        load_config(&path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            McpboxConfig::default()
        })
    }

    /// Read-modify-write the config file at [`target`](Self::target).
    pub fn update(&self, f: impl FnOnce(&mut McpboxConfig)) -> anyhow::Result<PathBuf> {
        let path = self.target();
        update_config_file(&path, f)?;
        Ok(path)
    }
}

/// Load, substitute `${VAR}` placeholders, parse and validate one file.
pub fn load_config(path: &Path) -> anyhow::Result<McpboxConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    for name in required_vars(&raw) {
        if std::env::var_os(name).is_none() {
            warn!(var = name, path = %path.display(), "config references an unset variable");
        }
    }
    let config = parse_config(&substitute_env(&raw), path)?;
    config
        .validate()
        .with_context(|| format!("invalid config in {}", path.display()))?;
    Ok(config)
}

/// Apply `f` to the config stored at `path` and write it back in the same
/// format. Missing files start from defaults.
///
/// The file is edited without placeholder substitution, so `${VAR}`
/// references (API keys, tokens) stay references.
pub fn update_config_file(path: &Path, f: impl FnOnce(&mut McpboxConfig)) -> anyhow::Result<()> {
    let mut config = match std::fs::read_to_string(path) {
        Ok(raw) => parse_config(&raw, path)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => McpboxConfig::default(),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
    };
    f(&mut config);
    config.validate()?;
    write_config(path, &config)?;
    debug!(path = %path.display(), "saved config");
    Ok(())
}

/// Discover the config in the standard locations.
pub fn discover_and_load() -> McpboxConfig {
    ConfigSearch::standard().load()
}

/// Update the config in the standard locations. Returns the path written.
pub fn update_config(f: impl FnOnce(&mut McpboxConfig)) -> anyhow::Result<PathBuf> {
    ConfigSearch::standard().update(f)
}

/// Existing config file, or where a new one would be written.
pub fn find_or_default_config_path() -> PathBuf {
    ConfigSearch::standard().target()
}

fn write_config(path: &Path, config: &McpboxConfig) -> anyhow::Result<()> {
    let text = match extension(path) {
        "yaml" | "yml" => serde_yaml::to_string(config)?,
        "json" => serde_json::to_string_pretty(config)?,
        _ => toml::to_string_pretty(config)?,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

fn extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("toml")
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<McpboxConfig> {
    let config = match extension(path) {
        "toml" => toml::from_str(raw)?,
        "yaml" | "yml" => serde_yaml::from_str(raw)?,
        "json" => serde_json::from_str(raw)?,
        other => anyhow::bail!("unsupported config format: .{other}"),
    };
    Ok(config)
}

/// Look up a dotted key (`model.selected`, `server.args.0`) in the config.
/// Secrets come back redacted.
pub fn config_value(config: &McpboxConfig, key: &str) -> Option<serde_json::Value> {
    let root = serde_json::to_value(config.redacted()).ok()?;
    key.split('.').try_fold(root, |value, part| match value {
        serde_json::Value::Array(items) => items.into_iter().nth(part.parse().ok()?),
        serde_json::Value::Object(mut map) => map.remove(part),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use {super::*, serial_test::serial};

    #[test]
    fn loads_each_supported_format() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("mcpbox.toml");
        std::fs::write(&toml_path, "[transport]\nrequest_timeout_secs = 5\n").unwrap();
        assert_eq!(load_config(&toml_path).unwrap().transport.request_timeout_secs, 5);

        let yaml_path = dir.path().join("mcpbox.yaml");
        std::fs::write(&yaml_path, "sandbox:\n  backend: memory\n").unwrap();
        assert_eq!(load_config(&yaml_path).unwrap().sandbox.backend, "memory");

        let json_path = dir.path().join("mcpbox.json");
        std::fs::write(&json_path, r#"{"model": {"max_tokens": 64}}"#).unwrap();
        assert_eq!(load_config(&json_path).unwrap().model.max_tokens, 64);

        let bad = dir.path().join("mcpbox.ini");
        std::fs::write(&bad, "").unwrap();
        assert!(load_config(&bad).is_err());
    }

    #[test]
    fn invalid_values_are_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcpbox.toml");
        std::fs::write(&path, "[transport]\nrequest_timeout_secs = 0\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("request_timeout_secs"));
    }

    #[test]
    #[serial]
    #[allow(unsafe_code)]
    fn env_placeholders_are_substituted_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcpbox.toml");
        std::fs::write(&path, "[model]\napi_key = \"${MCPBOX_LOADER_TEST_KEY}\"\n").unwrap();
        unsafe { std::env::set_var("MCPBOX_LOADER_TEST_KEY", "sk-test") };
        let cfg = load_config(&path).unwrap();
        unsafe { std::env::remove_var("MCPBOX_LOADER_TEST_KEY") };
        assert_eq!(cfg.model.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn discovery_writes_defaults_then_update_persists() {
        let dir = tempfile::tempdir().unwrap();
        let search = ConfigSearch::in_dir(dir.path());

        let cfg = search.load();
        assert_eq!(cfg.model.selected, crate::schema::DEFAULT_MODEL);
        assert_eq!(search.find(), Some(dir.path().join("mcpbox.toml")));

        let written = search
            .update(|c| c.model.selected = "Qwen2.5-7B-Instruct".into())
            .unwrap();
        assert_eq!(written, dir.path().join("mcpbox.toml"));
        assert_eq!(search.load().model.selected, "Qwen2.5-7B-Instruct");
    }

    #[test]
    fn update_keeps_format_and_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcpbox.yaml");
        std::fs::write(
            &path,
            "model:\n  api_key: \"${MCPBOX_UNSET_KEY_FOR_UPDATE}\"\n",
        )
        .unwrap();

        let written = ConfigSearch::in_dir(dir.path())
            .update(|c| c.model.selected = "SmolLM2-360M-Instruct-q4f16_1-MLC".into())
            .unwrap();
        assert_eq!(written, path);

        let raw = std::fs::read_to_string(&path).unwrap();
        let reread: McpboxConfig = serde_yaml::from_str(&raw).unwrap();
        assert_eq!(reread.model.selected, "SmolLM2-360M-Instruct-q4f16_1-MLC");
        assert_eq!(
            reread.model.api_key.as_deref(),
            Some("${MCPBOX_UNSET_KEY_FOR_UPDATE}")
        );
    }

    #[test]
    fn update_refuses_to_write_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcpbox.toml");
        assert!(update_config_file(&path, |c| c.model.temperature = 9.0).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn dotted_lookup_indexes_arrays_and_redacts() {
        let mut cfg = McpboxConfig::default();
        cfg.model.api_key = Some("sk-live".into());
        assert_eq!(
            config_value(&cfg, "transport.runtime"),
            Some(serde_json::json!("node"))
        );
        assert_eq!(
            config_value(&cfg, "transport.install_command.1"),
            Some(serde_json::json!("install"))
        );
        assert_eq!(
            config_value(&cfg, "model.api_key"),
            Some(serde_json::json!("[REDACTED]"))
        );
        assert!(config_value(&cfg, "transport.nope").is_none());
        assert!(config_value(&cfg, "transport.install_command.x").is_none());
    }
}
