//! Server sources to mount: the embedded demo server or a directory on disk.

use std::path::Path;

use {tracing::debug, walkdir::WalkDir};

use crate::{
    error::{McpError, Result},
    types::FileSet,
};

pub const DEFAULT_ENTRYPOINT: &str = "index.js";

const PACKAGE_JSON: &str = include_str!("../assets/mcp-server/package.json");
const INDEX_JS: &str = include_str!("../assets/mcp-server/index.js");

/// Directories never copied into the sandbox.
const SKIPPED_DIRS: &[&str] = &["node_modules", ".git"];

/// The demo server (`whoami`, `echo`) compiled into the binary.
pub fn default_files() -> FileSet {
    [("package.json", PACKAGE_JSON), (DEFAULT_ENTRYPOINT, INDEX_JS)]
        .into_iter()
        .collect()
}

/// Read every file under `dir`, keyed by its `/`-separated relative path.
pub fn load_dir(dir: &Path) -> Result<FileSet> {
    let mut files = FileSet::new();
    let walker = WalkDir::new(dir).into_iter().filter_entry(|entry| {
        entry.depth() == 0
            || !entry
                .file_name()
                .to_str()
                .is_some_and(|name| SKIPPED_DIRS.contains(&name))
    });

    for entry in walker {
        let entry = entry.map_err(|e| McpError::Mount(format!("{}: {e}", dir.display())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| McpError::Mount(e.to_string()))?;
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let contents = std::fs::read_to_string(entry.path())
            .map_err(|e| McpError::Mount(format!("{key}: {e}")))?;
        files.insert(key, contents);
    }

    if files.is_empty() {
        return Err(McpError::Mount(format!("no files in {}", dir.display())));
    }
    debug!(count = files.len(), dir = %dir.display(), "loaded server files");
    Ok(files)
}
