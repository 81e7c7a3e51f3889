//! Live-edit persistence and application file discovery.
//!
//! The debuggee compiles every module inside a wrapper function, so the
//! source it reports (and the source `Debugger.setScriptSource` sends back)
//! is the file body between a fixed header and footer. A shebang line is
//! blanked before wrapping, which keeps line numbers intact.

use std::path::{Path, PathBuf};

use spyglass_platform::HidePatterns;
use walkdir::WalkDir;

use crate::error::InspectorError;

/// Text the debuggee prepends to every module.
pub const MODULE_HEADER: &str = "(function (exports, require, module, __filename, __dirname) { ";
/// Text the debuggee appends to every module.
pub const MODULE_FOOTER: &str = "\n});";

/// Wrap a file body the way the debuggee does.
pub fn wrap(body: &str) -> String {
    format!("{MODULE_HEADER}{body}{MODULE_FOOTER}")
}

/// Extract the file body from wrapped module source.
///
/// # Errors
///
/// Returns `LiveEditRejected` when `source` is not a wrapped module.
pub fn unwrap(source: &str) -> Result<&str, InspectorError> {
    source
        .strip_prefix(MODULE_HEADER)
        .and_then(|rest| rest.strip_suffix(MODULE_FOOTER))
        .ok_or_else(|| {
            InspectorError::LiveEditRejected(
                "the source no longer matches the module wrapper template".into(),
            )
        })
}

/// Split a leading `#!` line off `content`, without its newline.
fn split_shebang(content: &str) -> (&str, &str) {
    if !content.starts_with("#!") {
        return ("", content);
    }
    let end = content.find('\n').unwrap_or(content.len());
    content.split_at(end)
}

/// Reads and writes script files on the bridge host.
#[derive(Debug, Clone, Default)]
pub struct ScriptFileStorage;

impl ScriptFileStorage {
    /// Create a storage handle.
    pub fn new() -> Self {
        Self
    }

    /// Write the body of wrapped `source` to `path`.
    ///
    /// A shebang line already present in the file is kept.
    ///
    /// # Errors
    ///
    /// `LiveEditRejected` for unwrapped source, `Io` for filesystem errors.
    pub async fn save(&self, path: &Path, source: &str) -> Result<(), InspectorError> {
        let body = unwrap(source)?;
        let shebang = match tokio::fs::read_to_string(path).await {
            Ok(old) => split_shebang(&old).0.to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        tokio::fs::write(path, format!("{shebang}{body}")).await?;
        tracing::info!(path = %path.display(), "saved live edit");
        Ok(())
    }

    /// Read `path` and return it wrapped as the debuggee would compile it.
    ///
    /// # Errors
    ///
    /// Returns `Io` when the file cannot be read.
    pub async fn load(&self, path: &Path) -> Result<String, InspectorError> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(wrap(split_shebang(&content).1))
    }

    /// List `.js` files under `roots`, skipping dot-directories,
    /// `node_modules` and hidden paths. Sorted and de-duplicated.
    pub fn find_application_scripts(&self, roots: &[PathBuf], hide: &HidePatterns) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = roots
            .iter()
            .flat_map(|root| {
                WalkDir::new(root)
                    .follow_links(false)
                    .into_iter()
                    .filter_entry(|entry| {
                        entry.depth() == 0 || {
                            let name = entry.file_name().to_string_lossy();
                            !name.starts_with('.') && name != "node_modules"
                        }
                    })
                    .filter_map(Result::ok)
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "js"))
            .filter(|path| !hide.is_hidden(&path.to_string_lossy()))
            .collect();
        found.sort();
        found.dedup();
        found
    }
}
