//! Script identity: id ↔ path ↔ url.
//!
//! Every script the debuggee reports is normalized once. Its url is the
//! shortest suffix of its path that no other known script (with a different
//! path) already uses, so the UI shows `index.js` until a second `index.js`
//! appears, which then becomes `b/index.js`.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};
use spyglass_platform::{HidePatterns, PathStyle};
use spyglass_v8dp::DebuggeeClient;
use tokio::sync::Mutex;

use crate::error::InspectorError;

/// V8 script type mask for ordinary (non-native, non-extension) scripts.
pub const NORMAL_SCRIPTS: i64 = 4;

/// A normalized script.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    /// V8 script id, as a string.
    pub id: String,
    /// Path as reported by the debuggee.
    pub path: String,
    /// Shortest unique suffix of `path`.
    pub url: String,
    /// Line offset of the script within its resource.
    pub start_line: i64,
    /// Column offset of the script within its resource.
    pub start_column: i64,
    /// Last line of the script.
    pub end_line: i64,
    /// Whether a hide pattern matches `path`.
    pub hidden: bool,
    /// `sourceMappingURL` annotation, if the source carried one.
    pub source_map_url: Option<String>,
    /// Built-in scripts have no absolute path.
    pub is_internal: bool,
}

impl Script {
    /// `Debugger.scriptParsed` parameters for this script.
    pub fn parsed_params(&self) -> Value {
        let mut params = json!({
            "scriptId": self.id,
            "url": self.url,
            "startLine": self.start_line,
            "startColumn": self.start_column,
            "endLine": self.end_line,
            "endColumn": 0,
            "isContentScript": self.is_internal,
        });
        if let Some(map) = &self.source_map_url {
            params["sourceMapURL"] = json!(map);
        }
        params
    }
}

fn source_map_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"//[#@]\s*sourceMappingURL=(\S+)\s*$").ok())
        .as_ref()
}

/// Last `sourceMappingURL` annotation in `source`.
pub fn find_source_map_url(source: &str) -> Option<String> {
    let re = source_map_regex()?;
    source
        .lines()
        .rev()
        .take(5)
        .find_map(|line| re.captures(line.trim_end()))
        .map(|caps| caps[1].to_string())
}

/// Known scripts of one session.
#[derive(Debug, Default)]
pub struct ScriptManager {
    scripts: HashMap<String, Script>,
    hide: HidePatterns,
}

impl ScriptManager {
    /// Create an empty manager using `hide` for the hidden-script policy.
    pub fn new(hide: HidePatterns) -> Self {
        Self {
            scripts: HashMap::new(),
            hide,
        }
    }

    /// Normalize and remember a raw V8 script descriptor.
    ///
    /// Returns the script when it was not known before. Descriptors without
    /// an id or a name are ignored.
    pub fn add(&mut self, raw: &Value) -> Option<Script> {
        let id = raw.get("id").and_then(Value::as_i64)?.to_string();
        if self.scripts.contains_key(&id) {
            return None;
        }
        let path = raw.get("name").and_then(Value::as_str).filter(|n| !n.is_empty())?;

        let style = PathStyle::detect(path);
        let start_line = raw.get("lineOffset").and_then(Value::as_i64).unwrap_or(0);
        let line_count = raw.get("lineCount").and_then(Value::as_i64).unwrap_or(1);
        let script = Script {
            url: self.unique_url(style, path),
            path: path.to_string(),
            start_line,
            start_column: raw.get("columnOffset").and_then(Value::as_i64).unwrap_or(0),
            end_line: start_line + line_count.max(1) - 1,
            hidden: self.hide.is_hidden(path),
            source_map_url: raw
                .get("source")
                .and_then(Value::as_str)
                .and_then(find_source_map_url),
            is_internal: !style.is_absolute(path),
            id: id.clone(),
        };
        tracing::debug!(id = %script.id, url = %script.url, hidden = script.hidden, "script added");
        self.scripts.insert(id, script.clone());
        Some(script)
    }

    fn unique_url(&self, style: PathStyle, path: &str) -> String {
        style
            .suffixes(path)
            .into_iter()
            .find(|candidate| {
                !self
                    .scripts
                    .values()
                    .any(|s| s.url == *candidate && !style.same_path(&s.path, path))
            })
            .unwrap_or(path)
            .to_string()
    }

    /// Look up a script by id.
    pub fn get(&self, id: &str) -> Option<&Script> {
        self.scripts.get(id)
    }

    /// Look up a script by its url.
    pub fn find_by_url(&self, url: &str) -> Option<&Script> {
        self.scripts.values().find(|s| s.url == url)
    }

    /// Look up a script by its path.
    pub fn find_by_path(&self, path: &str) -> Option<&Script> {
        let style = PathStyle::detect(path);
        self.scripts.values().find(|s| style.same_path(&s.path, path))
    }

    /// The configured hide patterns.
    pub fn hide_patterns(&self) -> &HidePatterns {
        &self.hide
    }

    /// Whether `path` is hidden by configuration.
    pub fn is_hidden_path(&self, path: &str) -> bool {
        self.hide.is_hidden(path)
    }

    /// All known scripts, ordered by numeric id.
    pub fn all(&self) -> Vec<Script> {
        let mut scripts: Vec<Script> = self.scripts.values().cloned().collect();
        scripts.sort_by_key(|s| s.id.parse::<i64>().unwrap_or(i64::MAX));
        scripts
    }

    /// Number of known scripts.
    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    /// Whether no scripts are known.
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Forget every script.
    pub fn reset(&mut self) {
        self.scripts.clear();
    }
}

/// Find a script by id, asking the debuggee for it when unknown.
///
/// Returns `(script, newly_added)`; `None` when the debuggee does not know
/// the id either.
///
/// # Errors
///
/// Propagates debuggee request failures.
pub async fn lookup_script(
    debuggee: &DebuggeeClient,
    scripts: &Mutex<ScriptManager>,
    id: &str,
) -> Result<Option<(Script, bool)>, InspectorError> {
    if let Some(script) = scripts.lock().await.get(id) {
        return Ok(Some((script.clone(), false)));
    }
    let Ok(numeric) = id.parse::<i64>() else {
        return Ok(None);
    };

    tracing::debug!(id, "fetching unknown script");
    let reply = debuggee
        .request(
            "scripts",
            json!({ "includeSource": false, "types": NORMAL_SCRIPTS, "ids": [numeric] }),
        )
        .await?;

    let mut manager = scripts.lock().await;
    let mut added = false;
    for raw in reply.body.as_array().into_iter().flatten() {
        added |= manager.add(raw).is_some_and(|script| script.id == id);
    }
    Ok(manager.get(id).cloned().map(|s| (s, added)))
}

/// Ask the debuggee for every script and remember them.
///
/// Returns the scripts that were not known before.
///
/// # Errors
///
/// Propagates debuggee request failures.
pub async fn discover_scripts(
    debuggee: &DebuggeeClient,
    scripts: &Mutex<ScriptManager>,
) -> Result<Vec<Script>, InspectorError> {
    let reply = debuggee
        .request(
            "scripts",
            json!({ "includeSource": false, "types": NORMAL_SCRIPTS }),
        )
        .await?;
    let mut manager = scripts.lock().await;
    Ok(reply
        .body
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|raw| manager.add(raw))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: i64, name: &str) -> Value {
        json!({"id": id, "name": name, "lineOffset": 0, "columnOffset": 0, "lineCount": 10})
    }

    #[test]
    fn first_script_gets_bare_file_name() {
        let mut manager = ScriptManager::default();
        let script = manager.add(&raw(1, "/srv/app/index.js")).unwrap();
        assert_eq!(script.url, "index.js");
        assert_eq!(script.end_line, 9);
        assert!(!script.hidden);
        assert!(!script.is_internal);
    }

    #[test]
    fn shared_suffix_gets_distinct_urls() {
        let mut manager = ScriptManager::default();
        let a = manager.add(&raw(1, "/srv/a/lib/index.js")).unwrap();
        let b = manager.add(&raw(2, "/srv/b/lib/index.js")).unwrap();
        let c = manager.add(&raw(3, "/srv/c/index.js")).unwrap();
        assert_eq!(a.url, "index.js");
        assert_eq!(b.url, "lib/index.js");
        assert_eq!(c.url, "c/index.js");
        assert_ne!(a.url, b.url);
    }

    #[test]
    fn same_path_reuses_url() {
        let mut manager = ScriptManager::default();
        manager.add(&raw(1, "/srv/app.js")).unwrap();
        let again = manager.add(&raw(2, "/srv/app.js")).unwrap();
        assert_eq!(again.url, "app.js");
    }

    #[test]
    fn fully_shared_path_falls_back_to_full_path() {
        let mut manager = ScriptManager::default();
        manager.add(&raw(1, "/x.js")).unwrap();
        manager.add(&raw(2, "x.js")).unwrap();
        let third = manager.add(&raw(3, "/y/x.js")).unwrap();
        assert_eq!(third.url, "y/x.js");
    }

    #[test]
    fn internal_and_hidden_flags() {
        let hide = HidePatterns::new(["node_modules"]).unwrap();
        let mut manager = ScriptManager::new(hide);
        let events = manager.add(&raw(1, "events.js")).unwrap();
        assert!(events.is_internal);
        let dep = manager.add(&raw(2, "/app/node_modules/x/y.js")).unwrap();
        assert!(dep.hidden);
        assert!(manager.is_hidden_path("C:\\app\\Node_Modules\\z.js"));
    }

    #[test]
    fn nameless_and_duplicate_ids_are_ignored() {
        let mut manager = ScriptManager::default();
        assert!(manager.add(&json!({"id": 1})).is_none());
        assert!(manager.add(&raw(2, "/a.js")).is_some());
        assert!(manager.add(&raw(2, "/a.js")).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn reset_forgets_everything() {
        let mut manager = ScriptManager::default();
        manager.add(&raw(7, "/a.js")).unwrap();
        assert!(manager.get("7").is_some());
        manager.reset();
        assert!(manager.get("7").is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn lookups_by_url_and_path() {
        let mut manager = ScriptManager::default();
        manager.add(&raw(3, "C:\\App\\main.js")).unwrap();
        assert_eq!(manager.find_by_url("main.js").unwrap().id, "3");
        assert_eq!(manager.find_by_path("c:/app/MAIN.js").unwrap().id, "3");
    }

    #[test]
    fn source_map_annotation_is_found() {
        let source = "var a = 1;\n//# sourceMappingURL=app.js.map\n";
        assert_eq!(find_source_map_url(source).as_deref(), Some("app.js.map"));
        assert_eq!(find_source_map_url("var a;"), None);

        let mut manager = ScriptManager::default();
        let mut descriptor = raw(1, "/b.js");
        descriptor["source"] = json!("x();\n//@ sourceMappingURL=b.map");
        let script = manager.add(&descriptor).unwrap();
        assert_eq!(script.source_map_url.as_deref(), Some("b.map"));
        assert_eq!(script.parsed_params()["sourceMapURL"], "b.map");
    }

    #[test]
    fn all_is_ordered_by_id() {
        let mut manager = ScriptManager::default();
        manager.add(&raw(10, "/b.js"));
        manager.add(&raw(2, "/a.js"));
        let ids: Vec<_> = manager.all().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["2", "10"]);
    }

    #[tokio::test]
    async fn script_added_during_lookup_is_not_new_twice() {
        use spyglass_v8dp::mock::{MockDebuggee, MockResponse};
        use spyglass_v8dp::ConnectionRegistry;

        let node = MockDebuggee::start(|_, _| {
            MockResponse::ok(json!([raw(3, "/srv/app/late.js")])).held()
        })
        .await
        .unwrap();
        let registry = ConnectionRegistry::new();
        let (debuggee, _events) =
            DebuggeeClient::new(registry.acquire("127.0.0.1", node.port()), 100);
        let scripts = Mutex::new(ScriptManager::default());

        let lookup = lookup_script(&debuggee, &scripts, "3");
        let race = async {
            node.wait_for("scripts", 1).await;
            assert!(scripts.lock().await.add(&raw(3, "/srv/app/late.js")).is_some());
            node.release_held().await;
        };
        let (found, ()) = tokio::join!(lookup, race);
        let (script, newly_added) = found.unwrap().unwrap();
        assert_eq!(script.path, "/srv/app/late.js");
        assert!(!newly_added);

        let (_, again) = lookup_script(&debuggee, &scripts, "3").await.unwrap().unwrap();
        assert!(!again);
    }
}
