//! Page domain: the debuggee presented as a page whose resources are its
//! scripts.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::debugger::script_source;
use super::runtime::execution_context;
use crate::cdp::{str_param, MAIN_FRAME_ID};
use crate::error::InspectorError;
use crate::scripts;
use crate::session::SessionContext;

const LOADER_ID: &str = "spyglass-loader";

/// Handler for `Page.*`.
#[derive(Debug, Default)]
pub struct PageAgent {
    preloaded: Mutex<Vec<PathBuf>>,
}

impl PageAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn handle(
        &self,
        ctx: &SessionContext,
        method: &str,
        params: Value,
    ) -> Result<Value, InspectorError> {
        match method {
            "enable" | "disable" => Ok(json!({})),
            "getResourceTree" => self.resource_tree(ctx).await,
            "getResourceContent" => self.resource_content(ctx, &params).await,
            "reload" => reload(ctx).await,
            _ => Err(InspectorError::NotImplemented(format!("Page.{method}"))),
        }
    }

    async fn resource_tree(&self, ctx: &SessionContext) -> Result<Value, InspectorError> {
        let info = ctx.debuggee.ready().await?;
        scripts::discover_scripts(&ctx.debuggee, &ctx.scripts).await?;

        let known = ctx.scripts.lock().await.all();
        let mut resources: Vec<Value> = known
            .iter()
            .filter(|script| !script.hidden && !script.is_internal)
            .map(|script| resource(&script.url))
            .collect();

        if ctx.config.debugger.preload {
            let mut roots = vec![PathBuf::from(&info.cwd)];
            if let Some(dir) = info.filename.as_deref().and_then(|f| Path::new(f).parent()) {
                roots.push(dir.to_path_buf());
            }
            let hide = ctx.scripts.lock().await.hide_patterns().clone();
            let storage = ctx.storage.clone();
            let files = tokio::task::spawn_blocking(move || {
                storage.find_application_scripts(&roots, &hide)
            })
            .await
            .map_err(|e| InspectorError::Protocol(format!("file discovery failed: {e}")))?;

            let manager = ctx.scripts.lock().await;
            let unseen: Vec<PathBuf> = files
                .into_iter()
                .filter(|path| manager.find_by_path(&path.to_string_lossy()).is_none())
                .collect();
            drop(manager);
            resources.extend(unseen.iter().map(|path| resource(&path.to_string_lossy())));
            tracing::debug!(count = unseen.len(), "preloaded application scripts");
            *self.preloaded.lock().await = unseen;
        }

        Ok(json!({
            "frameTree": {
                "frame": {
                    "id": MAIN_FRAME_ID,
                    "loaderId": LOADER_ID,
                    "url": info.filename.as_deref().unwrap_or(&info.cwd),
                    "mimeType": "text/javascript",
                    "securityOrigin": "node://",
                },
                "resources": resources,
            }
        }))
    }

    async fn resource_content(
        &self,
        ctx: &SessionContext,
        params: &Value,
    ) -> Result<Value, InspectorError> {
        let url = str_param(params, "url")?;
        let known = ctx
            .scripts
            .lock()
            .await
            .find_by_url(url)
            .map(|script| script.id.clone());
        let content = match known {
            Some(id) => script_source(ctx, &id).await?,
            None => {
                let path = self
                    .preloaded
                    .lock()
                    .await
                    .iter()
                    .find(|path| path.to_string_lossy() == url)
                    .cloned()
                    .ok_or_else(|| InspectorError::InvalidParams(format!("unknown resource '{url}'")))?;
                ctx.storage.load(&path).await?
            }
        };
        Ok(json!({ "content": content, "base64Encoded": false }))
    }
}

fn resource(url: &str) -> Value {
    json!({ "url": url, "type": "Script", "mimeType": "text/javascript" })
}

async fn reload(ctx: &SessionContext) -> Result<Value, InspectorError> {
    ctx.scripts.lock().await.reset();
    ctx.frontend.emit("Debugger.globalObjectCleared", json!({}));
    let info = ctx.debuggee.ready().await?;
    ctx.frontend.emit(
        "Runtime.executionContextCreated",
        json!({ "context": execution_context(&info) }),
    );
    for script in scripts::discover_scripts(&ctx.debuggee, &ctx.scripts).await? {
        ctx.announce(&script);
    }
    Ok(json!({}))
}
