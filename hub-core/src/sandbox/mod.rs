//! Sandboxed JavaScript executor. Each invocation spawns a fresh QuickJS
//! runtime with no inherited host globals beyond ECMAScript built-ins,
//! timers, and a `flo` bridge object that relays calls back to the owning
//! agent's stores, scheduler, and tool pipeline.
//!
//! The bridge is implemented as a single native RPC function
//! (`__flo_call(method, args)`) that a small JS prelude wraps into the
//! `flo.state.*` / `flo.storage.*` / ... namespace, mirroring the
//! `{kind:"call", id, method, args}` / `{kind:"result", id, value|error}`
//! message-passing shape: one Rust dispatch point, not one binding per method.

use async_trait::async_trait;
use rquickjs::{AsyncContext, AsyncRuntime, CatchResultExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::error;

const TIMEOUT: Duration = Duration::from_secs(5 * 60);

const PRELUDE: &str = r#"
globalThis.flo = (function () {
  function call(method, args) { return __flo_call(method, args); }
  return {
    state: {
      get: (key) => call("state.get", { key }),
      set: (key, value) => call("state.set", { key, value }),
      getAll: () => call("state.getAll", {}),
    },
    storage: {
      get: (key) => call("storage.get", { key }),
      set: (key, value) => call("storage.set", { key, value }),
      delete: (key) => call("storage.delete", { key }),
      list: () => call("storage.list", {}),
    },
    push: (notification) => call("push", notification),
    emit: (eventName, payload) => call("emit", { eventName, payload }),
    notify: (text) => call("notify", { text }),
    notify_user: (text) => call("notify_user", { text }),
    callTool: (name, input) => call("callTool", { name, input }),
    ask: (...args) => call("ask", { args }),
  };
})();
"#;

#[derive(Debug, thiserror::Error, Clone)]
pub enum SandboxError {
    #[error("Execution timed out after 5 minutes")]
    Timeout,
    #[error("Recursive runjs calls are not allowed")]
    RecursiveRunjs,
    #[error("script error: {0}")]
    Script(String),
}

#[derive(Debug, Default, Clone)]
pub struct SandboxOutput {
    pub result: serde_json::Value,
    pub console: Vec<String>,
}

/// Host-side handlers for each `flo.*` method. One implementation per agent,
/// wired to that agent's stores/scheduler/router.
#[async_trait]
pub trait FloBridge: Send + Sync {
    async fn state_get(&self, key: &str) -> Result<serde_json::Value, String>;
    async fn state_set(&self, key: &str, value: serde_json::Value) -> Result<(), String>;
    async fn state_get_all(&self) -> Result<serde_json::Value, String>;
    async fn storage_get(&self, key: &str) -> Result<serde_json::Value, String>;
    async fn storage_set(&self, key: &str, value: serde_json::Value) -> Result<(), String>;
    async fn storage_delete(&self, key: &str) -> Result<bool, String>;
    async fn storage_list(&self) -> Result<serde_json::Value, String>;
    async fn push(&self, title: &str, body: &str) -> Result<(), String>;
    async fn emit(&self, event_name: &str, payload: serde_json::Value) -> Result<(), String>;
    async fn notify(&self, text: &str) -> Result<(), String>;
    async fn notify_user(&self, text: &str) -> Result<(), String>;
    async fn call_tool(&self, name: &str, input: serde_json::Value) -> Result<serde_json::Value, String>;
}

/// Dispatches one bridged RPC call. Mirrors the flat `method` + `args`
/// shape the JS prelude sends.
async fn dispatch(bridge: &dyn FloBridge, method: &str, args: serde_json::Value) -> Result<serde_json::Value, String> {
    match method {
        "state.get" => {
            let key = args["key"].as_str().unwrap_or_default();
            bridge.state_get(key).await
        }
        "state.set" => {
            let key = args["key"].as_str().unwrap_or_default().to_string();
            bridge.state_set(&key, args["value"].clone()).await?;
            Ok(serde_json::Value::Null)
        }
        "state.getAll" => bridge.state_get_all().await,
        "storage.get" => {
            let key = args["key"].as_str().unwrap_or_default();
            bridge.storage_get(key).await
        }
        "storage.set" => {
            let key = args["key"].as_str().unwrap_or_default().to_string();
            bridge.storage_set(&key, args["value"].clone()).await?;
            Ok(serde_json::Value::Null)
        }
        "storage.delete" => {
            let key = args["key"].as_str().unwrap_or_default();
            bridge.storage_delete(key).await.map(serde_json::Value::Bool)
        }
        "storage.list" => bridge.storage_list().await,
        "push" => {
            let title = args["title"].as_str().unwrap_or_default();
            let body = args["body"].as_str().unwrap_or_default();
            bridge
                .push(title, body)
                .await
                .map(|_| serde_json::Value::Null)
        }
        "emit" => {
            let event_name = args["eventName"].as_str().unwrap_or_default().to_string();
            bridge
                .emit(&event_name, args["payload"].clone())
                .await
                .map(|_| serde_json::Value::Null)
        }
        "notify" => {
            let text = args["text"].as_str().unwrap_or_default();
            bridge.notify(text).await.map(|_| serde_json::Value::Null)
        }
        "notify_user" => {
            let text = args["text"].as_str().unwrap_or_default();
            bridge
                .notify_user(text)
                .await
                .map(|_| serde_json::Value::Null)
        }
        "callTool" => {
            let name = args["name"].as_str().unwrap_or_default().to_string();
            if name == "run_js" || name == "runjs" {
                return Err("Recursive runjs calls are not allowed".to_string());
            }
            bridge.call_tool(&name, args["input"].clone()).await
        }
        "ask" => Err(
            "ask() cannot be called from sandboxed code: the loop cannot await the bridge while the bridge holds the loop"
                .to_string(),
        ),
        other => Err(format!("Unknown flo.* method: {other}")),
    }
}

pub struct SandboxExecutor;

impl SandboxExecutor {
    /// Runs `code` in a fresh isolated runtime. `context_hint` (e.g.
    /// `"iframe"`) is accepted for API parity but ignored: execution always
    /// happens server-side here.
    pub async fn run(
        code: &str,
        bridge: Arc<dyn FloBridge>,
        _context_hint: Option<&str>,
    ) -> Result<SandboxOutput, SandboxError> {
        let work = Self::run_inner(code.to_string(), bridge);
        match tokio::time::timeout(TIMEOUT, work).await {
            Ok(result) => result,
            Err(_) => Err(SandboxError::Timeout),
        }
    }

    async fn run_inner(code: String, bridge: Arc<dyn FloBridge>) -> Result<SandboxOutput, SandboxError> {
        let console: Arc<AsyncMutex<Vec<String>>> = Arc::new(AsyncMutex::new(Vec::new()));

        let runtime = AsyncRuntime::new().map_err(|e| SandboxError::Script(e.to_string()))?;
        let context = AsyncContext::full(&runtime)
            .await
            .map_err(|e| SandboxError::Script(e.to_string()))?;

        let result = context
            .with(|ctx| -> Result<serde_json::Value, rquickjs::Error> {
                install_console(&ctx, console.clone())?;
                install_bridge(&ctx, bridge)?;
                ctx.eval::<(), _>(PRELUDE)?;
                let value: rquickjs::Value = ctx.eval(code.as_str()).catch(&ctx).map_err(|e| {
                    rquickjs::Error::new_from_js_message("eval", "script", format!("{e:?}"))
                })?;
                Ok(js_to_json(&value))
            })
            .await;

        let console = console.lock().await.clone();
        match result {
            Ok(value) => Ok(SandboxOutput {
                result: value,
                console,
            }),
            Err(err) => {
                error!(%err, "sandboxed script failed");
                Err(SandboxError::Script(err.to_string()))
            }
        }
    }
}

fn install_console(
    ctx: &rquickjs::Ctx<'_>,
    buffer: Arc<AsyncMutex<Vec<String>>>,
) -> Result<(), rquickjs::Error> {
    let console = rquickjs::Object::new(ctx.clone())?;
    let log_buffer = buffer.clone();
    let log = rquickjs::Function::new(ctx.clone(), move |msg: String| {
        if let Ok(mut buf) = log_buffer.try_lock() {
            buf.push(msg);
        }
    })?;
    console.set("log", log.clone())?;
    console.set("error", log)?;
    ctx.globals().set("console", console)?;
    Ok(())
}

fn install_bridge<'js>(ctx: &rquickjs::Ctx<'js>, bridge: Arc<dyn FloBridge>) -> Result<(), rquickjs::Error> {
    let func = rquickjs::Function::new(
        ctx.clone(),
        rquickjs::prelude::Async(
            move |ctx: rquickjs::Ctx<'js>, method: String, args: rquickjs::Value<'js>| {
                let bridge = bridge.clone();
                let args_json = js_to_json(&args);
                async move {
                    match dispatch(bridge.as_ref(), &method, args_json).await {
                        Ok(value) => json_to_js(&ctx, &value),
                        Err(e) => Err(rquickjs::Error::new_from_js_message("flo_call", "value", e)),
                    }
                }
            },
        ),
    )?;
    ctx.globals().set("__flo_call", func)?;
    Ok(())
}

fn js_to_json(value: &rquickjs::Value) -> serde_json::Value {
    if value.is_null() || value.is_undefined() {
        serde_json::Value::Null
    } else if let Some(b) = value.as_bool() {
        serde_json::Value::Bool(b)
    } else if let Some(n) = value.as_float() {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    } else if let Some(s) = value.as_string() {
        serde_json::Value::String(s.to_string().unwrap_or_default())
    } else if let Some(arr) = value.as_array() {
        serde_json::Value::Array(arr.iter().filter_map(|v| v.ok()).map(|v| js_to_json(&v)).collect())
    } else if let Some(obj) = value.as_object() {
        let mut map = serde_json::Map::new();
        for key in obj.keys::<String>().filter_map(|k| k.ok()) {
            if let Ok(v) = obj.get::<_, rquickjs::Value>(key.as_str()) {
                map.insert(key, js_to_json(&v));
            }
        }
        serde_json::Value::Object(map)
    } else {
        serde_json::Value::Null
    }
}

fn json_to_js<'js>(
    ctx: &rquickjs::Ctx<'js>,
    value: &serde_json::Value,
) -> Result<rquickjs::Value<'js>, rquickjs::Error> {
    Ok(match value {
        serde_json::Value::Null => rquickjs::Value::new_undefined(ctx.clone()),
        serde_json::Value::Bool(b) => rquickjs::Value::new_bool(ctx.clone(), *b),
        serde_json::Value::Number(n) => rquickjs::Value::new_float(ctx.clone(), n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => rquickjs::String::from_str(ctx.clone(), s)?.into_value(),
        serde_json::Value::Array(arr) => {
            let array = rquickjs::Array::new(ctx.clone())?;
            for (i, v) in arr.iter().enumerate() {
                array.set(i, json_to_js(ctx, v)?)?;
            }
            array.into_value()
        }
        serde_json::Value::Object(map) => {
            let obj = rquickjs::Object::new(ctx.clone())?;
            for (k, v) in map {
                obj.set(k.as_str(), json_to_js(ctx, v)?)?;
            }
            obj.into_value()
        }
    })
}
