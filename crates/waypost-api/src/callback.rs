//! Callback-retrieval channel.
//!
//! A request is issued by injecting a script whose source URL names a
//! uniquely-registered hook; the response arrives when something invokes that
//! hook with a JSON value. There is no timeout: a hook that is never invoked
//! stays registered for the life of the process.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

pub const HOOK_PREFIX: &str = "waypost_callback__";

/// Registry of outstanding callback hooks.
#[derive(Clone, Debug, Default)]
pub struct CallbackHooks {
    hooks: Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>,
    next_index: Arc<AtomicU64>,
}

impl CallbackHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh hook and returns its name with the completion receiver.
    pub fn register(&self) -> (String, oneshot::Receiver<Value>) {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let name = format!("{HOOK_PREFIX}{index}");
        let (sender, receiver) = oneshot::channel();
        self.lock().insert(name.clone(), sender);
        (name, receiver)
    }

    /// Delivers `value` to the hook. Returns false for unknown or spent hooks.
    pub fn invoke(&self, name: &str, value: Value) -> bool {
        let Some(sender) = self.lock().remove(name) else {
            tracing::warn!(hook = name, "callback hook invoked but not registered");
            return false;
        };
        sender.send(value).is_ok()
    }

    /// Drops the hook so its waiter observes a failed load.
    pub fn cancel(&self, name: &str) -> bool {
        self.lock().remove(name).is_some()
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Value>>> {
        self.hooks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Host capability that loads a script from `src`.
///
/// Loading is fire-and-forget. The loaded script completes the request by
/// invoking its hook through `hooks`; a loader that knows the load failed may
/// cancel the hook instead.
pub trait ScriptLoader: Send + Sync {
    fn inject(&self, src: &str, hooks: &CallbackHooks);
}

impl<T> ScriptLoader for Arc<T>
where
    T: ScriptLoader + ?Sized,
{
    fn inject(&self, src: &str, hooks: &CallbackHooks) {
        (**self).inject(src, hooks)
    }
}

/// Reads the hook name a script source URL was issued for.
pub fn hook_name(src: &str) -> Option<String> {
    let url = url::Url::parse(src).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "callback")
        .map(|(_, value)| value.into_owned())
}

/// Parses a `hook_name(<json>);` script body.
pub fn parse_script(body: &str) -> Option<(String, Value)> {
    let trimmed = body.trim().trim_end_matches(';').trim_end();
    let open = trimmed.find('(')?;
    let inner = trimmed[open + 1..].strip_suffix(')')?;
    let name = trimmed[..open].trim();
    if name.is_empty() {
        return None;
    }
    let value = serde_json::from_str(inner.trim()).ok()?;
    Some((name.to_string(), value))
}

/// Fetches the script over HTTP and evaluates its single hook call.
///
/// Requires a running tokio runtime.
#[derive(Clone, Debug, Default)]
pub struct ReqwestScriptLoader {
    client: reqwest::Client,
}

impl ReqwestScriptLoader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScriptLoader for ReqwestScriptLoader {
    fn inject(&self, src: &str, hooks: &CallbackHooks) {
        let client = self.client.clone();
        let hooks = hooks.clone();
        let src = src.to_string();
        tokio::spawn(async move {
            let loaded = match client.get(&src).send().await {
                Ok(response) => response.text().await.map_err(|err| err.to_string()),
                Err(err) => Err(err.to_string()),
            };
            match loaded.map(|body| parse_script(&body)) {
                Ok(Some((name, value))) => {
                    hooks.invoke(&name, value);
                }
                Ok(None) => {
                    tracing::warn!(src = %src, "callback script did not invoke a hook");
                    if let Some(name) = hook_name(&src) {
                        hooks.cancel(&name);
                    }
                }
                Err(error) => {
                    tracing::warn!(src = %src, error = %error, "callback script load failed");
                    if let Some(name) = hook_name(&src) {
                        hooks.cancel(&name);
                    }
                }
            }
        });
    }
}
