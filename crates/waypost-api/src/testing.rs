//! Scriptable in-process stand-in for the remote API.
//!
//! `MockApi` serves both transport channels. Replies are queued per URL path
//! and consumed in order; a path with nothing queued answers `{}`.

use crate::callback::{CallbackHooks, ScriptLoader, hook_name};
use crate::endpoints::Method;
use crate::http::{HttpClient, HttpFailure, HttpRequest, HttpResponse};
use crate::transport::Channel;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub enum MockReply {
    Json(Value),
    Status(u16),
    Timeout,
    NetworkError(String),
    /// Never answers; only the transport's own timeout ends the attempt.
    Hang,
    /// Waits before answering with the inner reply.
    Delayed(Duration, Box<MockReply>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedRequest {
    pub channel: Channel,
    pub method: Method,
    pub url: String,
    pub path: String,
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
    /// Decoded form pairs from the body (POST) or the query string.
    pub params: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.param(name).is_some()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MockApi {
    inner: Arc<Mutex<MockApiState>>,
}

#[derive(Debug, Default)]
struct MockApiState {
    replies: BTreeMap<String, VecDeque<MockReply>>,
    requests: Vec<RecordedRequest>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `reply` for the next request whose URL path is `path`.
    pub fn reply(&self, path: &str, reply: MockReply) -> &Self {
        self.state()
            .replies
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn reply_json(&self, path: &str, value: Value) -> &Self {
        self.reply(path, MockReply::Json(value))
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state().requests.clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.state()
            .requests
            .iter()
            .map(|request| request.path.clone())
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.state().requests.len()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.state().requests.last().cloned()
    }

    pub fn clear_requests(&self) {
        self.state().requests.clear();
    }

    fn record(&self, request: RecordedRequest) -> MockReply {
        let mut state = self.state();
        let reply = state
            .replies
            .get_mut(&request.path)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| MockReply::Json(Value::Object(Default::default())));
        state.requests.push(request);
        reply
    }

    fn state(&self) -> MutexGuard<'_, MockApiState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn split_url(url: &str) -> (String, Vec<(String, String)>) {
    match url::Url::parse(url) {
        Ok(parsed) => (
            parsed.path().to_string(),
            parsed.query_pairs().into_owned().collect(),
        ),
        Err(_) => (url.to_string(), Vec::new()),
    }
}

fn decode_form(body: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect()
}

async fn settle(reply: MockReply) -> MockReply {
    let mut reply = reply;
    loop {
        match reply {
            MockReply::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                reply = *inner;
            }
            MockReply::Hang => std::future::pending::<()>().await,
            other => return other,
        }
    }
}

#[async_trait]
impl HttpClient for MockApi {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpFailure> {
        let (path, mut params) = split_url(&request.url);
        if let Some(body) = &request.body {
            params.extend(decode_form(body));
        }
        let reply = self.record(RecordedRequest {
            channel: Channel::Direct,
            method: request.method,
            url: request.url.clone(),
            path,
            body: request.body.clone(),
            headers: request.headers.clone(),
            params,
        });

        match settle(reply).await {
            MockReply::Json(value) => Ok(HttpResponse {
                status: 200,
                body: value.to_string(),
            }),
            MockReply::Status(status) => Ok(HttpResponse {
                status,
                body: String::new(),
            }),
            MockReply::Timeout => Err(HttpFailure::Timeout),
            MockReply::NetworkError(message) => Err(HttpFailure::Network(message)),
            MockReply::Hang | MockReply::Delayed(..) => Err(HttpFailure::Timeout),
        }
    }
}

impl ScriptLoader for MockApi {
    fn inject(&self, src: &str, hooks: &CallbackHooks) {
        let (path, params) = split_url(src);
        let Some(hook) = hook_name(src) else {
            return;
        };
        let reply = self.record(RecordedRequest {
            channel: Channel::Callback,
            method: Method::Get,
            url: src.to_string(),
            path,
            body: None,
            headers: Vec::new(),
            params,
        });

        match reply {
            MockReply::Json(value) => {
                hooks.invoke(&hook, value);
            }
            MockReply::Hang => {}
            MockReply::Delayed(delay, inner) => {
                let hooks = hooks.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    match *inner {
                        MockReply::Json(value) => {
                            hooks.invoke(&hook, value);
                        }
                        _ => {
                            hooks.cancel(&hook);
                        }
                    }
                });
            }
            MockReply::Status(_) | MockReply::Timeout | MockReply::NetworkError(_) => {
                hooks.cancel(&hook);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(flavor = "current_thread")]
    async fn mock_api_serves_queued_replies_in_order() {
        let api = MockApi::new();
        api.reply_json("/v1/open", json!({"session_id": "1"}))
            .reply("/v1/open", MockReply::Status(500));

        let request = HttpRequest {
            method: Method::Post,
            url: "https://api.test/v1/open".to_string(),
            body: Some("a=1&b=two".to_string()),
            headers: Vec::new(),
            timeout: Duration::from_secs(1),
        };
        let first = api.execute(request.clone()).await.expect("first reply");
        let second = api.execute(request.clone()).await.expect("second reply");
        let third = api.execute(request).await.expect("default reply");

        assert_eq!(first.body, "{\"session_id\":\"1\"}");
        assert_eq!(second.status, 500);
        assert_eq!(third.body, "{}");
        assert_eq!(api.request_count(), 3);
        assert_eq!(api.requests()[0].param("b"), Some("two"));
    }

    #[test]
    fn mock_api_script_loader_invokes_hook() {
        let api = MockApi::new();
        api.reply_json("/_r", json!("fp-1"));
        let hooks = CallbackHooks::new();
        let (name, mut receiver) = hooks.register();

        api.inject(&format!("https://app.test/_r?sdk=x&callback={name}"), &hooks);

        assert_eq!(receiver.try_recv().expect("hook invoked"), json!("fp-1"));
        let recorded = api.last_request().expect("request recorded");
        assert_eq!(recorded.channel, Channel::Callback);
        assert_eq!(recorded.param("sdk"), Some("x"));
    }
}
