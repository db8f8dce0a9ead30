use crate::callback::{CallbackHooks, ScriptLoader};
use crate::config::{ServiceUrls, TransportConfig};
use crate::endpoints::{CallbackSupport, Endpoint, EndpointDescriptor, Method, describe};
use crate::errors::{ApiError, ApiResult};
use crate::http::{HttpClient, HttpFailure, HttpRequest};
use crate::validation::validate;
use crate::wire::{self, FORM_CONTENT_TYPE, PreparedRequest};
use serde_json::{Map, Value};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard};
use waypost_store::SessionStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Direct,
    Callback,
}

/// Report of one completed request attempt, handed to the response observer.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponseEvent {
    pub endpoint: Endpoint,
    pub channel: Channel,
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
    pub status: Option<u16>,
    pub error: Option<ApiError>,
    pub response: Option<Value>,
}

pub type ApiObserver = Arc<dyn Fn(&ApiResponseEvent) + Send + Sync>;

/// Privacy switches consulted on every send.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Privacy {
    pub tracking_disabled: bool,
    /// When tracking is disabled, blocked endpoints fail instead of resolving to `{}`.
    pub allow_errors_in_callback: bool,
}

#[derive(Default)]
struct TransportState {
    config: TransportConfig,
    privacy: Privacy,
    observer: Option<ApiObserver>,
}

/// Validates, encodes and sends endpoint calls over the direct or callback channel.
#[derive(Clone)]
pub struct Transport {
    http: Arc<dyn HttpClient>,
    scripts: Arc<dyn ScriptLoader>,
    hooks: CallbackHooks,
    urls: ServiceUrls,
    state: Arc<Mutex<TransportState>>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("urls", &self.urls)
            .field("pending_hooks", &self.hooks.pending())
            .finish_non_exhaustive()
    }
}

impl Transport {
    pub fn new(
        http: Arc<dyn HttpClient>,
        scripts: Arc<dyn ScriptLoader>,
        urls: ServiceUrls,
        config: TransportConfig,
    ) -> Self {
        Self {
            http,
            scripts,
            hooks: CallbackHooks::new(),
            urls,
            state: Arc::new(Mutex::new(TransportState {
                config,
                ..TransportState::default()
            })),
        }
    }

    pub fn hooks(&self) -> &CallbackHooks {
        &self.hooks
    }

    pub fn urls(&self) -> &ServiceUrls {
        &self.urls
    }

    pub fn config(&self) -> TransportConfig {
        self.state().config
    }

    pub fn set_config(&self, config: TransportConfig) {
        self.state().config = config;
    }

    pub fn privacy(&self) -> Privacy {
        self.state().privacy
    }

    pub fn set_tracking_disabled(&self, disabled: bool) {
        self.state().privacy.tracking_disabled = disabled;
    }

    pub fn set_allow_errors_in_callback(&self, allow: bool) {
        self.state().privacy.allow_errors_in_callback = allow;
    }

    pub fn set_observer(&self, observer: Option<ApiObserver>) {
        self.state().observer = observer;
    }

    /// Sends one endpoint call and resolves to the parsed response.
    ///
    /// Validation failures never reach the network. Timeouts and transport
    /// errors on the direct channel are retried; status errors are not.
    pub async fn send(
        &self,
        endpoint: Endpoint,
        mut payload: Map<String, Value>,
        store: &SessionStore,
    ) -> ApiResult<Value> {
        let descriptor = describe(endpoint);
        let privacy = self.privacy();

        if privacy.tracking_disabled {
            if !descriptor.allowed_when_tracking_disabled {
                tracing::debug!(%endpoint, "endpoint blocked while tracking is disabled");
                return if privacy.allow_errors_in_callback {
                    Err(ApiError::TrackingDisabled)
                } else {
                    Ok(Value::Object(Map::new()))
                };
            }
            payload.insert("tracking_disabled".to_string(), Value::Bool(true));
        }

        validate(descriptor, &payload, privacy.tracking_disabled)?;
        let prepared = wire::prepare(descriptor, payload, &self.urls)?;

        match channel_for(descriptor, store) {
            Channel::Direct => self.send_direct(endpoint, &prepared).await,
            Channel::Callback => self.send_callback(endpoint, &prepared).await,
        }
    }

    async fn send_direct(&self, endpoint: Endpoint, prepared: &PreparedRequest) -> ApiResult<Value> {
        let config = self.config();
        let url = prepared.direct_url();
        let body = prepared.direct_body();
        let mut attempt: u32 = 0;

        loop {
            tracing::debug!(%endpoint, attempt, url = %url, "sending request");
            let request = HttpRequest {
                method: prepared.method,
                url: url.clone(),
                body: body.clone(),
                headers: match prepared.method {
                    Method::Post => vec![("Content-Type".to_string(), FORM_CONTENT_TYPE.to_string())],
                    Method::Get => Vec::new(),
                },
                timeout: config.timeout,
            };

            let (outcome, status) = self.attempt_direct(request, config).await;
            self.notify(ApiResponseEvent {
                endpoint,
                channel: Channel::Direct,
                method: prepared.method,
                url: url.clone(),
                body: body.clone(),
                status,
                error: outcome.as_ref().err().cloned(),
                response: outcome.as_ref().ok().cloned(),
            });

            match outcome {
                Err(error) if error.is_retryable() && attempt < config.retries => {
                    attempt += 1;
                    tracing::warn!(%endpoint, attempt, error = %error, "retrying request");
                    tokio::time::sleep(config.retry_delay).await;
                }
                other => return other,
            }
        }
    }

    async fn attempt_direct(
        &self,
        request: HttpRequest,
        config: TransportConfig,
    ) -> (ApiResult<Value>, Option<u16>) {
        let response = match tokio::time::timeout(config.timeout, self.http.execute(request)).await {
            Err(_) | Ok(Err(HttpFailure::Timeout)) => return (Err(ApiError::Timeout), None),
            Ok(Err(HttpFailure::Network(message))) => {
                return (Err(ApiError::Transport(message)), None);
            }
            Ok(Ok(response)) => response,
        };

        if !response.is_success() {
            return (
                Err(ApiError::Status {
                    status: response.status,
                }),
                Some(response.status),
            );
        }
        (parse_body(&response.body), Some(response.status))
    }

    async fn send_callback(
        &self,
        endpoint: Endpoint,
        prepared: &PreparedRequest,
    ) -> ApiResult<Value> {
        let (hook, receiver) = self.hooks.register();
        let src = match prepared.callback_url(&hook) {
            Ok(src) => src,
            Err(error) => {
                self.hooks.cancel(&hook);
                return Err(error);
            }
        };
        tracing::debug!(%endpoint, hook = %hook, "injecting callback script");
        self.scripts.inject(&src, &self.hooks);

        let outcome = receiver
            .await
            .map_err(|_| ApiError::Transport(format!("callback {hook} was not invoked")));
        self.notify(ApiResponseEvent {
            endpoint,
            channel: Channel::Callback,
            method: prepared.method,
            url: src,
            body: None,
            status: outcome.as_ref().ok().map(|_| 200),
            error: outcome.as_ref().err().cloned(),
            response: outcome.as_ref().ok().cloned(),
        });
        outcome
    }

    fn notify(&self, event: ApiResponseEvent) {
        let observer = self.state().observer.clone();
        let Some(observer) = observer else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| observer(&event))).is_err() {
            tracing::warn!(endpoint = %event.endpoint, "api response observer panicked");
        }
    }

    fn state(&self) -> MutexGuard<'_, TransportState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Callback-preferring endpoints always use the callback channel; the rest
/// follow the session flag.
pub fn channel_for(descriptor: &EndpointDescriptor, store: &SessionStore) -> Channel {
    match descriptor.callback {
        CallbackSupport::Preferred => Channel::Callback,
        CallbackSupport::Supported if store.use_callback_channel() => Channel::Callback,
        _ => Channel::Direct,
    }
}

fn parse_body(body: &str) -> ApiResult<Value> {
    if body.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(body).map_err(|err| ApiError::InvalidResponse(err.to_string()))
}
