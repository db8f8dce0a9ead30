use serde_json::{Map, Value};
use std::time::Duration;
use waypost_api::config::{DEFAULT_API_ENDPOINT, DEFAULT_APP_SERVICE_ENDPOINT};
use waypost_api::{ServiceUrls, TransportConfig};

pub const DEFAULT_LINK_SERVICE_ENDPOINT: &str = "https://link.waypost.io";

/// Process-level SDK configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SdkConfig {
    pub api_endpoint: String,
    pub app_service_endpoint: String,
    pub link_service_endpoint: String,
    /// Value sent as the `sdk` parameter.
    pub sdk_tag: String,
    pub transport: TransportConfig,
    pub use_callback_channel: bool,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            app_service_endpoint: DEFAULT_APP_SERVICE_ENDPOINT.to_string(),
            link_service_endpoint: DEFAULT_LINK_SERVICE_ENDPOINT.to_string(),
            sdk_tag: default_sdk_tag(),
            transport: TransportConfig::default(),
            use_callback_channel: false,
        }
    }
}

impl SdkConfig {
    /// Defaults overridden by any non-empty `WAYPOST_*` variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let read_millis = |name: &str| {
            read(name).and_then(|value| match value.parse::<u64>() {
                Ok(millis) => Some(Duration::from_millis(millis)),
                Err(_) => {
                    tracing::warn!(variable = name, value = %value, "ignoring non-numeric setting");
                    None
                }
            })
        };

        let mut config = Self::default();
        if let Some(value) = read("WAYPOST_API_ENDPOINT") {
            config.api_endpoint = value;
        }
        if let Some(value) = read("WAYPOST_APP_SERVICE_ENDPOINT") {
            config.app_service_endpoint = value;
        }
        if let Some(value) = read("WAYPOST_LINK_SERVICE_ENDPOINT") {
            config.link_service_endpoint = value;
        }
        if let Some(timeout) = read_millis("WAYPOST_TIMEOUT_MS") {
            config.transport.timeout = timeout;
        }
        if let Some(delay) = read_millis("WAYPOST_RETRY_DELAY_MS") {
            config.transport.retry_delay = delay;
        }
        if let Some(retries) = read("WAYPOST_RETRIES").and_then(|value| value.parse().ok()) {
            config.transport.retries = retries;
        }
        if let Some(value) = read("WAYPOST_USE_CALLBACK_CHANNEL") {
            config.use_callback_channel = matches!(value.as_str(), "1" | "true" | "yes");
        }
        config
    }

    pub fn service_urls(&self) -> ServiceUrls {
        ServiceUrls {
            api: self.api_endpoint.clone(),
            app_service: self.app_service_endpoint.clone(),
        }
    }
}

pub fn default_sdk_tag() -> String {
    format!("rust{}", env!("CARGO_PKG_VERSION"))
}

/// Options accepted by `initialize`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InitOptions {
    pub retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub timeout: Option<Duration>,
    pub tracking_disabled: bool,
    /// Link identifier to use when the landing URL lost `_branch_match_id`.
    pub branch_match_id: Option<String>,
    pub advertising_ids: Option<Map<String, Value>>,
    /// Forwarded untouched inside the session-open `options` blob.
    pub extra: Map<String, Value>,
}

impl InitOptions {
    pub fn apply_to(&self, mut config: TransportConfig) -> TransportConfig {
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        if let Some(delay) = self.retry_delay {
            config.retry_delay = delay;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        config
    }

    /// The `options` object sent with session-open.
    pub fn to_json(&self) -> Map<String, Value> {
        let mut options = self.extra.clone();
        if let Some(retries) = self.retries {
            options.insert("retries".to_string(), Value::from(retries));
        }
        if let Some(delay) = self.retry_delay {
            options.insert("retry_delay".to_string(), Value::from(millis(delay)));
        }
        if let Some(timeout) = self.timeout {
            options.insert("timeout".to_string(), Value::from(millis(timeout)));
        }
        if self.tracking_disabled {
            options.insert("tracking_disabled".to_string(), Value::Bool(true));
        }
        if let Some(id) = &self.branch_match_id {
            options.insert("branch_match_id".to_string(), Value::String(id.clone()));
        }
        options
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
