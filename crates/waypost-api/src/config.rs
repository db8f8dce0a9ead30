use std::time::Duration;

pub const DEFAULT_API_ENDPOINT: &str = "https://api.waypost.io";
pub const DEFAULT_APP_SERVICE_ENDPOINT: &str = "https://app.waypost.io";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5_000);
pub const DEFAULT_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Retry and timeout policy for the direct channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Base URLs endpoint paths are joined onto.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceUrls {
    pub api: String,
    pub app_service: String,
}

impl Default for ServiceUrls {
    fn default() -> Self {
        Self {
            api: DEFAULT_API_ENDPOINT.to_string(),
            app_service: DEFAULT_APP_SERVICE_ENDPOINT.to_string(),
        }
    }
}
