#![allow(dead_code)]

use serde_json::{Map, Value, json};
use std::sync::Arc;
use waypost::{InitOptions, Sdk, SdkConfig, StaticEnvironment};
use waypost_api::{MockApi, TransportConfig};
use waypost_store::{MemoryStorage, StorageBackend};

pub const KEY: &str = "key_test_0123456789abcdefghijklmnopqrstuv";
pub const LANDING_URL: &str = "https://shop.test/landing";
pub const FINGERPRINT_PATH: &str = "/_r";
pub const OPEN_PATH: &str = "/v1/open";

pub struct Harness {
    pub sdk: Sdk,
    pub api: MockApi,
    pub env: StaticEnvironment,
    pub ephemeral: MemoryStorage,
    pub durable: MemoryStorage,
}

pub fn config() -> SdkConfig {
    SdkConfig {
        api_endpoint: "https://api.test".to_string(),
        app_service_endpoint: "https://app.test".to_string(),
        link_service_endpoint: "https://link.test".to_string(),
        sdk_tag: "rust-test".to_string(),
        transport: TransportConfig::default(),
        use_callback_channel: false,
    }
}

pub fn landing_env(url: &str) -> StaticEnvironment {
    StaticEnvironment::new()
        .with_url(url)
        .with_referrer("https://search.test/?q=shoes")
        .with_user_agent("TestAgent/1.0")
        .with_language("en-US")
        .with_screen(1280, 800)
}

pub fn harness() -> Harness {
    harness_with(
        landing_env(LANDING_URL),
        MemoryStorage::new(),
        MemoryStorage::new(),
    )
}

pub fn harness_with(
    env: StaticEnvironment,
    ephemeral: MemoryStorage,
    durable: MemoryStorage,
) -> Harness {
    let api = MockApi::new();
    let sdk = Sdk::builder(config())
        .http_client(Arc::new(api.clone()))
        .script_loader(Arc::new(api.clone()))
        .storage(Arc::new(ephemeral.clone()), Arc::new(durable.clone()))
        .environment(Arc::new(env.clone()))
        .build()
        .expect("sdk should build inside a tokio runtime");
    Harness {
        sdk,
        api,
        env,
        ephemeral,
        durable,
    }
}

/// Queues the fingerprint refresh and session-open replies of a fresh install.
pub fn reply_fresh_session(api: &MockApi) {
    api.reply_json(FINGERPRINT_PATH, json!("fp-1"));
    api.reply_json(
        OPEN_PATH,
        json!({
            "session_id": "s-1",
            "identity_id": "i-1",
            "link": "https://link.test/i-1",
            "data": "{\"$deeplink_path\":\"/product/42\"}",
            "referring_link": "/c/abc123",
            "has_app": false
        }),
    );
}

/// A harness whose SDK finished a fresh-install initialization.
pub async fn initialized() -> Harness {
    let harness = harness();
    reply_fresh_session(&harness.api);
    harness
        .sdk
        .initialize(KEY, InitOptions::default())
        .await
        .expect("fresh initialization should succeed");
    harness.api.clear_requests();
    harness
}

pub fn object(value: Value) -> Map<String, Value> {
    value
        .as_object()
        .cloned()
        .expect("fixture should be a JSON object")
}

pub fn seed(storage: &MemoryStorage, key: &str, value: Value) {
    storage
        .set(key, value)
        .expect("memory storage should accept writes");
}
