mod support;

use serde_json::{Map, Value, json};
use std::sync::{Arc, Mutex};
use support::{
    FINGERPRINT_PATH, KEY, LANDING_URL, OPEN_PATH, harness, initialized, object,
    reply_fresh_session,
};
use waypost::{InitOptions, SdkError};
use waypost_api::{ApiError, ApiResponseEvent, Channel, MockReply};
use waypost_store::Scope;

fn json_param(request: &waypost_api::RecordedRequest, name: &str) -> Value {
    let raw = request
        .param(name)
        .unwrap_or_else(|| panic!("{name} should be sent"));
    serde_json::from_str(raw).expect("parameter should hold JSON text")
}

#[tokio::test(flavor = "current_thread")]
async fn set_identity_stores_identity_in_both_scopes() {
    let h = initialized().await;
    h.api.reply_json(
        "/v1/profile",
        json!({
            "identity_id": 77,
            "link": "https://link.test/alice",
            "referring_data": "{\"campaign\":\"spring\"}"
        }),
    );

    let data = h
        .sdk
        .set_identity("alice")
        .await
        .expect("identify should succeed");

    assert_eq!(data["developer_identity"], json!("alice"));
    assert_eq!(data["referring_data_parsed"], json!({"campaign": "spring"}));
    let request = h.api.last_request().expect("profile request recorded");
    assert_eq!(request.param("identity"), Some("alice"));
    assert_eq!(request.param("identity_id"), Some("i-1"));

    for scope in [Scope::Ephemeral, Scope::Durable] {
        let record = h.sdk.store().get(scope).expect("record readable");
        assert_eq!(record["identity"], json!("alice"));
        assert_eq!(record["identity_id"], json!("77"));
    }
}

#[tokio::test(flavor = "current_thread")]
async fn track_merges_metadata_over_page_facts() {
    let h = initialized().await;

    h.sdk
        .track(
            "signup",
            object(json!({"user_agent": "override", "plan": "pro"})),
        )
        .await
        .expect("track should succeed");

    let request = h.api.last_request().expect("event request recorded");
    assert_eq!(request.path, "/v1/event");
    assert_eq!(request.param("event"), Some("signup"));
    assert_eq!(request.param("metadata.url"), Some(LANDING_URL));
    assert_eq!(request.param("metadata.user_agent"), Some("override"));
    assert_eq!(request.param("metadata.language"), Some("en-US"));
    assert_eq!(request.param("metadata.plan"), Some("pro"));
    assert_eq!(
        request.param("initial_referrer"),
        Some("https://link.test/c/abc123")
    );
    assert_eq!(request.param("session_id"), Some("s-1"));
    assert_eq!(request.param("sdk"), Some("rust-test"));
}

#[tokio::test(flavor = "current_thread")]
async fn log_event_routes_standard_and_custom_names() {
    let h = initialized().await;

    h.sdk
        .log_event(
            "PURCHASE",
            object(json!({"revenue": 9.5, "currency": "EUR", "color": "red"})),
            vec![json!({"$sku": "sock-1"})],
            Some("checkout".to_string()),
        )
        .await
        .expect("standard event should succeed");
    h.sdk
        .log_event("wishlist_shared", Map::new(), Vec::new(), None)
        .await
        .expect("custom event should succeed");

    assert_eq!(
        h.api.paths(),
        vec!["/v2/event/standard", "/v2/event/custom"]
    );
    let requests = h.api.requests();
    let standard = &requests[0];
    assert_eq!(standard.param("name"), Some("PURCHASE"));
    assert_eq!(standard.param("customer_event_alias"), Some("checkout"));
    assert_eq!(
        json_param(standard, "event_data"),
        json!({"revenue": 9.5, "currency": "EUR"})
    );
    assert_eq!(json_param(standard, "custom_data"), json!({"color": "red"}));
    assert_eq!(json_param(standard, "content_items"), json!([{"$sku": "sock-1"}]));
    let user_data = json_param(standard, "user_data");
    assert_eq!(user_data["browser_fingerprint_id"], json!("fp-1"));
    assert_eq!(user_data["http_origin"], json!(LANDING_URL));
    assert_eq!(user_data["screen_width"], json!(1280));

    let custom = &requests[1];
    assert_eq!(json_param(custom, "custom_data"), json!({}));
    assert_eq!(json_param(custom, "content_items"), json!([]));
    assert!(!custom.has_param("customer_event_alias"));
}

#[tokio::test(flavor = "current_thread")]
async fn link_returns_server_url() {
    let h = initialized().await;
    h.api
        .reply_json("/v1/url", json!({"url": "https://link.test/abc"}));

    let created = h
        .sdk
        .link(object(json!({"channel": "email", "data": {"sku": "sock-1"}})))
        .await
        .expect("link should resolve");

    assert_eq!(created.url, "https://link.test/abc");
    assert_eq!(created.error, None);
    let request = h.api.last_request().expect("link request recorded");
    assert_eq!(request.param("source"), Some("web-sdk"));
    assert_eq!(
        json_param(&request, "data"),
        json!({"sku": "sock-1", "$canonical_url": LANDING_URL})
    );
}

#[tokio::test(flavor = "current_thread")]
async fn link_failure_degrades_to_dynamic_link() {
    let h = initialized().await;
    h.api.reply("/v1/url", MockReply::Status(500));

    let created = h
        .sdk
        .link(object(json!({"channel": "email"})))
        .await
        .expect("link should still resolve");

    assert_eq!(
        created.error,
        Some(SdkError::Api(ApiError::Status { status: 500 }))
    );
    assert!(
        created
            .url
            .starts_with(&format!("https://link.test/a/{KEY}?channel=email&source=web-sdk&data="))
    );
}

#[tokio::test(flavor = "current_thread")]
async fn cross_platform_ids_return_user_data() {
    let h = initialized().await;
    h.api.reply_json(
        "/v1/cpid",
        json!({"user_data": {"cross_platform_id": "cp-1"}}),
    );

    let ids = h
        .sdk
        .cross_platform_ids()
        .await
        .expect("cpid should succeed");

    assert_eq!(ids, json!({"cross_platform_id": "cp-1"}));
    let request = h.api.last_request().expect("cpid request recorded");
    assert_eq!(request.param("branch_key"), Some(KEY));
}

#[tokio::test(flavor = "current_thread")]
async fn last_attributed_touch_data_sends_attribution_window() {
    let h = initialized().await;
    h.api
        .reply_json("/v1/cpid/latd", json!({"last_attributed_touch_data": {}}));

    let touch = h
        .sdk
        .last_attributed_touch_data(Some(30))
        .await
        .expect("latd should succeed");

    assert_eq!(touch, json!({"last_attributed_touch_data": {}}));
    let request = h.api.last_request().expect("latd request recorded");
    assert_eq!(json_param(&request, "user_data")["attribution_window"], json!(30));
}

#[tokio::test(flavor = "current_thread")]
async fn first_and_fingerprint_read_the_durable_record() {
    let h = initialized().await;

    let first = h.sdk.first().await.expect("first should be available");
    let fingerprint = h
        .sdk
        .browser_fingerprint_id()
        .await
        .expect("fingerprint should be available");

    assert_eq!(first["referring_link"], json!("https://link.test/c/abc123"));
    assert!(first.get("session_id").is_none());
    assert_eq!(fingerprint.as_deref(), Some("fp-1"));
    assert_eq!(h.api.request_count(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn view_data_and_observer_are_accepted_before_initialize() {
    let h = harness();
    let events: Arc<Mutex<Vec<ApiResponseEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    h.sdk
        .set_view_data(json!({"page": "home"}))
        .await
        .expect("view data should be set");
    h.sdk
        .set_api_response_observer(Some(Arc::new(move |event: &ApiResponseEvent| {
            sink.lock().expect("events").push(event.clone());
        })))
        .await
        .expect("observer should be installed");
    assert_eq!(h.sdk.view_data(), Some(json!({"page": "home"})));

    reply_fresh_session(&h.api);
    h.sdk
        .initialize(KEY, InitOptions::default())
        .await
        .expect("initialization should succeed");

    let events = events.lock().expect("events");
    let channels: Vec<_> = events.iter().map(|event| event.channel).collect();
    assert_eq!(channels, vec![Channel::Callback, Channel::Direct]);
    assert!(events[1].url.ends_with(OPEN_PATH));
    assert_eq!(events[0].response, Some(json!("fp-1")));
    assert!(h.api.paths().starts_with(&[FINGERPRINT_PATH.to_string()]));
}
