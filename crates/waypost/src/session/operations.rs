use super::{Sdk, SdkInner};
use crate::data::{SessionData, parse_link_data, string_field, whitelist};
use crate::errors::SdkError;
use crate::events::{is_standard_event, split_event_data};
use crate::links::{clean_link_data, dynamic_link};
use crate::sequencer::{Gate, Pending};
use serde_json::{Map, Value};
use waypost_api::{ApiObserver, Endpoint};
use waypost_store::{CLICK_ID_KEY, NullFields, Scope, WriteTarget};

/// Result of [`Sdk::link`]. On a failed request `url` holds the offline
/// dynamic link and `error` the reason.
#[derive(Clone, Debug, PartialEq)]
pub struct CreatedLink {
    pub url: String,
    pub error: Option<SdkError>,
}

impl Sdk {
    /// The current session's public data.
    pub fn data(&self) -> Pending<SessionData> {
        self.enqueue("data", Gate::RequiresInit, |inner| async move {
            inner.session_data()
        })
    }

    /// Data recorded on the first session of this install.
    pub fn first(&self) -> Pending<SessionData> {
        self.enqueue("first", Gate::RequiresInit, |inner| async move {
            Ok(whitelist(&inner.store.get(Scope::Durable)?))
        })
    }

    pub fn set_identity(&self, identity: impl Into<String>) -> Pending<SessionData> {
        let identity = identity.into();
        self.enqueue("set_identity", Gate::RequiresInit, move |inner| async move {
            let args = Map::from_iter([("identity".to_string(), Value::String(identity.clone()))]);
            let response = inner.api(Endpoint::Profile, args).await?;
            let mut data = into_object(response);

            let identity_id = string_field(&data, "identity_id");
            {
                let mut state = inner.state();
                state.identity_id = identity_id.clone();
                state.session_link = string_field(&data, "link");
                state.identity = Some(identity.clone());
            }

            let referring = parse_link_data(data.get("referring_data"));
            data.insert(
                "developer_identity".to_string(),
                Value::String(identity.clone()),
            );
            data.insert("referring_data_parsed".to_string(), referring);

            if !inner.transport.privacy().tracking_disabled {
                let mut partial = Map::new();
                partial.insert("identity".to_string(), Value::String(identity));
                partial.insert(
                    "identity_id".to_string(),
                    identity_id.map(Value::String).unwrap_or(Value::Null),
                );
                inner
                    .store
                    .patch(partial, WriteTarget::EphemeralAndDurable, NullFields::Remove)?;
            }
            Ok(data)
        })
    }

    /// Ends the identified session; the server issues fresh session ids.
    pub fn logout(&self) -> Pending<()> {
        self.enqueue("logout", Gate::RequiresInit, |inner| async move {
            let response = into_object(inner.api(Endpoint::Logout, Map::new()).await?);
            let session_id = string_field(&response, "session_id");
            let identity_id = string_field(&response, "identity_id");
            let link = string_field(&response, "link");

            {
                let mut state = inner.state();
                state.session_id = session_id.clone();
                state.identity_id = identity_id.clone();
                state.session_link = link.clone();
                state.identity = None;
                state.link_click_id = None;
            }

            let text = |value: Option<String>| value.map(Value::String).unwrap_or(Value::Null);
            let partial = Map::from_iter([
                ("data_parsed".to_string(), Value::Null),
                ("data".to_string(), Value::Null),
                ("referring_link".to_string(), Value::Null),
                ("click_id".to_string(), Value::Null),
                ("link_click_id".to_string(), Value::Null),
                ("identity".to_string(), Value::Null),
                ("session_id".to_string(), text(session_id)),
                ("identity_id".to_string(), text(identity_id)),
                ("link".to_string(), text(link)),
            ]);
            inner
                .store
                .patch(partial, WriteTarget::EphemeralAndDurable, NullFields::Remove)?;
            inner.store.remove_flag(CLICK_ID_KEY)?;
            Ok(())
        })
    }

    /// Records a named event; `metadata` overrides the ambient page facts.
    pub fn track(&self, event: impl Into<String>, metadata: Map<String, Value>) -> Pending<()> {
        let event = event.into();
        self.enqueue("track", Gate::RequiresInit, move |inner| async move {
            let mut merged = Map::new();
            let ambient = [
                ("url", inner.environment.current_url()),
                ("user_agent", inner.environment.user_agent()),
                ("language", inner.environment.language()),
            ];
            for (name, value) in ambient {
                if let Some(value) = value {
                    merged.insert(name.to_string(), Value::String(value));
                }
            }
            merged.extend(metadata);

            let mut args = Map::new();
            args.insert("event".to_string(), Value::String(event));
            args.insert("metadata".to_string(), Value::Object(merged));
            if let Some(referrer) = inner.initial_referrer()? {
                args.insert("initial_referrer".to_string(), Value::String(referrer));
            }
            inner.api(Endpoint::Event, args).await?;
            Ok(())
        })
    }

    /// Sends a v2 event. Standard event names go to the standard endpoint.
    pub fn log_event(
        &self,
        name: impl Into<String>,
        event_data: Map<String, Value>,
        content_items: Vec<Value>,
        alias: Option<String>,
    ) -> Pending<()> {
        let name = name.into();
        self.enqueue("log_event", Gate::RequiresInit, move |inner| async move {
            let endpoint = if is_standard_event(&name) {
                Endpoint::StandardEvent
            } else {
                Endpoint::CustomEvent
            };
            let (event_data, custom_data) = split_event_data(event_data);

            let mut args = Map::new();
            args.insert("name".to_string(), Value::String(name));
            args.insert(
                "user_data".to_string(),
                Value::String(Value::Object(inner.user_data()).to_string()),
            );
            args.insert(
                "custom_data".to_string(),
                Value::String(Value::Object(custom_data).to_string()),
            );
            args.insert(
                "event_data".to_string(),
                Value::String(Value::Object(event_data).to_string()),
            );
            args.insert(
                "content_items".to_string(),
                Value::String(Value::Array(content_items).to_string()),
            );
            if let Some(alias) = alias {
                args.insert("customer_event_alias".to_string(), Value::String(alias));
            }
            inner.api(endpoint, args).await?;
            Ok(())
        })
    }

    /// Creates a deep link. A failed request still yields a usable link.
    pub fn link(&self, link_data: Map<String, Value>) -> Pending<CreatedLink> {
        self.enqueue("link", Gate::RequiresInit, |inner| async move {
            let cleaned = clean_link_data(link_data, inner.environment.current_url().as_deref());
            let key = inner
                .state()
                .credential
                .as_ref()
                .map(|credential| credential.as_str().to_string())
                .unwrap_or_default();
            let fallback =
                || dynamic_link(&inner.config.link_service_endpoint, &key, &cleaned);

            match inner.api(Endpoint::Link, cleaned.clone()).await {
                Ok(response) => Ok(CreatedLink {
                    url: response
                        .get("url")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(fallback),
                    error: None,
                }),
                Err(error) => {
                    tracing::warn!(error = %error, "link request failed; returning dynamic link");
                    Ok(CreatedLink {
                        url: fallback(),
                        error: Some(error.into()),
                    })
                }
            }
        })
    }

    pub fn cross_platform_ids(&self) -> Pending<Value> {
        self.enqueue("cross_platform_ids", Gate::RequiresInit, |inner| async move {
            let args = Map::from_iter([(
                "user_data".to_string(),
                Value::String(Value::Object(inner.user_data()).to_string()),
            )]);
            let mut response = inner.api(Endpoint::CrossPlatformIds, args).await?;
            Ok(response
                .get_mut("user_data")
                .map(Value::take)
                .unwrap_or(Value::Null))
        })
    }

    /// Last attributed touch data, optionally limited to `window` days.
    pub fn last_attributed_touch_data(&self, window: Option<u32>) -> Pending<Value> {
        self.enqueue(
            "last_attributed_touch_data",
            Gate::RequiresInit,
            move |inner| async move {
                let mut user_data = inner.user_data();
                if let Some(window) = window {
                    user_data.insert("attribution_window".to_string(), Value::from(window));
                }
                let args = Map::from_iter([(
                    "user_data".to_string(),
                    Value::String(Value::Object(user_data).to_string()),
                )]);
                Ok(inner.api(Endpoint::LastAttributedTouchData, args).await?)
            },
        )
    }

    /// Turns tracking off (clearing all stored session data) or back on.
    ///
    /// Re-enabling after an earlier `initialize` queues a fresh initialization
    /// with the same key and options, minus `tracking_disabled`.
    pub fn disable_tracking(&self, disabled: bool) -> Pending<()> {
        self.enqueue("disable_tracking", Gate::Exempt, move |inner| async move {
            if disabled {
                inner.store.reset()?;
                inner.state().clear_identifiers();
                inner.transport.set_tracking_disabled(true);
                inner.transport.set_allow_errors_in_callback(true);
                tracing::info!("tracking disabled");
                return Ok(());
            }

            inner.transport.set_tracking_disabled(false);
            inner.transport.set_allow_errors_in_callback(false);
            let previous = {
                let state = inner.state();
                state.credential.clone().zip(state.init_options.clone())
            };
            if let Some((credential, mut options)) = previous {
                options.tracking_disabled = false;
                tracing::info!("tracking re-enabled; reinitializing");
                drop(Sdk { inner }.initialize(credential.as_str(), options));
            }
            Ok(())
        })
    }

    /// Fingerprint id recorded for this install.
    pub fn browser_fingerprint_id(&self) -> Pending<Option<String>> {
        self.enqueue("browser_fingerprint_id", Gate::RequiresInit, |inner| async move {
            Ok(string_field(
                &inner.store.get(Scope::Durable)?,
                "browser_fingerprint_id",
            ))
        })
    }

    pub fn set_view_data(&self, view_data: Value) -> Pending<()> {
        self.enqueue("set_view_data", Gate::Exempt, move |inner| async move {
            inner.state().view_data = Some(view_data);
            Ok(())
        })
    }

    pub fn view_data(&self) -> Option<Value> {
        self.inner.state().view_data.clone()
    }

    /// Installs (or clears) the observer told about every API response.
    pub fn set_api_response_observer(&self, observer: Option<ApiObserver>) -> Pending<()> {
        self.enqueue("set_api_response_observer", Gate::Exempt, move |inner| async move {
            inner.transport.set_observer(observer);
            Ok(())
        })
    }

    /// Runs `callback` once initialization has finished, or now if it already has.
    pub fn render_queue(&self, callback: impl FnOnce() + Send + 'static) -> Pending<()> {
        self.enqueue("render_queue", Gate::Exempt, move |inner| async move {
            let callback = {
                let mut state = inner.state();
                if !state.render_finalized {
                    state.render_queue.push(Box::new(callback));
                    return Ok(());
                }
                callback
            };
            callback();
            Ok(())
        })
    }

    /// Foreground entry point: refreshes the fingerprint id of the session.
    pub fn handle_foreground(&self) -> Pending<()> {
        self.enqueue("handle_foreground", Gate::RequiresInit, |inner| async move {
            let previous = string_field(&inner.store.get(Scope::Durable)?, "browser_fingerprint_id");
            let Some(fingerprint) = inner.refresh_fingerprint(previous).await? else {
                return Ok(());
            };
            inner.state().browser_fingerprint_id = Some(fingerprint.clone());
            if !inner.transport.privacy().tracking_disabled {
                inner.store.update(Map::from_iter([(
                    "browser_fingerprint_id".to_string(),
                    Value::String(fingerprint),
                )]))?;
            }
            Ok(())
        })
    }
}

impl SdkInner {
    fn session_data(&self) -> Result<SessionData, SdkError> {
        let record = self.store.get(Scope::Ephemeral)?;
        let mut data = whitelist(&record);
        let referring_link = match self.referring_link(&record)? {
            Some(link) => Value::String(link),
            None => Value::Null,
        };
        data.insert("referring_link".to_string(), referring_link);
        data.insert("data_parsed".to_string(), parse_link_data(record.get("data")));
        Ok(data)
    }

    /// The record's referring link, else one rebuilt from the stored click id.
    fn referring_link(&self, record: &Map<String, Value>) -> Result<Option<String>, SdkError> {
        if let Some(link) = string_field(record, "referring_link") {
            return Ok(Some(link));
        }
        let click_id = self
            .store
            .flag(CLICK_ID_KEY)?
            .and_then(|value| value.as_str().map(str::to_string))
            .filter(|id| !id.is_empty());
        Ok(click_id.map(|id| {
            format!(
                "{}/c/{}",
                self.config.link_service_endpoint.trim_end_matches('/'),
                id
            )
        }))
    }

    fn initial_referrer(&self) -> Result<Option<String>, SdkError> {
        let record = self.store.get(Scope::Ephemeral)?;
        Ok(self
            .referring_link(&record)?
            .or_else(|| self.environment.referrer()))
    }

    /// Device and identity facts sent as `user_data` on v2 endpoints.
    pub(crate) fn user_data(&self) -> Map<String, Value> {
        let mut user_data = Map::new();
        let mut put = |name: &str, value: Option<String>| {
            if let Some(value) = value {
                user_data.insert(name.to_string(), Value::String(value));
            }
        };
        put("http_origin", self.environment.current_url());
        put("user_agent", self.environment.user_agent());
        put("language", self.environment.language());
        put("http_referrer", self.environment.referrer());
        {
            let state = self.state();
            put("browser_fingerprint_id", state.browser_fingerprint_id.clone());
            put("developer_identity", state.identity.clone());
            put("identity", state.identity_id.clone());
        }
        put("sdk", Some("rust".to_string()));
        put("sdk_version", Some(env!("CARGO_PKG_VERSION").to_string()));
        if let Some((width, height)) = self.environment.screen_size() {
            user_data.insert("screen_width".to_string(), Value::from(width));
            user_data.insert("screen_height".to_string(), Value::from(height));
        }
        user_data
    }
}

fn into_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
