use super::{Credential, Sdk, SdkInner};
use crate::config::InitOptions;
use crate::data::{SessionData, parse_link_data, string_field, whitelist};
use crate::errors::{InitFailureCode, SdkError};
use crate::links::{canonical_referring_link, click_id_from_link};
use crate::sequencer::{Gate, InitState, Pending};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use waypost_api::{ApiResult, Endpoint};
use waypost_store::{CLICK_ID_KEY, Scope, WriteTarget};

/// Query parameter carrying the link identifier on landing pages.
const MATCH_ID_PARAM: &str = "_branch_match_id";
/// Hash token carrying the link identifier, as in `#r:{id}`.
const MATCH_ID_HASH_TOKEN: &str = "r";
/// Forces a full session-open even when a session already exists.
const BYPASS_PARAM: &str = "branchify_url";
const OPEN_DELAY_PARAM: &str = "_open_delay_ms";

struct Failure {
    code: InitFailureCode,
    error: SdkError,
}

impl Failure {
    fn new(code: InitFailureCode, error: impl Into<SdkError>) -> Self {
        Self {
            code,
            error: error.into(),
        }
    }

    fn unknown(error: impl Into<SdkError>) -> Self {
        Self::new(InitFailureCode::Unknown, error)
    }

    fn fingerprint(error: impl Into<SdkError>) -> Self {
        Self::new(InitFailureCode::FingerprintFetchFailed, error)
    }

    fn session_open(error: impl Into<SdkError>) -> Self {
        Self::new(InitFailureCode::SessionOpenFailed, error)
    }
}

/// Session record produced by either init branch, before the finish step.
struct Opened {
    record: Map<String, Value>,
    fresh_install: bool,
}

impl Sdk {
    /// Starts (or restarts) the session for `key`.
    ///
    /// Exempt from the init gate. The outcome is sticky: a failure gates every
    /// init-requiring call until a later `initialize` succeeds.
    pub fn initialize(&self, key: impl Into<String>, options: InitOptions) -> Pending<SessionData> {
        let key = key.into();
        self.enqueue("initialize", Gate::Exempt, move |inner| async move {
            inner.initialize(key, options).await
        })
    }
}

impl SdkInner {
    async fn initialize(
        self: Arc<Self>,
        key: String,
        options: InitOptions,
    ) -> Result<SessionData, SdkError> {
        self.sequencer.set_init_state(InitState::InitPending);
        {
            let mut state = self.state();
            state.credential = Some(Credential::classify(&key));
            state.init_options = Some(options.clone());
        }

        self.transport.set_config(options.apply_to(self.config.transport));
        self.transport.set_tracking_disabled(options.tracking_disabled);
        self.transport.set_allow_errors_in_callback(false);

        let outcome = match self.establish(&options).await {
            Ok(opened) => self
                .commit(opened, options.tracking_disabled)
                .map_err(Failure::unknown),
            Err(failure) => Err(failure),
        };

        let result = match outcome {
            Ok(data) => {
                self.sequencer.set_init_state(InitState::InitSucceeded);
                tracing::info!("session initialized");
                Ok(data)
            }
            Err(Failure { code, error }) => {
                let detail = error.to_string();
                tracing::info!(%code, detail = %detail, "session initialization failed");
                self.sequencer.set_init_state(InitState::InitFailed {
                    code,
                    detail: detail.clone(),
                });
                Err(SdkError::InitFailed { code, detail })
            }
        };

        self.finalize_render();
        if options.tracking_disabled {
            self.transport.set_allow_errors_in_callback(true);
        }
        result
    }

    async fn establish(self: &Arc<Self>, options: &InitOptions) -> Result<Opened, Failure> {
        if options.tracking_disabled {
            self.store.reset().map_err(Failure::unknown)?;
            self.state().clear_identifiers();
        }

        let durable = self.store.get(Scope::Durable).map_err(Failure::unknown)?;
        let stored_identity_id = string_field(&durable, "identity_id");
        let fresh_install = stored_identity_id.is_none();
        if stored_identity_id.is_some() {
            self.state().identity_id = stored_identity_id;
        }
        let previous_fingerprint = string_field(&durable, "browser_fingerprint_id");

        let link_identifier = options
            .branch_match_id
            .clone()
            .filter(|id| !id.is_empty())
            .or_else(|| self.environment.query_param(MATCH_ID_PARAM))
            .or_else(|| self.environment.hash_token(MATCH_ID_HASH_TOKEN));

        let ephemeral = self.store.get(Scope::Ephemeral).map_err(Failure::unknown)?;
        let has_session = string_field(&ephemeral, "session_id").is_some();
        let bypass = self.environment.query_param(BYPASS_PARAM).is_some();

        if has_session && link_identifier.is_none() && !bypass {
            tracing::debug!("resuming existing session");
            self.store
                .update(Map::from_iter([
                    ("data".to_string(), Value::String(String::new())),
                    ("referring_link".to_string(), Value::String(String::new())),
                ]))
                .map_err(Failure::unknown)?;
            self.attach_listener();

            let fingerprint = self
                .refresh_fingerprint(previous_fingerprint)
                .await
                .map_err(Failure::fingerprint)?;
            let mut record = self.store.get(Scope::Ephemeral).map_err(Failure::unknown)?;
            if let Some(fingerprint) = fingerprint {
                record.insert(
                    "browser_fingerprint_id".to_string(),
                    Value::String(fingerprint),
                );
            }
            return Ok(Opened {
                record,
                fresh_install,
            });
        }

        tracing::debug!(
            link_identifier = link_identifier.as_deref().unwrap_or(""),
            fresh_install,
            "opening new session"
        );
        let fingerprint = self
            .refresh_fingerprint(previous_fingerprint.clone())
            .await
            .map_err(Failure::fingerprint)?;
        if let Some(identity) = string_field(&durable, "identity") {
            self.state().identity = Some(identity);
        }

        if let Some(delay) = self
            .environment
            .query_param(OPEN_DELAY_PARAM)
            .and_then(|value| value.parse::<u64>().ok())
        {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let args = self.open_args(options, link_identifier.clone(), fingerprint.clone(), previous_fingerprint);
        let response = self.api(Endpoint::Open, args).await;
        self.attach_listener();
        let response = response.map_err(Failure::session_open)?;

        if let Some(id) = &link_identifier {
            self.store
                .set_flag(CLICK_ID_KEY, Value::String(id.clone()))
                .map_err(Failure::unknown)?;
        }

        let mut record = match response {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Some(fingerprint) = fingerprint {
            record
                .entry("browser_fingerprint_id")
                .or_insert(Value::String(fingerprint));
        }
        Ok(Opened {
            record,
            fresh_install,
        })
    }

    fn open_args(
        &self,
        options: &InitOptions,
        link_identifier: Option<String>,
        fingerprint: Option<String>,
        previous_fingerprint: Option<String>,
    ) -> Map<String, Value> {
        let mut args = Map::new();
        let browser_fingerprint = link_identifier.clone().or(fingerprint);
        let optional_strings = [
            ("link_identifier", link_identifier),
            ("browser_fingerprint_id", browser_fingerprint),
            ("alternative_browser_fingerprint_id", previous_fingerprint),
            ("initial_referrer", self.environment.referrer()),
            ("current_url", self.environment.current_url()),
        ];
        for (name, value) in optional_strings {
            if let Some(value) = value {
                args.insert(name.to_string(), Value::String(value));
            }
        }
        args.insert("options".to_string(), Value::Object(options.to_json()));
        if let Some((width, height)) = self.environment.screen_size() {
            args.insert("screen_width".to_string(), Value::from(width));
            args.insert("screen_height".to_string(), Value::from(height));
        }
        if let Some(ids) = &options.advertising_ids {
            args.insert("advertising_ids".to_string(), Value::Object(ids.clone()));
        }
        args
    }

    /// Merges the opened session into SDK state and persists it.
    fn commit(&self, opened: Opened, tracking_disabled: bool) -> Result<SessionData, SdkError> {
        let Opened {
            mut record,
            fresh_install,
        } = opened;

        if let Some(link) = string_field(&record, "referring_link") {
            let canonical = canonical_referring_link(&link, &self.config.link_service_endpoint);
            record.insert("referring_link".to_string(), Value::String(canonical));
        }
        if string_field(&record, "click_id").is_none() {
            if let Some(click_id) =
                string_field(&record, "referring_link").and_then(|link| click_id_from_link(&link))
            {
                record.insert("click_id".to_string(), Value::String(click_id));
            }
        }
        let parsed = parse_link_data(record.get("data"));
        record.insert("data_parsed".to_string(), parsed);

        if !tracking_disabled {
            if fresh_install && string_field(&record, "identity").is_none() {
                if let Some(identity) = self.state().identity.clone() {
                    record.insert("identity".to_string(), Value::String(identity));
                }
            }
            self.store
                .set(record.clone(), WriteTarget::from_durable(fresh_install))?;
        }

        {
            let mut state = self.state();
            let state = &mut *state;
            let merges = [
                (&mut state.link_click_id, "link_click_id"),
                (&mut state.session_id, "session_id"),
                (&mut state.identity_id, "identity_id"),
                (&mut state.identity, "identity"),
                (&mut state.session_link, "link"),
                (&mut state.browser_fingerprint_id, "browser_fingerprint_id"),
            ];
            // Absent response fields keep what the session already knew.
            for (slot, key) in merges {
                if let Some(value) = string_field(&record, key) {
                    *slot = Some(value);
                }
            }
        }

        Ok(whitelist(&record))
    }

    /// Asks the app service for the current fingerprint id.
    pub(crate) async fn refresh_fingerprint(
        &self,
        previous: Option<String>,
    ) -> ApiResult<Option<String>> {
        let mut args = Map::new();
        if let Some(previous) = previous {
            args.insert("_t".to_string(), Value::String(previous));
        }
        let response = self.api(Endpoint::Fingerprint, args).await?;
        Ok(match response {
            Value::String(fingerprint) if !fingerprint.is_empty() => Some(fingerprint),
            Value::Object(map) => string_field(&map, "browser_fingerprint_id"),
            _ => None,
        })
    }

    /// Registers the foreground listener once per session.
    fn attach_listener(self: &Arc<Self>) {
        {
            let mut state = self.state();
            if state.listener_attached {
                return;
            }
            state.listener_attached = true;
        }
        let weak = Arc::downgrade(self);
        self.environment.on_foreground(Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                drop(Sdk { inner }.handle_foreground());
            }
        }));
    }
}
