//! The SDK session: one call queue, one transport, one session store and the
//! public identifiers they share.

mod init;
mod operations;

pub use operations::CreatedLink;

use crate::config::{InitOptions, SdkConfig};
use crate::environment::{Environment, StaticEnvironment};
use crate::errors::SdkError;
use crate::sequencer::{Gate, InitState, Pending, Sequencer};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use waypost_api::{
    ApiResult, Endpoint, HttpClient, ReqwestHttpClient, ReqwestScriptLoader, ScriptLoader,
    Transport, describe, is_publishable_key,
};
use waypost_store::{MemoryStorage, SessionStore, StorageBackend};

/// The key an application identified itself with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credential {
    BranchKey(String),
    AppId(String),
}

impl Credential {
    pub fn classify(key: &str) -> Self {
        if is_publishable_key(key) {
            Self::BranchKey(key.to_string())
        } else {
            Self::AppId(key.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::BranchKey(key) | Self::AppId(key) => key,
        }
    }
}

pub(crate) type RenderCallback = Box<dyn FnOnce() + Send>;

/// Identifiers and flags mutated only from inside queued units.
#[derive(Default)]
pub(crate) struct SdkState {
    pub(crate) credential: Option<Credential>,
    pub(crate) init_options: Option<InitOptions>,
    pub(crate) identity: Option<String>,
    pub(crate) identity_id: Option<String>,
    pub(crate) session_id: Option<String>,
    pub(crate) link_click_id: Option<String>,
    pub(crate) session_link: Option<String>,
    pub(crate) browser_fingerprint_id: Option<String>,
    pub(crate) listener_attached: bool,
    pub(crate) render_finalized: bool,
    pub(crate) render_queue: Vec<RenderCallback>,
    pub(crate) view_data: Option<Value>,
}

impl SdkState {
    /// Forgets every identifier tied to the current user.
    pub(crate) fn clear_identifiers(&mut self) {
        self.identity = None;
        self.identity_id = None;
        self.session_id = None;
        self.link_click_id = None;
        self.session_link = None;
        self.browser_fingerprint_id = None;
    }
}

pub(crate) struct SdkInner {
    pub(crate) config: SdkConfig,
    pub(crate) transport: Transport,
    pub(crate) store: SessionStore,
    pub(crate) environment: Arc<dyn Environment>,
    pub(crate) sequencer: Sequencer,
    state: Mutex<SdkState>,
}

impl SdkInner {
    pub(crate) fn state(&self) -> MutexGuard<'_, SdkState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sends `args` to `endpoint` with the ambient session fields it declares.
    ///
    /// Caller-supplied values win over ambient ones.
    pub(crate) fn api(
        &self,
        endpoint: Endpoint,
        mut args: Map<String, Value>,
    ) -> impl Future<Output = ApiResult<Value>> + Send + '_ {
        let descriptor = describe(endpoint);
        {
            let state = self.state();
            match &state.credential {
                Some(Credential::BranchKey(key)) => {
                    args.entry("branch_key")
                        .or_insert_with(|| Value::String(key.clone()));
                }
                Some(Credential::AppId(id)) => {
                    args.entry("app_id")
                        .or_insert_with(|| Value::String(id.clone()));
                }
                None => {}
            }

            let identity_key = if descriptor.is_v1() {
                "identity"
            } else {
                "developer_identity"
            };
            let ambient = [
                ("session_id", state.session_id.clone()),
                ("identity_id", state.identity_id.clone()),
                (identity_key, state.identity.clone()),
                ("link_click_id", state.link_click_id.clone()),
                ("sdk", Some(self.config.sdk_tag.clone())),
                (
                    "browser_fingerprint_id",
                    state.browser_fingerprint_id.clone(),
                ),
            ];
            for (name, value) in ambient {
                if let Some(value) = value {
                    if descriptor.declares(name) && !args.contains_key(name) {
                        args.insert(name.to_string(), Value::String(value));
                    }
                }
            }
        }
        self.transport.send(endpoint, args, &self.store)
    }

    /// Runs render callbacks queued before initialization finished.
    pub(crate) fn finalize_render(&self) {
        let queued = {
            let mut state = self.state();
            state.render_finalized = true;
            std::mem::take(&mut state.render_queue)
        };
        for callback in queued {
            callback();
        }
    }
}

/// Handle to one SDK session. Clones share the same session.
///
/// Every operation is enqueued synchronously when called and returns a
/// [`Pending`] completion handle.
#[derive(Clone)]
pub struct Sdk {
    pub(crate) inner: Arc<SdkInner>,
}

impl std::fmt::Debug for Sdk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sdk")
            .field("config", &self.inner.config)
            .field("init_state", &self.init_state())
            .finish_non_exhaustive()
    }
}

impl Sdk {
    pub fn builder(config: SdkConfig) -> SdkBuilder {
        SdkBuilder::new(config)
    }

    /// Production wiring from `WAYPOST_*` variables with in-memory storage.
    pub fn from_env() -> Result<Self, SdkError> {
        SdkBuilder::new(SdkConfig::from_env()).build()
    }

    pub fn config(&self) -> &SdkConfig {
        &self.inner.config
    }

    pub fn init_state(&self) -> InitState {
        self.inner.sequencer.init_state()
    }

    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    pub(crate) fn enqueue<T, F, Fut>(&self, label: &'static str, gate: Gate, work: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<SdkInner>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, SdkError>> + Send + 'static,
    {
        let inner = self.inner.clone();
        self.inner
            .sequencer
            .enqueue(label, gate, move || work(inner))
    }
}

pub struct SdkBuilder {
    config: SdkConfig,
    http: Option<Arc<dyn HttpClient>>,
    scripts: Option<Arc<dyn ScriptLoader>>,
    ephemeral: Option<Arc<dyn StorageBackend>>,
    durable: Option<Arc<dyn StorageBackend>>,
    environment: Option<Arc<dyn Environment>>,
}

impl SdkBuilder {
    pub fn new(config: SdkConfig) -> Self {
        Self {
            config,
            http: None,
            scripts: None,
            ephemeral: None,
            durable: None,
            environment: None,
        }
    }

    pub fn http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn script_loader(mut self, scripts: Arc<dyn ScriptLoader>) -> Self {
        self.scripts = Some(scripts);
        self
    }

    pub fn storage(
        mut self,
        ephemeral: Arc<dyn StorageBackend>,
        durable: Arc<dyn StorageBackend>,
    ) -> Self {
        self.ephemeral = Some(ephemeral);
        self.durable = Some(durable);
        self
    }

    pub fn environment(mut self, environment: Arc<dyn Environment>) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Starts the call queue on the current tokio runtime.
    pub fn build(self) -> Result<Sdk, SdkError> {
        let sequencer = Sequencer::start()?;
        let transport = Transport::new(
            self.http
                .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new())),
            self.scripts
                .unwrap_or_else(|| Arc::new(ReqwestScriptLoader::new())),
            self.config.service_urls(),
            self.config.transport,
        );
        let store = SessionStore::new(
            self.ephemeral
                .unwrap_or_else(|| Arc::new(MemoryStorage::new())),
            self.durable
                .unwrap_or_else(|| Arc::new(MemoryStorage::new())),
        );
        if self.config.use_callback_channel {
            store.set_use_callback_channel(true)?;
        }
        let environment = self
            .environment
            .unwrap_or_else(|| Arc::new(StaticEnvironment::new()));

        tracing::debug!(api = %self.config.api_endpoint, "sdk session created");
        Ok(Sdk {
            inner: Arc::new(SdkInner {
                config: self.config,
                transport,
                store,
                environment,
                sequencer,
                state: Mutex::new(SdkState::default()),
            }),
        })
    }
}
