//! Endpoint table, payload validation and the two-channel request transport.

pub mod callback;
pub mod config;
pub mod endpoints;
pub mod errors;
pub mod http;
pub mod testing;
pub mod transport;
pub mod validation;
pub mod wire;

pub use callback::{CallbackHooks, ReqwestScriptLoader, ScriptLoader};
pub use config::{ServiceUrls, TransportConfig};
pub use endpoints::{
    CallbackSupport, Destination, Endpoint, EndpointDescriptor, Method, ParamRule, ValueKind,
    describe,
};
pub use errors::{ApiError, ApiResult, Violation};
pub use http::{HttpClient, HttpFailure, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use testing::{MockApi, MockReply, RecordedRequest};
pub use transport::{ApiObserver, ApiResponseEvent, Channel, Privacy, Transport};
pub use validation::{is_publishable_key, validate};
