//! Declarative table of every remote endpoint the SDK talks to.
//!
//! Endpoints form a closed set, so an unknown name is unrepresentable and a
//! descriptor lookup cannot fail.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Fingerprint,
    Open,
    LinkClick,
    Logout,
    Profile,
    Link,
    Event,
    StandardEvent,
    CustomEvent,
    CrossPlatformIds,
    LastAttributedTouchData,
}

impl Endpoint {
    pub const ALL: [Endpoint; 11] = [
        Endpoint::Fingerprint,
        Endpoint::Open,
        Endpoint::LinkClick,
        Endpoint::Logout,
        Endpoint::Profile,
        Endpoint::Link,
        Endpoint::Event,
        Endpoint::StandardEvent,
        Endpoint::CustomEvent,
        Endpoint::CrossPlatformIds,
        Endpoint::LastAttributedTouchData,
    ];

    pub fn descriptor(self) -> &'static EndpointDescriptor {
        describe(self)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(describe(*self).name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// Base URL an endpoint path is resolved against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Destination {
    Api,
    AppService,
    /// The whole URL comes from the endpoint's path parameters.
    PathParameter,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackSupport {
    Unsupported,
    Supported,
    /// Always routed through the callback-retrieval channel.
    Preferred,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Object,
    String,
    Number,
    Array,
    Boolean,
    /// A string that must match the given regular expression.
    Format(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamRule {
    pub name: &'static str,
    pub required: bool,
    pub kind: ValueKind,
}

impl ParamRule {
    pub const fn required(name: &'static str, kind: ValueKind) -> Self {
        Self {
            name,
            required: true,
            kind,
        }
    }

    pub const fn optional(name: &'static str, kind: ValueKind) -> Self {
        Self {
            name,
            required: false,
            kind,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub name: &'static str,
    pub destination: Destination,
    pub path: &'static str,
    pub method: Method,
    pub callback: CallbackSupport,
    pub path_params: &'static [ParamRule],
    pub params: &'static [ParamRule],
    /// Parameters serialized to a JSON string before flattening.
    pub stringify: &'static [&'static str],
    /// Requires a publishable key or a legacy numeric app id.
    pub needs_credential: bool,
    pub allowed_when_tracking_disabled: bool,
}

impl EndpointDescriptor {
    /// Whether the descriptor names `param` in its path or body rules.
    pub fn declares(&self, param: &str) -> bool {
        self.rules().any(|rule| rule.name == param)
    }

    /// Path rules first, then body rules, in declared order.
    pub fn rules(&self) -> impl Iterator<Item = &ParamRule> {
        self.path_params.iter().chain(self.params.iter())
    }

    /// Versioned API paths take `identity`; everything else takes `developer_identity`.
    pub fn is_v1(&self) -> bool {
        self.path.contains("/v1/")
    }
}

use ValueKind::{Array, Boolean, Number, Object, String as Str};

const SESSION_DEFAULTS: [ParamRule; 4] = [
    ParamRule::required("browser_fingerprint_id", Str),
    ParamRule::required("identity_id", Str),
    ParamRule::required("sdk", Str),
    ParamRule::required("session_id", Str),
];

const V2_EVENT_PARAMS: &[ParamRule] = &[
    ParamRule::required("user_data", Str),
    ParamRule::required("name", Str),
    ParamRule::optional("custom_data", Str),
    ParamRule::optional("event_data", Str),
    ParamRule::optional("content_items", Str),
    ParamRule::optional("customer_event_alias", Str),
];

static FINGERPRINT: EndpointDescriptor = EndpointDescriptor {
    name: "fingerprint",
    destination: Destination::AppService,
    path: "/_r",
    method: Method::Get,
    callback: CallbackSupport::Preferred,
    path_params: &[],
    params: &[
        ParamRule::required("sdk", Str),
        ParamRule::optional("_t", Str),
        ParamRule::required("branch_key", Str),
    ],
    stringify: &[],
    needs_credential: false,
    allowed_when_tracking_disabled: false,
};

static OPEN: EndpointDescriptor = EndpointDescriptor {
    name: "open",
    destination: Destination::Api,
    path: "/v1/open",
    method: Method::Post,
    callback: CallbackSupport::Supported,
    path_params: &[],
    params: &[
        ParamRule::optional("browser_fingerprint_id", Str),
        ParamRule::optional("alternative_browser_fingerprint_id", Str),
        ParamRule::optional("link_identifier", Str),
        ParamRule::optional("sdk", Str),
        ParamRule::optional("options", Object),
        ParamRule::optional("initial_referrer", Str),
        ParamRule::optional("tracking_disabled", Boolean),
        ParamRule::optional("current_url", Str),
        ParamRule::optional("screen_height", Number),
        ParamRule::optional("screen_width", Number),
        ParamRule::optional("advertising_ids", Object),
    ],
    stringify: &["options"],
    needs_credential: true,
    allowed_when_tracking_disabled: true,
};

static LINK_CLICK: EndpointDescriptor = EndpointDescriptor {
    name: "link_click",
    destination: Destination::PathParameter,
    path: "{link_url}",
    method: Method::Get,
    callback: CallbackSupport::Supported,
    path_params: &[ParamRule::required("link_url", Str)],
    params: &[ParamRule::required("click", Str)],
    stringify: &[],
    needs_credential: false,
    allowed_when_tracking_disabled: false,
};

static LOGOUT: EndpointDescriptor = EndpointDescriptor {
    name: "logout",
    destination: Destination::Api,
    path: "/v1/logout",
    method: Method::Post,
    callback: CallbackSupport::Supported,
    path_params: &[],
    params: &SESSION_DEFAULTS,
    stringify: &[],
    needs_credential: true,
    allowed_when_tracking_disabled: false,
};

static PROFILE: EndpointDescriptor = EndpointDescriptor {
    name: "profile",
    destination: Destination::Api,
    path: "/v1/profile",
    method: Method::Post,
    callback: CallbackSupport::Supported,
    path_params: &[],
    params: &[
        SESSION_DEFAULTS[0],
        SESSION_DEFAULTS[1],
        SESSION_DEFAULTS[2],
        SESSION_DEFAULTS[3],
        ParamRule::required("identity", Str),
    ],
    stringify: &[],
    needs_credential: true,
    allowed_when_tracking_disabled: false,
};

static LINK: EndpointDescriptor = EndpointDescriptor {
    name: "link",
    destination: Destination::Api,
    path: "/v1/url",
    method: Method::Post,
    callback: CallbackSupport::Supported,
    path_params: &[],
    params: &[
        SESSION_DEFAULTS[0],
        SESSION_DEFAULTS[1],
        SESSION_DEFAULTS[2],
        SESSION_DEFAULTS[3],
        ParamRule::optional("alias", Str),
        ParamRule::optional("campaign", Str),
        ParamRule::optional("channel", Str),
        ParamRule::optional("data", Str),
        ParamRule::optional("feature", Str),
        ParamRule::optional("stage", Str),
        ParamRule::optional("tags", Array),
        ParamRule::optional("type", Number),
        ParamRule::optional("source", Str),
        ParamRule::optional("instrumentation", Str),
    ],
    stringify: &[],
    needs_credential: true,
    allowed_when_tracking_disabled: true,
};

static EVENT: EndpointDescriptor = EndpointDescriptor {
    name: "event",
    destination: Destination::Api,
    path: "/v1/event",
    method: Method::Post,
    callback: CallbackSupport::Supported,
    path_params: &[],
    params: &[
        SESSION_DEFAULTS[0],
        SESSION_DEFAULTS[1],
        SESSION_DEFAULTS[2],
        SESSION_DEFAULTS[3],
        ParamRule::required("event", Str),
        ParamRule::optional("metadata", Object),
        ParamRule::optional("initial_referrer", Str),
    ],
    stringify: &[],
    needs_credential: true,
    allowed_when_tracking_disabled: false,
};

static STANDARD_EVENT: EndpointDescriptor = EndpointDescriptor {
    name: "standard_event",
    destination: Destination::Api,
    path: "/v2/event/standard",
    method: Method::Post,
    callback: CallbackSupport::Supported,
    path_params: &[],
    params: V2_EVENT_PARAMS,
    stringify: &[],
    needs_credential: true,
    allowed_when_tracking_disabled: false,
};

static CUSTOM_EVENT: EndpointDescriptor = EndpointDescriptor {
    name: "custom_event",
    destination: Destination::Api,
    path: "/v2/event/custom",
    method: Method::Post,
    callback: CallbackSupport::Supported,
    path_params: &[],
    params: V2_EVENT_PARAMS,
    stringify: &[],
    needs_credential: true,
    allowed_when_tracking_disabled: false,
};

static CROSS_PLATFORM_IDS: EndpointDescriptor = EndpointDescriptor {
    name: "cross_platform_ids",
    destination: Destination::Api,
    path: "/v1/cpid",
    method: Method::Post,
    callback: CallbackSupport::Supported,
    path_params: &[],
    params: &[ParamRule::required("user_data", Str)],
    stringify: &[],
    needs_credential: true,
    allowed_when_tracking_disabled: false,
};

static LAST_ATTRIBUTED_TOUCH_DATA: EndpointDescriptor = EndpointDescriptor {
    name: "last_attributed_touch_data",
    destination: Destination::Api,
    path: "/v1/cpid/latd",
    method: Method::Post,
    callback: CallbackSupport::Supported,
    path_params: &[],
    params: &[ParamRule::required("user_data", Str)],
    stringify: &[],
    needs_credential: true,
    allowed_when_tracking_disabled: false,
};

pub fn describe(endpoint: Endpoint) -> &'static EndpointDescriptor {
    match endpoint {
        Endpoint::Fingerprint => &FINGERPRINT,
        Endpoint::Open => &OPEN,
        Endpoint::LinkClick => &LINK_CLICK,
        Endpoint::Logout => &LOGOUT,
        Endpoint::Profile => &PROFILE,
        Endpoint::Link => &LINK,
        Endpoint::Event => &EVENT,
        Endpoint::StandardEvent => &STANDARD_EVENT,
        Endpoint::CustomEvent => &CUSTOM_EVENT,
        Endpoint::CrossPlatformIds => &CROSS_PLATFORM_IDS,
        Endpoint::LastAttributedTouchData => &LAST_ATTRIBUTED_TOUCH_DATA,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_maps_paths_and_verbs() {
        assert_eq!(describe(Endpoint::Open).path, "/v1/open");
        assert_eq!(describe(Endpoint::Open).method, Method::Post);
        assert_eq!(describe(Endpoint::Fingerprint).method, Method::Get);
        assert_eq!(
            describe(Endpoint::Fingerprint).callback,
            CallbackSupport::Preferred
        );
        assert_eq!(describe(Endpoint::StandardEvent).path, "/v2/event/standard");
    }

    #[test]
    fn only_open_and_link_survive_tracking_disabled() {
        let allowed: Vec<Endpoint> = Endpoint::ALL
            .into_iter()
            .filter(|endpoint| describe(*endpoint).allowed_when_tracking_disabled)
            .collect();
        assert_eq!(allowed, vec![Endpoint::Open, Endpoint::Link]);
    }

    #[test]
    fn session_endpoints_declare_ambient_fields() {
        for endpoint in [Endpoint::Logout, Endpoint::Profile, Endpoint::Link, Endpoint::Event] {
            let descriptor = describe(endpoint);
            assert!(descriptor.declares("session_id"), "{endpoint}");
            assert!(descriptor.declares("identity_id"), "{endpoint}");
            assert!(descriptor.declares("browser_fingerprint_id"), "{endpoint}");
        }
        assert!(!describe(Endpoint::CrossPlatformIds).declares("session_id"));
        assert!(describe(Endpoint::LinkClick).declares("link_url"));
    }

    #[test]
    fn v1_detection_follows_path() {
        assert!(describe(Endpoint::Profile).is_v1());
        assert!(!describe(Endpoint::CustomEvent).is_v1());
        assert!(!describe(Endpoint::Fingerprint).is_v1());
    }
}
