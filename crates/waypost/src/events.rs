use serde_json::{Map, Value};

/// Event names routed to the standard-event endpoint.
pub const STANDARD_EVENTS: &[&str] = &[
    "ADD_TO_CART",
    "ADD_TO_WISHLIST",
    "VIEW_CART",
    "INITIATE_PURCHASE",
    "ADD_PAYMENT_INFO",
    "PURCHASE",
    "SPEND_CREDITS",
    "SEARCH",
    "VIEW_ITEM",
    "VIEW_ITEMS",
    "RATE",
    "SHARE",
    "COMPLETE_REGISTRATION",
    "COMPLETE_TUTORIAL",
    "ACHIEVE_LEVEL",
    "UNLOCK_ACHIEVEMENT",
    "LOGIN",
    "SUBSCRIBE",
    "START_TRIAL",
    "INVITE",
    "RESERVE",
    "VIEW_AD",
    "CLICK_AD",
];

/// Keys of `event_data` the server understands natively; the rest is custom data.
pub const EVENT_DATA_FIELDS: &[&str] = &[
    "transaction_id",
    "revenue",
    "currency",
    "shipping",
    "tax",
    "coupon",
    "affiliation",
    "search_query",
    "description",
];

pub fn is_standard_event(name: &str) -> bool {
    STANDARD_EVENTS.contains(&name)
}

/// Splits caller event data into `(event_data, custom_data)`.
pub fn split_event_data(data: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    data.into_iter()
        .partition(|(key, _)| EVENT_DATA_FIELDS.contains(&key.as_str()))
}
