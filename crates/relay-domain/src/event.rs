//! Traits implemented by application event types.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// An event type a producer can publish.
pub trait PublishableEvent: Serialize {
    /// Name written to `event_name`; consumers look handlers up by it.
    const EVENT_NAME: &'static str;
    /// Destination topic.
    const TOPIC: &'static str;
}

/// An event type a consumer can handle.
pub trait ConsumableEvent: DeserializeOwned + Send + 'static {
    const EVENT_NAME: &'static str;
    /// When set, an event waits until every earlier event with the same key
    /// has settled successfully.
    const CHECK_PREDECESSOR: bool = false;
}
