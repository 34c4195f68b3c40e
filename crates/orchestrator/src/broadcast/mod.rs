//! Real-time event fan-out to stream subscribers.

mod broadcaster;
mod types;

pub use broadcaster::{Broadcaster, Subscription};
pub use types::{Envelope, EventId, Scope, StreamMessage, SubscriberFilter, parse_marker};
