//! fleetsync Events - State-Change Fan-Out
//!
//! ## Architecture
//!
//! - One bounded channel per subscriber, so a slow or dead subscriber is
//!   detected and evicted without affecting the others
//! - Publishes from one caller reach each subscriber in call order
//! - Keepalive frames run only while someone is listening
//! - Transport encoding (SSE, WebSocket) is left to the caller

mod broadcaster;
mod event;

pub use broadcaster::{EventBroadcaster, StreamFrame, SubscriberInfo, Subscription};
pub use event::SyncEvent;
