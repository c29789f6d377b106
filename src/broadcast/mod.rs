//! Live position streaming.
//!
//! The hub keeps the set of connected observers, greets each one with the
//! anchor layout, and fans every computed fix out to all of them.

mod hub;
mod messages;

pub use hub::{BroadcastHub, BroadcastReport, SubscriberId, Subscription, DEFAULT_QUEUE_CAPACITY};
pub use messages::{InitialSetup, ServerMessage};
