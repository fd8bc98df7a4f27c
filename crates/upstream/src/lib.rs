//! Upstream federation runtime: per-entry settings, the on-disk registry,
//! the live WebSocket poll, and the pending-action machinery that defers
//! destructive lifecycle changes to the broker's safe point.

mod action;
mod poll;
mod settings;
mod store;

pub use action::{PendingActions, UpstreamAction};
pub use poll::{LinkPing, PingHandler, PollStatus, PollTimers, UpstreamPoll};
pub use settings::UpstreamSettings;
pub use store::{escape_name, unescape_name, UpstreamStore};
