use std::collections::VecDeque;

/// A deferred lifecycle change for an upstream poll.
///
/// Listener callbacks run while node values are being written; destructive
/// actions must not free state the current dispatch still references, so
/// they are recorded here and applied when the event loop reaches its safe
/// point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamAction {
    /// Tear down the socket and ping schedule, keep the entry.
    Stop,
    /// Delete the entry, then recreate it from the captured property
    /// snapshot.
    Reset,
    /// Delete the entry and its on-disk file.
    Delete,
}

/// FIFO of upstream names with a pending action.
///
/// The queue holds names, not poll references: the drain re-resolves each
/// name and skips entries whose poll no longer exists. Scheduling the same
/// name twice keeps its original position — the action itself collapses
/// last-writer-wins on the poll's own slot.
#[derive(Debug, Default)]
pub struct PendingActions {
    queue: VecDeque<String>,
}

impl PendingActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, name: &str) {
        if !self.queue.iter().any(|queued| queued == name) {
            self.queue.push_back(name.to_owned());
        }
    }

    /// Take every queued name in scheduling order.
    pub fn drain(&mut self) -> Vec<String> {
        self.queue.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_scheduling_order() {
        let mut pending = PendingActions::new();
        pending.schedule("b");
        pending.schedule("a");
        pending.schedule("c");
        assert_eq!(pending.drain(), ["b", "a", "c"]);
        assert!(pending.is_empty());
    }

    #[test]
    fn rescheduling_keeps_original_position() {
        let mut pending = PendingActions::new();
        pending.schedule("a");
        pending.schedule("b");
        pending.schedule("a");
        assert_eq!(pending.drain(), ["a", "b"]);
    }
}
