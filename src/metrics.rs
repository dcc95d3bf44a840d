//! Per-session delivery counters.
//!
//! Dropped and faulted messages are never fatal; they are counted here so
//! operators can see them. Counters are updated with relaxed atomics from
//! the session worker and read from any thread.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters owned by a session.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    unknown_key_drops: AtomicU64,
    malformed_messages: AtomicU64,
    callback_faults: AtomicU64,
    streams_lost: AtomicU64,
}

impl SessionMetrics {
    pub(crate) fn record_unknown_key_drop(&self) {
        self.unknown_key_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed_message(&self) {
        self.malformed_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_callback_fault(&self) {
        self.callback_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stream_lost(&self) {
        self.streams_lost.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            unknown_key_drops: self.unknown_key_drops.load(Ordering::Relaxed),
            malformed_messages: self.malformed_messages.load(Ordering::Relaxed),
            callback_faults: self.callback_faults.load(Ordering::Relaxed),
            streams_lost: self.streams_lost.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time view of a session's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Dispatches and history samples referencing undeclared keys.
    pub unknown_key_drops: u64,
    /// Live messages missing a routing key.
    pub malformed_messages: u64,
    /// Subscriber callbacks that returned an error.
    pub callback_faults: u64,
    /// Live streams that terminated while the session was alive.
    pub streams_lost: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let metrics = SessionMetrics::default();
        metrics.record_unknown_key_drop();
        metrics.record_unknown_key_drop();
        metrics.record_malformed_message();
        metrics.record_callback_fault();

        let snap = metrics.snapshot();
        assert_eq!(snap.unknown_key_drops, 2);
        assert_eq!(snap.malformed_messages, 1);
        assert_eq!(snap.callback_faults, 1);
        assert_eq!(snap.streams_lost, 0);
    }
}
