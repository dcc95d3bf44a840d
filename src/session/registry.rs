//! Per-key subscriber registry.
//!
//! Holds one `TelemetryItem` per declared key and routes records to it in
//! constant time. All mutation happens on the session worker thread; the
//! registry itself is single-owner and needs no locking.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CallbackError, RegistryError, TelemetryResult};
use crate::metrics::SessionMetrics;
use crate::record::{Record, TelemetryClass, TelemetryKey};
use crate::transport::DeviceDescriptor;

/// Unique identifier for one registered callback.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Create a new random subscriber id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Token returned by `register`, required to unregister.
///
/// Holds no callback reference; dropping a handle does not unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    class: TelemetryClass,
    key: TelemetryKey,
    id: SubscriberId,
}

impl SubscriptionHandle {
    /// Class of the subscribed channel.
    #[must_use]
    pub const fn class(&self) -> TelemetryClass {
        self.class
    }

    /// Key of the subscribed channel.
    #[must_use]
    pub const fn key(&self) -> &TelemetryKey {
        &self.key
    }
}

/// A function invoked once per delivered record.
///
/// Returning `Err` marks the delivery as a fault for this subscriber only;
/// the remaining subscribers still receive the record.
pub type RecordCallback = Box<dyn FnMut(Record) -> Result<(), CallbackError> + Send>;

struct Subscriber {
    id: SubscriberId,
    callback: RecordCallback,
}

/// One telemetry channel: its subscribers, its committed history, and the
/// live records queued while the bootstrap was still in flight.
#[derive(Default)]
struct TelemetryItem {
    subscribers: Vec<Subscriber>,
    history: Vec<Record>,
    pending: Vec<Record>,
}

/// Mapping from key to subscriber list, one table per telemetry class.
pub struct ChannelRegistry {
    properties: HashMap<TelemetryKey, TelemetryItem>,
    events: HashMap<TelemetryKey, TelemetryItem>,
    metrics: Arc<SessionMetrics>,
    committed: bool,
    closed: bool,
}

impl ChannelRegistry {
    /// Seed empty items for every key the device declares.
    #[must_use]
    pub fn new(descriptor: &DeviceDescriptor, metrics: Arc<SessionMetrics>) -> Self {
        let properties = descriptor
            .properties
            .iter()
            .cloned()
            .map(|key| (key, TelemetryItem::default()))
            .collect();
        let events = descriptor
            .events
            .iter()
            .cloned()
            .map(|key| (key, TelemetryItem::default()))
            .collect();
        Self {
            properties,
            events,
            metrics,
            committed: false,
            closed: false,
        }
    }

    fn table_mut(&mut self, class: TelemetryClass) -> &mut HashMap<TelemetryKey, TelemetryItem> {
        match class {
            TelemetryClass::Property => &mut self.properties,
            TelemetryClass::Event => &mut self.events,
        }
    }

    /// True once the historical bootstrap has been committed (with data or
    /// after a reported failure).
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        self.committed
    }

    /// Add a callback for a declared key.
    ///
    /// If the key already has a non-empty history buffer, the buffered
    /// records are replayed to the new callback in chronological order
    /// before this returns, so a late subscriber does not miss the seed.
    pub fn register(
        &mut self,
        class: TelemetryClass,
        key: TelemetryKey,
        callback: RecordCallback,
    ) -> TelemetryResult<SubscriptionHandle> {
        if self.closed {
            return Err(RegistryError::SessionClosed.into());
        }

        let metrics = Arc::clone(&self.metrics);
        let Some(item) = self.table_mut(class).get_mut(&key) else {
            return Err(RegistryError::UnknownKey { class, key }.into());
        };

        let id = SubscriberId::new();
        let mut subscriber = Subscriber { id, callback };
        for record in &item.history {
            invoke(&mut subscriber, record.clone(), &metrics);
        }
        item.subscribers.push(subscriber);

        Ok(SubscriptionHandle { class, key, id })
    }

    /// Remove a callback. Unknown or already-removed handles are a no-op.
    pub fn unregister(&mut self, handle: &SubscriptionHandle) {
        if self.closed {
            return;
        }
        if let Some(item) = self.table_mut(handle.class).get_mut(&handle.key) {
            item.subscribers.retain(|s| s.id != handle.id);
        }
    }

    /// Route one live record to its key.
    ///
    /// Unknown keys are dropped silently and counted; the transport may
    /// reference keys absent from current metadata. Before the historical
    /// commit the record is queued per key so it can be replayed after the
    /// seed, never ahead of it.
    pub fn dispatch_live(
        &mut self,
        class: TelemetryClass,
        key: TelemetryKey,
        record: Record,
    ) -> TelemetryResult<()> {
        if self.closed {
            return Err(RegistryError::SessionClosed.into());
        }

        let committed = self.committed;
        let metrics = Arc::clone(&self.metrics);
        let Some(item) = self.table_mut(class).get_mut(&key) else {
            metrics.record_unknown_key_drop();
            debug!(%class, %key, "dropping live record for undeclared key");
            return Ok(());
        };

        if committed {
            item.broadcast(record, &metrics);
        } else {
            item.pending.push(record);
        }
        Ok(())
    }

    /// Commit the historical bootstrap in one step.
    ///
    /// For each property key: install its sorted group (absent keys keep an
    /// empty buffer), replay the seed to subscribers registered during
    /// activation, then flush the pending live queue in arrival order.
    /// Event keys have no history but still get their pending flush.
    pub fn commit_history(&mut self, mut groups: HashMap<TelemetryKey, Vec<Record>>) {
        if self.closed || self.committed {
            return;
        }

        let metrics = Arc::clone(&self.metrics);

        for (key, item) in &mut self.properties {
            item.history = groups.remove(key).unwrap_or_default();
            let seed: Vec<Record> = item.history.clone();
            for record in seed {
                item.broadcast(record, &metrics);
            }
            item.flush_pending(&metrics);
        }

        // Samples for keys the metadata no longer declares.
        for key in groups.keys() {
            metrics.record_unknown_key_drop();
            debug!(%key, "dropping history group for undeclared key");
        }

        for item in self.events.values_mut() {
            item.flush_pending(&metrics);
        }

        self.committed = true;
    }

    /// Drop every subscriber and pending queue and refuse further work.
    /// Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        for item in self.properties.values_mut().chain(self.events.values_mut()) {
            item.subscribers.clear();
            item.pending.clear();
        }
        self.closed = true;
    }

    #[cfg(test)]
    fn history_of(&self, key: &TelemetryKey) -> Option<&[Record]> {
        self.properties.get(key).map(|item| item.history.as_slice())
    }
}

impl TelemetryItem {
    fn broadcast(&mut self, record: Record, metrics: &SessionMetrics) {
        for subscriber in &mut self.subscribers {
            invoke(subscriber, record.clone(), metrics);
        }
    }

    fn flush_pending(&mut self, metrics: &SessionMetrics) {
        let queued = std::mem::take(&mut self.pending);
        for record in queued {
            self.broadcast(record, metrics);
        }
    }
}

fn invoke(subscriber: &mut Subscriber, record: Record, metrics: &SessionMetrics) {
    if let Err(fault) = (subscriber.callback)(record) {
        metrics.record_callback_fault();
        warn!(subscriber = ?subscriber.id, %fault, "subscriber callback fault");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    use chrono::{TimeZone, Utc};

    use crate::record::RecordOrigin;
    use crate::value::Value;

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor {
            device_id: "dev-1".to_string(),
            product_id: "prod-1".to_string(),
            properties: vec![TelemetryKey::new("temp"), TelemetryKey::new("humidity")],
            events: vec![TelemetryKey::new("alarm")],
        }
    }

    fn registry() -> (ChannelRegistry, Arc<SessionMetrics>) {
        let metrics = Arc::new(SessionMetrics::default());
        (ChannelRegistry::new(&descriptor(), Arc::clone(&metrics)), metrics)
    }

    fn live(key: &str, class: TelemetryClass, t: i64, v: i64) -> Record {
        Record {
            key: TelemetryKey::new(key),
            class,
            timestamp: Utc.timestamp_opt(t, 0).unwrap(),
            value: Value::Int(v),
            origin: RecordOrigin::Live,
        }
    }

    fn historical(key: &str, t: i64, v: i64) -> Record {
        Record {
            origin: RecordOrigin::Historical,
            ..live(key, TelemetryClass::Property, t, v)
        }
    }

    fn recording_callback() -> (RecordCallback, Arc<Mutex<Vec<Record>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: RecordCallback = Box::new(move |record| {
            sink.lock().unwrap().push(record);
            Ok(())
        });
        (callback, seen)
    }

    #[test]
    fn register_unknown_key_is_rejected() {
        let (mut reg, _) = registry();
        let (cb, _) = recording_callback();
        let err = reg
            .register(TelemetryClass::Property, TelemetryKey::new("nope"), cb)
            .unwrap_err();
        assert!(err.is_registry());
        assert!(!err.is_session_closed());
    }

    #[test]
    fn dispatch_unknown_key_is_counted_not_created() {
        let (mut reg, metrics) = registry();
        reg.commit_history(HashMap::new());

        reg.dispatch_live(
            TelemetryClass::Property,
            TelemetryKey::new("nope"),
            live("nope", TelemetryClass::Property, 1, 1),
        )
        .unwrap();

        assert_eq!(metrics.snapshot().unknown_key_drops, 1);
        assert!(reg.history_of(&TelemetryKey::new("nope")).is_none());
    }

    #[test]
    fn unregister_is_idempotent_and_isolated() {
        let (mut reg, _) = registry();
        reg.commit_history(HashMap::new());

        let (cb1, seen1) = recording_callback();
        let (cb2, seen2) = recording_callback();
        let h1 = reg
            .register(TelemetryClass::Property, TelemetryKey::new("temp"), cb1)
            .unwrap();
        let _h2 = reg
            .register(TelemetryClass::Property, TelemetryKey::new("temp"), cb2)
            .unwrap();

        reg.unregister(&h1);
        reg.unregister(&h1); // second removal is a no-op

        reg.dispatch_live(
            TelemetryClass::Property,
            TelemetryKey::new("temp"),
            live("temp", TelemetryClass::Property, 9, 25),
        )
        .unwrap();

        assert!(seen1.lock().unwrap().is_empty());
        assert_eq!(seen2.lock().unwrap().len(), 1);
    }

    #[test]
    fn late_subscriber_gets_history_replay_before_live() {
        let (mut reg, _) = registry();
        let mut groups = HashMap::new();
        groups.insert(
            TelemetryKey::new("temp"),
            vec![historical("temp", 1, 20), historical("temp", 5, 10)],
        );
        reg.commit_history(groups);

        let (cb, seen) = recording_callback();
        reg.register(TelemetryClass::Property, TelemetryKey::new("temp"), cb)
            .unwrap();
        reg.dispatch_live(
            TelemetryClass::Property,
            TelemetryKey::new("temp"),
            live("temp", TelemetryClass::Property, 9, 25),
        )
        .unwrap();

        let values: Vec<i64> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.value.as_int().unwrap())
            .collect();
        assert_eq!(values, vec![20, 10, 25]);
    }

    #[test]
    fn pending_live_records_flush_after_commit_in_arrival_order() {
        let (mut reg, _) = registry();
        let (cb, seen) = recording_callback();
        reg.register(TelemetryClass::Property, TelemetryKey::new("temp"), cb)
            .unwrap();

        // Live records arriving during activation are queued, not delivered.
        reg.dispatch_live(
            TelemetryClass::Property,
            TelemetryKey::new("temp"),
            live("temp", TelemetryClass::Property, 8, 24),
        )
        .unwrap();
        reg.dispatch_live(
            TelemetryClass::Property,
            TelemetryKey::new("temp"),
            live("temp", TelemetryClass::Property, 9, 25),
        )
        .unwrap();
        assert!(seen.lock().unwrap().is_empty());

        let mut groups = HashMap::new();
        groups.insert(
            TelemetryKey::new("temp"),
            vec![historical("temp", 1, 20), historical("temp", 5, 10)],
        );
        reg.commit_history(groups);

        let values: Vec<i64> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.value.as_int().unwrap())
            .collect();
        assert_eq!(values, vec![20, 10, 24, 25]);
    }

    #[test]
    fn commit_is_all_or_nothing_for_missing_keys() {
        let (mut reg, _) = registry();
        let mut groups = HashMap::new();
        groups.insert(TelemetryKey::new("temp"), vec![historical("temp", 1, 20)]);
        // No group for "humidity": it must end committed with an empty buffer.
        reg.commit_history(groups);

        assert!(reg.is_committed());
        assert_eq!(reg.history_of(&TelemetryKey::new("temp")).unwrap().len(), 1);
        assert!(reg
            .history_of(&TelemetryKey::new("humidity"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn commit_counts_history_for_undeclared_keys() {
        let (mut reg, metrics) = registry();
        let mut groups = HashMap::new();
        groups.insert(TelemetryKey::new("stale"), vec![historical("stale", 1, 1)]);
        reg.commit_history(groups);
        assert_eq!(metrics.snapshot().unknown_key_drops, 1);
    }

    #[test]
    fn faulty_subscriber_does_not_block_siblings() {
        let (mut reg, metrics) = registry();
        reg.commit_history(HashMap::new());

        let failing: RecordCallback =
            Box::new(|_| Err(CallbackError::new("always fails")));
        reg.register(TelemetryClass::Property, TelemetryKey::new("temp"), failing)
            .unwrap();
        let (cb, seen) = recording_callback();
        reg.register(TelemetryClass::Property, TelemetryKey::new("temp"), cb)
            .unwrap();

        for i in 0..10 {
            reg.dispatch_live(
                TelemetryClass::Property,
                TelemetryKey::new("temp"),
                live("temp", TelemetryClass::Property, i, i),
            )
            .unwrap();
        }

        assert_eq!(seen.lock().unwrap().len(), 10);
        assert_eq!(metrics.snapshot().callback_faults, 10);

        // Other keys remain deliverable.
        let (cb2, seen2) = recording_callback();
        reg.register(TelemetryClass::Event, TelemetryKey::new("alarm"), cb2)
            .unwrap();
        reg.dispatch_live(
            TelemetryClass::Event,
            TelemetryKey::new("alarm"),
            live("alarm", TelemetryClass::Event, 100, 1),
        )
        .unwrap();
        assert_eq!(seen2.lock().unwrap().len(), 1);
    }

    #[test]
    fn closed_registry_rejects_register_and_dispatch() {
        let (mut reg, _) = registry();
        let (cb, seen) = recording_callback();
        reg.register(TelemetryClass::Property, TelemetryKey::new("temp"), cb)
            .unwrap();

        reg.close();
        reg.close(); // idempotent

        let (cb2, _) = recording_callback();
        let err = reg
            .register(TelemetryClass::Property, TelemetryKey::new("temp"), cb2)
            .unwrap_err();
        assert!(err.is_session_closed());

        let err = reg
            .dispatch_live(
                TelemetryClass::Property,
                TelemetryKey::new("temp"),
                live("temp", TelemetryClass::Property, 1, 1),
            )
            .unwrap_err();
        assert!(err.is_session_closed());

        // Commit after close never delivers anything.
        let mut groups = HashMap::new();
        groups.insert(TelemetryKey::new("temp"), vec![historical("temp", 1, 20)]);
        reg.commit_history(groups);
        assert!(seen.lock().unwrap().is_empty());
    }
}
