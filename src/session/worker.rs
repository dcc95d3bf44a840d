//! Session worker: the single owner of all per-key state.
//!
//! One dedicated thread per session drives every mutation of the registry.
//! Live messages, control traffic (register/unregister/destroy), and the
//! one-shot historical commit all funnel through its select loop, which
//! serializes them without any per-key locking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam_channel::{never, select, Receiver, Sender};
use tracing::{debug, warn};

use crate::error::{MergeError, TelemetryResult};
use crate::metrics::SessionMetrics;
use crate::record::{Record, RecordOrigin, TelemetryClass, TelemetryKey};
use crate::transport::{HistorySample, StreamMessage};
use crate::value::Value;

use super::merge::group_samples;
use super::registry::{ChannelRegistry, RecordCallback, SubscriptionHandle};
use super::SessionState;

/// One-shot listener invoked if the historical bootstrap fails.
pub type MergeListener = Box<dyn FnOnce(MergeError) + Send>;

pub(crate) enum ControlMsg {
    Register {
        class: TelemetryClass,
        key: TelemetryKey,
        callback: RecordCallback,
        reply: Sender<TelemetryResult<SubscriptionHandle>>,
    },
    Unregister {
        handle: SubscriptionHandle,
    },
    CommitHistory {
        outcome: Result<Vec<HistorySample>, MergeError>,
    },
    OnMergeFailure {
        listener: MergeListener,
    },
    Destroy {
        reply: Sender<()>,
    },
}

/// Extract the routing key from a live message and build a `Live` record.
///
/// Returns `None` for malformed messages (missing or non-string key); the
/// caller counts them. The demultiplexer never reorders, batches, or
/// filters beyond this extraction.
pub(crate) fn decode_message(class: TelemetryClass, message: StreamMessage) -> Option<Record> {
    let key = message
        .value
        .get(class.key_field())
        .and_then(serde_json::Value::as_str)
        .map(TelemetryKey::new)?;

    Some(Record {
        key,
        class,
        timestamp: message.timestamp,
        value: Value::from_json(message.value),
        origin: RecordOrigin::Live,
    })
}

pub(crate) fn worker_loop(
    mut registry: ChannelRegistry,
    metrics: Arc<SessionMetrics>,
    state: Arc<AtomicU8>,
    control_rx: Receiver<ControlMsg>,
    property_rx: Receiver<StreamMessage>,
    event_rx: Receiver<StreamMessage>,
) {
    let mut merge_listener: Option<MergeListener> = None;
    let mut merge_failure: Option<MergeError> = None;

    // A lost stream is swapped for a never-ready channel so the select loop
    // keeps serving the remaining sources without spinning.
    let never_rx = never::<StreamMessage>();
    let mut property_lost = false;
    let mut event_lost = false;

    loop {
        let property = if property_lost { &never_rx } else { &property_rx };
        let event = if event_lost { &never_rx } else { &event_rx };

        select! {
            recv(control_rx) -> msg => {
                match msg {
                    Ok(ControlMsg::Register { class, key, callback, reply }) => {
                        let _ = reply.send(registry.register(class, key, callback));
                    }
                    Ok(ControlMsg::Unregister { handle }) => {
                        registry.unregister(&handle);
                    }
                    Ok(ControlMsg::CommitHistory { outcome }) => {
                        let groups = match outcome {
                            Ok(samples) => group_samples(samples),
                            Err(failure) => {
                                warn!(%failure, "historical bootstrap failed; committing empty buffers");
                                match merge_listener.take() {
                                    Some(listener) => listener(failure),
                                    None => merge_failure = Some(failure),
                                }
                                HashMap::new()
                            }
                        };
                        // A failed fetch still commits: buffers stay empty,
                        // pending live records flush, and the session becomes
                        // Ready so live dispatch is not blocked.
                        registry.commit_history(groups);
                        let _ = state.compare_exchange(
                            SessionState::Activating.as_u8(),
                            SessionState::Ready.as_u8(),
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        );
                    }
                    Ok(ControlMsg::OnMergeFailure { listener }) => {
                        match merge_failure.take() {
                            Some(failure) => listener(failure),
                            None => merge_listener = Some(listener),
                        }
                    }
                    Ok(ControlMsg::Destroy { reply }) => {
                        registry.close();
                        state.store(SessionState::Destroyed.as_u8(), Ordering::Release);
                        let _ = reply.send(());
                        break;
                    }
                    Err(_) => {
                        // Session handle gone without an explicit destroy.
                        registry.close();
                        state.store(SessionState::Destroyed.as_u8(), Ordering::Release);
                        break;
                    }
                }
            }
            recv(property) -> msg => {
                match msg {
                    Ok(message) => route(&mut registry, &metrics, TelemetryClass::Property, message),
                    Err(_) => {
                        on_stream_lost(&metrics, "property_stream");
                        property_lost = true;
                    }
                }
            }
            recv(event) -> msg => {
                match msg {
                    Ok(message) => route(&mut registry, &metrics, TelemetryClass::Event, message),
                    Err(_) => {
                        on_stream_lost(&metrics, "event_stream");
                        event_lost = true;
                    }
                }
            }
        }
    }
}

fn route(
    registry: &mut ChannelRegistry,
    metrics: &SessionMetrics,
    class: TelemetryClass,
    message: StreamMessage,
) {
    let Some(record) = decode_message(class, message) else {
        metrics.record_malformed_message();
        debug!(%class, "dropping malformed live message without a routing key");
        return;
    };
    let key = record.key.clone();
    // Dispatch only fails once the registry is closed, and a closed registry
    // means this loop is about to exit.
    let _ = registry.dispatch_live(class, key, record);
}

fn on_stream_lost(metrics: &SessionMetrics, path: &str) {
    metrics.record_stream_lost();
    warn!(path, "live stream terminated; re-subscription requires a new session");
}
