//! Telemetry session: lifecycle owner for one device view.
//!
//! A session owns the two live stream subscriptions, the one-shot historical
//! bootstrap, and every per-key subscriber list. It is created on device
//! detail activation and destroyed on deactivation; `Destroyed` is terminal
//! and a new device view requires a new session.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use telemux::{DeviceDescriptor, SessionConfig, TelemetryClass, TelemetrySession};
//!
//! let session = TelemetrySession::activate(descriptor, transport, SessionConfig::default())?;
//! let handle = session.register(TelemetryClass::Property, "temp".into(), Box::new(|record| {
//!     println!("temp = {:?}", record.value);
//!     Ok(())
//! }))?;
//! // ... render until unmount ...
//! session.unregister(&handle);
//! session.destroy();
//! ```

mod merge;
mod registry;
mod worker;

pub use registry::{ChannelRegistry, RecordCallback, SubscriberId, SubscriptionHandle};
pub use worker::MergeListener;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use tracing::debug;

use crate::error::{MergeError, RegistryError, TelemetryError, TelemetryResult};
use crate::metrics::{MetricsSnapshot, SessionMetrics};
use crate::record::{TelemetryClass, TelemetryKey};
use crate::transport::{DeviceDescriptor, HistoryRequest, StreamParams, TelemetryTransport};

use worker::ControlMsg;

/// Session lifecycle states. `Destroyed` is terminal.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Activating,
    Ready,
    Destroyed,
}

impl SessionState {
    pub(crate) const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Activating => 1,
            Self::Ready => 2,
            Self::Destroyed => 3,
        }
    }

    pub(crate) const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Activating,
            2 => Self::Ready,
            _ => Self::Destroyed,
        }
    }
}

/// Session tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Most-recent samples requested per property key for the bootstrap.
    pub sample_count: u32,
    /// Max queued control messages (register/unregister/commit).
    pub control_queue_capacity: usize,
    /// Upper bound on how long `register` may wait for its acknowledgement.
    pub register_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_count: 15,
            control_queue_capacity: 1024,
            register_timeout: Duration::from_secs(5),
        }
    }
}

/// Lifecycle owner for one device's telemetry fan-out.
///
/// All per-key state lives on a dedicated worker thread; this handle only
/// carries the control channel, the state flag, and the metrics counters.
pub struct TelemetrySession {
    control_tx: Sender<ControlMsg>,
    state: Arc<AtomicU8>,
    metrics: Arc<SessionMetrics>,
    register_timeout: Duration,
    destroyed: AtomicBool,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl TelemetrySession {
    /// Open both live streams and the historical fetch for a device and
    /// start dispatching.
    ///
    /// Fails if either live stream cannot be opened; a failing historical
    /// fetch does not fail activation (it is reported through
    /// [`on_merge_failure`](Self::on_merge_failure) instead).
    pub fn activate(
        descriptor: DeviceDescriptor,
        transport: Arc<dyn TelemetryTransport>,
        config: SessionConfig,
    ) -> TelemetryResult<Self> {
        let metrics = Arc::new(SessionMetrics::default());
        let state = Arc::new(AtomicU8::new(SessionState::Idle.as_u8()));

        let stream_params = StreamParams {
            device_id: descriptor.device_id.clone(),
            product_id: descriptor.product_id.clone(),
            history_window: 0,
        };
        let property_rx = transport.open_property_stream(&stream_params)?;
        let event_rx = transport.open_event_stream(&stream_params)?;

        state.store(SessionState::Activating.as_u8(), Ordering::Release);

        let registry = ChannelRegistry::new(&descriptor, Arc::clone(&metrics));
        let (control_tx, control_rx) =
            bounded::<ControlMsg>(config.control_queue_capacity.max(1));

        let worker_metrics = Arc::clone(&metrics);
        let worker_state = Arc::clone(&state);
        let join = thread::Builder::new()
            .name(format!("telemux-session-{}", descriptor.device_id))
            .spawn(move || {
                worker::worker_loop(
                    registry,
                    worker_metrics,
                    worker_state,
                    control_rx,
                    property_rx,
                    event_rx,
                )
            })
            .map_err(|err| TelemetryError::internal(format!("failed to spawn session worker: {err}")))?;

        // One-shot bootstrap fetch. Exactly one per activation; there is no
        // automatic retry, an explicit re-activation is required.
        let request = HistoryRequest {
            device_id: descriptor.device_id.clone(),
            product_id: descriptor.product_id.clone(),
            sample_count: config.sample_count,
        };
        let fetch_tx = control_tx.clone();
        // Detached on purpose: the fetch thread exits after its single send.
        let _fetch = thread::Builder::new()
            .name(format!("telemux-history-{}", descriptor.device_id))
            .spawn(move || {
                let outcome = transport.fetch_history(&request).map_err(|err| {
                    MergeError::FetchFailed {
                        message: err.to_string(),
                    }
                });
                // Send fails only if the session was destroyed mid-fetch.
                if fetch_tx.send(ControlMsg::CommitHistory { outcome }).is_err() {
                    debug!("session destroyed before historical commit");
                }
            })
            .map_err(|err| TelemetryError::internal(format!("failed to spawn history fetch: {err}")))?;

        Ok(Self {
            control_tx,
            state,
            metrics,
            register_timeout: config.register_timeout,
            destroyed: AtomicBool::new(false),
            join: Mutex::new(Some(join)),
        })
    }

    /// Subscribe a callback to one channel.
    ///
    /// Succeeds during `Activating` (delivered history may still be empty)
    /// and replays any committed history to the callback before returning.
    /// Blocks at most for the control round-trip, bounded by
    /// `register_timeout`; a timeout is reported as a merge failure rather
    /// than an unbounded stall.
    pub fn register(
        &self,
        class: TelemetryClass,
        key: TelemetryKey,
        callback: RecordCallback,
    ) -> TelemetryResult<SubscriptionHandle> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(RegistryError::SessionClosed.into());
        }

        let (reply_tx, reply_rx) = bounded(1);
        self.control_tx
            .send(ControlMsg::Register {
                class,
                key,
                callback,
                reply: reply_tx,
            })
            .map_err(|_| TelemetryError::from(RegistryError::SessionClosed))?;

        reply_rx
            .recv_timeout(self.register_timeout)
            .map_err(|err| match err {
                crossbeam_channel::RecvTimeoutError::Timeout => {
                    TelemetryError::Merge(MergeError::Timeout {
                        duration_ms: self.register_timeout.as_millis().min(u128::from(u64::MAX))
                            as u64,
                    })
                }
                crossbeam_channel::RecvTimeoutError::Disconnected => {
                    TelemetryError::from(RegistryError::SessionClosed)
                }
            })?
    }

    /// Remove a previously registered callback.
    ///
    /// Best-effort and non-blocking; unregistering twice, an unknown handle,
    /// or after destroy is a no-op, never an error.
    pub fn unregister(&self, handle: &SubscriptionHandle) {
        let _ = self.control_tx.try_send(ControlMsg::Unregister {
            handle: handle.clone(),
        });
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True once both live streams are routed and the historical bootstrap
    /// has committed (with data or after a reported failure).
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Attach the one-shot merge failure listener.
    ///
    /// If the bootstrap already failed, the listener fires immediately on
    /// the worker thread. At most one listener observes the failure.
    pub fn on_merge_failure(
        &self,
        listener: impl FnOnce(MergeError) + Send + 'static,
    ) -> TelemetryResult<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(RegistryError::SessionClosed.into());
        }
        self.control_tx
            .send(ControlMsg::OnMergeFailure {
                listener: Box::new(listener),
            })
            .map_err(|_| TelemetryError::from(RegistryError::SessionClosed))
    }

    /// Point-in-time delivery counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Tear the session down.
    ///
    /// Safe to call in any state, including mid-`Activating`, and
    /// idempotent. Once this returns, no previously registered callback is
    /// ever invoked again, both live subscriptions are released, and
    /// subsequent `register` calls fail with `SessionClosed`.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        let (reply_tx, reply_rx) = bounded(1);
        if self
            .control_tx
            .send(ControlMsg::Destroy { reply: reply_tx })
            .is_ok()
        {
            let _ = reply_rx.recv();
        }

        // Joining guarantees the worker has exited, so the stream receivers
        // are dropped and no dispatch can still be in flight.
        if let Ok(mut guard) = self.join.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }

        self.state
            .store(SessionState::Destroyed.as_u8(), Ordering::Release);
    }
}

impl Drop for TelemetrySession {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for TelemetrySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetrySession")
            .field("state", &self.state())
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}
