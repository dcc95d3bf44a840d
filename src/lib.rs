//! # telemux - per-device telemetry demultiplexing and fan-out
//!
//! telemux delivers live device telemetry (property values and event
//! occurrences) to independent observers, each subscribed to exactly one
//! channel identified by a stable key, and bootstraps every observer with a
//! recent historical window before live updates begin.
//!
//! ## Core concepts
//!
//! - **TelemetryKey**: stable channel identifier (a property id or event id)
//! - **Record**: one telemetry sample, tagged with its origin (historical or live)
//! - **TelemetrySession**: lifecycle owner wiring two live streams and one
//!   historical batch fetch into a per-key subscriber registry
//! - **SubscriptionHandle**: the token a consumer holds to unregister
//!
//! ## Delivery guarantee
//!
//! For every key, a subscriber observes the sorted historical seed followed
//! by live records in arrival order. Live records that arrive while the
//! bootstrap is still in flight are queued per key and flushed immediately
//! after the seed, never ahead of it and never dropped. No ordering is
//! promised across different keys.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use telemux::{DeviceDescriptor, SessionConfig, TelemetryClass, TelemetrySession};
//!
//! let descriptor = DeviceDescriptor {
//!     device_id: "dev-42".into(),
//!     product_id: "thermostat".into(),
//!     properties: vec!["temp".into(), "humidity".into()],
//!     events: vec!["alarm".into()],
//! };
//!
//! let session = TelemetrySession::activate(descriptor, transport, SessionConfig::default())?;
//! let handle = session.register(
//!     TelemetryClass::Property,
//!     "temp".into(),
//!     Box::new(|record| {
//!         println!("temp: {:?} at {}", record.value, record.timestamp);
//!         Ok(())
//!     }),
//! )?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod metrics;
pub mod record;
pub mod session;
pub mod transport;
pub mod value;

// Re-export primary types at crate root for convenience
pub use error::{
    CallbackError, MergeError, RegistryError, TelemetryError, TelemetryResult, TransportError,
};
pub use metrics::{MetricsSnapshot, SessionMetrics};
pub use record::{Record, RecordOrigin, TelemetryClass, TelemetryKey};
pub use session::{
    ChannelRegistry, MergeListener, RecordCallback, SessionConfig, SessionState, SubscriberId,
    SubscriptionHandle, TelemetrySession,
};
pub use transport::{
    DeviceDescriptor, HistoryRequest, HistorySample, StreamMessage, StreamParams,
    TelemetryTransport,
};
pub use value::Value;
