//! Transport boundary: live streams and the historical batch fetch.
//!
//! The transport owns the shared per-device connection (reconnect policy,
//! authentication, wire encoding). This crate only consumes what it yields:
//! two live message channels and one unordered batch of history samples.

use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::record::TelemetryKey;
use crate::value::Value;

/// The property and event keys a device declares, fixed at activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Device instance identifier.
    pub device_id: String,
    /// Product (device model) identifier.
    pub product_id: String,
    /// Declared property keys.
    pub properties: Vec<TelemetryKey>,
    /// Declared event keys.
    pub events: Vec<TelemetryKey>,
}

/// Parameters for opening a live stream subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamParams {
    /// Device instance identifier.
    pub device_id: String,
    /// Product identifier.
    pub product_id: String,
    /// Server-side replay depth; the session always requests 0 and performs
    /// its own bootstrap through `fetch_history`.
    pub history_window: u32,
}

/// Parameters for the one-shot historical batch fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRequest {
    /// Device instance identifier.
    pub device_id: String,
    /// Product identifier.
    pub product_id: String,
    /// Most-recent samples to return per property key.
    pub sample_count: u32,
}

/// One message from a live stream.
///
/// The routing key lives inside `value` under `property` or `event`,
/// depending on which stream the message arrived on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMessage {
    /// Source-assigned sample time.
    pub timestamp: DateTime<Utc>,
    /// Loosely typed payload as produced by the wire.
    pub value: serde_json::Value,
}

/// One property sample from the historical batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySample {
    /// Property key the sample belongs to.
    pub property: TelemetryKey,
    /// Source-assigned sample time.
    pub timestamp: DateTime<Utc>,
    /// Sample payload.
    pub value: Value,
}

/// The external transport a session consumes.
///
/// Implementations are expected to keep the underlying connection alive for
/// as long as the returned receivers exist; a closed receiver is treated as
/// a lost stream, not an error the session can recover from on its own.
pub trait TelemetryTransport: Send + Sync {
    /// Open the live property stream for a device.
    fn open_property_stream(
        &self,
        params: &StreamParams,
    ) -> Result<Receiver<StreamMessage>, TransportError>;

    /// Open the live event stream for a device.
    fn open_event_stream(
        &self,
        params: &StreamParams,
    ) -> Result<Receiver<StreamMessage>, TransportError>;

    /// Fetch the recent historical window for all property keys.
    ///
    /// Returned samples are unordered and may span multiple keys; keys with
    /// no recent data are simply absent.
    fn fetch_history(&self, request: &HistoryRequest) -> Result<Vec<HistorySample>, TransportError>;
}
