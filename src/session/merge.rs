//! Historical bootstrap grouping and ordering.
//!
//! The batch fetch returns an unordered pile of samples spanning many
//! property keys. Before commit they are grouped per key and stably sorted
//! ascending by timestamp, so ties keep their arrival order.

use std::collections::HashMap;

use crate::record::{Record, RecordOrigin, TelemetryClass, TelemetryKey};
use crate::transport::HistorySample;

/// Group raw history samples by key and sort each group chronologically.
///
/// Every produced record is tagged `Historical`. The caller commits the
/// whole map in one registry call so consumers never observe a partially
/// populated bootstrap.
pub(crate) fn group_samples(samples: Vec<HistorySample>) -> HashMap<TelemetryKey, Vec<Record>> {
    let mut groups: HashMap<TelemetryKey, Vec<Record>> = HashMap::new();

    for sample in samples {
        let record = Record {
            key: sample.property.clone(),
            class: TelemetryClass::Property,
            timestamp: sample.timestamp,
            value: sample.value,
            origin: RecordOrigin::Historical,
        };
        groups.entry(sample.property).or_default().push(record);
    }

    for group in groups.values_mut() {
        group.sort_by_key(|record| record.timestamp);
    }

    groups
}
