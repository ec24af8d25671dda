//! Usage Ledger
//!
//! The persisted accounting state: for each device, for each category, an
//! append-only chronological log of usage entries. Entries age out of a
//! category's sliding window lazily, on the next prune, as an
//! order-preserving filter. The whole structure serializes to the JSON
//! blob stored under the limiter's ledger key.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One permitted-and-recorded action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEntry {
    /// Epoch milliseconds at which the action was recorded
    pub timestamp_ms: i64,

    /// Payload size in bytes, present only for byte-denominated categories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

impl UsageEntry {
    /// Event entry with no byte size
    pub fn at(timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms,
            size_bytes: None,
        }
    }

    /// Byte-denominated entry
    pub fn sized(timestamp_ms: i64, size_bytes: u64) -> Self {
        Self {
            timestamp_ms,
            size_bytes: Some(size_bytes),
        }
    }
}

/// Device id -> category name -> chronological entries.
///
/// Categories are keyed by string so entries recorded under a category
/// this build does not know survive a load/save round trip untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageLedger {
    devices: HashMap<String, HashMap<String, Vec<UsageEntry>>>,
}

impl UsageLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries for a device and category, oldest first
    pub fn entries(&self, device: &str, category: &str) -> &[UsageEntry] {
        self.devices
            .get(device)
            .and_then(|cats| cats.get(category))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Append one entry; entries are only ever added at the tail
    pub fn append(&mut self, device: &str, category: &str, entry: UsageEntry) {
        self.devices
            .entry(device.to_string())
            .or_default()
            .entry(category.to_string())
            .or_default()
            .push(entry);
    }

    /// Drop every entry older than the window (`now - ts >= window_ms`,
    /// half-open: an entry exactly one window old is expired). An emptied
    /// category is removed from the device map.
    pub fn prune(&mut self, device: &str, category: &str, window_ms: i64, now_ms: i64) {
        let Some(cats) = self.devices.get_mut(device) else {
            return;
        };
        let Some(entries) = cats.get_mut(category) else {
            return;
        };
        entries.retain(|e| now_ms.saturating_sub(e.timestamp_ms) < window_ms);
        if entries.is_empty() {
            cats.remove(category);
        }
    }

    /// Number of retained entries for a device and category
    pub fn count(&self, device: &str, category: &str) -> u64 {
        self.entries(device, category).len() as u64
    }

    /// Sum of recorded byte sizes for a device and category, saturating
    /// rather than trusting a loaded ledger to stay within `u64`
    pub fn byte_sum(&self, device: &str, category: &str) -> u64 {
        self.entries(device, category)
            .iter()
            .filter_map(|e| e.size_bytes)
            .fold(0u64, u64::saturating_add)
    }

    /// Timestamp of the oldest retained entry, if any
    pub fn oldest_timestamp(&self, device: &str, category: &str) -> Option<i64> {
        self.entries(device, category).first().map(|e| e.timestamp_ms)
    }
}
