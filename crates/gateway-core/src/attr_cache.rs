//! Per-node attribute cache
//!
//! Last-known cluster attribute values keyed by (extended address, cluster,
//! attribute) with timestamps and provenance. The cache lives for the
//! process lifetime and is never persisted.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use zcl_protocol::commands::AttrValue;

/// How a cached value was last set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrUpdate {
    Invalid,
    ByRead,
    ByReport,
}

/// One cached attribute value with its timestamps
#[derive(Debug, Clone)]
pub struct NodeValue {
    pub value: AttrValue,
    pub update_type: AttrUpdate,
    pub timestamp_last_set: Instant,
    pub timestamp_last_read_request: Option<Instant>,
    pub timestamp_last_report: Option<Instant>,
}

/// Outcome of a freshness query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Value present and younger than the age window
    Fresh,
    /// Value stale or absent; a read should be forced
    Stale,
    /// Value stale but a read request already went out recently
    ReadPending,
}

/// Cache of last-known attribute values
#[derive(Default)]
pub struct AttributeCache {
    values: HashMap<(u64, u16, u16), NodeValue>,
}

impl AttributeCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value observed in a read response or attribute report.
    pub fn set(
        &mut self,
        ext_addr: u64,
        cluster_id: u16,
        attr_id: u16,
        value: AttrValue,
        update_type: AttrUpdate,
    ) {
        let now = Instant::now();
        let entry = self
            .values
            .entry((ext_addr, cluster_id, attr_id))
            .or_insert_with(|| NodeValue {
                value: value.clone(),
                update_type,
                timestamp_last_set: now,
                timestamp_last_read_request: None,
                timestamp_last_report: None,
            });

        entry.value = value;
        entry.update_type = update_type;
        entry.timestamp_last_set = now;
        if update_type == AttrUpdate::ByReport {
            entry.timestamp_last_report = Some(now);
        }
    }

    #[must_use]
    pub fn get(&self, ext_addr: u64, cluster_id: u16, attr_id: u16) -> Option<&NodeValue> {
        self.values.get(&(ext_addr, cluster_id, attr_id))
    }

    /// Record that a forced read request was issued for the attribute.
    pub fn mark_read_request(&mut self, ext_addr: u64, cluster_id: u16, attr_id: u16) {
        let now = Instant::now();
        self.values
            .entry((ext_addr, cluster_id, attr_id))
            .and_modify(|v| v.timestamp_last_read_request = Some(now))
            .or_insert_with(|| NodeValue {
                value: AttrValue::U16(0),
                // Invalid provenance keeps the entry from reading fresh
                update_type: AttrUpdate::Invalid,
                timestamp_last_set: now,
                timestamp_last_read_request: Some(now),
                timestamp_last_report: None,
            });
    }

    /// Freshness of an attribute for rule evaluation.
    ///
    /// An attribute is fresh iff it was set within `max_age`. A stale
    /// attribute only reports `Stale` (read wanted) when the last read
    /// request is older than half the age window, which keeps a slow
    /// device from being hammered with reads.
    #[must_use]
    pub fn freshness(
        &self,
        ext_addr: u64,
        cluster_id: u16,
        attr_id: u16,
        max_age: Duration,
    ) -> Freshness {
        let Some(entry) = self.values.get(&(ext_addr, cluster_id, attr_id)) else {
            return Freshness::Stale;
        };

        if entry.update_type != AttrUpdate::Invalid
            && entry.timestamp_last_set.elapsed() <= max_age
        {
            return Freshness::Fresh;
        }

        if let Some(last_request) = entry.timestamp_last_read_request {
            if last_request.elapsed() < max_age / 2 {
                return Freshness::ReadPending;
            }
        }

        Freshness::Stale
    }

    /// True when the attribute received a report within `window`.
    #[must_use]
    pub fn reported_within(
        &self,
        ext_addr: u64,
        cluster_id: u16,
        attr_id: u16,
        window: Duration,
    ) -> bool {
        self.values
            .get(&(ext_addr, cluster_id, attr_id))
            .and_then(|v| v.timestamp_last_report)
            .is_some_and(|t| t.elapsed() < window)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Test helper: age an entry's timestamps backwards.
    pub fn age_entry(&mut self, ext_addr: u64, cluster_id: u16, attr_id: u16, by: Duration) {
        if let Some(entry) = self.values.get_mut(&(ext_addr, cluster_id, attr_id)) {
            if let Some(t) = entry.timestamp_last_set.checked_sub(by) {
                entry.timestamp_last_set = t;
            }
            if let Some(t) = entry.timestamp_last_read_request {
                entry.timestamp_last_read_request = t.checked_sub(by).or(Some(t));
            }
            if let Some(t) = entry.timestamp_last_report {
                entry.timestamp_last_report = t.checked_sub(by).or(Some(t));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zcl_protocol::cluster::id;

    const EXT: u64 = 0x00212EFFFF001122;

    #[test]
    fn test_fresh_after_set() {
        let mut cache = AttributeCache::new();
        cache.set(EXT, id::ILLUMINANCE_MEASUREMENT, 0x0000, AttrValue::U16(150), AttrUpdate::ByReport);
        assert_eq!(
            cache.freshness(EXT, id::ILLUMINANCE_MEASUREMENT, 0x0000, Duration::from_secs(15)),
            Freshness::Fresh
        );
    }

    #[test]
    fn test_missing_is_stale() {
        let cache = AttributeCache::new();
        assert_eq!(
            cache.freshness(EXT, id::ILLUMINANCE_MEASUREMENT, 0x0000, Duration::from_secs(15)),
            Freshness::Stale
        );
    }

    #[test]
    fn test_stale_after_aging() {
        let mut cache = AttributeCache::new();
        cache.set(EXT, id::ILLUMINANCE_MEASUREMENT, 0x0000, AttrValue::U16(150), AttrUpdate::ByRead);
        cache.age_entry(EXT, id::ILLUMINANCE_MEASUREMENT, 0x0000, Duration::from_secs(60));
        assert_eq!(
            cache.freshness(EXT, id::ILLUMINANCE_MEASUREMENT, 0x0000, Duration::from_secs(15)),
            Freshness::Stale
        );
    }

    #[test]
    fn test_read_storm_suppression() {
        let mut cache = AttributeCache::new();
        cache.set(EXT, id::ILLUMINANCE_MEASUREMENT, 0x0000, AttrValue::U16(150), AttrUpdate::ByRead);
        cache.age_entry(EXT, id::ILLUMINANCE_MEASUREMENT, 0x0000, Duration::from_secs(60));
        cache.mark_read_request(EXT, id::ILLUMINANCE_MEASUREMENT, 0x0000);
        assert_eq!(
            cache.freshness(EXT, id::ILLUMINANCE_MEASUREMENT, 0x0000, Duration::from_secs(15)),
            Freshness::ReadPending
        );
    }

    #[test]
    fn test_report_timestamp_tracked() {
        let mut cache = AttributeCache::new();
        cache.set(EXT, id::OCCUPANCY_SENSING, 0x0000, AttrValue::U8(1), AttrUpdate::ByReport);
        assert!(cache.reported_within(EXT, id::OCCUPANCY_SENSING, 0x0000, Duration::from_secs(45 * 60)));
        assert!(!cache.reported_within(EXT, id::ON_OFF, 0x0000, Duration::from_secs(45 * 60)));
    }
}
