//! Per-bar indicator snapshots and the append-only series that stores them.

use super::fvg::FvgValue;
use super::tva::TvaValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Indicator outputs for one closed bar. `None` means warming up or disabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub bar_time: DateTime<Utc>,
    /// The bar's close; the market-entry basis price.
    pub close: f64,
    pub atr: Option<f64>,
    pub cvd: Option<f64>,
    pub vfi: Option<f64>,
    pub tva: Option<TvaValue>,
    pub fvg: Option<FvgValue>,
}

impl IndicatorSnapshot {
    pub fn empty(bar_time: DateTime<Utc>, close: f64) -> Self {
        Self {
            bar_time,
            close,
            atr: None,
            cvd: None,
            vfi: None,
            tva: None,
            fvg: None,
        }
    }
}

/// Append-only series of snapshots keyed by bar start time.
///
/// A snapshot for a bar is written once and never replaced, so a value that
/// produced a signal stays exactly as it was seen. Older entries are evicted
/// once `capacity` is exceeded.
#[derive(Debug, Clone)]
pub struct SnapshotSeries {
    entries: BTreeMap<DateTime<Utc>, IndicatorSnapshot>,
    capacity: usize,
}

impl SnapshotSeries {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a snapshot. Returns false (and stores nothing) if the bar is
    /// already present or older than the latest stored bar.
    pub fn append(&mut self, snapshot: IndicatorSnapshot) -> bool {
        if let Some(latest) = self.latest_time() {
            if snapshot.bar_time <= latest {
                return false;
            }
        }
        self.entries.insert(snapshot.bar_time, snapshot);
        while self.entries.len() > self.capacity {
            self.entries.pop_first();
        }
        true
    }

    pub fn get(&self, bar_time: DateTime<Utc>) -> Option<&IndicatorSnapshot> {
        self.entries.get(&bar_time)
    }

    /// Snapshot of the most recent closed bar.
    pub fn latest(&self) -> Option<&IndicatorSnapshot> {
        self.entries.values().next_back()
    }

    pub fn latest_time(&self) -> Option<DateTime<Utc>> {
        self.entries.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndicatorSnapshot> {
        self.entries.values()
    }
}
