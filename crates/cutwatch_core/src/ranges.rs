//! Time interval normalization for loop regions and trim submissions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub id: String,
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeRange {
    pub fn new(id: impl Into<String>, start_ms: i64, end_ms: i64) -> Self {
        Self {
            id: id.into(),
            start_ms,
            end_ms,
        }
    }

    pub fn len_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }

    pub fn contains(&self, position_ms: i64) -> bool {
        self.start_ms <= position_ms && position_ms < self.end_ms
    }
}

/// Clamps every bound into `[0, duration_ms]`, drops empty or inverted
/// intervals, sorts by `(start, end, id)` and merges overlapping or touching
/// neighbours. A merged interval keeps the id of its first member.
///
/// Deterministic, order-independent and idempotent.
pub fn normalize(ranges: &[TimeRange], duration_ms: i64) -> Vec<TimeRange> {
    let duration_ms = duration_ms.max(0);
    let mut clamped: Vec<TimeRange> = ranges
        .iter()
        .map(|range| TimeRange {
            id: range.id.clone(),
            start_ms: range.start_ms.clamp(0, duration_ms),
            end_ms: range.end_ms.clamp(0, duration_ms),
        })
        .filter(|range| range.end_ms > range.start_ms)
        .collect();

    clamped.sort_by(|a, b| {
        a.start_ms
            .cmp(&b.start_ms)
            .then(a.end_ms.cmp(&b.end_ms))
            .then_with(|| a.id.cmp(&b.id))
    });

    clamped.into_iter().fold(Vec::new(), |mut merged: Vec<TimeRange>, next| {
        match merged.last_mut() {
            Some(last) if next.start_ms <= last.end_ms => {
                last.end_ms = last.end_ms.max(next.end_ms);
            }
            _ => merged.push(next),
        }
        merged
    })
}

/// Gaps of `[0, duration_ms]` not covered by `ranges`.
///
/// Turns a delete list into a keep list and back. Generated ids are
/// `gap-<start>`.
pub fn complement(ranges: &[TimeRange], duration_ms: i64) -> Vec<TimeRange> {
    let duration_ms = duration_ms.max(0);
    let mut gaps = Vec::new();
    let mut cursor = 0;
    for range in normalize(ranges, duration_ms) {
        if range.start_ms > cursor {
            gaps.push(TimeRange::new(format!("gap-{cursor}"), cursor, range.start_ms));
        }
        cursor = range.end_ms;
    }
    if cursor < duration_ms {
        gaps.push(TimeRange::new(format!("gap-{cursor}"), cursor, duration_ms));
    }
    gaps
}

/// A range set that is normalized after every mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeRangeSet {
    duration_ms: i64,
    ranges: Vec<TimeRange>,
}

impl TimeRangeSet {
    pub fn new(duration_ms: i64) -> Self {
        Self {
            duration_ms: duration_ms.max(0),
            ranges: Vec::new(),
        }
    }

    pub fn from_ranges(ranges: &[TimeRange], duration_ms: i64) -> Self {
        Self {
            duration_ms: duration_ms.max(0),
            ranges: normalize(ranges, duration_ms),
        }
    }

    pub fn duration_ms(&self) -> i64 {
        self.duration_ms
    }

    pub fn ranges(&self) -> &[TimeRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn total_ms(&self) -> i64 {
        self.ranges.iter().map(TimeRange::len_ms).sum()
    }

    pub fn insert(&mut self, range: TimeRange) {
        let mut next = std::mem::take(&mut self.ranges);
        next.push(range);
        self.ranges = normalize(&next, self.duration_ms);
    }

    /// Removes the range with `id`. Returns whether anything was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.ranges.len();
        self.ranges.retain(|range| range.id != id);
        before != self.ranges.len()
    }

    /// Replaces the bounds of the range with `id` and re-normalizes.
    pub fn update(&mut self, id: &str, start_ms: i64, end_ms: i64) -> bool {
        let Some(range) = self.ranges.iter_mut().find(|range| range.id == id) else {
            return false;
        };
        range.start_ms = start_ms;
        range.end_ms = end_ms;
        let next = std::mem::take(&mut self.ranges);
        self.ranges = normalize(&next, self.duration_ms);
        true
    }

    /// Changes the media duration and re-clamps the stored ranges.
    pub fn set_duration(&mut self, duration_ms: i64) {
        self.duration_ms = duration_ms.max(0);
        let next = std::mem::take(&mut self.ranges);
        self.ranges = normalize(&next, self.duration_ms);
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrimMode {
    Keep,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimInterval {
    pub start_ms: i64,
    pub end_ms: i64,
}

/// Authoritative interval list submitted to a remote trim operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimPayload {
    pub mode: TrimMode,
    pub duration_ms: i64,
    pub ranges: Vec<TrimInterval>,
}

impl TrimPayload {
    pub fn from_set(mode: TrimMode, set: &TimeRangeSet) -> Self {
        Self {
            mode,
            duration_ms: set.duration_ms(),
            ranges: set
                .ranges()
                .iter()
                .map(|range| TrimInterval {
                    start_ms: range.start_ms,
                    end_ms: range.end_ms,
                })
                .collect(),
        }
    }

    /// Same edit expressed in the opposite mode.
    pub fn inverted(&self) -> Self {
        let ranges: Vec<TimeRange> = self
            .ranges
            .iter()
            .map(|interval| TimeRange::new("", interval.start_ms, interval.end_ms))
            .collect();
        let mode = match self.mode {
            TrimMode::Keep => TrimMode::Delete,
            TrimMode::Delete => TrimMode::Keep,
        };
        Self {
            mode,
            duration_ms: self.duration_ms,
            ranges: complement(&ranges, self.duration_ms)
                .into_iter()
                .map(|range| TrimInterval {
                    start_ms: range.start_ms,
                    end_ms: range.end_ms,
                })
                .collect(),
        }
    }
}
