#![forbid(unsafe_code)]

//! Bounce detection for just-finished drag/resize gestures.
//!
//! When an asynchronous layout recompute races with a gesture that is still
//! settling, the grid library can briefly report an item back at the position
//! it had *before* the gesture. The pattern is always a reversal:
//!
//! ```text
//! A (gesture start) -> B (gesture commit) -> A (stale recompute)
//! ```
//!
//! A single "did it change" check cannot tell a reversal from a legitimate
//! move, so the detector keeps a short per-item history and flags an incoming
//! position that matches the one-before-previous sample while the previous
//! sample is still fresh.
//!
//! # Usage
//!
//! ```
//! use gridsync_layout::{BounceDetector, ItemRect};
//!
//! let mut detector = BounceDetector::default();
//! let a = ItemRect::new(0, 0, 2, 2);
//! let b = ItemRect::new(3, 1, 2, 2);
//!
//! detector.record_change("m1", a, 1_000);
//! detector.record_change("m1", b, 1_100);
//!
//! let bounce = detector.detect_bounce("m1", a, 1_200).expect("A -> B -> A");
//! assert_eq!(bounce.from, b);
//! assert!(detector.detect_bounce("m1", a, 2_000).is_none()); // window elapsed
//! ```
//!
//! # Thresholds
//!
//! The defaults (5 samples, 300 ms) are empirical presentation heuristics and
//! live in [`BounceConfig`] so hosts can tune them.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::model::{GridItem, ItemRect, LayoutItem};

/// Default number of samples retained per item.
pub const DEFAULT_BOUNCE_HISTORY: usize = 5;
/// Default window after the previous change in which a reversal is a bounce.
pub const DEFAULT_BOUNCE_THRESHOLD_MS: u64 = 300;

/// Bounce detector tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BounceConfig {
    /// Samples kept per item. Values below 2 are raised to 2, the minimum
    /// needed to recognise a reversal.
    pub history_len: usize,
    /// Maximum age of the previous change for a reversal to count.
    pub threshold_ms: u64,
}

impl Default for BounceConfig {
    fn default() -> Self {
        Self {
            history_len: DEFAULT_BOUNCE_HISTORY,
            threshold_ms: DEFAULT_BOUNCE_THRESHOLD_MS,
        }
    }
}

/// One recorded geometry sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionSample {
    pub rect: ItemRect,
    pub timestamp_ms: u64,
}

/// A detected A→B→A reversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BounceEvent {
    pub item_id: String,
    /// The position the item was moved to (B).
    pub from: ItemRect,
    /// The stale position the incoming report reverts to (A).
    pub reverted_to: ItemRect,
    /// Time since the previous change.
    pub elapsed_ms: u64,
}

/// Per-item bounded geometry history.
#[derive(Debug, Clone, Default)]
pub struct BounceDetector {
    config: BounceConfig,
    history: FxHashMap<String, VecDeque<PositionSample>>,
}

impl BounceDetector {
    #[must_use]
    pub fn new(config: BounceConfig) -> Self {
        Self {
            config,
            history: FxHashMap::default(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> BounceConfig {
        self.config
    }

    fn capacity(&self) -> usize {
        self.config.history_len.max(2)
    }

    /// Append a sample for `item_id`. A sample equal to the latest one is not
    /// a change and is ignored.
    pub fn record_change(&mut self, item_id: &str, rect: ItemRect, now_ms: u64) {
        let capacity = self.capacity();
        if !self.history.contains_key(item_id) {
            self.history.insert(item_id.to_owned(), VecDeque::with_capacity(capacity));
        }
        let Some(samples) = self.history.get_mut(item_id) else {
            return;
        };
        if samples.back().is_some_and(|last| last.rect == rect) {
            return;
        }
        samples.push_back(PositionSample {
            rect,
            timestamp_ms: now_ms,
        });
        while samples.len() > capacity {
            samples.pop_front();
        }
    }

    /// Record every item of a snapshot.
    pub fn record_items(&mut self, items: &[LayoutItem], now_ms: u64) {
        for item in items {
            self.record_change(&item.id, item.rect(), now_ms);
        }
    }

    /// Check whether `incoming` reverses the latest recorded change.
    #[must_use]
    pub fn detect_bounce(
        &self,
        item_id: &str,
        incoming: ItemRect,
        now_ms: u64,
    ) -> Option<BounceEvent> {
        let samples = self.history.get(item_id)?;
        let len = samples.len();
        if len < 2 {
            return None;
        }
        let previous = samples[len - 1];
        let before = samples[len - 2];
        if previous.rect == before.rect || incoming != before.rect {
            return None;
        }
        let elapsed_ms = now_ms.saturating_sub(previous.timestamp_ms);
        if elapsed_ms > self.config.threshold_ms {
            return None;
        }
        Some(BounceEvent {
            item_id: item_id.to_owned(),
            from: previous.rect,
            reverted_to: incoming,
            elapsed_ms,
        })
    }

    /// Scan a whole grid report for reversals.
    #[must_use]
    pub fn detect_in_items(&self, report: &[GridItem], now_ms: u64) -> Vec<BounceEvent> {
        report
            .iter()
            .filter_map(|item| self.detect_bounce(&item.id, item.rect(), now_ms))
            .collect()
    }

    /// Recorded samples for one item, oldest first.
    #[must_use]
    pub fn samples(&self, item_id: &str) -> Vec<PositionSample> {
        self.history
            .get(item_id)
            .map(|samples| samples.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop the history of one item (e.g. after removal).
    pub fn forget(&mut self, item_id: &str) {
        self.history.remove(item_id);
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Number of items with recorded history.
    #[must_use]
    pub fn tracked_items(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ItemRect = ItemRect::new(0, 0, 2, 2);
    const B: ItemRect = ItemRect::new(3, 1, 2, 2);
    const C: ItemRect = ItemRect::new(5, 5, 2, 2);

    fn detector_with(samples: &[(ItemRect, u64)]) -> BounceDetector {
        let mut detector = BounceDetector::default();
        for (rect, ts) in samples {
            detector.record_change("m1", *rect, *ts);
        }
        detector
    }

    #[test]
    fn reversal_within_threshold_is_a_bounce() {
        let detector = detector_with(&[(A, 0), (B, 100)]);
        let event = detector.detect_bounce("m1", A, 250).expect("bounce");
        assert_eq!(event.from, B);
        assert_eq!(event.reverted_to, A);
        assert_eq!(event.elapsed_ms, 150);
    }

    #[test]
    fn reversal_after_threshold_is_not_a_bounce() {
        let detector = detector_with(&[(A, 0), (B, 100)]);
        assert!(detector.detect_bounce("m1", A, 401).is_none());
        assert!(detector.detect_bounce("m1", A, 400).is_some());
    }

    #[test]
    fn single_sample_never_bounces() {
        let detector = detector_with(&[(A, 0)]);
        assert!(detector.detect_bounce("m1", A, 10).is_none());
        assert!(detector.detect_bounce("unknown", A, 10).is_none());
    }

    #[test]
    fn forward_move_is_not_a_bounce() {
        let detector = detector_with(&[(A, 0), (B, 100)]);
        assert!(detector.detect_bounce("m1", C, 150).is_none());
        assert!(detector.detect_bounce("m1", B, 150).is_none());
    }

    #[test]
    fn duplicate_samples_are_ignored() {
        let detector = detector_with(&[(A, 0), (B, 100), (B, 200)]);
        assert_eq!(detector.samples("m1").len(), 2);
        // Window measured from the actual change at t=100.
        assert!(detector.detect_bounce("m1", A, 399).is_some());
        assert!(detector.detect_bounce("m1", A, 401).is_none());
    }

    #[test]
    fn history_is_bounded() {
        let mut detector = BounceDetector::default();
        for i in 0..20u32 {
            detector.record_change("m1", ItemRect::new(i, 0, 1, 1), u64::from(i));
        }
        let samples = detector.samples("m1");
        assert_eq!(samples.len(), DEFAULT_BOUNCE_HISTORY);
        assert_eq!(samples[0].rect.x, 15);
    }

    #[test]
    fn tiny_history_is_raised_to_two() {
        let mut detector = BounceDetector::new(BounceConfig {
            history_len: 0,
            threshold_ms: 300,
        });
        detector.record_change("m1", A, 0);
        detector.record_change("m1", B, 10);
        assert!(detector.detect_bounce("m1", A, 20).is_some());
    }

    #[test]
    fn detect_in_items_scans_report() {
        let mut detector = BounceDetector::default();
        detector.record_change("m1", A, 0);
        detector.record_change("m1", B, 50);
        detector.record_change("m2", C, 0);
        let report = vec![
            GridItem::new("m1", 0, 0, 2, 2),
            GridItem::new("m2", 5, 5, 2, 2),
        ];
        let events = detector.detect_in_items(&report, 100);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].item_id, "m1");
    }

    #[test]
    fn forget_and_clear_drop_history() {
        let mut detector = detector_with(&[(A, 0), (B, 10)]);
        detector.record_change("m2", C, 0);
        detector.forget("m1");
        assert!(detector.detect_bounce("m1", A, 20).is_none());
        assert_eq!(detector.tracked_items(), 1);
        detector.clear();
        assert_eq!(detector.tracked_items(), 0);
    }
}
