//! Edge-triggered alerting.
//!
//! A detector fires once per strict increase of an observed counter and never
//! on the first observation — the first fetch after a view mounts only
//! establishes the baseline. Tracking is per logical stream: the aggregate
//! ticket counter and each per-session unread counter get their own detector
//! so unrelated alert categories cannot cross-talk.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Default, Clone)]
pub struct EdgeAlertDetector {
    baseline: Option<u64>,
}

impl EdgeAlertDetector {
    pub fn new() -> Self {
        Self { baseline: None }
    }

    /// Feed a newly fetched value. Returns true iff an alert should fire:
    /// a baseline exists and the value strictly exceeds it. Every observation
    /// becomes the new baseline, so one transition alerts at most once.
    pub fn observe(&mut self, value: u64) -> bool {
        let fire = matches!(self.baseline, Some(prev) if value > prev);
        self.baseline = Some(value);
        fire
    }

    /// Whether a real fetch has been observed yet.
    pub fn initialized(&self) -> bool {
        self.baseline.is_some()
    }
}

/// One detector per stream key. Streams appear lazily on first observation;
/// a brand-new stream establishes its own baseline silently.
#[derive(Debug, Default)]
pub struct AlertSet<K: Eq + Hash> {
    detectors: HashMap<K, EdgeAlertDetector>,
}

impl<K: Eq + Hash + Clone> AlertSet<K> {
    pub fn new() -> Self {
        Self {
            detectors: HashMap::new(),
        }
    }

    pub fn observe(&mut self, key: &K, value: u64) -> bool {
        self.detectors
            .entry(key.clone())
            .or_default()
            .observe(value)
    }

    /// Drop detectors for streams no longer present in the snapshot, so a
    /// purged conversation that later reappears starts from a fresh baseline.
    pub fn retain_keys(&mut self, live: &[K]) {
        self.detectors.retain(|k, _| live.contains(k));
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The canonical sequence: alerts only on 5→8 and 3→9. No alert on the
    // initial 5, the 5→5 no-op, or the 8→3 decrease.
    #[test]
    fn test_alert_sequence() {
        let mut det = EdgeAlertDetector::new();
        let observed: Vec<bool> = [5, 5, 8, 3, 3, 9].iter().map(|v| det.observe(*v)).collect();
        assert_eq!(observed, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn test_first_observation_never_fires() {
        let mut det = EdgeAlertDetector::new();
        assert!(!det.initialized());
        assert!(!det.observe(100));
        assert!(det.initialized());
    }

    #[test]
    fn test_zero_baseline_still_arms() {
        // A real fetch that sees zero items must arm the detector — the next
        // increase has to alert.
        let mut det = EdgeAlertDetector::new();
        assert!(!det.observe(0));
        assert!(det.observe(1));
    }

    #[test]
    fn test_streams_do_not_crosstalk() {
        let mut set: AlertSet<&str> = AlertSet::new();
        assert!(!set.observe(&"session-a", 2));
        assert!(!set.observe(&"session-b", 7));
        // a rises, b stays flat: only a fires.
        assert!(set.observe(&"session-a", 3));
        assert!(!set.observe(&"session-b", 7));
    }

    #[test]
    fn test_retain_resets_dropped_streams() {
        let mut set: AlertSet<String> = AlertSet::new();
        set.observe(&"a".to_string(), 4);
        set.observe(&"b".to_string(), 4);
        set.retain_keys(&["a".to_string()]);
        assert_eq!(set.len(), 1);
        // "b" was purged; its next observation re-establishes a baseline.
        assert!(!set.observe(&"b".to_string(), 10));
    }
}
