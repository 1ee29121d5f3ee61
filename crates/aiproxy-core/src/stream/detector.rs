//! Stuttering detection.
//!
//! The production heuristic is the prefix relationship: some upstreams emit
//! the first assistant token twice with overlapping prefixes ("Hel" then
//! "Hello"); dropping the earlier chunk yields a clean stream. The weighted
//! analyzer is an experimental drop-in that must agree with the prefix check
//! on that canonical case.

use std::time::Duration;

pub trait StutterDetector: Send + Sync {
    /// True when `current` should replace the buffered chunk instead of both
    /// being forwarded.
    fn is_stutter(&self, buffered: &str, current: &str, interval: Duration) -> bool;
}

/// One is a prefix of the other (either direction).
#[derive(Debug, Default, Clone, Copy)]
pub struct PrefixStutterDetector;

impl StutterDetector for PrefixStutterDetector {
    fn is_stutter(&self, buffered: &str, current: &str, _interval: Duration) -> bool {
        current.starts_with(buffered) || buffered.starts_with(current)
    }
}

/// Weighted confidence score over prefix similarity, length progression,
/// inter-chunk interval, and edit-distance similarity.
#[derive(Debug, Clone, Copy)]
pub struct WeightedStutterDetector {
    pub prefix_weight: f64,
    pub length_weight: f64,
    pub interval_weight: f64,
    pub similarity_weight: f64,
    pub threshold: f64,
    /// Chunks further apart than this are unlikely to be duplicates.
    pub max_interval: Duration,
}

impl Default for WeightedStutterDetector {
    fn default() -> Self {
        Self {
            prefix_weight: 0.4,
            length_weight: 0.2,
            interval_weight: 0.1,
            similarity_weight: 0.3,
            threshold: 0.7,
            max_interval: Duration::from_millis(500),
        }
    }
}

impl WeightedStutterDetector {
    pub fn confidence(&self, buffered: &str, current: &str, interval: Duration) -> f64 {
        let prefix = if current.starts_with(buffered) || buffered.starts_with(current) {
            1.0
        } else {
            common_prefix_len(buffered, current) as f64
                / buffered.len().max(current.len()).max(1) as f64
        };
        let length = if current.len() >= buffered.len() { 1.0 } else { 0.0 };
        let timing = if interval <= self.max_interval { 1.0 } else { 0.0 };
        let similarity = 1.0
            - levenshtein(buffered, current) as f64
                / buffered.len().max(current.len()).max(1) as f64;

        self.prefix_weight * prefix
            + self.length_weight * length
            + self.interval_weight * timing
            + self.similarity_weight * similarity
    }
}

impl StutterDetector for WeightedStutterDetector {
    fn is_stutter(&self, buffered: &str, current: &str, interval: Duration) -> bool {
        self.confidence(buffered, current, interval) >= self.threshold
    }
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: Duration = Duration::from_millis(10);

    #[test]
    fn prefix_detector_matches_both_directions() {
        let detector = PrefixStutterDetector;
        assert!(detector.is_stutter("Hel", "Hello", FAST));
        assert!(detector.is_stutter("Hello", "Hel", FAST));
        assert!(!detector.is_stutter("Hello", " world", FAST));
    }

    #[test]
    fn weighted_detector_agrees_on_the_canonical_case() {
        let prefix = PrefixStutterDetector;
        let weighted = WeightedStutterDetector::default();
        for (buffered, current) in [("Hel", "Hello"), ("Hello", " world")] {
            assert_eq!(
                prefix.is_stutter(buffered, current, FAST),
                weighted.is_stutter(buffered, current, FAST),
                "{buffered:?} vs {current:?}"
            );
        }
    }

    #[test]
    fn levenshtein_is_symmetric_and_exact() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("sitting", "kitten"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }
}
