// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Result types for action recognition output.
//!
//! A processed frame yields one [`FrameReport`] holding a [`PersonAction`]
//! per detected person, the raw class scores behind each label, and stage
//! timings. Reports serialize to JSON for downstream sinks; raw score
//! vectors are kept in memory only.

use ndarray::Array1;
use serde::Serialize;

use crate::ops;

/// Timing information for pipeline stages (in milliseconds).
#[derive(Debug, Clone, Default, Serialize)]
pub struct Speed {
    /// Time spent acquiring and decoding the frame.
    pub capture: Option<f64>,
    /// Time spent running the network over all persons.
    pub inference: Option<f64>,
    /// Time spent drawing labels onto the frame.
    pub annotate: Option<f64>,
}

impl Speed {
    /// Create a new Speed instance with all timings.
    #[must_use]
    pub const fn new(capture: f64, inference: f64, annotate: f64) -> Self {
        Self {
            capture: Some(capture),
            inference: Some(inference),
            annotate: Some(annotate),
        }
    }

    /// Total time across all recorded stages in milliseconds.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.capture.unwrap_or(0.0) + self.inference.unwrap_or(0.0) + self.annotate.unwrap_or(0.0)
    }
}

/// Raw class scores for one person, in vocabulary order.
#[derive(Debug, Clone)]
pub struct ActionScores {
    /// One score per vocabulary label.
    pub data: Array1<f32>,
}

impl ActionScores {
    /// Wrap a score vector.
    #[must_use]
    pub const fn new(data: Array1<f32>) -> Self {
        Self { data }
    }

    /// Index of the highest score. Ties resolve to the lowest index, and an
    /// empty vector yields 0.
    #[must_use]
    pub fn top1(&self) -> usize {
        let mut best = 0;
        let mut best_val = f32::NEG_INFINITY;
        for (i, &v) in self.data.iter().enumerate() {
            if v > best_val {
                best = i;
                best_val = v;
            }
        }
        best
    }

    /// Indices of the top k scores, highest first.
    #[must_use]
    pub fn top_k(&self, k: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.data.len()).collect();
        indices.sort_by(|&a, &b| {
            self.data[b]
                .partial_cmp(&self.data[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        indices.truncate(k);
        indices
    }

    /// Softmax of the scores.
    #[must_use]
    pub fn probabilities(&self) -> Array1<f32> {
        ops::softmax(self.data.view())
    }

    /// Softmax probability of the top class, 0 for an empty vector.
    #[must_use]
    pub fn confidence(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.probabilities()[self.top1()]
    }

    /// Number of classes scored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the score vector is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One person's classified action within a frame.
#[derive(Debug, Clone, Serialize)]
pub struct PersonAction {
    /// Zero-based person index within the frame.
    pub person: usize,
    /// Predicted action label.
    pub label: String,
    /// Vocabulary index of the label.
    pub class_index: usize,
    /// Softmax probability of the predicted label.
    pub confidence: f32,
    /// Person bounding box as `[x1, y1, x2, y2]`, when the pose source
    /// provides one.
    pub bounds: Option<[f32; 4]>,
    /// Whether this action matches the active search query.
    pub matched: bool,
    /// Raw class scores behind the prediction.
    #[serde(skip)]
    pub scores: ActionScores,
}

impl PersonAction {
    /// Create an unmatched action entry; the confidence is derived from the
    /// scores.
    #[must_use]
    pub fn new(
        person: usize,
        label: String,
        class_index: usize,
        scores: ActionScores,
        bounds: Option<[f32; 4]>,
    ) -> Self {
        let confidence = scores.confidence();
        Self {
            person,
            label,
            class_index,
            confidence,
            bounds,
            matched: false,
            scores,
        }
    }
}

/// Everything produced for one processed frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    /// Monotonic index of the processed frame, counting from 0.
    pub frame_index: u64,
    /// One entry per detected person, in detection order.
    pub actions: Vec<PersonAction>,
    /// Stage timings for this frame.
    pub speed: Speed,
    /// The search query active while the frame was processed.
    pub query: Option<String>,
    /// Whether any person matched the query.
    pub match_found: bool,
}

impl FrameReport {
    /// Assemble a report; `match_found` is derived from the actions.
    #[must_use]
    pub fn new(
        frame_index: u64,
        actions: Vec<PersonAction>,
        speed: Speed,
        query: Option<String>,
    ) -> Self {
        let match_found = actions.iter().any(|a| a.matched);
        Self {
            frame_index,
            actions,
            speed,
            query,
            match_found,
        }
    }

    /// Number of persons in the frame.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether no persons were detected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Actions that matched the search query.
    pub fn matches(&self) -> impl Iterator<Item = &PersonAction> {
        self.actions.iter().filter(|a| a.matched)
    }

    /// Generate a verbose log string describing the frame.
    #[must_use]
    pub fn verbose(&self) -> String {
        if self.actions.is_empty() {
            return "(no persons), ".to_string();
        }
        let parts: Vec<String> = self
            .actions
            .iter()
            .map(|a| {
                if a.matched {
                    format!("person {}: {} (match)", a.person + 1, a.label)
                } else {
                    format!("person {}: {}", a.person + 1, a.label)
                }
            })
            .collect();
        format!("{}, ", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn action(person: usize, label: &str, matched: bool) -> PersonAction {
        let mut action = PersonAction::new(
            person,
            label.to_string(),
            0,
            ActionScores::new(array![1.0, 0.0]),
            None,
        );
        action.matched = matched;
        action
    }

    #[test]
    fn test_speed_total() {
        let speed = Speed::new(10.0, 20.0, 5.0);
        assert!((speed.total() - 35.0).abs() < 1e-6);
        assert!((Speed::default().total() - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_top1_prefers_lowest_index_on_tie() {
        let scores = ActionScores::new(array![0.5, 2.0, 2.0, 1.0]);
        assert_eq!(scores.top1(), 1);
        assert_eq!(ActionScores::new(array![]).top1(), 0);
    }

    #[test]
    fn test_top_k_order() {
        let scores = ActionScores::new(array![0.1, 0.3, 0.6]);
        assert_eq!(scores.top_k(2), vec![2, 1]);
        assert_eq!(scores.top_k(10), vec![2, 1, 0]);
    }

    #[test]
    fn test_confidence_is_softmax_of_top1() {
        let scores = ActionScores::new(array![0.0, 0.0]);
        assert!((scores.confidence() - 0.5).abs() < 1e-6);
        assert_eq!(ActionScores::new(array![]).confidence(), 0.0);
    }

    #[test]
    fn test_report_derives_match_found() {
        let report = FrameReport::new(
            3,
            vec![action(0, "walking", false), action(1, "kicking", true)],
            Speed::default(),
            Some("kicking".to_string()),
        );
        assert!(report.match_found);
        assert_eq!(report.matches().count(), 1);
        assert_eq!(report.len(), 2);

        let quiet = FrameReport::new(4, vec![action(0, "walking", false)], Speed::default(), None);
        assert!(!quiet.match_found);
    }

    #[test]
    fn test_verbose_formats() {
        let empty = FrameReport::new(0, vec![], Speed::default(), None);
        assert_eq!(empty.verbose(), "(no persons), ");

        let report = FrameReport::new(
            1,
            vec![action(0, "walking", false), action(1, "kicking", true)],
            Speed::default(),
            Some("kicking".to_string()),
        );
        assert_eq!(report.verbose(), "person 1: walking, person 2: kicking (match), ");
    }

    #[test]
    fn test_report_serializes_without_raw_scores() {
        let report = FrameReport::new(7, vec![action(0, "waving", false)], Speed::default(), None);
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"frame_index\":7"));
        assert!(json.contains("\"label\":\"waving\""));
        assert!(!json.contains("\"scores\""));
    }
}
