// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Action vocabulary: the ordered label set the network scores against.
//!
//! Score index `i` always means label `i`; the classification head must be
//! exactly as wide as the vocabulary, which the model layer enforces at load
//! time.

use std::path::Path;

use crate::error::{ActionError, Result};

/// Labels of the deployed 12-action model, in score order.
pub const DEPLOYED_ACTIONS: [&str; 12] = [
    "walking", "sitting", "standing", "clapping", "waving", "punching", "kicking", "pushing",
    "jumping", "pointing", "hugging", "falling",
];

/// Ordered, duplicate-free set of action labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    labels: Vec<String>,
}

impl Vocabulary {
    /// Create a vocabulary from explicit labels.
    ///
    /// # Errors
    ///
    /// Returns an error if the list is empty, a label is blank, or a label
    /// appears twice.
    pub fn new(labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() {
            return Err(ActionError::ConfigError(
                "vocabulary must contain at least one label".to_string(),
            ));
        }
        for (i, label) in labels.iter().enumerate() {
            if label.trim().is_empty() {
                return Err(ActionError::ConfigError(format!(
                    "vocabulary label {i} is blank"
                )));
            }
            if labels[..i].contains(label) {
                return Err(ActionError::ConfigError(format!(
                    "duplicate vocabulary label '{label}'"
                )));
            }
        }
        Ok(Self { labels })
    }

    /// The deployed 12-action vocabulary.
    #[must_use]
    pub fn deployed() -> Self {
        Self {
            labels: DEPLOYED_ACTIONS.iter().map(ToString::to_string).collect(),
        }
    }

    /// Load labels from a text file, one per line. Blank lines and lines
    /// starting with `#` are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the remaining labels
    /// are not a valid vocabulary.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ActionError::ConfigError(format!("failed to read vocabulary {}: {e}", path.display()))
        })?;
        let labels = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(ToString::to_string)
            .collect();
        Self::new(labels)
    }

    /// Number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the vocabulary has no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Label at a score index.
    #[must_use]
    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Score index of a label, if present.
    #[must_use]
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    /// All labels in score order.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::deployed()
    }
}
