//! Confidence gate applied to generated answers

/// Decides whether a generated answer is trustworthy enough to return.
pub trait AnswerGate: Send + Sync {
    fn accept(&self, answer: &str) -> bool;
}

/// Rejects answers that are too short or hedge.
///
/// Markers are matched against the lowercased, trimmed answer with curly
/// apostrophes folded to straight ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfidenceGate {
    pub min_chars: usize,
    pub contains_markers: Vec<String>,
    pub prefix_markers: Vec<String>,
}

impl Default for ConfidenceGate {
    fn default() -> Self {
        Self {
            min_chars: 30,
            contains_markers: vec!["i'm not sure".to_string()],
            prefix_markers: vec!["i don't know".to_string()],
        }
    }
}

impl ConfidenceGate {
    pub fn with_min_chars(mut self, min_chars: usize) -> Self {
        self.min_chars = min_chars;
        self
    }

    pub fn with_contains_marker(mut self, marker: impl Into<String>) -> Self {
        self.contains_markers.push(marker.into().to_lowercase());
        self
    }

    pub fn with_prefix_marker(mut self, marker: impl Into<String>) -> Self {
        self.prefix_markers.push(marker.into().to_lowercase());
        self
    }
}

impl AnswerGate for ConfidenceGate {
    fn accept(&self, answer: &str) -> bool {
        let answer = answer.trim();
        if answer.chars().count() < self.min_chars {
            return false;
        }

        let normalized = answer.to_lowercase().replace('\u{2019}', "'");
        let hedges = self
            .contains_markers
            .iter()
            .any(|m| normalized.contains(m.as_str()));
        let refuses = self
            .prefix_markers
            .iter()
            .any(|m| normalized.starts_with(m.as_str()));

        !(hedges || refuses)
    }
}
