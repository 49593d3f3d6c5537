//! Document chunks - the unit of embedding and retrieval

use serde::{Deserialize, Serialize};

/// A slice of extracted document text.
///
/// `ordinal` is the position of the chunk within its document; it keeps
/// indexing reproducible but plays no part in retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentChunk {
    pub text: String,
    pub ordinal: usize,
}

impl DocumentChunk {
    pub fn new(text: impl Into<String>, ordinal: usize) -> Self {
        Self {
            text: text.into(),
            ordinal,
        }
    }

    /// Length in characters
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}
