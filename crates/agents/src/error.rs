//! Agent error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Database error: {0}")]
    Database(#[from] agentdesk_db::DbError),

    /// A single document could not be read; ingestion of the batch continues
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// The index could not be written; the canonical index is unchanged
    #[error("Index write error: {0}")]
    IndexWrite(String),

    #[error("Agent not found: {0}")]
    ConfigNotFound(String),

    /// Embedding or language model provider failure
    #[error("Model service error: {0}")]
    Service(String),

    #[error("No valid text found in the uploaded documents")]
    NoValidText { failed: Vec<String> },

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        AgentError::Service(e.to_string())
    }
}

impl From<agentdesk_core::CoreError> for AgentError {
    fn from(e: agentdesk_core::CoreError) -> Self {
        AgentError::Validation(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
