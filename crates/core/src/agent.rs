//! Agent configuration records

use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration of one knowledge agent.
///
/// Owned by the metadata store; the answering pipeline only reads it. A new
/// version of the record replaces the old one wholesale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentConfig {
    /// Stable identifier, also used to derive the index location
    pub id: String,

    /// Display name
    pub name: String,

    /// Short description shown to users
    #[serde(default)]
    pub description: String,

    /// Names of optional tools exposed to the language model
    #[serde(default)]
    pub tools: Vec<String>,

    /// System prompt prepended to every generation
    #[serde(default)]
    pub system_prompt: String,

    /// Where the agent's vector index lives, once one has been built
    #[serde(default)]
    pub vector_index_path: Option<PathBuf>,
}

impl AgentConfig {
    /// Create a new agent configuration
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            tools: Vec::new(),
            system_prompt: String::new(),
            vector_index_path: None,
        }
    }

    /// Builder pattern: set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder pattern: set tool names
    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    /// Builder pattern: set system prompt
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Builder pattern: set index location
    pub fn with_index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.vector_index_path = Some(path.into());
        self
    }

    /// Check if the record points at an index that exists on disk
    pub fn has_index(&self) -> bool {
        self.vector_index_path
            .as_ref()
            .map(|p| p.exists())
            .unwrap_or(false)
    }
}

/// Reject agent ids that cannot safely name a file.
///
/// Index locations are derived from the id, so separators, parent
/// references and control characters are not allowed.
pub fn validate_agent_id(id: &str) -> Result<()> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidAgentId("empty".into()));
    }
    if trimmed != id
        || id == "."
        || id.contains("..")
        || id.contains('/')
        || id.contains('\\')
        || id.chars().any(|c| c.is_control())
    {
        return Err(CoreError::InvalidAgentId(id.to_string()));
    }
    Ok(())
}
