//! Named tools an agent can expose to the language model

use serde::{Deserialize, Serialize};

/// A tool the model may be told about. Tools are side capabilities; the
/// retrieval path never depends on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolHandle {
    pub name: String,
    pub description: String,
}

impl ToolHandle {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Catalogue of tools agents may reference by name
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolHandle>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ToolRegistry {
    pub fn empty() -> Self {
        Self { tools: Vec::new() }
    }

    /// The tools every deployment ships with
    pub fn builtin() -> Self {
        Self {
            tools: vec![
                ToolHandle::new("file_reader", "Read and analyze files"),
                ToolHandle::new("template_generator", "Generate templates from user input"),
                ToolHandle::new(
                    "email_sender",
                    "Send emails. Input should be a JSON string with recipient, \
                     subject, and body fields.",
                ),
            ],
        }
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(mut self, tool: ToolHandle) -> Self {
        self.tools.retain(|t| t.name != tool.name);
        self.tools.push(tool);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    /// Resolve names in request order; unknown names are skipped.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Vec<ToolHandle> {
        names
            .iter()
            .filter_map(|name| self.tools.iter().find(|t| t.name == name.as_ref()))
            .cloned()
            .collect()
    }
}
