//! Index location and version

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where an agent's vector index lives and which version was written.
///
/// `generation` increases by one on every successful write, starting at 1
/// for the first ingest. Sessions that loaded an older generation are stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexLocation {
    pub agent_id: String,
    pub path: PathBuf,
    pub generation: u64,
}

impl IndexLocation {
    pub fn new(agent_id: impl Into<String>, path: impl Into<PathBuf>, generation: u64) -> Self {
        Self {
            agent_id: agent_id.into(),
            path: path.into(),
            generation,
        }
    }
}
