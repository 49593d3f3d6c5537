//! Lookup of agent configuration records

use crate::Result;
use agentdesk_core::{AgentConfig, IndexLocation};
use agentdesk_db::Repository;
use async_trait::async_trait;

/// Source of agent configuration, owned by the metadata store.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn lookup(&self, agent_id: &str) -> Result<Option<AgentConfig>>;

    /// Remember where the agent's index now lives
    async fn record_index_location(&self, agent_id: &str, location: &IndexLocation) -> Result<()>;
}

#[async_trait]
impl AgentDirectory for Repository {
    async fn lookup(&self, agent_id: &str) -> Result<Option<AgentConfig>> {
        Ok(self.get_agent(agent_id).await?)
    }

    async fn record_index_location(&self, agent_id: &str, location: &IndexLocation) -> Result<()> {
        Ok(self.set_index_path(agent_id, &location.path).await?)
    }
}
