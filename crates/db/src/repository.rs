//! Repository pattern for agent records and chat transcripts

use crate::schema::{AGENT_TABLE, CHAT_HISTORY_TABLE};
use crate::{DbConnection, DbError, Result};
use agentdesk_core::{validate_agent_id, AgentConfig, ChatTurn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::instrument;

/// Repository for all database operations
#[derive(Clone)]
pub struct Repository {
    db: DbConnection,
}

impl Repository {
    /// Create a new repository
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    // ==========================================
    // AGENT OPERATIONS
    // ==========================================

    /// Create or replace an agent record
    #[instrument(skip(self, agent), fields(agent_id = %agent.id))]
    pub async fn save_agent(&self, agent: AgentConfig) -> Result<AgentConfig> {
        validate_agent_id(&agent.id)?;
        let id = agent.id.clone();

        let saved: Option<AgentRecord> = self
            .db
            .upsert((AGENT_TABLE, id.clone()))
            .content(AgentRecord::from(agent))
            .await?;

        saved
            .map(AgentConfig::from)
            .ok_or_else(|| DbError::QueryFailed(format!("save_agent {}", id)))
    }

    /// Get an agent by ID
    #[instrument(skip(self))]
    pub async fn get_agent(&self, id: &str) -> Result<Option<AgentConfig>> {
        let record: Option<AgentRecord> = self.db.select((AGENT_TABLE, id.to_owned())).await?;
        Ok(record.map(AgentConfig::from))
    }

    /// List all agents, sorted by id
    #[instrument(skip(self))]
    pub async fn list_agents(&self) -> Result<Vec<AgentConfig>> {
        let records: Vec<AgentRecord> = self.db.select(AGENT_TABLE).await?;

        let mut agents: Vec<AgentConfig> = records.into_iter().map(AgentConfig::from).collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    /// Point an agent at its vector index
    #[instrument(skip(self))]
    pub async fn set_index_path(&self, id: &str, path: &Path) -> Result<()> {
        let updated: Option<AgentRecord> = self
            .db
            .query("UPDATE type::thing($table, $id) SET vector_index_path = $path")
            .bind(("table", AGENT_TABLE))
            .bind(("id", id.to_owned()))
            .bind(("path", path.to_string_lossy().into_owned()))
            .await?
            .take(0)?;

        updated
            .map(|_| ())
            .ok_or_else(|| DbError::NotFound("agent".into(), id.into()))
    }

    // ==========================================
    // CHAT HISTORY OPERATIONS
    // ==========================================

    /// Replace the stored transcript for an (agent, user) pair
    #[instrument(skip(self, messages), fields(turns = messages.len()))]
    pub async fn save_history(
        &self,
        agent_id: &str,
        user_id: &str,
        messages: &[ChatTurn],
    ) -> Result<()> {
        let record = HistoryRecord {
            agent_id: agent_id.to_owned(),
            user_id: user_id.to_owned(),
            messages: messages.to_vec(),
            updated_at: Utc::now(),
        };

        let _: Option<HistoryRecord> = self
            .db
            .upsert((CHAT_HISTORY_TABLE, history_key(agent_id, user_id)))
            .content(record)
            .await?;

        Ok(())
    }

    /// Load the stored transcript, empty if none exists
    #[instrument(skip(self))]
    pub async fn load_history(&self, agent_id: &str, user_id: &str) -> Result<Vec<ChatTurn>> {
        let record: Option<HistoryRecord> = self
            .db
            .select((CHAT_HISTORY_TABLE, history_key(agent_id, user_id)))
            .await?;

        Ok(record.map(|r| r.messages).unwrap_or_default())
    }
}

/// Agent ids never contain '/', so the first one splits the key unambiguously.
fn history_key(agent_id: &str, user_id: &str) -> String {
    format!("{}/{}", agent_id, user_id)
}

// ==========================================
// RECORD TYPES
// ==========================================

/// Stored shape of an agent. The SurrealDB record id carries the agent id,
/// so the domain `id` is kept under a different field name.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AgentRecord {
    agent_id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tools: Vec<String>,
    #[serde(default)]
    system_prompt: String,
    #[serde(default)]
    vector_index_path: Option<String>,
}

impl From<AgentConfig> for AgentRecord {
    fn from(agent: AgentConfig) -> Self {
        Self {
            agent_id: agent.id,
            name: agent.name,
            description: agent.description,
            tools: agent.tools,
            system_prompt: agent.system_prompt,
            vector_index_path: agent
                .vector_index_path
                .map(|p| p.to_string_lossy().into_owned()),
        }
    }
}

impl From<AgentRecord> for AgentConfig {
    fn from(record: AgentRecord) -> Self {
        Self {
            id: record.agent_id,
            name: record.name,
            description: record.description,
            tools: record.tools,
            system_prompt: record.system_prompt,
            vector_index_path: record.vector_index_path.map(Into::into),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistoryRecord {
    agent_id: String,
    user_id: String,
    #[serde(default)]
    messages: Vec<ChatTurn>,
    updated_at: DateTime<Utc>,
}
