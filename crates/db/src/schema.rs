//! SurrealDB schema definitions

use crate::{DbConnection, Result};
use tracing::info;

pub const AGENT_TABLE: &str = "agent";
pub const CHAT_HISTORY_TABLE: &str = "chat_history";

/// Initialize the database schema
pub async fn initialize_schema(db: &DbConnection) -> Result<()> {
    info!("Initializing database schema...");

    db.query(SCHEMA_DEFINITION).await?;

    info!("Schema initialized successfully");
    Ok(())
}

const SCHEMA_DEFINITION: &str = r#"
-- Agent configuration records, keyed by agent id
DEFINE TABLE IF NOT EXISTS agent SCHEMALESS;

-- One transcript per (agent, user)
DEFINE TABLE IF NOT EXISTS chat_history SCHEMALESS;
DEFINE INDEX IF NOT EXISTS idx_history_agent ON chat_history FIELDS agent_id;
"#;
