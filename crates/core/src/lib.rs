//! Core domain types for agentdesk
//!
//! This crate defines the data structures shared by the indexing and
//! answering pipeline: agent configuration records, document chunks,
//! chat turns, session keys and index locations.

pub mod agent;
pub mod chat;
pub mod chunk;
pub mod index;
pub mod session;
pub mod error;

pub use agent::{validate_agent_id, AgentConfig};
pub use chat::{ChatRole, ChatTurn};
pub use chunk::DocumentChunk;
pub use index::IndexLocation;
pub use session::SessionKey;
pub use error::{CoreError, Result};
