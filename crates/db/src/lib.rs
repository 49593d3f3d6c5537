//! Storage layer for agentdesk
//!
//! Two stores live here:
//! - [`IndexStore`]: one JSON vector index per agent, replaced atomically
//! - [`Repository`]: SurrealDB-backed agent records and chat transcripts

pub mod error;
pub mod repository;
pub mod schema;
pub mod vector_index;

pub use error::{DbError, Result};
pub use repository::Repository;
pub use vector_index::{IndexEntry, IndexStore, ScoredChunk, VectorIndex};

use surrealdb::engine::local::{Db, Mem};
use surrealdb::Surreal;

/// Database connection type
pub type DbConnection = Surreal<Db>;

/// Initialize database with RocksDB (persistent)
#[cfg(feature = "rocksdb")]
pub async fn init_persistent(path: impl AsRef<std::path::Path>) -> Result<DbConnection> {
    use surrealdb::engine::local::RocksDb;

    let db = Surreal::new::<RocksDb>(path.as_ref()).await?;
    setup_database(&db).await?;
    Ok(db)
}

/// Initialize database in-memory (for testing)
pub async fn init_memory() -> Result<DbConnection> {
    let db = Surreal::new::<Mem>(()).await?;
    setup_database(&db).await?;
    Ok(db)
}

/// Setup database namespace, database, and schema
async fn setup_database(db: &DbConnection) -> Result<()> {
    db.use_ns("agentdesk").use_db("agents").await?;
    schema::initialize_schema(db).await?;
    Ok(())
}
