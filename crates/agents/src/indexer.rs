//! Knowledge indexer - turns uploaded documents into an agent's vector index

use crate::chunker::Chunker;
use crate::extractor::TextExtractor;
use crate::provider::Embedder;
use crate::{AgentError, Result};
use agentdesk_core::{DocumentChunk, IndexLocation};
use agentdesk_db::{IndexStore, VectorIndex};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_EMBED_BATCH_SIZE: usize = 64;

/// An uploaded document
#[derive(Debug, Clone)]
pub struct IngestDocument {
    /// Used only to report per-document failures
    pub name: String,
    pub bytes: Vec<u8>,
}

impl IngestDocument {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentStatus {
    Indexed { chunks: usize },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentOutcome {
    pub name: String,
    pub status: DocumentStatus,
}

/// Result of one ingest call
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub location: IndexLocation,
    pub chunks_added: usize,
    pub total_chunks: usize,
    pub documents: Vec<DocumentOutcome>,
}

impl IngestReport {
    pub fn failed(&self) -> impl Iterator<Item = &DocumentOutcome> {
        self.documents
            .iter()
            .filter(|d| matches!(d.status, DocumentStatus::Failed { .. }))
    }

    pub fn indexed_count(&self) -> usize {
        self.documents.len() - self.failed().count()
    }
}

/// Per-agent writer locks. An entry lives only while some writer holds or
/// waits on it.
#[derive(Default)]
struct WriterLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl WriterLocks {
    async fn acquire(&self, agent_id: &str) -> WriterGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(agent_id.to_string()).or_default())
        };
        WriterGuard {
            locks: self,
            agent_id: agent_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    fn release(&self, agent_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // New handles are only cloned under this lock, so a count of one
        // means nobody else holds or waits on the entry.
        if locks
            .get(agent_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(agent_id);
        }
    }

    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

struct WriterGuard<'a> {
    locks: &'a WriterLocks,
    agent_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        // Release the mutex (and its handle) before pruning the entry.
        self.guard.take();
        self.locks.release(&self.agent_id);
    }
}

pub struct KnowledgeIndexer {
    extractor: TextExtractor,
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    store: IndexStore,
    embed_batch_size: usize,
    document_timeout: Option<Duration>,
    writers: WriterLocks,
}

impl KnowledgeIndexer {
    pub fn new(
        extractor: TextExtractor,
        chunker: Chunker,
        embedder: Arc<dyn Embedder>,
        store: IndexStore,
    ) -> Self {
        Self {
            extractor,
            chunker,
            embedder,
            store,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            document_timeout: None,
            writers: WriterLocks::default(),
        }
    }

    pub fn with_embed_batch_size(mut self, size: usize) -> Self {
        self.embed_batch_size = size.max(1);
        self
    }

    /// Bound the time spent extracting any single document
    pub fn with_document_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.document_timeout = timeout;
        self
    }

    /// Extract one document's text under the per-document timeout
    pub async fn extract_text(&self, document: &IngestDocument) -> Result<String> {
        match self.document_timeout {
            Some(limit) => tokio::time::timeout(limit, self.extractor.extract(&document.bytes))
                .await
                .map_err(|_| {
                    AgentError::Extraction(format!("Extraction timed out after {:?}", limit))
                })?,
            None => self.extractor.extract(&document.bytes).await,
        }
    }

    /// Extract, chunk and embed `documents`, then append them to the agent's
    /// index (creating it if needed).
    ///
    /// Documents that fail extraction are reported in the returned
    /// [`IngestReport`] and skipped. If no document yields any text the call
    /// fails with [`AgentError::NoValidText`]. Embedding or write failures
    /// fail the whole call and leave the canonical index untouched.
    #[instrument(skip(self, documents), fields(documents = documents.len()))]
    pub async fn ingest(
        &self,
        agent_id: &str,
        documents: &[IngestDocument],
    ) -> Result<IngestReport> {
        self.store
            .location_for(agent_id)
            .map_err(|e| AgentError::Validation(e.to_string()))?;

        let mut outcomes = Vec::with_capacity(documents.len());
        let mut chunks: Vec<DocumentChunk> = Vec::new();

        for document in documents {
            match self.extract_text(document).await {
                Ok(text) => {
                    let document_chunks = self.chunker.split(&text);
                    debug!("{}: {} chunks", document.name, document_chunks.len());
                    outcomes.push(DocumentOutcome {
                        name: document.name.clone(),
                        status: DocumentStatus::Indexed {
                            chunks: document_chunks.len(),
                        },
                    });
                    chunks.extend(document_chunks);
                }
                Err(e) => {
                    warn!("Skipping {}: {}", document.name, e);
                    outcomes.push(DocumentOutcome {
                        name: document.name.clone(),
                        status: DocumentStatus::Failed {
                            error: e.to_string(),
                        },
                    });
                }
            }
        }

        if chunks.is_empty() {
            let failed = outcomes
                .iter()
                .filter(|o| matches!(o.status, DocumentStatus::Failed { .. }))
                .map(|o| o.name.clone())
                .collect();
            return Err(AgentError::NoValidText { failed });
        }

        let embeddings = self.embed_chunks(&chunks).await?;
        let chunks_added = chunks.len();

        let _writer = self.writers.acquire(agent_id).await;

        let store = self.store.clone();
        let agent = agent_id.to_string();
        let (location, total_chunks) = tokio::task::spawn_blocking(move || {
            let mut index = store
                .load(&agent)?
                .unwrap_or_else(|| VectorIndex::new(agent.clone()));
            index.append(chunks, embeddings)?;
            let location = store.save(&mut index)?;
            Ok::<_, agentdesk_db::DbError>((location, index.len()))
        })
        .await
        .map_err(|e| AgentError::IndexWrite(format!("Index write task failed: {}", e)))?
        .map_err(|e| AgentError::IndexWrite(e.to_string()))?;

        info!(
            "Indexed {} chunks for agent {} ({} total, generation {})",
            chunks_added, agent_id, total_chunks, location.generation
        );

        Ok(IngestReport {
            location,
            chunks_added,
            total_chunks,
            documents: outcomes,
        })
    }

    async fn embed_chunks(&self, chunks: &[DocumentChunk]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let mut embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.embed_batch_size) {
            let batch_embeddings = self
                .embedder
                .embed(batch)
                .await
                .map_err(|e| AgentError::IndexWrite(format!("Embedding failed: {}", e)))?;
            if batch_embeddings.len() != batch.len() {
                return Err(AgentError::IndexWrite(format!(
                    "Embedding returned {} vectors for {} chunks",
                    batch_embeddings.len(),
                    batch.len()
                )));
            }
            embeddings.extend(batch_embeddings);
        }

        Ok(embeddings)
    }
}
