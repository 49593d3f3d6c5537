//! Knowledge service - the entry points the surrounding system calls

use crate::answerer::{Answer, AnswererContext};
use crate::chunker::Chunker;
use crate::config::{InvalidationPolicy, Settings};
use crate::directory::AgentDirectory;
use crate::extractor::{TesseractOcr, TextExtractor};
use crate::gate::ConfidenceGate;
use crate::indexer::{IngestDocument, IngestReport, KnowledgeIndexer};
use crate::pool::AgentSessionPool;
use crate::prompt;
use crate::tools::ToolRegistry;
use crate::{AgentError, Result};
use agentdesk_core::{validate_agent_id, ChatTurn};
use agentdesk_db::IndexStore;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Reply to one chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatOutcome {
    pub answer: Answer,
    /// The caller's history with the user message and the reply appended
    pub history: Vec<ChatTurn>,
}

pub struct KnowledgeService {
    directory: Arc<dyn AgentDirectory>,
    indexer: KnowledgeIndexer,
    pool: Arc<AgentSessionPool>,
    policy: InvalidationPolicy,
}

impl KnowledgeService {
    pub fn new(
        directory: Arc<dyn AgentDirectory>,
        indexer: KnowledgeIndexer,
        pool: Arc<AgentSessionPool>,
    ) -> Self {
        Self {
            directory,
            indexer,
            pool,
            policy: InvalidationPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: InvalidationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Wire up the HTTP model client, PDF extractor and on-disk index store
    pub fn from_settings(settings: &Settings, directory: Arc<dyn AgentDirectory>) -> Result<Self> {
        let client = Arc::new(settings.provider.client());

        let extractor = TextExtractor::pdf(
            TesseractOcr::new(&settings.tesseract_bin, &settings.pdftoppm_bin),
            settings.extractor,
        );
        let indexer = KnowledgeIndexer::new(
            extractor,
            Chunker::new(settings.chunker)?,
            client.clone(),
            IndexStore::new(settings.index_dir()),
        )
        .with_embed_batch_size(settings.embed_batch_size)
        .with_document_timeout(settings.document_timeout);

        let context = AnswererContext {
            directory: Arc::clone(&directory),
            tools: Arc::new(ToolRegistry::builtin()),
            embedder: client.clone(),
            model: client,
            gate: Arc::new(ConfidenceGate::default()),
            top_k: settings.top_k,
        };
        let pool =
            Arc::new(AgentSessionPool::new(context).with_idle_timeout(settings.idle_timeout));

        Ok(Self::new(directory, indexer, pool).with_policy(settings.invalidation))
    }

    pub fn pool(&self) -> &Arc<AgentSessionPool> {
        &self.pool
    }

    /// Index uploaded documents for an agent and retire sessions that would
    /// otherwise keep answering from the old index.
    #[instrument(skip(self, documents), fields(documents = documents.len()))]
    pub async fn ingest(
        &self,
        agent_id: &str,
        user_id: &str,
        documents: &[IngestDocument],
    ) -> Result<IngestReport> {
        validate_agent_id(agent_id)?;
        if self.directory.lookup(agent_id).await?.is_none() {
            return Err(AgentError::ConfigNotFound(agent_id.to_string()));
        }

        let report = self.indexer.ingest(agent_id, documents).await?;
        let recorded = self
            .directory
            .record_index_location(agent_id, &report.location)
            .await;

        // The new index is canonical at this point, recorded or not.
        self.retire_sessions(agent_id, user_id, report.location.generation);
        if let Err(e) = recorded {
            warn!(
                "Index generation {} for agent {} written but not recorded: {}",
                report.location.generation, agent_id, e
            );
            return Err(e);
        }

        info!(
            "Ingested {}/{} documents for agent {}",
            report.indexed_count(),
            report.documents.len(),
            agent_id
        );
        Ok(report)
    }

    fn retire_sessions(&self, agent_id: &str, user_id: &str, generation: u64) {
        match self.policy {
            InvalidationPolicy::Uploader => {
                self.pool.invalidate(agent_id, user_id);
            }
            InvalidationPolicy::Agent => {
                // The uploader always starts fresh, whatever it had loaded.
                self.pool.invalidate(agent_id, user_id);
                self.pool.invalidate_stale(agent_id, generation);
            }
        }
    }

    /// Summarize documents for a generated system prompt. Documents that
    /// fail extraction are left out.
    #[instrument(skip(self, documents), fields(documents = documents.len()))]
    pub async fn knowledge_summary(&self, documents: &[IngestDocument]) -> String {
        let mut texts = Vec::with_capacity(documents.len());
        for document in documents {
            match self.indexer.extract_text(document).await {
                Ok(text) => texts.push(text),
                Err(e) => warn!("Leaving {} out of the summary: {}", document.name, e),
            }
        }
        prompt::knowledge_summary(&texts)
    }

    /// Answer a message and return the extended transcript.
    ///
    /// The caller owns persistence of the returned history.
    #[instrument(skip(self, message, history))]
    pub async fn chat(
        &self,
        agent_id: &str,
        user_id: &str,
        message: &str,
        history: Vec<ChatTurn>,
    ) -> Result<ChatOutcome> {
        let answerer = self.pool.get_or_create(agent_id, user_id);
        let answer = answerer.answer(message, &history).await?;

        let mut history = history;
        history.push(ChatTurn::user(message));
        history.push(ChatTurn::assistant(answer.text()));

        Ok(ChatOutcome { answer, history })
    }

    pub fn invalidate(&self, agent_id: &str, user_id: &str) -> bool {
        self.pool.invalidate(agent_id, user_id)
    }

    pub fn invalidate_agent(&self, agent_id: &str) -> usize {
        self.pool.invalidate_agent(agent_id)
    }
}
