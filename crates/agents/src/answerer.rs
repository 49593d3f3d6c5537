//! Retrieval answerer - one agent's live conversational capability
//!
//! An answerer starts `Unloaded`. The first call to [`RetrievalAnswerer::answer`]
//! (or an explicit [`RetrievalAnswerer::load_config`]) moves it through
//! `Loading` to `Ready`; concurrent callers wait for the single load rather
//! than starting their own. There is no way back to `Unloaded`: dropping the
//! session is how an answerer is retired.

use crate::directory::AgentDirectory;
use crate::gate::AnswerGate;
use crate::provider::{Embedder, GenerationRequest, LanguageModel};
use crate::tools::{ToolHandle, ToolRegistry};
use crate::{AgentError, Result};
use agentdesk_core::{AgentConfig, ChatTurn};
use agentdesk_db::{IndexStore, VectorIndex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

pub const NO_KNOWLEDGE_BASE_RESPONSE: &str = "There is no knowledge base available.";
pub const DECLINE_RESPONSE: &str = "Sorry, I can't provide a valid answer for that question. \
     Would you like to chat with a live agent?";
pub const DEFAULT_TOP_K: usize = 3;

/// Outcome of a chat turn. Only `Grounded` carries model output; the other
/// two are fixed responses that callers may branch on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Grounded(String),
    NoKnowledgeBase,
    Declined,
}

impl Answer {
    pub fn text(&self) -> &str {
        match self {
            Answer::Grounded(text) => text,
            Answer::NoKnowledgeBase => NO_KNOWLEDGE_BASE_RESPONSE,
            Answer::Declined => DECLINE_RESPONSE,
        }
    }

    pub fn is_grounded(&self) -> bool {
        matches!(self, Answer::Grounded(_))
    }

    /// Whether the user should be offered a human
    pub fn offers_handoff(&self) -> bool {
        matches!(self, Answer::Declined)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswererState {
    Unloaded,
    Loading,
    Ready,
}

/// Collaborators shared by every answerer in a pool
#[derive(Clone)]
pub struct AnswererContext {
    pub directory: Arc<dyn AgentDirectory>,
    pub tools: Arc<ToolRegistry>,
    pub embedder: Arc<dyn Embedder>,
    pub model: Arc<dyn LanguageModel>,
    pub gate: Arc<dyn AnswerGate>,
    pub top_k: usize,
}

/// State captured by a successful load
#[derive(Debug)]
pub struct LoadedAgent {
    pub config: AgentConfig,
    pub tools: Vec<ToolHandle>,
    pub index: Option<Arc<VectorIndex>>,
}

impl LoadedAgent {
    pub fn generation(&self) -> Option<u64> {
        self.index.as_ref().map(|i| i.generation)
    }
}

/// Marks a load in flight. Lowered on drop, so a caller that gives up
/// mid-load leaves the answerer `Unloaded` rather than stuck `Loading`.
struct LoadingFlag<'a>(&'a AtomicBool);

impl<'a> LoadingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for LoadingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct RetrievalAnswerer {
    agent_id: String,
    context: AnswererContext,
    loaded: OnceCell<LoadedAgent>,
    loading: AtomicBool,
}

impl RetrievalAnswerer {
    /// Create an unloaded answerer; nothing is fetched until first use
    pub fn new(agent_id: impl Into<String>, context: AnswererContext) -> Self {
        Self {
            agent_id: agent_id.into(),
            context,
            loaded: OnceCell::new(),
            loading: AtomicBool::new(false),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn state(&self) -> AnswererState {
        if self.loaded.initialized() {
            AnswererState::Ready
        } else if self.loading.load(Ordering::Acquire) {
            AnswererState::Loading
        } else {
            AnswererState::Unloaded
        }
    }

    /// Generation of the index this answerer reads, if loaded with one
    pub fn loaded_generation(&self) -> Option<u64> {
        self.loaded.get().and_then(LoadedAgent::generation)
    }

    /// True when this answerer reads, or may be reading, something other
    /// than `generation`. A load in flight may have fetched the config
    /// before the index moved, so it counts as stale. Unloaded answerers
    /// will pick up the latest index and are never stale.
    pub fn is_stale(&self, generation: u64) -> bool {
        match self.loaded.get() {
            Some(loaded) => loaded.generation() != Some(generation),
            None => self.loading.load(Ordering::Acquire),
        }
    }

    /// Load configuration, tools and index exactly once.
    ///
    /// A failed load leaves the answerer `Unloaded` so a later call retries.
    pub async fn load_config(&self) -> Result<&LoadedAgent> {
        self.loaded
            .get_or_try_init(|| async {
                let _loading = LoadingFlag::raise(&self.loading);
                self.fetch().await
            })
            .await
    }

    #[instrument(skip(self), fields(agent_id = %self.agent_id))]
    async fn fetch(&self) -> Result<LoadedAgent> {
        let config = self
            .context
            .directory
            .lookup(&self.agent_id)
            .await?
            .ok_or_else(|| AgentError::ConfigNotFound(self.agent_id.clone()))?;

        let tools = self.context.tools.resolve(config.tools.as_slice());

        let index = match config.vector_index_path.clone() {
            Some(path) => {
                let loaded = tokio::task::spawn_blocking(move || IndexStore::load_path(&path))
                    .await
                    .map_err(|e| AgentError::Service(format!("Index load task failed: {}", e)))??;
                loaded.filter(|index| !index.is_empty()).map(Arc::new)
            }
            None => None,
        };

        info!(
            "Loaded agent {} ({} tools, index: {})",
            config.name,
            tools.len(),
            index
                .as_ref()
                .map(|i| format!("{} chunks, generation {}", i.len(), i.generation))
                .unwrap_or_else(|| "none".into())
        );

        Ok(LoadedAgent {
            config,
            tools,
            index,
        })
    }

    /// Answer a query against the agent's knowledge base.
    #[instrument(skip(self, query, history), fields(agent_id = %self.agent_id))]
    pub async fn answer(&self, query: &str, history: &[ChatTurn]) -> Result<Answer> {
        let loaded = self.load_config().await?;

        let Some(index) = loaded.index.as_ref() else {
            debug!("No knowledge base for agent {}", self.agent_id);
            return Ok(Answer::NoKnowledgeBase);
        };

        let query_embedding = self.context.embedder.embed_one(query).await?;
        let hits = index.search(&query_embedding, self.context.top_k)?;
        debug!(
            "Retrieved {} chunks (best score {:.3})",
            hits.len(),
            hits.first().map(|h| h.score).unwrap_or_default()
        );

        let request = GenerationRequest {
            system_prompt: loaded.config.system_prompt.clone(),
            context: hits.into_iter().map(|h| h.text).collect(),
            history: history.to_vec(),
            query: query.to_string(),
            tools: loaded.tools.clone(),
        };

        let raw = self.context.model.generate(&request).await?;
        let answer = raw.trim();

        if self.context.gate.accept(answer) {
            Ok(Answer::Grounded(answer.to_string()))
        } else {
            info!("Answer failed confidence gate ({} chars)", answer.chars().count());
            Ok(Answer::Declined)
        }
    }
}
