//! Common test utilities

#![allow(dead_code)]

use agentdesk_agents::{
    AgentDirectory, AgentError, AgentSessionPool, AnswererContext, Chunker, ConfidenceGate,
    Embedder, ExtractorConfig, GenerationRequest, IngestDocument, InvalidationPolicy,
    KnowledgeIndexer, KnowledgeService, LanguageModel, LayoutExtractor, OcrEngine, Result,
    TextExtractor, ToolRegistry,
};
use agentdesk_core::{AgentConfig, IndexLocation};
use agentdesk_db::{init_memory, DbError, IndexStore, Repository};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const EMBEDDING_DIM: usize = 32;

/// Create a test repository with in-memory database
pub async fn create_test_repo() -> Repository {
    let db = init_memory().await.expect("Failed to create test database");
    Repository::new(db)
}

/// Bag-of-words hashing embedder. Same text, same vector.
#[derive(Default)]
pub struct StubEmbedder {
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl StubEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; EMBEDDING_DIM];
        vector[0] = 1.0;
        for word in text.split_whitespace() {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            vector[(hasher.finish() as usize) % EMBEDDING_DIM] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(AgentError::Service("embedding endpoint unavailable".into()));
        }
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Language model that always replies with the configured text
pub struct ScriptedModel {
    reply: Mutex<String>,
    calls: AtomicUsize,
    last_request: Mutex<Option<GenerationRequest>>,
}

impl ScriptedModel {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: Mutex::new(reply.into()),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn set_reply(&self, reply: impl Into<String>) {
        *self.reply.lock().unwrap() = reply.into();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        Ok(self.reply.lock().unwrap().clone())
    }
}

/// Test documents are UTF-8 text with pages separated by form feeds.
/// Anything that is not UTF-8 fails to parse.
pub struct PageTextLayout;

impl LayoutExtractor for PageTextLayout {
    fn pages(&self, document: &[u8]) -> Result<Vec<String>> {
        let text = std::str::from_utf8(document)
            .map_err(|e| AgentError::Extraction(format!("Failed to parse document: {}", e)))?;
        Ok(text.split('\u{c}').map(str::to_string).collect())
    }
}

pub const OCR_TEXT: &str = "Text recognized from a scanned page of the handbook.";

#[derive(Default)]
pub struct CountingOcr {
    calls: AtomicUsize,
}

impl CountingOcr {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrEngine for CountingOcr {
    async fn recognize(&self, _document: &[u8], _page_index: usize, _dpi: u32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(OCR_TEXT.to_string())
    }
}

/// `len` characters of prose without blank stretches
pub fn filler(len: usize) -> String {
    "The employee handbook describes leave, notice periods and benefits. "
        .chars()
        .cycle()
        .take(len)
        .collect()
}

pub fn document(name: &str, pages: &[String]) -> IngestDocument {
    IngestDocument::new(name, pages.join("\u{c}").into_bytes())
}

pub fn broken_document(name: &str) -> IngestDocument {
    IngestDocument::new(name, vec![0xff, 0xfe, 0x00, 0x9f])
}

pub fn context_for(
    repo: &Repository,
    embedder: Arc<StubEmbedder>,
    model: Arc<ScriptedModel>,
) -> AnswererContext {
    AnswererContext {
        directory: Arc::new(repo.clone()),
        tools: Arc::new(ToolRegistry::builtin()),
        embedder,
        model,
        gate: Arc::new(ConfidenceGate::default()),
        top_k: 3,
    }
}

/// Repository-backed directory that can hold lookups after reading the
/// record, and can refuse to record index locations.
pub struct DelayedDirectory {
    repo: Repository,
    delay_ms: AtomicU64,
    fail_record: AtomicBool,
}

impl DelayedDirectory {
    pub fn new(repo: Repository) -> Self {
        Self {
            repo,
            delay_ms: AtomicU64::new(0),
            fail_record: AtomicBool::new(false),
        }
    }

    pub fn set_lookup_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_record_failing(&self, fail: bool) {
        self.fail_record.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AgentDirectory for DelayedDirectory {
    async fn lookup(&self, agent_id: &str) -> Result<Option<AgentConfig>> {
        let config = self.repo.lookup(agent_id).await?;
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(config)
    }

    async fn record_index_location(&self, agent_id: &str, location: &IndexLocation) -> Result<()> {
        if self.fail_record.load(Ordering::SeqCst) {
            return Err(DbError::QueryFailed("metadata store unavailable".into()).into());
        }
        self.repo.record_index_location(agent_id, location).await
    }
}

/// A service wired to stubs, an in-memory database and a temporary index root
pub struct Harness {
    pub dir: TempDir,
    pub repo: Repository,
    pub embedder: Arc<StubEmbedder>,
    pub model: Arc<ScriptedModel>,
    pub ocr: Arc<CountingOcr>,
    pub service: KnowledgeService,
}

impl Harness {
    pub async fn new(policy: InvalidationPolicy) -> Self {
        Self::with_directory(policy, |repo| {
            Arc::new(repo.clone()) as Arc<dyn AgentDirectory>
        })
        .await
    }

    /// Like [`Harness::new`], with the service and pool reading agents
    /// through `directory`
    pub async fn with_directory<F>(policy: InvalidationPolicy, directory: F) -> Self
    where
        F: FnOnce(&Repository) -> Arc<dyn AgentDirectory>,
    {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let repo = create_test_repo().await;
        let directory = directory(&repo);
        let embedder = Arc::new(StubEmbedder::default());
        let model = Arc::new(ScriptedModel::new(
            "14 days notice required for termination.",
        ));
        let ocr = Arc::new(CountingOcr::default());

        let extractor = TextExtractor::new(
            Arc::new(PageTextLayout),
            ocr.clone(),
            ExtractorConfig::default(),
        );
        let indexer = KnowledgeIndexer::new(
            extractor,
            Chunker::default(),
            embedder.clone(),
            IndexStore::new(dir.path().join("vectors")),
        );
        let mut context = context_for(&repo, embedder.clone(), model.clone());
        context.directory = Arc::clone(&directory);
        let pool = Arc::new(AgentSessionPool::new(context));
        let service = KnowledgeService::new(directory, indexer, pool).with_policy(policy);

        Self {
            dir,
            repo,
            embedder,
            model,
            ocr,
            service,
        }
    }

    /// A harness reading agents through a [`DelayedDirectory`]
    pub async fn delayed(policy: InvalidationPolicy) -> (Self, Arc<DelayedDirectory>) {
        let mut delayed = None;
        let harness = Self::with_directory(policy, |repo| {
            let directory = Arc::new(DelayedDirectory::new(repo.clone()));
            delayed = Some(Arc::clone(&directory));
            directory as Arc<dyn AgentDirectory>
        })
        .await;
        let directory = delayed.expect("Directory was not created");
        (harness, directory)
    }

    pub fn index_store(&self) -> IndexStore {
        IndexStore::new(self.dir.path().join("vectors"))
    }

    pub async fn add_agent(&self, id: &str) -> AgentConfig {
        let agent = AgentConfig::new(id, format!("{} assistant", id))
            .with_system_prompt("You answer questions about company policy.")
            .with_tools(vec!["file_reader".into(), "unknown_tool".into()]);
        self.repo
            .save_agent(agent)
            .await
            .expect("Failed to save agent")
    }
}
