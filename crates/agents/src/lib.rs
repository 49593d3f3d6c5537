//! Knowledge pipeline for agentdesk
//!
//! This crate contains:
//! - TextExtractor: PDF text with per-page OCR fallback
//! - Chunker: overlapping character windows
//! - KnowledgeIndexer: appends embedded chunks to an agent's index
//! - RetrievalAnswerer: retrieval-augmented answers behind a confidence gate
//! - AgentSessionPool: per-(agent, user) answerer cache with idle eviction
//! - KnowledgeService: ingest/chat entry points tying the above together
//! - prompt: system prompts generated from an agent's description and documents

pub mod answerer;
pub mod chunker;
pub mod config;
pub mod directory;
pub mod error;
pub mod extractor;
pub mod gate;
pub mod indexer;
pub mod pool;
pub mod prompt;
pub mod provider;
pub mod service;
pub mod tools;

pub use answerer::{Answer, AnswererContext, AnswererState, RetrievalAnswerer};
pub use chunker::{Chunker, ChunkerConfig};
pub use config::{InvalidationPolicy, Settings};
pub use directory::AgentDirectory;
pub use error::{AgentError, Result};
pub use extractor::{ExtractorConfig, LayoutExtractor, OcrEngine, TextExtractor};
pub use gate::{AnswerGate, ConfidenceGate};
pub use indexer::{DocumentStatus, IngestDocument, IngestReport, KnowledgeIndexer};
pub use pool::AgentSessionPool;
pub use prompt::{generate_system_prompt, knowledge_summary};
pub use provider::{Embedder, GenerationRequest, LanguageModel, ModelClient, ProviderKind};
pub use service::{ChatOutcome, KnowledgeService};
pub use tools::{ToolHandle, ToolRegistry};
