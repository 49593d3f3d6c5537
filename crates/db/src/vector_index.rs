//! On-disk vector index, one file per agent
//!
//! The index is a JSON document holding every (embedding, chunk text) pair
//! ingested for an agent. Writes go to a temporary file in the same
//! directory which is then renamed over the canonical path, so a reader
//! opening the index mid-write sees either the old or the new file.

use crate::{DbError, Result};
use agentdesk_core::{validate_agent_id, DocumentChunk, IndexLocation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

const INDEX_EXTENSION: &str = "json";

/// One embedded chunk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub ordinal: usize,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// A retrieval hit
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub text: String,
    pub ordinal: usize,
    pub score: f32,
}

/// All embedded chunks for one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    pub agent_id: String,
    /// Bumped on every save; 0 means never written
    pub generation: u64,
    /// Embedding width shared by every entry; 0 while empty
    pub dimension: usize,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Create an empty, unsaved index
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            generation: 0,
            dimension: 0,
            updated_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append chunks with their embeddings. Returns the number added.
    ///
    /// Nothing is appended unless every embedding matches the index width.
    pub fn append(
        &mut self,
        chunks: Vec<DocumentChunk>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<usize> {
        if chunks.len() != embeddings.len() {
            return Err(DbError::CountMismatch {
                chunks: chunks.len(),
                embeddings: embeddings.len(),
            });
        }

        let mut dimension = self.dimension;
        for embedding in &embeddings {
            if dimension == 0 {
                dimension = embedding.len();
            }
            if embedding.len() != dimension || dimension == 0 {
                return Err(DbError::DimensionMismatch {
                    expected: dimension,
                    actual: embedding.len(),
                });
            }
        }

        let added = chunks.len();
        self.dimension = dimension;
        self.entries.extend(
            chunks
                .into_iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| IndexEntry {
                    ordinal: chunk.ordinal,
                    text: chunk.text,
                    embedding,
                }),
        );
        Ok(added)
    }

    /// Top-k entries by cosine similarity, best first.
    ///
    /// Ties keep insertion order so results are reproducible. A query whose
    /// width differs from the index (say, after the embedding model changed)
    /// is an error rather than an empty result.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(DbError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, cosine_similarity(query, &entry.embedding)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                text: self.entries[i].text.clone(),
                ordinal: self.entries[i].ordinal,
                score,
            })
            .collect())
    }
}

/// Cosine similarity; 0.0 when either vector has zero norm
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Directory of per-agent index files
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical index path for an agent
    pub fn location_for(&self, agent_id: &str) -> Result<PathBuf> {
        validate_agent_id(agent_id)?;
        Ok(self
            .root
            .join(format!("{}.{}", agent_id, INDEX_EXTENSION)))
    }

    /// Load an agent's index, `None` if it has never been written
    #[instrument(skip(self))]
    pub fn load(&self, agent_id: &str) -> Result<Option<VectorIndex>> {
        let path = self.location_for(agent_id)?;
        Self::load_path(&path)
    }

    /// Load an index from an explicit path, `None` if missing
    pub fn load_path(path: &Path) -> Result<Option<VectorIndex>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let index: VectorIndex =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| DbError::CorruptIndex {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if index.entries.iter().any(|e| e.embedding.len() != index.dimension) {
            return Err(DbError::CorruptIndex {
                path: path.to_path_buf(),
                reason: "entry width differs from index dimension".into(),
            });
        }

        debug!("Loaded index {} ({} entries)", path.display(), index.len());
        Ok(Some(index))
    }

    /// Persist an index under its agent's canonical path.
    ///
    /// Bumps the generation, writes a temporary sibling file, fsyncs it and
    /// renames it into place. On failure the canonical file is untouched.
    #[instrument(skip(self, index), fields(agent_id = %index.agent_id, entries = index.len()))]
    pub fn save(&self, index: &mut VectorIndex) -> Result<IndexLocation> {
        let path = self.location_for(&index.agent_id)?;
        fs::create_dir_all(&self.root)?;

        index.generation += 1;
        index.updated_at = Utc::now();

        let mut tmp = NamedTempFile::new_in(&self.root)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, &*index)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| DbError::Io(e.error))?;

        info!(
            "Saved index {} (generation {}, {} entries)",
            path.display(),
            index.generation,
            index.len()
        );

        Ok(IndexLocation::new(
            index.agent_id.clone(),
            path,
            index.generation,
        ))
    }
}
