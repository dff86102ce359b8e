//! Test utilities for engram - in-memory backends and mocks
//!
//! The engine only talks to the Working tier and the embedding model through
//! the `NoteStore` and `Embedder` traits. These implementations let unit and
//! integration tests run without either:
//! - `InMemoryNoteStore`: a concurrent map with brute-force similarity search
//! - `MockEmbedder`: deterministic vectors derived from a text hash
//! - `FixedEmbedder`: explicit vectors for chosen texts
//! - `FailingEmbedder` / `FailingNoteStore`: every call fails

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{EngramError, Result};
use crate::memory::types::{Metadata, NoteId, ScoredNote, SimilarNote, StoredNote};
use crate::storage::backend::{Embedder, NoteStore};
use crate::storage::dedup::cosine_similarity;

/// Dimensions of the vectors produced by `MockEmbedder`
pub const MOCK_EMBEDDING_DIM: usize = 384;

/// `NoteStore` backed by a `DashMap`.
#[derive(Debug, Default)]
pub struct InMemoryNoteStore {
    notes: DashMap<NoteId, StoredNote>,
}

impl InMemoryNoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a note directly, bypassing the engine.
    pub fn insert(&self, note: ScoredNote, embedding: Vec<f32>) {
        self.notes
            .insert(note.note_id, StoredNote { note, embedding });
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Stored embedding for a note, if present.
    pub fn embedding(&self, note_id: NoteId) -> Option<Vec<f32>> {
        self.notes.get(&note_id).map(|entry| entry.embedding.clone())
    }

    /// All notes ordered by creation time, then id.
    pub fn snapshot(&self) -> Vec<StoredNote> {
        let mut notes: Vec<StoredNote> = self.notes.iter().map(|e| e.value().clone()).collect();
        notes.sort_by(|a, b| {
            a.note
                .created_at
                .cmp(&b.note.created_at)
                .then_with(|| a.note.note_id.cmp(&b.note.note_id))
        });
        notes
    }
}

#[async_trait]
impl NoteStore for InMemoryNoteStore {
    async fn upsert(&self, note: &ScoredNote, embedding: &[f32], metadata: &Metadata) -> Result<()> {
        let mut note = note.clone();
        note.metadata = metadata.clone();
        self.insert(note, embedding.to_vec());
        Ok(())
    }

    async fn update(&self, note: &ScoredNote) -> Result<bool> {
        Ok(match self.notes.get_mut(&note.note_id) {
            Some(mut entry) => {
                entry.note = note.clone();
                true
            }
            None => false,
        })
    }

    async fn get(&self, note_id: NoteId) -> Result<Option<ScoredNote>> {
        Ok(self.notes.get(&note_id).map(|entry| entry.note.clone()))
    }

    async fn delete(&self, note_id: NoteId) -> Result<bool> {
        Ok(self.notes.remove(&note_id).is_some())
    }

    async fn search_similar(
        &self,
        embedding: &[f32],
        limit: usize,
        section: Option<&str>,
    ) -> Result<Vec<SimilarNote>> {
        let mut hits: Vec<SimilarNote> = self
            .notes
            .iter()
            .filter(|entry| section.is_none_or(|s| entry.note.section.eq_ignore_ascii_case(s)))
            .map(|entry| SimilarNote {
                note_id: entry.note.note_id,
                content: entry.note.content.clone(),
                section: entry.note.section.clone(),
                score: cosine_similarity(embedding, &entry.embedding),
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.notes.len())
    }

    async fn list(&self, section: Option<&str>) -> Result<Vec<StoredNote>> {
        Ok(self
            .snapshot()
            .into_iter()
            .filter(|stored| section.is_none_or(|s| stored.note.section.eq_ignore_ascii_case(s)))
            .collect())
    }
}

/// Embedder producing deterministic vectors from a hash of the text.
///
/// Different texts give effectively unrelated vectors, so mock embeddings
/// never look like near-duplicates unless the text is identical.
#[derive(Debug, Default)]
pub struct MockEmbedder {
    calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The vector `embed` returns for `text`, in range [-1, 1].
    pub fn vector_for(text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let seed = hasher.finish();

        (0..MOCK_EMBEDDING_DIM)
            .map(|i| {
                let x = seed
                    .wrapping_mul(i as u64 + 1)
                    .wrapping_add(0x9e3779b97f4a7c15);
                let normalized = (x as f32) / (u64::MAX as f32);
                (normalized * 2.0) - 1.0
            })
            .collect()
    }

    /// Number of `embed` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::vector_for(text))
    }
}

/// Embedder returning chosen vectors for chosen texts.
///
/// Texts without a chosen vector fall back to `MockEmbedder::vector_for`.
#[derive(Debug, Default)]
pub struct FixedEmbedder {
    vectors: HashMap<String, Vec<f32>>,
}

impl FixedEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.into(), vector);
        self
    }
}

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| MockEmbedder::vector_for(text)))
    }
}

/// Embedder that is always unreachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(EngramError::Embedding("embedding model unreachable".to_string()))
    }
}

/// Note store that is always unreachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingNoteStore;

fn unavailable<T>() -> Result<T> {
    Err(EngramError::BackendUnavailable(
        "note store unreachable".to_string(),
    ))
}

#[async_trait]
impl NoteStore for FailingNoteStore {
    async fn upsert(&self, _note: &ScoredNote, _embedding: &[f32], _metadata: &Metadata) -> Result<()> {
        unavailable()
    }

    async fn update(&self, _note: &ScoredNote) -> Result<bool> {
        unavailable()
    }

    async fn get(&self, _note_id: NoteId) -> Result<Option<ScoredNote>> {
        unavailable()
    }

    async fn delete(&self, _note_id: NoteId) -> Result<bool> {
        unavailable()
    }

    async fn search_similar(
        &self,
        _embedding: &[f32],
        _limit: usize,
        _section: Option<&str>,
    ) -> Result<Vec<SimilarNote>> {
        unavailable()
    }

    async fn count(&self) -> Result<usize> {
        unavailable()
    }

    async fn list(&self, _section: Option<&str>) -> Result<Vec<StoredNote>> {
        unavailable()
    }
}
