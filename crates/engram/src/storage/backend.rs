//! Capabilities the engine consumes but does not implement
//!
//! The Working tier lives in an external note store indexed by embedding,
//! and embeddings come from an external model. Both may be remote, so every
//! call is async and fallible; callers are expected to apply their own
//! timeouts.

use async_trait::async_trait;

use crate::error::Result;
use crate::memory::types::{Metadata, NoteId, ScoredNote, SimilarNote, StoredNote};

/// Key-value + vector-similarity store holding the Working tier.
///
/// Implementations must make `upsert` and `delete` atomic per key. The
/// engine never relies on multi-key transactions.
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Insert or replace the note keyed by `note.note_id`.
    async fn upsert(&self, note: &ScoredNote, embedding: &[f32], metadata: &Metadata) -> Result<()>;

    /// Replace a stored note's fields and metadata, keeping its embedding.
    ///
    /// Returns `false` if the note does not exist.
    async fn update(&self, note: &ScoredNote) -> Result<bool>;

    /// Fetch a note by id.
    async fn get(&self, note_id: NoteId) -> Result<Option<ScoredNote>>;

    /// Delete a note, returning whether it existed.
    async fn delete(&self, note_id: NoteId) -> Result<bool>;

    /// Nearest neighbours of `embedding`, optionally restricted to a section.
    async fn search_similar(
        &self,
        embedding: &[f32],
        limit: usize,
        section: Option<&str>,
    ) -> Result<Vec<SimilarNote>>;

    /// Number of notes in the Working tier.
    async fn count(&self) -> Result<usize>;

    /// Every note with its stored embedding, optionally restricted to a section.
    async fn list(&self, section: Option<&str>) -> Result<Vec<StoredNote>>;
}

/// Text embedding model.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Text-generation capability used to reword two near-duplicate notes into one.
#[async_trait]
pub trait ContentMerger: Send + Sync {
    async fn merge(&self, primary: &str, secondary: &str) -> Result<String>;

    /// Merger name for logging
    fn name(&self) -> &'static str;
}

/// Embed `text`, degrading to an empty vector when the embedder fails.
pub(crate) async fn embed_or_empty(embedder: &dyn Embedder, text: &str) -> Vec<f32> {
    match embedder.embed(text).await {
        Ok(embedding) => embedding,
        Err(e) => {
            tracing::warn!(error = %e, "Embedding unavailable, continuing with empty vector");
            Vec::new()
        }
    }
}
