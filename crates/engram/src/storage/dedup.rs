//! Near-duplicate consolidation for the Working tier
//!
//! Duplicate detection compares every pair of Working notes by cosine
//! similarity of their embeddings. That is O(n²) in the tier size and is only
//! affordable because `should_consolidate` and the archive sweep keep the
//! tier near `max_working_notes`. Growing past that bound needs an
//! approximate nearest-neighbour index behind `find_similar`, keeping the
//! same pairwise-threshold contract.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::ConsolidationConfig;
use crate::error::Result;
use crate::memory::types::{NoteId, ScoredNote, StoredNote, note_id_for};
use crate::storage::archive::ArchiveManager;
use crate::storage::backend::{ContentMerger, Embedder, NoteStore, embed_or_empty};

/// Cosine similarity of two vectors.
///
/// Returns 0.0 when either vector is empty or all zeros, or when their
/// lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Two Working notes at or above the similarity threshold
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicatePair {
    pub note_a: ScoredNote,
    pub note_b: ScoredNote,
    pub similarity: f32,
}

/// Summary of one consolidation pass
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidationReport {
    /// Pairs at or above the threshold when the pass started
    pub duplicates_found: usize,
    /// Merges performed
    pub notes_merged: usize,
    /// Losing notes written to the archive
    pub notes_archived: usize,
    /// Working notes considered
    pub original_count: usize,
    /// Working notes after the pass
    pub final_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Finds and merges near-duplicate Working notes.
pub struct NoteDeduplicator {
    store: Arc<dyn NoteStore>,
    embedder: Arc<dyn Embedder>,
    merger: Option<Arc<dyn ContentMerger>>,
    config: ConsolidationConfig,
}

impl NoteDeduplicator {
    pub fn new(store: Arc<dyn NoteStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self::with_config(store, embedder, ConsolidationConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn NoteStore>,
        embedder: Arc<dyn Embedder>,
        config: ConsolidationConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            merger: None,
            config,
        }
    }

    /// Reword merged notes with `merger` during consolidation passes.
    pub fn with_merger(mut self, merger: Arc<dyn ContentMerger>) -> Self {
        self.merger = Some(merger);
        self
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    /// Every pair of Working notes with similarity at or above `threshold`
    /// (default: the configured similarity threshold), most similar first.
    ///
    /// Notes without an embedding are never paired. If the note store cannot
    /// be listed no pairs are reported.
    pub async fn find_similar(
        &self,
        threshold: Option<f32>,
        section: Option<&str>,
    ) -> Result<Vec<DuplicatePair>> {
        let threshold = threshold.unwrap_or(self.config.similarity_threshold);
        let Some(notes) = self.list_working(section).await else {
            return Ok(Vec::new());
        };

        Ok(similar_pairs(&notes, threshold)
            .into_iter()
            .map(|(i, j, similarity)| DuplicatePair {
                note_a: notes[i].note.clone(),
                note_b: notes[j].note.clone(),
                similarity,
            })
            .collect())
    }

    /// Merge two notes by the numeric rule.
    ///
    /// The more important note is primary (ties go to `a`) and keeps its
    /// content and id. Access counts add up, the earlier `created_at` and the
    /// later `last_accessed` win, the slower decay rate wins, and importance
    /// gains the recurrence boost, clamped to 1.0. Metadata keys missing from
    /// the primary are taken from the secondary.
    pub fn merge_notes(&self, a: &ScoredNote, b: &ScoredNote) -> ScoredNote {
        let (primary, secondary) = if b.importance > a.importance {
            (b, a)
        } else {
            (a, b)
        };

        let mut merged = primary.clone();
        merged.access_count = primary.access_count.saturating_add(secondary.access_count);
        merged.created_at = primary.created_at.min(secondary.created_at);
        merged.last_accessed = primary.last_accessed.max(secondary.last_accessed);
        merged.decay_rate = primary.decay_rate.min(secondary.decay_rate);
        merged.set_importance(primary.importance + self.config.recurrence_boost);

        for (key, value) in &secondary.metadata {
            merged
                .metadata
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }

        merged
    }

    /// Merge two notes, optionally rewording the content with `merger`.
    ///
    /// The numeric rule of `merge_notes` always applies. If the merger fails
    /// or returns nothing, the primary's content is kept. New content means a
    /// new `note_id`.
    pub async fn consolidate(
        &self,
        a: &ScoredNote,
        b: &ScoredNote,
        merger: Option<&dyn ContentMerger>,
    ) -> ScoredNote {
        let mut merged = self.merge_notes(a, b);
        let Some(merger) = merger else {
            return merged;
        };

        let secondary = if merged.note_id == a.note_id { b } else { a };
        match merger.merge(&merged.content, &secondary.content).await {
            Ok(content) if !content.trim().is_empty() => {
                let content = content.trim().to_string();
                if content != merged.content {
                    merged.note_id = note_id_for(&content);
                    merged.content = content;
                }
            }
            Ok(_) => {
                tracing::warn!(merger = merger.name(), "Content merger returned nothing, keeping primary content");
            }
            Err(e) => {
                tracing::warn!(merger = merger.name(), error = %e, "Content merge failed, keeping primary content");
            }
        }

        merged
    }

    /// Merge every duplicate pair greedily, most similar first, archiving
    /// each losing note.
    ///
    /// A note that lost a merge is out of the pass. A surviving note may
    /// absorb several others; later pairs see its merged state. The id
    /// holding the merged note is never deleted from the Working tier.
    pub async fn run_consolidation_pass(
        &self,
        archive: &ArchiveManager,
        section: Option<&str>,
    ) -> Result<ConsolidationReport> {
        let threshold = self.config.similarity_threshold;
        let Some(notes) = self.list_working(section).await else {
            return Ok(self.empty_report(0));
        };
        let original_count = notes.len();
        let pairs = similar_pairs(&notes, threshold);

        // Current state of every note by its original id
        let mut current: HashMap<NoteId, StoredNote> = notes
            .iter()
            .map(|stored| (stored.note.note_id, stored.clone()))
            .collect();
        let mut consumed: HashSet<NoteId> = HashSet::new();
        let mut notes_merged = 0;
        let mut notes_archived = 0;

        for &(i, j, similarity) in &pairs {
            let id_a = notes[i].note.note_id;
            let id_b = notes[j].note.note_id;
            if consumed.contains(&id_a) || consumed.contains(&id_b) {
                continue;
            }
            let (Some(a), Some(b)) = (current.get(&id_a).cloned(), current.get(&id_b).cloned())
            else {
                continue;
            };

            let merged = self
                .consolidate(&a.note, &b.note, self.merger.as_deref())
                .await;
            let a_is_primary = b.note.importance <= a.note.importance;
            let (key_primary, primary, key_loser, loser) = if a_is_primary {
                (id_a, a, id_b, b)
            } else {
                (id_b, b, id_a, a)
            };

            let embedding = if merged.content == primary.note.content {
                primary.embedding.clone()
            } else {
                embed_or_empty(self.embedder.as_ref(), &merged.content).await
            };

            if let Err(e) = self.store.upsert(&merged, &embedding, &merged.metadata).await {
                tracing::warn!(note_id = %merged.note_id, error = %e, "Failed to store merged note, skipping pair");
                continue;
            }
            if merged.note_id != primary.note.note_id
                && let Err(e) = self.store.delete(primary.note.note_id).await
            {
                tracing::warn!(note_id = %primary.note.note_id, error = %e, "Stale primary left after content merge");
            }

            notes_merged += 1;
            consumed.insert(key_loser);
            current.remove(&key_loser);
            current.insert(
                key_primary,
                StoredNote {
                    note: merged.clone(),
                    embedding,
                },
            );

            // Merged wording equal to the loser's lands on the loser's id. The
            // superseded primary is archived instead and nothing is deleted.
            let (superseded, remove) = if merged.note_id == loser.note.note_id {
                (&primary.note, false)
            } else {
                (&loser.note, true)
            };
            let reason = format!("consolidated into {} (similarity {similarity:.3})", merged.note_id);
            match archive.archive_note(superseded, &reason, remove).await {
                Ok(true) => notes_archived += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(note_id = %superseded.note_id, error = %e, "Failed to archive consolidated note");
                }
            }

            tracing::debug!(
                primary = %merged.note_id,
                loser = %loser.note.note_id,
                similarity,
                "Merged duplicate notes"
            );
        }

        let final_count = match self.store.count().await {
            Ok(count) if section.is_none() => count,
            _ => original_count - consumed.len(),
        };

        let report = ConsolidationReport {
            duplicates_found: pairs.len(),
            notes_merged,
            notes_archived,
            original_count,
            final_count,
            timestamp: Utc::now(),
        };
        tracing::info!(
            duplicates = report.duplicates_found,
            merged = report.notes_merged,
            archived = report.notes_archived,
            final_count = report.final_count,
            "Consolidation pass complete"
        );
        Ok(report)
    }

    /// Whether the Working tier has grown past `max_working_notes`.
    ///
    /// An unreachable note store reads as "no".
    pub async fn should_consolidate(&self) -> bool {
        match self.store.count().await {
            Ok(count) => count > self.config.max_working_notes,
            Err(e) => {
                tracing::warn!(error = %e, "Note store unavailable, skipping consolidation check");
                false
            }
        }
    }

    async fn list_working(&self, section: Option<&str>) -> Option<Vec<StoredNote>> {
        match self.store.list(section).await {
            Ok(notes) => Some(notes),
            Err(e) => {
                tracing::warn!(error = %e, "Note store unavailable, skipping duplicate search");
                None
            }
        }
    }

    fn empty_report(&self, count: usize) -> ConsolidationReport {
        ConsolidationReport {
            duplicates_found: 0,
            notes_merged: 0,
            notes_archived: 0,
            original_count: count,
            final_count: count,
            timestamp: Utc::now(),
        }
    }
}

/// All-pairs comparison: index pairs `(i, j)`, `i < j`, at or above
/// `threshold`, most similar first.
fn similar_pairs(notes: &[StoredNote], threshold: f32) -> Vec<(usize, usize, f32)> {
    let mut pairs = Vec::new();
    for i in 0..notes.len() {
        if notes[i].embedding.is_empty() {
            continue;
        }
        for j in (i + 1)..notes.len() {
            if notes[j].embedding.is_empty() {
                continue;
            }
            let similarity = cosine_similarity(&notes[i].embedding, &notes[j].embedding);
            if similarity >= threshold {
                pairs.push((i, j, similarity));
            }
        }
    }
    pairs.sort_by(|x, y| y.2.total_cmp(&x.2));
    pairs
}
