//! Memory engine
//!
//! Wires the scorer and the three tiers together:
//! 1. Ingestion: score a candidate fact, pin it in Core or file it in Working
//! 2. Promotion: move frequently used, important Working notes into Core
//! 3. Maintenance: consolidate duplicates, archive decayed notes, purge old records
//! 4. Reconciliation: finish moves that stopped halfway
//!
//! The tiers share no transaction. Every move writes the destination first
//! and deletes from the source second, and every write is keyed by content
//! hash, so replaying a move is harmless and `reconcile` can converge state
//! after a crash or a backend outage.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::config::Config;
use crate::error::{EngramError, Result};
use crate::memory::scorer::ImportanceScorer;
use crate::memory::types::{CoreCategory, ImportanceHint, NoteId, ScoredNote, note_id_for};
use crate::storage::archive::ArchiveManager;
use crate::storage::backend::{ContentMerger, Embedder, NoteStore, embed_or_empty};
use crate::storage::core_notes::CoreNotesManager;
use crate::storage::dedup::{ConsolidationReport, NoteDeduplicator};

/// Source recorded on core notes pinned at ingestion time
pub const INGEST_SOURCE: &str = "ingest";
/// Source recorded on core notes promoted from the Working tier
pub const PROMOTION_SOURCE: &str = "promotion";

/// Where an ingested fact ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Pinned in the Core tier
    Core(CoreCategory),
    /// Stored in the Working tier
    Working(NoteId),
    /// Brought back from the archive and rescored
    Restored(NoteId),
    /// Already present in Core or Working
    Duplicate(NoteId),
    /// Empty content
    Rejected,
}

/// Result of one maintenance pass
#[derive(Debug, Clone, PartialEq)]
pub struct MaintenanceReport {
    /// Present when the Working tier was over capacity
    pub consolidation: Option<ConsolidationReport>,
    /// Notes archived for low decayed importance
    pub archived: usize,
    /// Archive records dropped by retention
    pub purged: usize,
}

/// Result of a reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Working notes removed because an active archive record exists
    pub archived_removed: usize,
    /// Working notes removed because their content is pinned in Core
    pub promoted_removed: usize,
}

impl ReconcileReport {
    pub fn total(&self) -> usize {
        self.archived_removed + self.promoted_removed
    }
}

/// Tiered memory engine over an external note store and embedder.
pub struct MemoryEngine {
    config: Config,
    scorer: ImportanceScorer,
    core: CoreNotesManager,
    dedup: NoteDeduplicator,
    archive: ArchiveManager,
    store: Arc<dyn NoteStore>,
    embedder: Arc<dyn Embedder>,
}

impl MemoryEngine {
    pub fn new(config: Config, store: Arc<dyn NoteStore>, embedder: Arc<dyn Embedder>) -> Self {
        let scorer = ImportanceScorer::with_config(config.scoring);
        let core = CoreNotesManager::from_config(&config.storage)
            .with_promotion_threshold(config.scoring.core_threshold);
        let dedup =
            NoteDeduplicator::with_config(store.clone(), embedder.clone(), config.consolidation);
        let archive = ArchiveManager::with_config(
            config.storage.archive_path(),
            store.clone(),
            embedder.clone(),
            config.archive,
            scorer,
        );

        Self {
            config,
            scorer,
            core,
            dedup,
            archive,
            store,
            embedder,
        }
    }

    /// Reword merged notes with `merger` during consolidation.
    pub fn with_merger(mut self, merger: Arc<dyn ContentMerger>) -> Self {
        self.dedup = self.dedup.with_merger(merger);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scorer(&self) -> &ImportanceScorer {
        &self.scorer
    }

    pub fn core(&self) -> &CoreNotesManager {
        &self.core
    }

    pub fn deduplicator(&self) -> &NoteDeduplicator {
        &self.dedup
    }

    pub fn archive(&self) -> &ArchiveManager {
        &self.archive
    }

    /// File a candidate fact into the right tier.
    ///
    /// Facts scoring at or above the core threshold that look like a
    /// protected category are pinned. Everything else goes to the Working
    /// tier with the scorer's suggested decay rate. A fact with an active
    /// archive record is restored instead of stored a second time. The
    /// embedding is best effort; a note stored without one is never paired
    /// by deduplication.
    pub async fn ingest(
        &self,
        content: &str,
        section: &str,
        hint: Option<ImportanceHint>,
    ) -> Result<IngestOutcome> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(IngestOutcome::Rejected);
        }

        let score = self.scorer.score(content, section, hint);
        let note_id = note_id_for(content);

        if score >= self.scorer.config().core_threshold
            && let Some(category) = self.core.is_core_candidate(content)
        {
            let owned = content.to_string();
            let added = self
                .core_op(move |core| core.add_to(&owned, category, INGEST_SOURCE))
                .await?;
            return Ok(if added {
                IngestOutcome::Core(category)
            } else {
                IngestOutcome::Duplicate(note_id)
            });
        }

        if self.archive.has_active(note_id).await?
            && self.restore_rescored(note_id, score).await?
        {
            return Ok(IngestOutcome::Restored(note_id));
        }

        match self.store.get(note_id).await {
            Ok(Some(_)) => {
                tracing::debug!(note_id = %note_id, "Note already in working tier");
                return Ok(IngestOutcome::Duplicate(note_id));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(note_id = %note_id, error = %e, "Could not check working tier for duplicate");
            }
        }

        let decay_rate = self.scorer.suggest_decay_rate(content, section);
        let note = ScoredNote::new(content, section, score, decay_rate);
        let embedding = embed_or_empty(self.embedder.as_ref(), content).await;

        self.store
            .upsert(&note, &embedding, &note.metadata)
            .await
            .map_err(|e| {
                EngramError::BackendUnavailable(format!("Failed to store note {note_id}: {e}"))
            })?;

        tracing::debug!(note_id = %note_id, score, section, "Ingested working note");
        Ok(IngestOutcome::Working(note_id))
    }

    /// Record that retrieval surfaced a note.
    ///
    /// Returns `Ok(false)` if the note is not in the Working tier. The
    /// stored embedding is left as it is.
    pub async fn record_access(&self, note_id: NoteId, at: DateTime<Utc>) -> Result<bool> {
        let Some(mut note) = self.working_note(note_id).await else {
            return Ok(false);
        };

        note.mark_accessed(at);
        self.store.update(&note).await.map_err(|e| {
            EngramError::BackendUnavailable(format!("Failed to record access on {note_id}: {e}"))
        })
    }

    /// Move a Working note into Core.
    ///
    /// Without an explicit category the note must look like a protected
    /// category. The move completes even if the content is already pinned.
    pub async fn promote(&self, note_id: NoteId, category: Option<CoreCategory>) -> Result<bool> {
        let Some(note) = self.working_note(note_id).await else {
            return Ok(false);
        };

        let Some(category) = category.or_else(|| self.core.is_core_candidate(&note.content)) else {
            tracing::debug!(note_id = %note_id, "Note does not match a protected category");
            return Ok(false);
        };

        let content = note.content.clone();
        self.core_op(move |core| core.add_to(&content, category, PROMOTION_SOURCE))
            .await?;

        if let Err(e) = self.store.delete(note_id).await {
            tracing::warn!(
                note_id = %note_id,
                error = %e,
                "Promoted note left in working tier, reconciliation will remove it"
            );
        }

        tracing::info!(note_id = %note_id, %category, "Promoted note to core");
        Ok(true)
    }

    /// Promote every Working note the scorer flags and that matches a
    /// protected category. Returns the promoted ids.
    pub async fn promote_candidates(&self) -> Result<Vec<NoteId>> {
        let Some(notes) = self.working_notes().await else {
            return Ok(Vec::new());
        };

        let mut promoted = Vec::new();
        for note in self.scorer.promotion_candidates(&notes, None) {
            let Some(category) = self.core.is_core_candidate(&note.content) else {
                continue;
            };
            if self.promote(note.note_id, Some(category)).await? {
                promoted.push(note.note_id);
            }
        }
        Ok(promoted)
    }

    /// One maintenance pass at `now`: consolidate when over capacity,
    /// archive decayed notes, purge archive records past retention.
    pub async fn run_maintenance(&self, now: DateTime<Utc>) -> Result<MaintenanceReport> {
        let consolidation = if self.dedup.should_consolidate().await {
            Some(self.dedup.run_consolidation_pass(&self.archive, None).await?)
        } else {
            None
        };

        let archived = self.archive.archive_low_importance(None, now).await?;

        let purged = match self.config.archive.retention_days {
            Some(days) => {
                self.archive
                    .purge_before(now - Duration::days(i64::from(days)))
                    .await?
            }
            None => 0,
        };

        let report = MaintenanceReport {
            consolidation,
            archived,
            purged,
        };
        tracing::info!(
            consolidated = report.consolidation.is_some(),
            archived = report.archived,
            purged = report.purged,
            "Maintenance pass complete"
        );
        Ok(report)
    }

    /// Finish half-completed moves out of the Working tier.
    ///
    /// A Working note with an active archive record was archived but never
    /// deleted; a Working note whose content reads exactly like a Core note
    /// was promoted but never deleted. Both are removed from Working. A note
    /// that only overlaps a Core note is left alone.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let Some(notes) = self.working_notes().await else {
            return Ok(report);
        };

        let active = self.archive.active_ids().await?;
        let core = self.core_op(|core| core.snapshot()).await?;

        for note in notes {
            let archived = active.contains(&note.note_id);
            if !archived && !core.contains_exact(&note.content) {
                continue;
            }

            match self.store.delete(note.note_id).await {
                Ok(_) if archived => report.archived_removed += 1,
                Ok(_) => report.promoted_removed += 1,
                Err(e) => {
                    tracing::warn!(note_id = %note.note_id, error = %e, "Reconciliation delete failed");
                }
            }
        }

        if report.total() > 0 {
            tracing::info!(
                archived = report.archived_removed,
                promoted = report.promoted_removed,
                "Reconciled working tier"
            );
        }
        Ok(report)
    }

    /// Notes still worth surfacing at `now`.
    pub fn retrievable<'a>(&self, notes: &'a [ScoredNote], now: DateTime<Utc>) -> Vec<&'a ScoredNote> {
        notes
            .iter()
            .filter(|note| self.scorer.should_retrieve(note, now, None))
            .collect()
    }

    /// Restore an archived note and raise it to `score` if that is higher.
    ///
    /// Returns `Ok(false)` if another task restored it first.
    async fn restore_rescored(&self, note_id: NoteId, score: f32) -> Result<bool> {
        if !self.archive.restore(note_id, None).await? {
            return Ok(false);
        }

        if let Some(mut note) = self.working_note(note_id).await
            && score > note.importance
        {
            note.set_importance(score);
            if let Err(e) = self.store.update(&note).await {
                tracing::warn!(note_id = %note_id, error = %e, "Restored note kept its archived score");
            }
        }

        tracing::debug!(note_id = %note_id, "Re-ingested fact restored from archive");
        Ok(true)
    }

    /// Run a Core tier operation off the async runtime; it may block on the
    /// file lock.
    async fn core_op<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&CoreNotesManager) -> Result<T> + Send + 'static,
    {
        let core = self.core.clone();
        tokio::task::spawn_blocking(move || op(&core))
            .await
            .map_err(|e| EngramError::General(format!("Core tier task failed: {e}")))?
    }

    async fn working_note(&self, note_id: NoteId) -> Option<ScoredNote> {
        match self.store.get(note_id).await {
            Ok(note) => note,
            Err(e) => {
                tracing::warn!(note_id = %note_id, error = %e, "Note store unavailable");
                None
            }
        }
    }

    async fn working_notes(&self) -> Option<Vec<ScoredNote>> {
        match self.store.list(None).await {
            Ok(stored) => Some(stored.into_iter().map(|s| s.note).collect()),
            Err(e) => {
                tracing::warn!(error = %e, "Note store unavailable");
                None
            }
        }
    }
}
