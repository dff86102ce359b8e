//! Archive tier: cold storage for notes evicted from the Working tier
//!
//! The archive is a newline-delimited JSON log, one `ArchivedNote` per line.
//! Appends are the normal write path. Only two operations rewrite the log:
//! restore (flips one record's `_restored` flag) and retention purge. Both
//! stream into a temp file next to the log and atomically replace it, copying
//! every untouched line byte-for-byte.
//!
//! Lines that fail to parse are never dropped; they are skipped by reads,
//! kept by rewrites, and counted in `ArchiveStats::corrupt`.
//!
//! Log file work runs on the blocking thread pool. Writers inside one
//! process are serialized by an async mutex, which is never held across a
//! note store or embedder call. Nothing serializes writers across
//! processes; a host running several archiving processes against one log
//! must coordinate them itself.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

use crate::config::ArchiveConfig;
use crate::error::{EngramError, Result};
use crate::memory::scorer::ImportanceScorer;
use crate::memory::types::{ArchivedNote, NoteId, ScoredNote};
use crate::storage::backend::{Embedder, NoteStore, embed_or_empty};

/// Counts over the whole archive log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    /// Records that parsed
    pub total: usize,
    /// Records not yet restored
    pub active: usize,
    /// Records already restored to the Working tier
    pub restored: usize,
    /// Lines that failed to parse and are kept verbatim
    pub corrupt: usize,
}

/// What a rewrite does with one line of the log
enum LineEdit {
    Keep,
    Drop,
    Replace(String),
}

/// Manages the archive log and moves between it and the Working tier.
pub struct ArchiveManager {
    path: PathBuf,
    store: Arc<dyn NoteStore>,
    embedder: Arc<dyn Embedder>,
    scorer: ImportanceScorer,
    config: ArchiveConfig,
    write_lock: Mutex<()>,
}

impl ArchiveManager {
    pub fn new(
        path: impl Into<PathBuf>,
        store: Arc<dyn NoteStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self::with_config(
            path,
            store,
            embedder,
            ArchiveConfig::default(),
            ImportanceScorer::default(),
        )
    }

    pub fn with_config(
        path: impl Into<PathBuf>,
        store: Arc<dyn NoteStore>,
        embedder: Arc<dyn Embedder>,
        config: ArchiveConfig,
        scorer: ImportanceScorer,
    ) -> Self {
        Self {
            path: path.into(),
            store,
            embedder,
            scorer,
            config,
            write_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move a Working note into the archive.
    ///
    /// Returns `Ok(false)` if the note cannot be found (or the note store
    /// cannot be reached to look it up).
    pub async fn archive(
        &self,
        note_id: NoteId,
        reason: &str,
        remove_from_source: bool,
    ) -> Result<bool> {
        let note = match self.store.get(note_id).await {
            Ok(Some(note)) => note,
            Ok(None) => {
                tracing::debug!(note_id = %note_id, "Archive target not in working tier");
                return Ok(false);
            }
            Err(e) => {
                tracing::warn!(note_id = %note_id, error = %e, "Note store unavailable, cannot archive");
                return Ok(false);
            }
        };

        self.archive_note(&note, reason, remove_from_source).await
    }

    /// Archive a note already fetched from the Working tier.
    ///
    /// If an active record for the same id exists (a previous move that
    /// never finished deleting from the source) no second record is written;
    /// only the delete is retried.
    pub async fn archive_note(
        &self,
        note: &ScoredNote,
        reason: &str,
        remove_from_source: bool,
    ) -> Result<bool> {
        {
            let _guard = self.write_lock.lock().await;
            let note_id = note.note_id;
            if self.find_active(note_id).await?.is_some() {
                tracing::debug!(note_id = %note_id, "Active archive record exists, not appending");
            } else {
                let record = ArchivedNote::from_note(note, reason);
                self.with_log(move |path| append_records(path, &[record]))
                    .await?;
                tracing::debug!(note_id = %note_id, reason, "Archived note");
            }
        }

        if remove_from_source {
            self.delete_from_working(note.note_id).await;
        }
        Ok(true)
    }

    /// Bring an archived note back into the Working tier.
    ///
    /// Finds the first non-restored record for `note_id`, re-embeds it (best
    /// effort), upserts it with `importance + boost` (default: the configured
    /// restore boost), then flips the record's `_restored` flag. Returns
    /// `Ok(false)` when there is no such record, or when a concurrent
    /// restore flipped it first. If the upsert fails the log is left
    /// untouched and `BackendUnavailable` is returned.
    pub async fn restore(&self, note_id: NoteId, boost: Option<f32>) -> Result<bool> {
        let boost = boost.unwrap_or(self.config.restore_boost);

        let record = {
            let _guard = self.write_lock.lock().await;
            self.find_active(note_id).await?
        };
        let Some((_, record)) = record else {
            tracing::debug!(note_id = %note_id, "No active archive record to restore");
            return Ok(false);
        };

        let note = self.restored_note(&record, boost);
        let embedding = embed_or_empty(self.embedder.as_ref(), &note.content).await;
        self.store
            .upsert(&note, &embedding, &note.metadata)
            .await
            .map_err(|e| {
                EngramError::BackendUnavailable(format!(
                    "Failed to restore {note_id} into working tier: {e}"
                ))
            })?;

        // The log may have changed while the store was written; flip the
        // record that is first active now.
        let _guard = self.write_lock.lock().await;
        let Some((line_no, _)) = self.find_active(note_id).await? else {
            tracing::debug!(note_id = %note_id, "Archive record restored concurrently");
            return Ok(false);
        };
        self.with_log(move |path| flip_restored(path, line_no))
            .await?;

        tracing::info!(note_id = %note_id, importance = note.importance, "Restored note from archive");
        Ok(true)
    }

    /// Records whose content contains `query` (case-insensitive), in log order.
    ///
    /// Stops reading as soon as `limit` (default: the configured search
    /// limit) records were found.
    pub async fn search(
        &self,
        query: &str,
        limit: Option<usize>,
        include_restored: bool,
    ) -> Result<Vec<ArchivedNote>> {
        let limit = limit.unwrap_or(self.config.search_limit);
        let needle = query.trim().to_lowercase();
        if limit == 0 {
            return Ok(Vec::new());
        }

        self.with_log(move |path| {
            let mut results = Vec::new();
            scan_log(path, |_, _, parsed| {
                if let Some(record) = parsed
                    && (include_restored || !record.restored)
                    && record.content.to_lowercase().contains(&needle)
                {
                    results.push(record);
                    if results.len() >= limit {
                        return ControlFlow::Break(());
                    }
                }
                ControlFlow::Continue(())
            })?;
            Ok(results)
        })
        .await
    }

    /// Latest record for `note_id`, restored or not.
    pub async fn get(&self, note_id: NoteId) -> Result<Option<ArchivedNote>> {
        self.with_log(move |path| {
            let mut latest = None;
            scan_log(path, |_, _, parsed| {
                if let Some(record) = parsed
                    && record.note_id == note_id
                {
                    latest = Some(record);
                }
                ControlFlow::Continue(())
            })?;
            Ok(latest)
        })
        .await
    }

    /// Whether a non-restored record exists for `note_id`.
    pub async fn has_active(&self, note_id: NoteId) -> Result<bool> {
        Ok(self.find_active(note_id).await?.is_some())
    }

    /// Ids with at least one non-restored record.
    pub async fn active_ids(&self) -> Result<HashSet<NoteId>> {
        self.with_log(collect_active_ids).await
    }

    pub async fn stats(&self) -> Result<ArchiveStats> {
        self.with_log(|path| {
            let mut stats = ArchiveStats::default();
            scan_log(path, |_, raw, parsed| {
                match parsed {
                    Some(record) => {
                        stats.total += 1;
                        if record.restored {
                            stats.restored += 1;
                        } else {
                            stats.active += 1;
                        }
                    }
                    None if !raw.trim().is_empty() => stats.corrupt += 1,
                    None => {}
                }
                ControlFlow::Continue(())
            })?;
            Ok(stats)
        })
        .await
    }

    /// Drop records archived more than `days` days ago.
    pub async fn purge_older_than(&self, days: u32) -> Result<usize> {
        self.purge_before(Utc::now() - Duration::days(i64::from(days)))
            .await
    }

    /// Drop records with `archived_at` strictly before `cutoff`.
    ///
    /// Unparseable lines are kept; blank lines are dropped. Every other line
    /// is copied unchanged. Returns the number of records removed.
    pub async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let purged = self.with_log(move |path| purge_log(path, cutoff)).await?;

        if purged > 0 {
            tracing::info!(purged, cutoff = %cutoff, "Purged archive records");
        }
        Ok(purged)
    }

    /// Archive every Working note whose decayed importance at `now` is below
    /// `threshold` (default: the scorer's archive threshold).
    ///
    /// Returns how many notes were moved. If the note store cannot be listed
    /// nothing is archived.
    pub async fn archive_low_importance(
        &self,
        threshold: Option<f32>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let threshold = threshold.unwrap_or(self.scorer.config().archive_threshold);

        let notes: Vec<ScoredNote> = match self.store.list(None).await {
            Ok(stored) => stored.into_iter().map(|s| s.note).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Note store unavailable, skipping archive sweep");
                return Ok(0);
            }
        };

        let candidates = self.scorer.archival_candidates(&notes, now, Some(threshold));
        if candidates.is_empty() {
            return Ok(0);
        }

        {
            let _guard = self.write_lock.lock().await;
            let already = self.active_ids().await?;
            let records: Vec<ArchivedNote> = candidates
                .iter()
                .filter(|note| !already.contains(&note.note_id))
                .map(|note| {
                    let decayed = self.scorer.decay(note, now);
                    ArchivedNote::from_note(
                        note,
                        format!("decayed importance {decayed:.4} below threshold {threshold:.4}"),
                    )
                })
                .collect();
            self.with_log(move |path| append_records(path, &records))
                .await?;
        }

        for note in &candidates {
            self.delete_from_working(note.note_id).await;
        }

        tracing::info!(archived = candidates.len(), threshold, "Archived low-importance notes");
        Ok(candidates.len())
    }

    fn restored_note(&self, record: &ArchivedNote, boost: f32) -> ScoredNote {
        let decay_rate = self
            .scorer
            .suggest_decay_rate(&record.content, &record.section);
        let mut note = ScoredNote::new(
            record.content.clone(),
            record.section.clone(),
            record.importance + boost,
            decay_rate,
        );
        note.note_id = record.note_id;
        note.access_count = record.access_count;
        note.created_at = record.original_created_at.unwrap_or(record.archived_at);
        note.last_accessed = Some(Utc::now());
        note.metadata = record.metadata.clone();
        note
    }

    async fn delete_from_working(&self, note_id: NoteId) {
        match self.store.delete(note_id).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(note_id = %note_id, "Archived note already gone from working tier"),
            Err(e) => tracing::warn!(
                note_id = %note_id,
                error = %e,
                "Archived note left in working tier, reconciliation will remove it"
            ),
        }
    }

    /// Zero-based line index and record of the first active record for `note_id`.
    async fn find_active(&self, note_id: NoteId) -> Result<Option<(usize, ArchivedNote)>> {
        self.with_log(move |path| {
            let mut found = None;
            scan_log(path, |idx, _, parsed| {
                if let Some(record) = parsed
                    && record.note_id == note_id
                    && !record.restored
                {
                    found = Some((idx, record));
                    return ControlFlow::Break(());
                }
                ControlFlow::Continue(())
            })?;
            Ok(found)
        })
        .await
    }

    /// Run blocking log file work off the async runtime.
    async fn with_log<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || op(&path))
            .await
            .map_err(|e| EngramError::General(format!("Archive log task failed: {e}")))?
    }
}

fn collect_active_ids(path: &Path) -> Result<HashSet<NoteId>> {
    let mut ids = HashSet::new();
    scan_log(path, |_, _, parsed| {
        if let Some(record) = parsed
            && !record.restored
        {
            ids.insert(record.note_id);
        }
        ControlFlow::Continue(())
    })?;
    Ok(ids)
}

/// Mark the record on line `line_no` restored.
fn flip_restored(path: &Path, line_no: usize) -> Result<()> {
    let mut flip_error = None;
    rewrite_log(path, |idx, raw| {
        if idx != line_no {
            return LineEdit::Keep;
        }
        match mark_restored(raw) {
            Ok(line) => LineEdit::Replace(line),
            Err(e) => {
                flip_error = Some(e);
                LineEdit::Keep
            }
        }
    })?;
    flip_error.map_or(Ok(()), Err)
}

/// Drop records archived before `cutoff` and blank lines. Returns the
/// number of records dropped.
fn purge_log(path: &Path, cutoff: DateTime<Utc>) -> Result<usize> {
    let mut purged = 0;
    rewrite_log(path, |idx, raw| {
        if raw.trim().is_empty() {
            return LineEdit::Drop;
        }
        match serde_json::from_str::<ArchivedNote>(raw.trim()) {
            Ok(record) if record.archived_at < cutoff => {
                purged += 1;
                LineEdit::Drop
            }
            Ok(_) => LineEdit::Keep,
            Err(e) => {
                tracing::warn!(line = idx + 1, error = %e, "Keeping corrupt archive line during purge");
                LineEdit::Keep
            }
        }
    })?;
    Ok(purged)
}

/// Stream the log line by line. A missing log reads as empty.
///
/// `visit` gets the zero-based line index, the raw line (newline included)
/// and the parsed record, or `None` for blank and corrupt lines.
fn scan_log(
    path: &Path,
    mut visit: impl FnMut(usize, &str, Option<ArchivedNote>) -> ControlFlow<()>,
) -> Result<()> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let mut reader = BufReader::new(file);
    let mut line = String::new();
    let mut idx = 0;

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }

        let trimmed = line.trim();
        let parsed = if trimmed.is_empty() {
            None
        } else {
            match serde_json::from_str::<ArchivedNote>(trimmed) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(line = idx + 1, error = %e, "Skipping corrupt archive line");
                    None
                }
            }
        };

        if visit(idx, &line, parsed).is_break() {
            break;
        }
        idx += 1;
    }

    Ok(())
}

/// Rewrite the log through `edit`, replacing it atomically.
///
/// The log is only replaced if some line was dropped or replaced.
fn rewrite_log(path: &Path, mut edit: impl FnMut(usize, &str) -> LineEdit) -> Result<()> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let temp = NamedTempFile::new_in(parent_dir(path))?;
    let mut writer = BufWriter::new(temp);
    let mut reader = BufReader::new(file);
    let mut line = String::new();
    let mut idx = 0;
    let mut changed = false;

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }

        match edit(idx, &line) {
            LineEdit::Keep => {
                writer.write_all(line.as_bytes())?;
                if !line.ends_with('\n') {
                    writer.write_all(b"\n")?;
                }
            }
            LineEdit::Drop => changed = true,
            LineEdit::Replace(replacement) => {
                writer.write_all(replacement.as_bytes())?;
                writer.write_all(b"\n")?;
                changed = true;
            }
        }
        idx += 1;
    }

    if !changed {
        return Ok(());
    }

    let temp = writer
        .into_inner()
        .map_err(|e| EngramError::Io(e.into_error()))?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| {
        EngramError::Storage(format!(
            "Failed to replace archive log {}: {}",
            path.display(),
            e.error
        ))
    })?;
    Ok(())
}

fn append_records(path: &Path, records: &[ArchivedNote]) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent_dir(path))?;

    let mut buf = String::new();
    for record in records {
        buf.push_str(&serde_json::to_string(record)?);
        buf.push('\n');
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(buf.as_bytes())?;
    file.sync_data()?;
    Ok(())
}

/// Set `_restored` on one raw log line, keeping every other field as written.
fn mark_restored(raw: &str) -> Result<String> {
    let mut value: serde_json::Value = serde_json::from_str(raw.trim())?;
    let object = value.as_object_mut().ok_or_else(|| EngramError::CorruptRecord {
        line: 0,
        reason: "archive record is not a JSON object".to_string(),
    })?;
    object.insert("_restored".to_string(), serde_json::Value::Bool(true));
    Ok(serde_json::to_string(&value)?)
}

fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}
