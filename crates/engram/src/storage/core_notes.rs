//! Core tier: pinned notes in a single markdown file
//!
//! Each protected category owns one `## Heading` section and every note is
//! one bullet line. Nothing automatic ever removes a core note; only an
//! explicit `remove` call does.
//!
//! Every mutation runs as a transaction: take the exclusive lock, load a
//! fresh `CoreDocument`, mutate it, persist it atomically, release. No parsed
//! state outlives a call. The manager has no async methods, so the lock can
//! never be held across a network call.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;

use crate::config::StorageConfig;
use crate::error::{EngramError, Result};
use crate::memory::patterns;
use crate::memory::types::{CoreCategory, CoreNote};
use crate::storage::lock::ScopedLock;

const TITLE: &str = "# Core Notes";
const ANNOTATION_OPEN: &str = "<!--";
const ANNOTATION_CLOSE: &str = "-->";

/// Importance at or above which a core-looking note is worth pinning
pub const DEFAULT_PROMOTION_THRESHOLD: f32 = 0.8;

/// Parsed contents of the core file, valid for a single transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoreDocument {
    sections: BTreeMap<CoreCategory, Vec<CoreNote>>,
    /// Lines under headings that are not protected categories, kept verbatim
    unrecognized: Vec<String>,
    dirty: bool,
}

impl CoreDocument {
    /// Parse the file format. Parsing is lenient: unknown headings are kept
    /// verbatim and bullets without an annotation get placeholder metadata.
    pub fn parse(text: &str) -> Self {
        let mut doc = CoreDocument::default();
        let mut current: Option<CoreCategory> = None;
        let mut in_unrecognized = false;

        for line in text.lines() {
            let trimmed = line.trim();
            if let Some(heading) = trimmed.strip_prefix("## ") {
                match heading.parse::<CoreCategory>() {
                    Ok(category) => {
                        current = Some(category);
                        in_unrecognized = false;
                    }
                    Err(_) => {
                        current = None;
                        in_unrecognized = true;
                        doc.unrecognized.push(line.to_string());
                    }
                }
                continue;
            }

            if in_unrecognized {
                doc.unrecognized.push(line.to_string());
                continue;
            }

            let (Some(category), Some(bullet)) = (current, trimmed.strip_prefix("- ")) else {
                continue;
            };
            if let Some(note) = parse_bullet(bullet, category) {
                doc.sections.entry(category).or_default().push(note);
            }
        }

        doc
    }

    /// Render back to the file format.
    pub fn render(&self) -> String {
        let mut out = String::from(TITLE);
        out.push('\n');

        for category in CoreCategory::ALL {
            out.push_str(&format!("\n## {}\n", category.heading()));
            for note in self.sections.get(&category).into_iter().flatten() {
                out.push_str(&format!(
                    "- {} {ANNOTATION_OPEN} source: {}; added: {} {ANNOTATION_CLOSE}\n",
                    note.content,
                    note.source,
                    note.created_at.to_rfc3339()
                ));
            }
        }

        let trailing: Vec<&str> = self
            .unrecognized
            .iter()
            .map(String::as_str)
            .skip_while(|l| l.trim().is_empty())
            .collect();
        if !trailing.is_empty() {
            out.push('\n');
            for line in trailing {
                out.push_str(line);
                out.push('\n');
            }
        }

        out
    }

    /// Whether any note, in any section, contains `content` (case-insensitive).
    pub fn contains(&self, content: &str) -> bool {
        let needle = normalize(content).to_lowercase();
        if needle.is_empty() {
            return false;
        }
        self.sections
            .values()
            .flatten()
            .any(|note| note.content.to_lowercase().contains(&needle))
    }

    /// Whether some note reads exactly like `content`, ignoring case and
    /// whitespace runs.
    pub fn contains_exact(&self, content: &str) -> bool {
        let needle = normalize(content).to_lowercase();
        !needle.is_empty()
            && self
                .sections
                .values()
                .flatten()
                .any(|note| normalize(&note.content).to_lowercase() == needle)
    }

    /// Append a note. Returns false if it is empty or already present.
    pub fn add(&mut self, content: &str, category: CoreCategory, source: &str) -> bool {
        let content = normalize(content);
        if content.is_empty() || self.contains(&content) {
            return false;
        }

        self.sections.entry(category).or_default().push(CoreNote {
            content,
            category,
            created_at: Utc::now(),
            source: normalize(source).replace(';', ","),
        });
        self.dirty = true;
        true
    }

    /// Drop notes containing `pattern` (case-insensitive), optionally only in
    /// one category. Returns how many were removed.
    pub fn remove(&mut self, pattern: &str, category: Option<CoreCategory>) -> usize {
        let needle = pattern.trim().to_lowercase();
        if needle.is_empty() {
            return 0;
        }

        let mut removed = 0;
        for (cat, notes) in self.sections.iter_mut() {
            if category.is_some_and(|c| c != *cat) {
                continue;
            }
            let before = notes.len();
            notes.retain(|note| !note.content.to_lowercase().contains(&needle));
            removed += before - notes.len();
        }

        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    /// Note contents grouped by category. Every category is present.
    pub fn contents(&self) -> BTreeMap<CoreCategory, Vec<String>> {
        CoreCategory::ALL
            .iter()
            .map(|category| {
                let contents = self
                    .sections
                    .get(category)
                    .into_iter()
                    .flatten()
                    .map(|note| note.content.clone())
                    .collect();
                (*category, contents)
            })
            .collect()
    }

    /// All notes in file order.
    pub fn notes(&self) -> Vec<CoreNote> {
        CoreCategory::ALL
            .iter()
            .flat_map(|category| self.sections.get(category).into_iter().flatten().cloned())
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// File-backed manager for the Core tier.
#[derive(Debug, Clone)]
pub struct CoreNotesManager {
    path: PathBuf,
    promotion_threshold: f32,
}

impl CoreNotesManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            promotion_threshold: DEFAULT_PROMOTION_THRESHOLD,
        }
    }

    pub fn from_config(storage: &StorageConfig) -> Self {
        Self::new(storage.core_path())
    }

    /// Override the importance needed for `suggest_promotion`.
    pub fn with_promotion_threshold(mut self, threshold: f32) -> Self {
        self.promotion_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pin `content` under `category`, given as a name.
    ///
    /// Returns `Ok(false)` without touching the file when the category is
    /// not a protected one or the content is already present.
    pub fn add(&self, content: &str, category: &str, source: &str) -> Result<bool> {
        match category.parse::<CoreCategory>() {
            Ok(category) => self.add_to(content, category, source),
            Err(_) => {
                tracing::debug!(category, "Refusing core note for unprotected category");
                Ok(false)
            }
        }
    }

    /// Pin `content` under a protected category.
    pub fn add_to(&self, content: &str, category: CoreCategory, source: &str) -> Result<bool> {
        let added = self.transaction(|doc| doc.add(content, category, source))?;
        if added {
            tracing::info!(%category, "Pinned core note");
        } else {
            tracing::debug!(%category, "Core note already present");
        }
        Ok(added)
    }

    /// Remove every note containing `pattern`. The only way a core note goes away.
    pub fn remove(&self, pattern: &str, category: Option<CoreCategory>) -> Result<bool> {
        let removed = self.transaction(|doc| doc.remove(pattern, category))?;
        if removed > 0 {
            tracing::info!(removed, ?category, "Removed core notes");
        }
        Ok(removed > 0)
    }

    /// Note contents grouped by category.
    pub fn get_all(&self) -> Result<BTreeMap<CoreCategory, Vec<String>>> {
        self.read(CoreDocument::contents)
    }

    /// All notes with their metadata.
    pub fn entries(&self) -> Result<Vec<CoreNote>> {
        self.read(CoreDocument::notes)
    }

    /// Whether `content` is already pinned (case-insensitive substring).
    pub fn contains(&self, content: &str) -> Result<bool> {
        self.read(|doc| doc.contains(content))
    }

    /// A detached copy of the current document for batch lookups.
    pub fn snapshot(&self) -> Result<CoreDocument> {
        self.read(CoreDocument::clone)
    }

    /// The core file as text for prompt injection.
    ///
    /// Falls back to the empty template if the file cannot be read.
    pub fn render(&self) -> String {
        match self.read_raw() {
            Ok(Some(text)) => text,
            Ok(None) => CoreDocument::default().render(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Core file unreadable, rendering empty template");
                CoreDocument::default().render()
            }
        }
    }

    /// The protected category `content` looks like it belongs to, if any.
    pub fn is_core_candidate(&self, content: &str) -> Option<CoreCategory> {
        patterns::dominant_core_category(content)
    }

    /// Category to pin `content` under, if it is important enough and looks core.
    pub fn suggest_promotion(&self, content: &str, importance: f32) -> Option<CoreCategory> {
        if importance < self.promotion_threshold {
            return None;
        }
        self.is_core_candidate(content)
    }

    /// Load, mutate and persist the document under the exclusive lock.
    ///
    /// The file is only rewritten when `op` changed the document.
    pub fn transaction<T>(&self, op: impl FnOnce(&mut CoreDocument) -> T) -> Result<T> {
        let _guard = ScopedLock::exclusive(&self.path)?;
        let mut doc = self.load()?;
        let out = op(&mut doc);
        if doc.is_dirty() {
            self.persist(&doc)?;
        }
        Ok(out)
    }

    fn read<T>(&self, op: impl FnOnce(&CoreDocument) -> T) -> Result<T> {
        let _guard = ScopedLock::shared(&self.path)?;
        let doc = self.load()?;
        Ok(op(&doc))
    }

    fn read_raw(&self) -> Result<Option<String>> {
        let _guard = ScopedLock::shared(&self.path)?;
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn load(&self) -> Result<CoreDocument> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(CoreDocument::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CoreDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a temp file in the same directory, then atomically replace.
    fn persist(&self, doc: &CoreDocument) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(doc.render().as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| {
            EngramError::Storage(format!(
                "Failed to replace core file {}: {}",
                self.path.display(),
                e.error
            ))
        })?;
        Ok(())
    }
}

/// Collapse whitespace so a note always fits on one bullet line.
fn normalize(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_bullet(bullet: &str, category: CoreCategory) -> Option<CoreNote> {
    let (content, annotation) = match bullet.rfind(ANNOTATION_OPEN) {
        Some(idx) if bullet.trim_end().ends_with(ANNOTATION_CLOSE) => {
            (bullet[..idx].trim(), Some(&bullet[idx..]))
        }
        _ => (bullet.trim(), None),
    };
    if content.is_empty() {
        return None;
    }

    let mut source = "unknown".to_string();
    let mut created_at = DateTime::<Utc>::UNIX_EPOCH;

    if let Some(annotation) = annotation {
        let inner = annotation
            .trim_start_matches(ANNOTATION_OPEN)
            .trim_end()
            .trim_end_matches(ANNOTATION_CLOSE);
        for field in inner.split(';') {
            let Some((key, value)) = field.split_once(':') else {
                continue;
            };
            match key.trim() {
                "source" => source = value.trim().to_string(),
                "added" => {
                    if let Ok(ts) = DateTime::parse_from_rfc3339(value.trim()) {
                        created_at = ts.with_timezone(&Utc);
                    }
                }
                _ => {}
            }
        }
    }

    Some(CoreNote {
        content: content.to_string(),
        category,
        created_at,
        source,
    })
}
