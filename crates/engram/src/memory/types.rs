//! Memory types for the Engram system
//!
//! Defines the records held by each tier: scored Working notes, pinned
//! Core notes and append-only Archive records, plus the enums used to
//! classify them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngramError;

/// Identifier of a Working/Archive note. Derived from the note content.
pub type NoteId = Uuid;

/// Free-form metadata carried alongside a note.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

const NOTE_NAMESPACE: Uuid = Uuid::from_u128(0x6b1f_2c0e_8a4d_4e7b_9c35_d2a1_0f6e_4b18);

/// Smallest decay rate a note may carry; rates must stay strictly positive.
pub const MIN_DECAY_RATE: f32 = 1e-4;

/// Compute the deterministic id for a piece of content.
///
/// Identical content always maps to the same id, which makes upserts into
/// the Working store and archive lookups idempotent.
pub fn note_id_for(content: &str) -> NoteId {
    Uuid::new_v5(&NOTE_NAMESPACE, content.as_bytes())
}

/// A note in the Working tier.
///
/// The engine is authoritative for `importance`, `decay_rate` and
/// `access_count`; the note store owns the embedding and persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredNote {
    /// Content hash of `content`
    pub note_id: NoteId,
    /// The fact itself
    pub content: String,
    /// Working section this note was filed under
    pub section: String,
    /// Base importance in [0, 1]
    pub importance: f32,
    /// How many times retrieval has surfaced this note
    pub access_count: u32,
    /// When the note was last surfaced, if ever
    pub last_accessed: Option<DateTime<Utc>>,
    /// When the note entered the Working tier
    pub created_at: DateTime<Utc>,
    /// Importance lost per day without access
    pub decay_rate: f32,
    /// Opaque metadata forwarded to the note store
    #[serde(default)]
    pub metadata: Metadata,
}

impl ScoredNote {
    /// Create a fresh note, deriving its id from the content.
    pub fn new(
        content: impl Into<String>,
        section: impl Into<String>,
        importance: f32,
        decay_rate: f32,
    ) -> Self {
        let content = content.into();
        Self {
            note_id: note_id_for(&content),
            content,
            section: section.into(),
            importance: importance.clamp(0.0, 1.0),
            access_count: 0,
            last_accessed: None,
            created_at: Utc::now(),
            decay_rate: decay_rate.max(MIN_DECAY_RATE),
            metadata: Metadata::new(),
        }
    }

    /// Record a retrieval of this note.
    pub fn mark_accessed(&mut self, at: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed = Some(at);
    }

    /// Update the importance, clamped to [0, 1].
    pub fn set_importance(&mut self, importance: f32) {
        self.importance = importance.clamp(0.0, 1.0);
    }

    /// The reference point for staleness: last access, or creation.
    pub fn last_touched(&self) -> DateTime<Utc> {
        self.last_accessed.unwrap_or(self.created_at)
    }
}

/// A Working note together with the embedding held by the note store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredNote {
    pub note: ScoredNote,
    pub embedding: Vec<f32>,
}

/// A hit from `NoteStore::search_similar`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarNote {
    pub note_id: NoteId,
    pub content: String,
    pub section: String,
    /// Similarity score reported by the store
    pub score: f32,
}

/// Caller-supplied hint about how important a candidate fact is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportanceHint {
    Core,
    High,
    Medium,
    Low,
}

impl ImportanceHint {
    /// Base score the scorer starts from when this hint is given.
    pub fn base_importance(self) -> f32 {
        match self {
            ImportanceHint::Core => 1.0,
            ImportanceHint::High => 0.7,
            ImportanceHint::Medium => 0.4,
            ImportanceHint::Low => 0.2,
        }
    }
}

impl FromStr for ImportanceHint {
    type Err = EngramError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "core" => Ok(ImportanceHint::Core),
            "high" => Ok(ImportanceHint::High),
            "medium" => Ok(ImportanceHint::Medium),
            "low" => Ok(ImportanceHint::Low),
            other => Err(EngramError::General(format!(
                "Unknown importance hint: {other}"
            ))),
        }
    }
}

/// Bucket an importance score falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportanceLevel {
    Low,
    Medium,
    High,
    Core,
}

impl fmt::Display for ImportanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImportanceLevel::Core => "core",
            ImportanceLevel::High => "high",
            ImportanceLevel::Medium => "medium",
            ImportanceLevel::Low => "low",
        };
        f.write_str(s)
    }
}

/// Protected categories of the Core tier. Each maps to one file section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CoreCategory {
    Identity,
    Projects,
    Relationships,
    System,
}

impl CoreCategory {
    /// All categories, in file order.
    pub const ALL: [CoreCategory; 4] = [
        CoreCategory::Identity,
        CoreCategory::Projects,
        CoreCategory::Relationships,
        CoreCategory::System,
    ];

    /// Section heading text used in the core file.
    pub fn heading(self) -> &'static str {
        match self {
            CoreCategory::Identity => "Identity",
            CoreCategory::Projects => "Projects",
            CoreCategory::Relationships => "Relationships",
            CoreCategory::System => "System",
        }
    }
}

impl fmt::Display for CoreCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.heading())
    }
}

impl FromStr for CoreCategory {
    type Err = EngramError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "identity" => Ok(CoreCategory::Identity),
            "projects" | "project" => Ok(CoreCategory::Projects),
            "relationships" | "relationship" => Ok(CoreCategory::Relationships),
            "system" => Ok(CoreCategory::System),
            other => Err(EngramError::General(format!(
                "Not a protected core category: {other}"
            ))),
        }
    }
}

/// A pinned fact in the Core tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreNote {
    pub content: String,
    pub category: CoreCategory,
    pub created_at: DateTime<Utc>,
    /// Who or what pinned this note (e.g. "conversation", "promotion")
    pub source: String,
}

/// One line of the archive log.
///
/// Records are append-only; the only in-place change is the `restored`
/// flag flipping from false to true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedNote {
    pub note_id: NoteId,
    pub content: String,
    pub section: String,
    /// Raw (undecayed) importance at archive time
    pub importance: f32,
    /// Why the note left the Working tier
    pub reason: String,
    pub archived_at: DateTime<Utc>,
    #[serde(default)]
    pub original_created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub access_count: u32,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(rename = "_restored", default)]
    pub restored: bool,
}

impl ArchivedNote {
    /// Wrap a Working note for the archive log.
    pub fn from_note(note: &ScoredNote, reason: impl Into<String>) -> Self {
        Self {
            note_id: note.note_id,
            content: note.content.clone(),
            section: note.section.clone(),
            importance: note.importance,
            reason: reason.into(),
            archived_at: Utc::now(),
            original_created_at: Some(note.created_at),
            access_count: note.access_count,
            metadata: note.metadata.clone(),
            restored: false,
        }
    }
}
