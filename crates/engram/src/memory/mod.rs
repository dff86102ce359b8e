//! Memory types and scoring
//!
//! Defines the records held by each tier and the importance scorer that
//! drives promotion, eviction and restoration between tiers.

pub mod patterns;
pub mod scorer;
pub mod types;

pub use patterns::{PatternFamily, PatternRule};
pub use scorer::ImportanceScorer;
pub use types::{
    ArchivedNote, CoreCategory, CoreNote, ImportanceHint, ImportanceLevel, Metadata, NoteId,
    ScoredNote, SimilarNote, StoredNote, note_id_for,
};
