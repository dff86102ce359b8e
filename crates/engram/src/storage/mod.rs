pub mod archive;
pub mod backend;
pub mod core_notes;
pub mod dedup;
pub mod lock;

pub use archive::{ArchiveManager, ArchiveStats};
pub use backend::{ContentMerger, Embedder, NoteStore};
pub use core_notes::{CoreDocument, CoreNotesManager};
pub use dedup::{ConsolidationReport, DuplicatePair, NoteDeduplicator, cosine_similarity};
pub use lock::{LockMode, ScopedLock};
