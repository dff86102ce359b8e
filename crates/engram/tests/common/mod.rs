//! Shared helpers for integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use engram::config::{Config, StorageConfig};
use engram::storage::{ArchiveManager, Embedder};
use engram::testing::InMemoryNoteStore;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a test-writer subscriber once per test binary. `RUST_LOG`
/// overrides the default `engram=debug` filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("engram=debug"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer())
        .try_init();
}

/// Config with both file-backed tiers rooted at `dir`.
pub fn test_config(dir: &Path) -> Config {
    Config {
        storage: StorageConfig::in_dir(dir),
        ..Default::default()
    }
}

/// Archive manager over a fresh in-memory Working tier.
pub fn create_archive(
    dir: &Path,
    embedder: Arc<dyn Embedder>,
) -> (ArchiveManager, Arc<InMemoryNoteStore>) {
    let store = Arc::new(InMemoryNoteStore::new());
    let archive = ArchiveManager::new(dir.join("archive.jsonl"), store.clone(), embedder);
    (archive, store)
}
