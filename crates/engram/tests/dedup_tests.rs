//! Integration tests for near-duplicate consolidation

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use engram::config::ConsolidationConfig;
use engram::memory::types::ScoredNote;
use engram::storage::{NoteDeduplicator, NoteStore, cosine_similarity};
use engram::testing::{InMemoryNoteStore, MockEmbedder};
use proptest::prelude::*;
use tempfile::tempdir;

fn create_dedup(store: Arc<InMemoryNoteStore>) -> NoteDeduplicator {
    NoteDeduplicator::new(store, Arc::new(MockEmbedder::new()))
}

/// A unit vector at cosine 0.9 from `[1, 0]`.
fn vector_at_point_nine() -> Vec<f32> {
    vec![0.9, (1.0f32 - 0.81).sqrt()]
}

#[tokio::test]
async fn test_merge_scenario_sums_access_and_keeps_earliest() {
    common::init_tracing();
    let dir = tempdir().unwrap();
    let (archive, store) = common::create_archive(dir.path(), Arc::new(MockEmbedder::new()));
    let dedup = create_dedup(store.clone());
    let now = Utc::now();

    let mut a = ScoredNote::new("Drinks oat milk in coffee", "Preferences", 0.5, 0.02);
    a.access_count = 2;
    a.created_at = now - Duration::days(3);
    let mut b = ScoredNote::new("Takes coffee with oat milk", "Preferences", 0.4, 0.01);
    b.access_count = 3;
    b.created_at = now - Duration::days(10);
    store.insert(a.clone(), vec![1.0, 0.0]);
    store.insert(b.clone(), vector_at_point_nine());

    let pairs = dedup.find_similar(None, None).await.unwrap();
    assert_eq!(pairs.len(), 1);
    assert!((pairs[0].similarity - 0.9).abs() < 1e-4);

    let report = dedup.run_consolidation_pass(&archive, None).await.unwrap();
    assert_eq!(report.duplicates_found, 1);
    assert_eq!(report.notes_merged, 1);
    assert_eq!(report.notes_archived, 1);
    assert_eq!(report.original_count, 2);
    assert_eq!(report.final_count, 1);

    let merged = store.get(a.note_id).await.unwrap().unwrap();
    assert_eq!(merged.content, a.content);
    assert_eq!(merged.access_count, 5);
    assert_eq!(merged.created_at, b.created_at);
    assert_eq!(merged.decay_rate, 0.01);
    assert!((merged.importance - 0.55).abs() < 1e-6);
    assert!(store.get(b.note_id).await.unwrap().is_none());

    let record = archive.get(b.note_id).await.unwrap().unwrap();
    assert!(record.reason.starts_with(&format!("consolidated into {}", a.note_id)));
}

#[tokio::test]
async fn test_pass_below_threshold_changes_nothing() {
    let dir = tempdir().unwrap();
    let (archive, store) = common::create_archive(dir.path(), Arc::new(MockEmbedder::new()));
    let dedup = create_dedup(store.clone());

    store.insert(ScoredNote::new("one", "Misc", 0.3, 0.02), vec![1.0, 0.0]);
    store.insert(ScoredNote::new("two", "Misc", 0.3, 0.02), vec![0.0, 1.0]);

    let report = dedup.run_consolidation_pass(&archive, None).await.unwrap();
    assert_eq!(report.duplicates_found, 0);
    assert_eq!(report.final_count, 2);
    assert!(!archive.path().exists());
}

#[tokio::test]
async fn test_survivor_absorbs_chain() {
    let dir = tempdir().unwrap();
    let (archive, store) = common::create_archive(dir.path(), Arc::new(MockEmbedder::new()));
    let dedup = create_dedup(store.clone());

    let hub = ScoredNote::new("Runs every morning", "Habits", 0.7, 0.02);
    let left = ScoredNote::new("Goes running each morning", "Habits", 0.3, 0.02);
    let right = ScoredNote::new("Morning runs are routine", "Habits", 0.4, 0.02);
    store.insert(hub.clone(), vec![1.0, 0.0, 0.0]);
    store.insert(left.clone(), vec![0.95, 0.3122, 0.0]);
    store.insert(right.clone(), vec![0.95, 0.0, 0.3122]);

    let report = dedup.run_consolidation_pass(&archive, None).await.unwrap();

    assert_eq!(report.notes_merged, 2);
    assert_eq!(store.len(), 1);
    let survivor = store.get(hub.note_id).await.unwrap().unwrap();
    assert!((survivor.importance - 0.8).abs() < 1e-6);
}

#[tokio::test]
async fn test_find_similar_respects_section() {
    let store = Arc::new(InMemoryNoteStore::new());
    let dedup = create_dedup(store.clone());

    store.insert(ScoredNote::new("a", "Work", 0.3, 0.02), vec![1.0, 0.0]);
    store.insert(ScoredNote::new("b", "Work", 0.3, 0.02), vec![1.0, 0.0]);
    store.insert(ScoredNote::new("c", "Home", 0.3, 0.02), vec![1.0, 0.0]);

    assert_eq!(dedup.find_similar(None, None).await.unwrap().len(), 3);
    assert_eq!(dedup.find_similar(None, Some("work")).await.unwrap().len(), 1);
    assert_eq!(dedup.find_similar(Some(1.01), None).await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_custom_threshold_from_config() {
    let store = Arc::new(InMemoryNoteStore::new());
    let config = ConsolidationConfig {
        similarity_threshold: 0.95,
        ..Default::default()
    };
    let dedup = NoteDeduplicator::with_config(store.clone(), Arc::new(MockEmbedder::new()), config);

    store.insert(ScoredNote::new("a", "Misc", 0.3, 0.02), vec![1.0, 0.0]);
    store.insert(ScoredNote::new("b", "Misc", 0.3, 0.02), vector_at_point_nine());

    assert!(dedup.find_similar(None, None).await.unwrap().is_empty());
}

fn embedding() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-1.0f32..1.0, 3)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// After a pass no two remaining notes are at or above the threshold.
    #[test]
    fn consolidation_leaves_no_duplicate_pairs(
        embeddings in prop::collection::vec(embedding(), 2..12),
        importances in prop::collection::vec(0.0f32..1.0, 12),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let dir = tempdir().unwrap();
            let (archive, store) =
                common::create_archive(dir.path(), Arc::new(MockEmbedder::new()));
            let dedup = create_dedup(store.clone());
            let threshold = dedup.config().similarity_threshold;

            for (i, embedding) in embeddings.iter().enumerate() {
                let note = ScoredNote::new(format!("note {i}"), "Misc", importances[i], 0.02);
                store.insert(note, embedding.clone());
            }

            let report = dedup.run_consolidation_pass(&archive, None).await.unwrap();
            let remaining = store.snapshot();
            prop_assert_eq!(report.final_count, remaining.len());

            for (i, x) in remaining.iter().enumerate() {
                for y in &remaining[i + 1..] {
                    let similarity = cosine_similarity(&x.embedding, &y.embedding);
                    prop_assert!(
                        similarity < threshold,
                        "{} and {} remain at similarity {}",
                        x.note.content,
                        y.note.content,
                        similarity
                    );
                }
            }
            Ok(())
        })?;
    }
}
