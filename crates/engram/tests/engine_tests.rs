//! Integration tests for the memory engine across all three tiers

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use engram::config::Config;
use engram::memory::types::{CoreCategory, ImportanceHint, ScoredNote, note_id_for};
use engram::storage::NoteStore;
use engram::testing::{FailingEmbedder, FixedEmbedder, InMemoryNoteStore, MockEmbedder};
use engram::{IngestOutcome, MemoryEngine, ReconcileReport};
use tempfile::tempdir;

fn create_engine(config: Config) -> (MemoryEngine, Arc<InMemoryNoteStore>) {
    common::init_tracing();
    let store = Arc::new(InMemoryNoteStore::new());
    let engine = MemoryEngine::new(config, store.clone(), Arc::new(MockEmbedder::new()));
    (engine, store)
}

mod ingest {
    use super::*;

    #[tokio::test]
    async fn test_identity_fact_is_pinned() {
        let dir = tempdir().unwrap();
        let (engine, store) = create_engine(common::test_config(dir.path()));

        let outcome = engine
            .ingest("My name is Alex and I live in Berlin", "Identity", None)
            .await
            .unwrap();

        assert_eq!(outcome, IngestOutcome::Core(CoreCategory::Identity));
        assert!(store.is_empty(), "core facts never enter the working tier");
        assert_eq!(
            engine.core().get_all().unwrap()[&CoreCategory::Identity],
            vec!["My name is Alex and I live in Berlin"]
        );

        let again = engine
            .ingest("My name is Alex and I live in Berlin", "Identity", None)
            .await
            .unwrap();
        assert_eq!(
            again,
            IngestOutcome::Duplicate(note_id_for("My name is Alex and I live in Berlin"))
        );
    }

    #[tokio::test]
    async fn test_ordinary_fact_goes_to_working() {
        let dir = tempdir().unwrap();
        let (engine, store) = create_engine(common::test_config(dir.path()));

        let outcome = engine
            .ingest("Ordered a new keyboard with brown switches", "Events", None)
            .await
            .unwrap();

        let IngestOutcome::Working(id) = outcome else {
            panic!("expected working note, got {outcome:?}");
        };
        let note = store.get(id).await.unwrap().unwrap();
        assert_eq!(note.section, "Events");
        assert_eq!(
            note.decay_rate,
            engine
                .scorer()
                .suggest_decay_rate("Ordered a new keyboard with brown switches", "Events")
        );
        assert_eq!(store.embedding(id).unwrap().len(), 384);

        assert_eq!(
            engine
                .ingest("Ordered a new keyboard with brown switches", "Events", None)
                .await
                .unwrap(),
            IngestOutcome::Duplicate(id)
        );
    }

    #[tokio::test]
    async fn test_core_hint_without_category_stays_working() {
        let dir = tempdir().unwrap();
        let (engine, _store) = create_engine(common::test_config(dir.path()));

        let outcome = engine
            .ingest("The bakery closes early on Sundays", "Misc", Some(ImportanceHint::Core))
            .await
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::Working(_)));
    }

    #[tokio::test]
    async fn test_embedder_outage_still_stores() {
        let dir = tempdir().unwrap();
        let store = Arc::new(InMemoryNoteStore::new());
        let engine = MemoryEngine::new(
            common::test_config(dir.path()),
            store.clone(),
            Arc::new(FailingEmbedder),
        );

        let IngestOutcome::Working(id) = engine
            .ingest("Picked up a library book on birds", "Events", None)
            .await
            .unwrap()
        else {
            panic!("expected working note");
        };
        assert!(store.embedding(id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reingesting_archived_fact_restores_it() {
        let dir = tempdir().unwrap();
        let (engine, store) = create_engine(common::test_config(dir.path()));
        let content = "Borrowed a ladder from the neighbours";

        let IngestOutcome::Working(id) = engine.ingest(content, "Events", None).await.unwrap() else {
            panic!("expected working note");
        };
        assert!(engine.archive().archive(id, "manual", true).await.unwrap());

        let outcome = engine.ingest(content, "Events", None).await.unwrap();

        assert_eq!(outcome, IngestOutcome::Restored(id));
        assert!(!engine.archive().has_active(id).await.unwrap());
        assert_eq!(engine.reconcile().await.unwrap().total(), 0);
        assert!(store.get(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_restored_fact_takes_higher_new_score() {
        let dir = tempdir().unwrap();
        let (engine, store) = create_engine(common::test_config(dir.path()));
        let note = ScoredNote::new("Booked a dentist appointment", "Events", 0.05, 0.02);
        store.insert(note.clone(), vec![]);
        engine.archive().archive(note.note_id, "manual", true).await.unwrap();

        let outcome = engine
            .ingest(&note.content, "Events", Some(ImportanceHint::High))
            .await
            .unwrap();

        assert_eq!(outcome, IngestOutcome::Restored(note.note_id));
        let restored = store.get(note.note_id).await.unwrap().unwrap();
        assert!(restored.importance > 0.15);
    }
}

mod access {
    use super::*;

    #[tokio::test]
    async fn test_record_access_keeps_stored_embedding() {
        let dir = tempdir().unwrap();
        let store = Arc::new(InMemoryNoteStore::new());
        let engine = MemoryEngine::new(
            common::test_config(dir.path()),
            store.clone(),
            Arc::new(FailingEmbedder),
        );
        let note = ScoredNote::new("Keeps spare keys in the blue jar", "Misc", 0.4, 0.02);
        store.insert(note.clone(), vec![0.5, 0.5]);

        assert!(engine.record_access(note.note_id, Utc::now()).await.unwrap());

        assert_eq!(store.embedding(note.note_id).unwrap(), vec![0.5, 0.5]);
        assert_eq!(store.get(note.note_id).await.unwrap().unwrap().access_count, 1);
    }
}

mod promotion {
    use super::*;

    #[tokio::test]
    async fn test_promote_moves_note_to_core() {
        let dir = tempdir().unwrap();
        let (engine, store) = create_engine(common::test_config(dir.path()));
        let note = ScoredNote::new("My brother Tom lives in Oslo", "Relationships", 0.6, 0.01);
        store.insert(note.clone(), vec![]);

        assert!(engine.promote(note.note_id, None).await.unwrap());

        assert!(store.get(note.note_id).await.unwrap().is_none());
        let entries = engine.core().entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].category, CoreCategory::Relationships);
        assert_eq!(entries[0].source, "promotion");
    }

    #[tokio::test]
    async fn test_promote_requires_category() {
        let dir = tempdir().unwrap();
        let (engine, store) = create_engine(common::test_config(dir.path()));
        let note = ScoredNote::new("The bus was late again", "Events", 0.9, 0.01);
        store.insert(note.clone(), vec![]);

        assert!(!engine.promote(note.note_id, None).await.unwrap());
        assert!(store.get(note.note_id).await.unwrap().is_some());

        assert!(engine.promote(note.note_id, Some(CoreCategory::System)).await.unwrap());
        assert!(store.get(note.note_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_promote_candidates_boundary() {
        let dir = tempdir().unwrap();
        let (engine, store) = create_engine(common::test_config(dir.path()));

        let mut ready = ScoredNote::new("I'm working on the engram project", "Projects", 0.8, 0.01);
        ready.access_count = 3;
        let mut not_yet = ScoredNote::new("Maintaining the old billing repo", "Projects", 0.8, 0.01);
        not_yet.access_count = 2;
        let mut no_category = ScoredNote::new("Saw a heron by the river", "Events", 0.9, 0.01);
        no_category.access_count = 10;
        for note in [&ready, &not_yet, &no_category] {
            store.insert(note.clone(), vec![]);
        }

        let promoted = engine.promote_candidates().await.unwrap();

        assert_eq!(promoted, vec![ready.note_id]);
        assert_eq!(store.len(), 2);
        assert_eq!(
            engine.core().get_all().unwrap()[&CoreCategory::Projects],
            vec!["I'm working on the engram project"]
        );
    }
}

mod maintenance {
    use super::*;

    #[tokio::test]
    async fn test_maintenance_archives_decayed_notes() {
        let dir = tempdir().unwrap();
        let (engine, store) = create_engine(common::test_config(dir.path()));
        let now = Utc::now();

        let mut stale = ScoredNote::new("Parked on level three", "Misc", 0.5, 0.01);
        stale.created_at = now - Duration::days(200);
        let fresh = ScoredNote::new("Parked on level four", "Misc", 0.5, 0.01);
        store.insert(stale.clone(), vec![]);
        store.insert(fresh.clone(), vec![]);

        let report = engine.run_maintenance(now).await.unwrap();

        assert!(report.consolidation.is_none());
        assert_eq!(report.archived, 1);
        assert_eq!(report.purged, 0);
        assert!(store.get(stale.note_id).await.unwrap().is_none());
        assert!(engine.archive().has_active(stale.note_id).await.unwrap());

        assert!(engine.archive().restore(stale.note_id, None).await.unwrap());
        let restored = store.get(stale.note_id).await.unwrap().unwrap();
        assert!((restored.importance - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_maintenance_consolidates_over_capacity() {
        let dir = tempdir().unwrap();
        let mut config = common::test_config(dir.path());
        config.consolidation.max_working_notes = 2;

        let store = Arc::new(InMemoryNoteStore::new());
        let embedder = FixedEmbedder::new()
            .with("Likes green tea", vec![1.0, 0.0])
            .with("Enjoys green tea", vec![0.99, 0.141])
            .with("Owns a bicycle", vec![0.0, 1.0]);
        let engine = MemoryEngine::new(config, store.clone(), Arc::new(embedder));

        for content in ["Likes green tea", "Enjoys green tea", "Owns a bicycle"] {
            let outcome = engine.ingest(content, "Preferences", None).await.unwrap();
            assert!(matches!(outcome, IngestOutcome::Working(_)));
        }

        let report = engine.run_maintenance(Utc::now()).await.unwrap();

        let consolidation = report.consolidation.expect("tier was over capacity");
        assert_eq!(consolidation.notes_merged, 1);
        assert_eq!(store.len(), 2);
        assert_eq!(engine.archive().stats().await.unwrap().active, 1);
    }

    #[tokio::test]
    async fn test_maintenance_purges_with_retention() {
        let dir = tempdir().unwrap();
        let mut config = common::test_config(dir.path());
        config.archive.retention_days = Some(30);
        let (engine, store) = create_engine(config);

        let note = ScoredNote::new("Temporary fact about parking", "Misc", 0.3, 0.02);
        store.insert(note.clone(), vec![]);
        engine.archive().archive(note.note_id, "manual", true).await.unwrap();

        let later = Utc::now() + Duration::days(31);
        let report = engine.run_maintenance(later).await.unwrap();

        assert_eq!(report.purged, 1);
        assert!(engine.archive().get(note.note_id).await.unwrap().is_none());
    }
}

mod reconcile {
    use super::*;

    #[tokio::test]
    async fn test_reconcile_finishes_half_done_moves() {
        let dir = tempdir().unwrap();
        let (engine, store) = create_engine(common::test_config(dir.path()));

        let half_archived = ScoredNote::new("Archived but never deleted", "Misc", 0.3, 0.02);
        let half_promoted = ScoredNote::new("Works as a data engineer", "Identity", 0.7, 0.01);
        let untouched = ScoredNote::new("Plain working note here", "Misc", 0.3, 0.02);
        for note in [&half_archived, &half_promoted, &untouched] {
            store.insert(note.clone(), vec![]);
        }

        engine
            .archive()
            .archive(half_archived.note_id, "crash test", false)
            .await
            .unwrap();
        engine
            .core()
            .add_to(&half_promoted.content, CoreCategory::Identity, "promotion")
            .unwrap();

        let report = engine.reconcile().await.unwrap();

        assert_eq!(
            report,
            ReconcileReport {
                archived_removed: 1,
                promoted_removed: 1
            }
        );
        assert_eq!(store.len(), 1);
        assert!(store.get(untouched.note_id).await.unwrap().is_some());

        assert_eq!(engine.reconcile().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_keeps_notes_only_overlapping_core() {
        let dir = tempdir().unwrap();
        let (engine, store) = create_engine(common::test_config(dir.path()));
        engine
            .core()
            .add_to("Alex works at Acme and loves green tea", CoreCategory::Identity, "ingest")
            .unwrap();
        let note = ScoredNote::new("green tea", "Preferences", 0.4, 0.02);
        store.insert(note.clone(), vec![]);

        let report = engine.reconcile().await.unwrap();

        assert_eq!(report, ReconcileReport::default());
        assert!(store.get(note.note_id).await.unwrap().is_some());
    }
}
