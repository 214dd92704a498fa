//! End-to-end store scenarios: store/retrieve, semantic ordering, filename
//! renames, counter write-back, and obsoletion.

use engram_memory::ChunkDraft;
use engram_memory::ChunkPatch;
use engram_memory::ChunkStatus;
use engram_memory::ChunkType;
use engram_memory::EpistemicStatus;
use engram_memory::MemoryErr;
use engram_memory::MemoryStore;
use engram_memory::StoreConfig;
use engram_memory::codec;
use engram_memory::storage::slugify;
use pretty_assertions::assert_eq;

fn draft(summary: &str, chunk_type: ChunkType, tags: &[&str]) -> ChunkDraft {
    ChunkDraft {
        summary: Some(summary.to_string()),
        chunk_type: Some(chunk_type),
        epistemic: Some(EpistemicStatus::Established),
        surface_tags: Some(tags.iter().map(|t| t.to_string()).collect()),
        ..ChunkDraft::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn store_and_retrieve() {
    let tmp = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(StoreConfig::new(tmp.path())).await.unwrap();

    let id = store
        .store_chunk("hello world", draft("greet", ChunkType::Fact, &["hello"]))
        .await
        .unwrap();
    assert_eq!(id.len(), 6);
    assert!(id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));

    let chunks = store.get_chunks(&[id.clone()]).await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].content, "hello world");
    assert_eq!(chunks[0].retrieved_count, 0);
    assert_eq!(chunks[0].status, ChunkStatus::Active);

    let stats = store.stats().await;
    assert_eq!(stats.chunk_count, 1);
    assert_eq!(stats.indexed_count, 1);

    store.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_required_field_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(StoreConfig::new(tmp.path())).await.unwrap();

    let incomplete = ChunkDraft {
        summary: Some("greet".to_string()),
        ..ChunkDraft::default()
    };
    let err = store.store_chunk("hello", incomplete).await.unwrap_err();
    assert!(matches!(err, MemoryErr::MissingRequiredField { field: "type" }));
    assert_eq!(store.stats().await.chunk_count, 0);

    store.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn semantic_ordering_puts_the_best_match_first() {
    let tmp = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(StoreConfig::new(tmp.path())).await.unwrap();

    let equity = store
        .store_chunk(
            "A framework for evaluating startup equity offers against cash compensation.",
            draft(
                "Framework for evaluating startup equity offers",
                ChunkType::Framework,
                &["startup equity", "job offers", "compensation"],
            ),
        )
        .await
        .unwrap();
    store
        .store_chunk(
            "Expected value reasoning for evaluating job offers under uncertainty.",
            draft("Decision making under uncertainty", ChunkType::Framework, &["decisions"]),
        )
        .await
        .unwrap();
    let carbonara = store
        .store_chunk(
            "Guanciale, eggs, pecorino romano, black pepper.",
            draft("Pasta carbonara recipe", ChunkType::Fact, &["cooking"]),
        )
        .await
        .unwrap();
    store
        .store_chunk(
            "Preparation and anchoring for salary discussions.",
            draft("Negotiating salary", ChunkType::Insight, &["negotiation", "job offers"]),
        )
        .await
        .unwrap();
    store
        .store_chunk(
            "Breathing and grounding techniques.",
            draft("Techniques for anxiety", ChunkType::Emotional, &["calm"]),
        )
        .await
        .unwrap();

    let hits = store.query("startup job offer evaluation", 3).await.unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].id, equity);

    let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    assert!(!ids.contains(&carbonara.as_str()));

    // Distinct ids, content stripped from results.
    let mut unique = ids.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), 3);

    store.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn update_changes_the_filename() {
    let tmp = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(StoreConfig::new(tmp.path())).await.unwrap();

    let id = store
        .store_chunk("body", draft("old", ChunkType::Fact, &["t"]))
        .await
        .unwrap();
    let chunks_dir = tmp.path().join("chunks");
    assert!(chunks_dir.join(format!("{id}-old.md")).exists());

    let patch = ChunkPatch {
        summary: Some("brand new".to_string()),
        ..ChunkPatch::default()
    };
    let updated = store.update_chunk(&id, patch, None).await.unwrap();
    assert_eq!(updated.summary, "brand new");

    assert!(!chunks_dir.join(format!("{id}-old.md")).exists());
    assert!(chunks_dir.join(format!("{id}-brand-new.md")).exists());

    store.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn update_merges_fields_and_advances_updated() {
    let tmp = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(StoreConfig::new(tmp.path())).await.unwrap();

    let id = store
        .store_chunk("tomato gardening in raised beds", draft("garden note", ChunkType::Log, &["garden"]))
        .await
        .unwrap();
    let before = store.get_chunks(&[id.clone()]).await.unwrap().remove(0);

    let patch = ChunkPatch {
        epistemic: Some(EpistemicStatus::Working),
        ..ChunkPatch::default()
    };
    let updated = store
        .update_chunk(&id, patch, Some("sailing routes around pemba island".to_string()))
        .await
        .unwrap();
    assert_eq!(updated.epistemic, EpistemicStatus::Working);
    assert_eq!(updated.summary, "garden note");
    assert_eq!(updated.content, "sailing routes around pemba island");
    assert!(updated.updated > before.updated);
    assert_eq!(updated.created, before.created);

    // The index now reflects the new content.
    let hits = store.query("sailing routes pemba", 1).await.unwrap();
    assert_eq!(hits[0].id, id);

    store.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn update_of_unknown_chunk_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(StoreConfig::new(tmp.path())).await.unwrap();

    let err = store
        .update_chunk("abc123", ChunkPatch::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryErr::ChunkNotFound { .. }));

    store.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn query_increments_counters_and_advances_accessed() {
    let tmp = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(StoreConfig::new(tmp.path())).await.unwrap();

    let id = store
        .store_chunk("anything at all", draft("note", ChunkType::Log, &["misc"]))
        .await
        .unwrap();
    let initial = store.get_chunks(&[id.clone()]).await.unwrap().remove(0);

    let first = store.query("anything", 1).await.unwrap();
    assert_eq!(first.len(), 1);
    let second = store.query("anything", 1).await.unwrap();
    assert_eq!(second[0].retrieved_count, 2);

    let chunk = store.get_chunks(&[id]).await.unwrap().remove(0);
    assert_eq!(chunk.retrieved_count, 2);
    assert!(chunk.accessed > initial.accessed);
    assert!(second[0].accessed > first[0].accessed);

    store.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn mark_relevant_updates_counters_and_skips_unknown_ids() {
    let tmp = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(StoreConfig::new(tmp.path())).await.unwrap();

    let id = store
        .store_chunk("body", draft("note", ChunkType::Insight, &["t"]))
        .await
        .unwrap();
    store
        .mark_relevant(&[id.clone(), "ffffff".to_string()])
        .await
        .unwrap();

    let chunk = store.get_chunks(&[id]).await.unwrap().remove(0);
    assert_eq!(chunk.relevant_count, 1);
    assert!(chunk.last_relevant_date.is_some());

    store.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn mark_obsolete_archives_and_records_the_reason() {
    let tmp = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(StoreConfig::new(tmp.path())).await.unwrap();

    let id = store
        .store_chunk("body", draft("note", ChunkType::Fact, &["t"]))
        .await
        .unwrap();
    let archived = store.mark_obsolete(&id, "superseded by xyz").await.unwrap();
    assert_eq!(archived.status, ChunkStatus::Archived);
    assert!(
        archived
            .context_notes
            .as_deref()
            .unwrap()
            .contains("[Obsoleted: superseded by xyz]")
    );

    // Archived chunks stay readable and indexed.
    let chunk = store.get_chunks(&[id.clone()]).await.unwrap().remove(0);
    assert_eq!(chunk.status, ChunkStatus::Archived);
    assert_eq!(store.stats().await.indexed_count, 1);

    // A second obsoletion appends on its own line.
    let again = store.mark_obsolete(&id, "doubly dead").await.unwrap();
    let notes = again.context_notes.unwrap();
    assert!(notes.ends_with("[Obsoleted: doubly dead]"));
    assert!(notes.contains('\n'));

    store.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn on_disk_files_round_trip_and_follow_the_slug_law() {
    let tmp = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(StoreConfig::new(tmp.path())).await.unwrap();

    let summary = "Decision making under uncertainty";
    let id = store
        .store_chunk("weigh the branches", draft(summary, ChunkType::Framework, &["decisions"]))
        .await
        .unwrap();

    let chunks_dir = tmp.path().join("chunks");
    let entry = std::fs::read_dir(&chunks_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .find(|name| name.starts_with(&id))
        .expect("chunk file missing");

    // Slug law: the filename portion after `-` equals slugify(summary).
    let slug = entry
        .strip_prefix(&format!("{id}-"))
        .and_then(|rest| rest.strip_suffix(".md"))
        .unwrap();
    assert_eq!(slug, slugify(summary));

    // Round trip: parsing the file yields the stored chunk.
    let text = std::fs::read_to_string(chunks_dir.join(&entry)).unwrap();
    let parsed = codec::parse(&text, &entry).unwrap();
    let stored = store.get_chunks(&[id]).await.unwrap().remove(0);
    assert_eq!(parsed, stored);

    store.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn audit_log_records_the_operation_trail() {
    let tmp = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(StoreConfig::new(tmp.path())).await.unwrap();

    let id = store
        .store_chunk("hello world", draft("greet", ChunkType::Fact, &["hello"]))
        .await
        .unwrap();
    store.query("hello", 1).await.unwrap();
    store.mark_obsolete(&id, "done").await.unwrap();

    let log = store.audit_log(None).await.unwrap();
    assert!(log.contains("INIT"));
    assert!(log.contains(&format!("STORE {id}")));
    assert!(log.contains("QUERY"));
    assert!(log.contains("RETRIEVE"));
    assert!(log.contains(&format!("OBSOLETE {id} done")));

    store.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn operations_fail_after_shutdown() {
    let tmp = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(StoreConfig::new(tmp.path())).await.unwrap();
    store.shutdown().await;

    let err = store
        .store_chunk("body", draft("note", ChunkType::Fact, &["t"]))
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryErr::NotInitialized));
}

#[tokio::test(flavor = "multi_thread")]
async fn reopen_rebuilds_the_index_from_disk() {
    let tmp = tempfile::tempdir().unwrap();

    let id = {
        let store = MemoryStore::open(StoreConfig::new(tmp.path())).await.unwrap();
        let id = store
            .store_chunk(
                "the lighthouse keeper's logbook",
                draft("coastal log", ChunkType::Log, &["sea"]),
            )
            .await
            .unwrap();
        store.shutdown().await;
        id
    };

    let store = MemoryStore::open(StoreConfig::new(tmp.path())).await.unwrap();
    let stats = store.stats().await;
    assert_eq!(stats.chunk_count, 1);
    assert_eq!(stats.indexed_count, 1);

    let hits = store.query("lighthouse logbook", 1).await.unwrap();
    assert_eq!(hits[0].id, id);

    store.shutdown().await;
}
