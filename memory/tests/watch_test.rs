//! External-edit reconciliation: a rewrite of a chunk file becomes
//! queryable without going through the store, and a deletion unindexes it.

use std::path::Path;
use std::time::Duration;

use engram_memory::ChunkDraft;
use engram_memory::ChunkType;
use engram_memory::EpistemicStatus;
use engram_memory::MemoryStore;
use engram_memory::StoreConfig;
use engram_memory::codec;
use pretty_assertions::assert_eq;

fn draft(summary: &str, tags: &[&str]) -> ChunkDraft {
    ChunkDraft {
        summary: Some(summary.to_string()),
        chunk_type: Some(ChunkType::Log),
        epistemic: Some(EpistemicStatus::Working),
        surface_tags: Some(tags.iter().map(|t| t.to_string()).collect()),
        ..ChunkDraft::default()
    }
}

/// Config with the watcher's settle window shortened so the tests stay well
/// inside the reconcile bound.
fn test_config(data_dir: &Path) -> StoreConfig {
    let mut config = StoreConfig::new(data_dir);
    config.watch_settle = Duration::from_millis(100);
    config
}

/// Upper bound for the shortened watcher to settle and reconcile one event.
const RECONCILE_WINDOW: Duration = Duration::from_secs(1);

#[tokio::test(flavor = "multi_thread")]
async fn external_edit_and_delete_reconcile() {
    let tmp = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(test_config(tmp.path())).await.unwrap();

    let id = store
        .store_chunk(
            "tomato gardening in raised beds",
            draft("garden note", &["garden"]),
        )
        .await
        .unwrap();
    store
        .store_chunk(
            "planting tomato seedlings in spring",
            draft("spring planting", &["garden"]),
        )
        .await
        .unwrap();

    // Rewrite the first chunk's file from outside the store with an
    // unrelated body.
    let path = tmp.path().join("chunks").join(format!("{id}-garden-note.md"));
    let text = tokio::fs::read_to_string(&path).await.unwrap();
    let mut chunk = codec::parse(&text, "garden-note.md").unwrap();
    chunk.content = "sailing routes around the pemba island channel".to_string();
    tokio::fs::write(&path, codec::serialize(&chunk).unwrap())
        .await
        .unwrap();

    tokio::time::sleep(RECONCILE_WINDOW).await;

    let hits = store.query("sailing routes pemba channel", 1).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, id);

    // External deletion unindexes the chunk.
    let before = store.stats().await;
    tokio::fs::remove_file(&path).await.unwrap();
    tokio::time::sleep(RECONCILE_WINDOW).await;

    let after = store.stats().await;
    assert_eq!(after.indexed_count, before.indexed_count - 1);
    assert_eq!(after.chunk_count, before.chunk_count - 1);

    let hits = store.query("sailing routes pemba channel", 2).await.unwrap();
    assert!(hits.iter().all(|h| h.id != id));

    store.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn foreign_files_in_the_chunk_directory_are_ignored() {
    let tmp = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(test_config(tmp.path())).await.unwrap();

    store
        .store_chunk("the only real chunk", draft("real", &["t"]))
        .await
        .unwrap();

    let dir = tmp.path().join("chunks");
    tokio::fs::write(dir.join("README.md"), "not a chunk")
        .await
        .unwrap();
    tokio::fs::write(dir.join(".a1b2c3-draft.md.swp"), "editor noise")
        .await
        .unwrap();

    tokio::time::sleep(RECONCILE_WINDOW).await;

    let stats = store.stats().await;
    assert_eq!(stats.chunk_count, 1);
    assert_eq!(stats.indexed_count, 1);

    store.shutdown().await;
}
