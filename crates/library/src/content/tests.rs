use super::*;
use crate::catalog;
use crate::fixtures::{CountingMaterializer, Harness, omnibus_epub};
use futures::future::join_all;
use vellum_extract::models::{Work, WorkKind};
use vellum_registry::MemoryRegistry;
use vellum_storage::StorageBackend;
use vellum_storage::backend::LocalBackend;

async fn bytes(harness: &Harness, id: Uuid) -> Vec<u8> {
    harness.content.get_content(id).await.unwrap().into_bytes().unwrap()
}

#[tokio::test]
async fn test_second_get_is_a_hit() {
    let harness = Harness::new().await;
    let book = harness.add_omnibus("omnibus.epub", 3).await;
    let ids = harness.process(&book).await;

    let first = bytes(&harness, ids[1]).await;
    let second = bytes(&harness, ids[1]).await;
    assert_eq!(first, second);
    assert_eq!(harness.materializer.count(), 1);
    assert_eq!(harness.artifacts.write_count(), 1);
}

#[tokio::test]
async fn test_content_holds_only_its_work() {
    let harness = Harness::new().await;
    let book = harness.add_omnibus("omnibus.epub", 3).await;
    let ids = harness.process(&book).await;

    let content = harness.content.get_content(ids[1]).await.unwrap();
    assert_eq!(content.virtual_book().position, 2);
    let size = content.size();
    let bytes = content.into_bytes().unwrap();
    assert_eq!(bytes.len() as u64, size);
    let container = vellum_container::read(&bytes).unwrap();
    assert_eq!(container.spine, vec!["text/book2.xhtml".to_string()]);
    assert_eq!(container.metadata.title, "Book 2");
    assert!(container.contains("css/base.css"));
    assert!(!container.contains("text/book1.xhtml"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_gets_share_one_extraction() {
    let harness = Harness::builder().delay(Duration::from_millis(100)).build().await;
    let book = harness.add_omnibus("omnibus.epub", 2).await;
    let ids = harness.process(&book).await;

    let results = join_all((0..8).map(|_| harness.content.get_content(ids[0]))).await;
    let sizes: Vec<u64> = results.into_iter().map(|r| r.unwrap().size()).collect();
    assert!(sizes.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(harness.materializer.count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cold_gets_on_disk_are_both_served() {
    let dir = tempfile::tempdir().unwrap();
    let library: BackendHandle = Arc::new(LocalBackend::new("library", dir.path().join("library")).unwrap());
    let artifacts: BackendHandle = Arc::new(LocalBackend::new("artifacts", dir.path().join("artifacts")).unwrap());
    library.write(Path::new("omnibus.epub"), &omnibus_epub("The Trilogy", 2)).await.unwrap();
    let file = library.stat(Path::new("omnibus.epub")).await.unwrap();
    let book = catalog::describe(&library, &file).await;
    let registry: RegistryHandle = Arc::new(MemoryRegistry::new());
    registry.upsert_book(&book).await.unwrap();
    let works = vec![Work::new("Book 1", 1, "text/book1.xhtml", WorkKind::Entry)];
    let id = registry.replace_for_parent(&book.id, &works).await.unwrap().virtual_books[0].id;

    let materializer = Arc::new(CountingMaterializer::with_delay(Duration::from_millis(100)));
    let options = ContentOptions { timeout: Duration::from_secs(2), ..Default::default() };
    let cache = ContentCache::new(library, artifacts, registry, materializer.clone(), options);

    // Both results stay alive until both calls have returned.
    let (first, second) = tokio::join!(cache.get_content(id), cache.get_content(id));
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_eq!(first.size(), second.size());
    assert_eq!(materializer.count(), 1);
    assert_eq!(first.into_bytes().unwrap(), second.into_bytes().unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_held_content_does_not_block_other_readers() {
    let options = ContentOptions { timeout: Duration::from_secs(2), ..Default::default() };
    let harness = Harness::builder().content(options).delay(Duration::from_millis(50)).build().await;
    let book = harness.add_omnibus("omnibus.epub", 2).await;
    let ids = harness.process(&book).await;

    let held = join_all((0..4).map(|_| harness.content.get_content(ids[0]))).await;
    assert!(held.iter().all(|r| r.is_ok()));
    assert!(harness.content.get_content(ids[0]).await.is_ok());
    assert_eq!(harness.materializer.count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_ids_extract_independently() {
    let harness = Harness::new().await;
    let book = harness.add_omnibus("omnibus.epub", 4).await;
    let ids = harness.process(&book).await;

    let results = join_all(ids.iter().map(|id| harness.content.ensure(*id))).await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(harness.materializer.count(), 4);
}

#[tokio::test]
async fn test_modified_parent_is_extracted_again() {
    let harness = Harness::new().await;
    let book = harness.add_omnibus("omnibus.epub", 2).await;
    let ids = harness.process(&book).await;
    harness.content.ensure(ids[0]).await.unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    harness.library.set_modified("omnibus.epub", OffsetDateTime::now_utc()).await;
    harness.content.ensure(ids[0]).await.unwrap();
    assert_eq!(harness.materializer.count(), 2);
    harness.content.ensure(ids[0]).await.unwrap();
    assert_eq!(harness.materializer.count(), 2);
}

#[tokio::test]
async fn test_missing_parent_file_is_not_found() {
    let harness = Harness::new().await;
    let book = harness.add_omnibus("omnibus.epub", 2).await;
    let ids = harness.process(&book).await;
    harness.library.delete(Path::new("omnibus.epub")).await.unwrap();

    let err = harness.content.get_content(ids[0]).await.unwrap_err();
    assert_eq!(*err, ErrorKind::NotFound("omnibus.epub".into()));
    assert_eq!(harness.materializer.count(), 0);
}

#[tokio::test]
async fn test_unknown_id_is_not_found() {
    let harness = Harness::new().await;
    let id = Uuid::new_v4();
    let err = harness.content.get_content(id).await.unwrap_err();
    assert_eq!(*err, ErrorKind::NotFound(id.to_string()));
}

#[tokio::test]
async fn test_unlocatable_anchor_is_unprocessable() {
    let harness = Harness::new().await;
    let book = harness.add_omnibus("omnibus.epub", 2).await;
    harness.process(&book).await;
    let works = vec![Work::new("Lost", 1, "text/missing.xhtml", WorkKind::Entry)];
    let replacement = harness.lifecycle.replace(&book, &works).await.unwrap();

    let err = harness.content.get_content(replacement.virtual_books[0].id).await.unwrap_err();
    assert_eq!(*err, ErrorKind::Unprocessable("text/missing.xhtml".into()));
}

#[tokio::test]
async fn test_failed_extraction_is_not_cached() {
    let harness = Harness::new().await;
    let book = harness.add_omnibus("omnibus.epub", 2).await;
    let ids = harness.process(&book).await;

    harness.materializer.set_failing(true);
    let err = harness.content.get_content(ids[0]).await.unwrap_err();
    assert_eq!(*err, ErrorKind::Extract);
    assert!(!harness.artifact_exists(ids[0]).await);
    assert!(harness.artifacts.list(None).await.unwrap().is_empty());

    harness.materializer.set_failing(false);
    harness.content.ensure(ids[0]).await.unwrap();
    assert_eq!(harness.materializer.count(), 2);
}

#[tokio::test]
async fn test_slow_extraction_times_out() {
    let options = ContentOptions { timeout: Duration::from_millis(20), ..Default::default() };
    let harness = Harness::builder().content(options).delay(Duration::from_millis(200)).build().await;
    let book = harness.add_omnibus("omnibus.epub", 2).await;
    let ids = harness.process(&book).await;

    let err = harness.content.get_content(ids[0]).await.unwrap_err();
    assert!(matches!(*err, ErrorKind::Timeout(_)));
}

#[tokio::test]
async fn test_purge() {
    let harness = Harness::new().await;
    let book = harness.add_omnibus("omnibus.epub", 2).await;
    let ids = harness.process(&book).await;
    harness.content.ensure(ids[0]).await.unwrap();

    assert!(harness.content.purge(ids[0]).await.unwrap());
    assert!(!harness.artifact_exists(ids[0]).await);
    assert!(!harness.content.purge(ids[0]).await.unwrap());
}

#[tokio::test]
async fn test_sweep_evicts_idle_artifacts_but_not_open_ones() {
    let options = ContentOptions { eviction_age: Duration::ZERO, ..Default::default() };
    let harness = Harness::builder().content(options).build().await;
    let book = harness.add_omnibus("omnibus.epub", 2).await;
    let ids = harness.process(&book).await;
    harness.content.ensure(ids[0]).await.unwrap();
    let open = harness.content.get_content(ids[1]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let report = harness.content.sweep().await.unwrap();
    assert_eq!(report, SweepReport { evicted: 1, busy: 1, partials: 0 });
    assert!(!harness.artifact_exists(ids[0]).await);
    assert!(harness.artifact_exists(ids[1]).await);

    let bytes = open.into_bytes().unwrap();
    assert!(vellum_container::read(&bytes).is_ok());
    assert_eq!(harness.content.sweep().await.unwrap().evicted, 1);
}

#[tokio::test]
async fn test_sweep_keeps_recently_used_artifacts() {
    let harness = Harness::new().await;
    let book = harness.add_omnibus("omnibus.epub", 2).await;
    let ids = harness.process(&book).await;
    harness.content.ensure(ids[0]).await.unwrap();
    assert_eq!(harness.content.sweep().await.unwrap(), SweepReport::default());
    assert!(harness.artifact_exists(ids[0]).await);
}

#[tokio::test]
async fn test_sweep_removes_abandoned_partials() {
    let harness = Harness::new().await;
    let stale = Path::new(PARTIAL_DIR).join("abandoned.1");
    let fresh = Path::new(PARTIAL_DIR).join("in-flight.2");
    harness.artifacts.write(&stale, b"half").await.unwrap();
    harness.artifacts.write(&fresh, b"half").await.unwrap();
    let long_ago = OffsetDateTime::now_utc() - time::Duration::minutes(10);
    harness.artifacts.set_modified(&stale, long_ago).await;

    let report = harness.content.sweep().await.unwrap();
    assert_eq!(report.partials, 1);
    assert!(!harness.artifacts.exists(&stale).await.unwrap());
    assert!(harness.artifacts.exists(&fresh).await.unwrap());
}

#[tokio::test]
async fn test_background_sweeper() {
    let options = ContentOptions { eviction_age: Duration::ZERO, ..Default::default() };
    let harness = Harness::builder().content(options).build().await;
    let book = harness.add_omnibus("omnibus.epub", 2).await;
    let ids = harness.process(&book).await;
    harness.content.ensure(ids[0]).await.unwrap();

    let sweeper = harness.content.clone().spawn_sweeper(Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(100)).await;
    sweeper.abort();
    assert!(!harness.artifact_exists(ids[0]).await);
}

#[tokio::test]
async fn test_clear() {
    let harness = Harness::new().await;
    let book = harness.add_omnibus("omnibus.epub", 3).await;
    let ids = harness.process(&book).await;
    harness.content.ensure(ids[0]).await.unwrap();
    harness.content.ensure(ids[2]).await.unwrap();
    harness.artifacts.write(&Path::new(PARTIAL_DIR).join("x.1"), b"half").await.unwrap();

    assert_eq!(harness.content.clear().await.unwrap(), 2);
    assert!(harness.artifacts.list(None).await.unwrap().is_empty());
}

#[test]
fn test_artifact_paths() {
    let id = Uuid::new_v4();
    assert_eq!(artifact_id(&artifact_path(id)), Some(id));
    assert_eq!(artifact_id(&partial_path(id)), None);
    assert_eq!(artifact_id(Path::new("artifacts/notes.txt")), None);
    assert_eq!(artifact_id(Path::new("elsewhere/a.epub")), None);
}
