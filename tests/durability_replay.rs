//! Replay and persistence equivalence: the state reached by driving
//! [`AppContext`] directly must match the state reached by replaying the WAL
//! it wrote into a cold [`vectordb_core::repository::Repository`].

use vectordb_core::config::Config;
use vectordb_core::context::AppContext;
use vectordb_core::domain::IndexAlgo;
use vectordb_core::metrics::Metric;
use vectordb_core::repository::Repository;

#[test]
fn wal_replay_reaches_the_same_repository_image_as_direct_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = AppContext::new(Config::with_data_dir(dir.path())).unwrap();

    let library = ctx.create_library("lib".into(), None).unwrap();
    let document = ctx.create_document(library.id, "doc".into()).unwrap();
    let a = ctx.create_chunk(library.id, document.id, "alpha".into(), true).unwrap();
    ctx.create_chunk(library.id, document.id, "beta".into(), true).unwrap();
    ctx.update_chunk_text(library.id, a.id, "alpha revised".into()).unwrap();
    ctx.delete_document(library.id, document.id).unwrap();

    let replay_target = Repository::new();
    ctx.durability.bootstrap(&replay_target).unwrap();

    assert_eq!(replay_target.dump_json(), ctx.repo.dump_json());
}

#[test]
fn snapshot_then_hydrate_round_trips_the_repository_image() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = AppContext::new(Config::with_data_dir(dir.path())).unwrap();

    let library = ctx.create_library("lib".into(), None).unwrap();
    let document = ctx.create_document(library.id, "doc".into()).unwrap();
    ctx.create_chunk(library.id, document.id, "hello".into(), true).unwrap();
    ctx.build_index(library.id, IndexAlgo::Flat, Metric::Cosine, serde_json::json!({})).unwrap();

    let image_before = ctx.repo.dump_json();
    ctx.snapshot().unwrap();

    let fresh = Repository::new();
    ctx.durability.bootstrap(&fresh).unwrap();
    assert_eq!(fresh.dump_json(), image_before);

    let stats = ctx.storage_stats();
    assert!(stats.snapshot_bytes > 0);
    assert_eq!(stats.wal_bytes, 0);
}
