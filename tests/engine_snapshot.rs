use std::path::{Path, PathBuf};
use std::sync::Arc;

use cricket_insights::aggregate::{Entity, Scope};
use cricket_insights::config::EngineConfig;
use cricket_insights::engine::Engine;
use cricket_insights::ingest::{self, MatchDocument};
use cricket_insights::predict::ModelSlot;
use cricket_insights::synthetic::{self, SyntheticConfig};
use cricket_insights::target::{ResourceTableRegistry, TargetRequest};
use cricket_insights::{Aggregate, dataset};

fn fixture_doc() -> MatchDocument {
    MatchDocument::read(Path::new("tests/fixtures/two_teams.json")).expect("fixture reads")
}

fn engine() -> Engine {
    Engine::new(
        EngineConfig::default(),
        fixture_doc().into_store().unwrap(),
        ModelSlot::Unavailable("not needed".to_string()),
        ResourceTableRegistry::new(),
    )
}

#[test]
fn readers_keep_their_snapshot_across_refresh() {
    let engine = engine();
    let before = engine.snapshot();
    let old_version = engine.version();

    let league = synthetic::generate(&SyntheticConfig {
        matches: 10,
        ..SyntheticConfig::default()
    });
    engine.refresh(league.into_store().unwrap());

    assert_eq!(before.version(), &old_version);
    assert!(before.store.has_team("Alpha"));
    assert_ne!(engine.version(), old_version);
    assert!(!engine.snapshot().store.has_team("Alpha"));

    let alpha = engine.aggregate(&Scope::Career, &Entity::Team("Alpha".to_string()));
    assert!(alpha.is_no_data());
    let old_alpha = before
        .aggregates
        .team("Alpha", &Scope::Career)
        .expect("old snapshot still answers");
    assert_eq!(old_alpha.matches, 3);
}

#[test]
fn installing_tables_keeps_statistics() {
    let engine = engine();
    let before = engine.snapshot();
    let req = TargetRequest::before_start(180, 20, 15, "t20-test");
    assert!(engine.adjust_target(&req).is_err());

    let tables = ResourceTableRegistry::load_dir(Path::new("tests/fixtures/tables")).unwrap();
    engine.install_tables(tables);
    let after = engine.snapshot();

    assert!(Arc::ptr_eq(&before.aggregates, &after.aggregates));
    assert_eq!(before.version(), after.version());
    assert!(engine.adjust_target(&req).is_ok());
}

#[test]
fn refreshing_with_the_same_data_keeps_the_version() {
    let engine = engine();
    let version = engine.version();
    engine.refresh(fixture_doc().into_store().unwrap());
    assert_eq!(engine.version(), version);
    assert!(matches!(
        engine.aggregate(&Scope::Career, &Entity::Player(1)),
        Aggregate::Stat(_)
    ));
}

#[test]
fn sqlite_round_trip_preserves_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("cricket.sqlite");
    let doc = fixture_doc();
    let expected = doc.clone().into_store().unwrap();

    let mut conn = dataset::open_db(&db_path).unwrap();
    let summary = dataset::save_document(&mut conn, &doc, "test").unwrap();
    assert_eq!(summary.matches_upserted, 3);
    assert_eq!(summary.players_upserted, 8);
    assert_eq!(summary.deliveries_written, expected.delivery_count());

    // Saving again replaces rather than duplicates.
    dataset::save_document(&mut conn, &doc, "test").unwrap();
    let loaded = dataset::load_store(&conn).unwrap();
    assert_eq!(loaded.matches(), expected.matches());
    assert_eq!(loaded.version(), expected.version());

    let engine = Engine::from_config(EngineConfig {
        db_path: Some(db_path),
        ..EngineConfig::default()
    })
    .unwrap();
    assert_eq!(engine.version(), *expected.version());
}

#[test]
fn documents_merge_and_write_back() {
    let dir = tempfile::tempdir().unwrap();
    let league = synthetic::generate(&SyntheticConfig {
        matches: 5,
        ..SyntheticConfig::default()
    });
    let out = dir.path().join("league.json");
    league.write(&out).unwrap();

    let store = ingest::load_store(&[out, PathBuf::from("tests/fixtures/two_teams.json")]);
    let err = store.expect_err("match ids 1..3 collide");
    assert!(format!("{err:#}").contains("appears more than once"));
}
